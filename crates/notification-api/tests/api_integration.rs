//! HTTP API 集成测试
//!
//! 使用可编排的传输实现，直接对 Router 发起请求。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use notification_api::{ApiSettings, AppState, app};
use notification_worker::test_utils::{ScriptedTransport, rid};
use notification_worker::{
    Category, DeliveryEngine, DeliverySettings, Notifier, RateLimiter, Scheduler,
    SubscriptionRegistry, TransportResult,
};
use notification_worker::scheduler::JobDispatcher;

const API_KEY: &str = "test-api-key";
const WEBHOOK_SECRET: &str = "hook-secret";

struct NoopDispatcher;

impl JobDispatcher for NoopDispatcher {
    fn dispatch(&self, _job_id: &str, _payload: Arc<notification_worker::JobPayload>) {}
}

struct TestApp {
    router: Router,
    transport: Arc<ScriptedTransport>,
    state: AppState,
}

fn settings() -> ApiSettings {
    ApiSettings {
        api_secret_key: Some(API_KEY.to_string()),
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        default_chat_ids: vec![rid("1001")],
        ..ApiSettings::default()
    }
}

fn test_app(settings: ApiSettings) -> TestApp {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = DeliveryEngine::new(
        transport.clone(),
        Arc::new(RateLimiter::new(100.0, 100.0)),
        DeliverySettings::default(),
    );
    let notifier = Arc::new(Notifier::new(
        Arc::new(engine),
        Arc::new(SubscriptionRegistry::new()),
    ));
    let scheduler = Arc::new(Scheduler::with_system_clock(Arc::new(NoopDispatcher)));
    let state = AppState::new(notifier, scheduler, None, settings);
    TestApp {
        router: app(state.clone()),
        transport,
        state,
    }
}

fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_reports_transport_connectivity() {
    let app = test_app(settings());
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["transport"], "scripted");

    app.transport.set_connected(false);
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (_, body) = send(&app.router, request).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["transport_connected"], false);
}

#[tokio::test]
async fn test_api_requires_bearer_key() {
    let app = test_app(settings());

    let request = Request::get("/api/v1/subscriptions").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let request = Request::get("/api/v1/subscriptions")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app.router, authed("GET", "/api/v1/subscriptions", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_api_open_without_configured_key() {
    let app = test_app(ApiSettings {
        api_secret_key: None,
        ..settings()
    });
    let request = Request::get("/api/v1/schedule").body(Body::empty()).unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_notify_reports_per_recipient_results() {
    let app = test_app(settings());
    app.transport.script(
        "-100200",
        vec![TransportResult::PermanentFailure("chat not found".into())],
    );

    let (status, body) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/notify",
            Some(json!({
                "message": "部署完成",
                "chat_ids": ["12345", "-100200", "12345"],
                "parse_mode": "HTML"
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    // 重复接收方只投递一次
    assert_eq!(data["total"], 2);
    assert_eq!(data["succeeded"], 1);
    assert_eq!(data["results"][1]["chat_id"], "-100200");
    assert_eq!(data["results"][1]["success"], false);
    assert_eq!(data["results"][1]["attempts"], 1);
    assert_eq!(data["results"][1]["error_code"], "PERMANENT_DELIVERY_FAILURE");
    assert_eq!(app.transport.calls_for("12345"), 1);
}

#[tokio::test]
async fn test_notify_falls_back_to_default_chats() {
    let app = test_app(settings());
    let (status, body) = send(
        &app.router,
        authed("POST", "/api/v1/notify", Some(json!({"message": "hi"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["results"][0]["chat_id"], "1001");

    let app = test_app(ApiSettings {
        default_chat_ids: Vec::new(),
        ..settings()
    });
    let (status, body) = send(
        &app.router,
        authed("POST", "/api/v1/notify", Some(json!({"message": "hi"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_notify_by_category_uses_subscribers() {
    let app = test_app(settings());
    let registry = app.state.notifier.registry();
    registry.subscribe(rid("501"), Category::Error);
    registry.subscribe(rid("502"), Category::Error);

    let (status, body) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/notify",
            Some(json!({"message": "故障", "category": "error"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(app.transport.calls_for("1001"), 0);
}

#[tokio::test]
async fn test_notify_rejects_invalid_input() {
    let app = test_app(settings());

    let (status, body) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/notify",
            Some(json!({"message": "hi", "chat_id": "not-a-chat"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_RECIPIENT");

    let (status, _) = send(
        &app.router,
        authed("POST", "/api/v1/notify", Some(json!({"message": "   "}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = "x".repeat(4097);
    let (status, _) = send(
        &app.router,
        authed("POST", "/api/v1/notify", Some(json!({"message": long}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.transport.total_calls(), 0);
}

#[tokio::test]
async fn test_webhook_requires_token_and_queues_delivery() {
    let app = test_app(settings());
    let payload = json!({"message": "CPU 过高", "level": "warning", "source": "grafana"});

    let request = Request::post("/webhook/notify")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::post("/webhook/notify")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Token", WEBHOOK_SECRET)
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["recipients"], 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while app.transport.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let sent = app.transport.sent();
    assert_eq!(sent[0].recipient, "1001");
    assert!(sent[0].text.starts_with("⚠️ *grafana*"));
    assert!(sent[0].text.contains("CPU 过高"));
}

#[tokio::test]
async fn test_webhook_rejected_without_configured_secret() {
    let app = test_app(ApiSettings {
        webhook_secret: None,
        ..settings()
    });
    let request = Request::post("/webhook/notify")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Token", "anything")
        .body(Body::from(json!({"message": "x"}).to_string()))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let app = test_app(settings());

    let (status, body) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/subscriptions/12345",
            Some(json!({"category": "system"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["changed"], true);

    let (_, body) = send(&app.router, authed("GET", "/api/v1/subscriptions/12345", None)).await;
    assert_eq!(body["data"]["categories"], json!(["system"]));

    let (_, body) = send(&app.router, authed("GET", "/api/v1/subscriptions", None)).await;
    assert_eq!(body["data"]["stats"]["total_recipients"], 1);

    let (status, body) = send(
        &app.router,
        authed("DELETE", "/api/v1/subscriptions/12345/system", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["changed"], true);

    let (status, _) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/subscriptions/12345",
            Some(json!({"category": "weekly"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_schedule_lifecycle() {
    let app = test_app(settings());
    let job = json!({
        "job_id": "standup",
        "message": "站会开始",
        "chat_ids": ["12345"],
        "trigger": {"type": "cron", "expression": "30 9 * * mon-fri"}
    });

    let (status, body) = send(&app.router, authed("POST", "/api/v1/schedule", Some(job.clone()))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "standup");
    assert_eq!(body["data"]["state"], "active");
    assert_eq!(body["data"]["trigger_kind"], "cron");

    let (status, body) = send(&app.router, authed("POST", "/api/v1/schedule", Some(job))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_JOB");

    let (status, _) = send(
        &app.router,
        authed("POST", "/api/v1/schedule/standup/pause", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app.router, authed("GET", "/api/v1/schedule", None)).await;
    assert_eq!(body["data"][0]["state"], "paused");

    let (_, body) = send(
        &app.router,
        authed("POST", "/api/v1/schedule/standup/resume", None),
    )
    .await;
    assert_eq!(body["data"]["state"], "active");

    let (_, body) = send(&app.router, authed("DELETE", "/api/v1/schedule/standup", None)).await;
    assert_eq!(body["data"]["removed"], true);
    // 重复取消不报错
    let (status, body) = send(&app.router, authed("DELETE", "/api/v1/schedule/standup", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], false);

    let (status, body) = send(
        &app.router,
        authed("POST", "/api/v1/schedule/standup/pause", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "JOB_NOT_FOUND");
}

#[tokio::test]
async fn test_schedule_rejects_invalid_triggers() {
    let app = test_app(settings());

    for trigger in [
        json!({"type": "cron", "expression": "61 * * * *"}),
        json!({"type": "interval", "seconds": 0}),
        json!({"type": "interval", "seconds": 100_000_000_000_000u64}),
        json!({"type": "once", "at": "2000-01-01T00:00:00Z"}),
    ] {
        let (status, body) = send(
            &app.router,
            authed(
                "POST",
                "/api/v1/schedule",
                Some(json!({"job_id": "bad", "message": "x", "trigger": trigger})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_TRIGGER_SPEC");
    }

    let (_, body) = send(&app.router, authed("GET", "/api/v1/schedule", None)).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_system_endpoints_unavailable_without_monitor() {
    let app = test_app(settings());
    let (status, body) = send(&app.router, authed("GET", "/api/v1/system/metrics", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn test_responses_carry_request_id_and_security_headers() {
    let app = test_app(settings());
    let request = Request::get("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}
