//! 测试辅助工具
//!
//! 提供可编排结果的传输实现，供本 crate 与 API 层测试共用。

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::model::{FormatMode, RecipientId};
use crate::transport::{Transport, TransportResult};

/// 构造接收方 ID，测试专用
pub fn rid(id: &str) -> RecipientId {
    RecipientId::new(id).expect("测试用接收方 ID 非空")
}

/// 已发送的消息记录
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: String,
    /// 文本正文，文件投递时为说明
    pub text: String,
    pub format: Option<FormatMode>,
    pub file: Option<PathBuf>,
}

#[derive(Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<TransportResult>>,
    hanging: HashSet<String>,
    calls: HashMap<String, Vec<Instant>>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    sent: Vec<SentMessage>,
}

/// 可编排的传输实现
///
/// 每个接收方的调用结果按脚本依次返回，脚本耗尽后返回成功。
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
    latency: Mutex<Duration>,
    connected: Mutex<bool>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            latency: Mutex::new(Duration::ZERO),
            connected: Mutex::new(true),
        }
    }

    /// 为接收方追加结果脚本
    pub fn script(&self, recipient: &str, results: Vec<TransportResult>) {
        self.state
            .lock()
            .scripts
            .entry(recipient.to_string())
            .or_default()
            .extend(results);
    }

    /// 该接收方的调用永不返回
    pub fn hang(&self, recipient: &str) {
        self.state.lock().hanging.insert(recipient.to_string());
    }

    /// 每次调用的模拟耗时
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }

    pub fn calls_for(&self, recipient: &str) -> usize {
        self.state
            .lock()
            .calls
            .get(recipient)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().map(Vec::len).sum()
    }

    /// 相邻两次调用的间隔
    pub fn call_gaps(&self, recipient: &str) -> Vec<Duration> {
        let state = self.state.lock();
        let Some(calls) = state.calls.get(recipient) else {
            return Vec::new();
        };
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn max_in_flight_for(&self, recipient: &str) -> usize {
        self.state
            .lock()
            .max_in_flight
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    /// 成功发送的消息
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    async fn call(&self, message: SentMessage) -> TransportResult {
        let key = message.recipient.clone();
        let (hang, result) = {
            let mut state = self.state.lock();
            state.calls.entry(key.clone()).or_default().push(Instant::now());
            let in_flight = state.in_flight.entry(key.clone()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_in_flight.entry(key.clone()).or_default();
            *max = (*max).max(current);

            let result = state
                .scripts
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(TransportResult::Success);
            (state.hanging.contains(&key), result)
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(&key) {
            *in_flight -= 1;
        }
        if result.is_success() {
            state.sent.push(message);
        }
        result
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn deliver_text(
        &self,
        recipient: &RecipientId,
        text: &str,
        format: FormatMode,
        _timeout: Duration,
    ) -> TransportResult {
        self.call(SentMessage {
            recipient: recipient.to_string(),
            text: text.to_string(),
            format: Some(format),
            file: None,
        })
        .await
    }

    async fn deliver_file(
        &self,
        recipient: &RecipientId,
        path: &Path,
        caption: Option<&str>,
        _timeout: Duration,
    ) -> TransportResult {
        self.call(SentMessage {
            recipient: recipient.to_string(),
            text: caption.unwrap_or_default().to_string(),
            format: None,
            file: Some(path.to_path_buf()),
        })
        .await
    }

    async fn check_connectivity(&self, _timeout: Duration) -> bool {
        *self.connected.lock()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
