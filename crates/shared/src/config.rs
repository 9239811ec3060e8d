//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::{NotifierError, Result};

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Telegram Bot API 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base_url: String,
    /// 未显式指定接收方时使用的默认会话
    pub default_chat_ids: Vec<String>,
    /// plain / markdown / html
    pub default_format: String,
    /// 平台单条消息长度上限，超出部分截断
    pub max_message_length: usize,
    /// 是否拉取聊天命令（getUpdates 长轮询）
    pub polling_enabled: bool,
    /// 长轮询单次等待秒数
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: "https://api.telegram.org".to_string(),
            default_chat_ids: Vec::new(),
            default_format: "markdown".to_string(),
            max_message_length: 4096,
            polling_enabled: false,
            poll_timeout_secs: 30,
        }
    }
}

/// 投递引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 单个接收方的最大传输调用次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// 令牌桶容量
    pub rate_limit_capacity: f64,
    /// 令牌桶每秒补充量
    pub rate_limit_refill_per_sec: f64,
    /// 等待准入的上限，超过即放弃
    pub max_admission_wait_secs: u64,
    pub transport_timeout_secs: u64,
    /// 并发投递工作者上限
    pub max_concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
            rate_limit_capacity: 30.0,
            rate_limit_refill_per_sec: 30.0,
            max_admission_wait_secs: 30,
            transport_timeout_secs: 10,
            max_concurrency: 16,
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 是否注册内置的日报/周报任务
    pub default_jobs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_jobs: true,
        }
    }
}

/// 安全配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// API Bearer 密钥，未配置时不校验
    pub api_secret_key: Option<String>,
    /// Webhook 共享密钥，未配置时拒绝所有 Webhook 请求
    pub webhook_secret: Option<String>,
}

/// 系统监控配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// 同一指标两次告警的最小间隔
    pub alert_cooldown_secs: u64,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            alert_cooldown_secs: 300,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            disk_threshold: 90.0,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub delivery: DeliveryConfig,
    pub scheduler: SchedulerConfig,
    pub security: SecurityConfig,
    pub monitoring: MonitoringConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. .env 文件（仅注入进程环境变量）
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（NOTIFIER_ 前缀，双下划线分隔层级，
    ///    如 NOTIFIER_TELEGRAM__BOT_TOKEN -> telegram.bot_token）
    pub fn load(service_name: &str) -> Result<Self> {
        // .env 不存在时忽略
        let _ = dotenvy::dotenv();

        let env = std::env::var("NOTIFIER_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("NOTIFIER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("telegram.default_chat_ids")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// 校验跨字段约束，启动时调用
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, message: &str| NotifierError::InvalidConfig {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.delivery.max_attempts == 0 {
            return Err(invalid("delivery.max_attempts", "至少为 1"));
        }
        if self.delivery.rate_limit_capacity < 1.0 {
            return Err(invalid("delivery.rate_limit_capacity", "至少为 1"));
        }
        if self.delivery.rate_limit_refill_per_sec <= 0.0 {
            return Err(invalid("delivery.rate_limit_refill_per_sec", "必须大于 0"));
        }
        if self.delivery.max_concurrency == 0 {
            return Err(invalid("delivery.max_concurrency", "至少为 1"));
        }
        if self.telegram.max_message_length == 0 {
            return Err(invalid("telegram.max_message_length", "必须大于 0"));
        }
        if self.telegram.polling_enabled && self.telegram.poll_timeout_secs == 0 {
            return Err(invalid("telegram.poll_timeout_secs", "必须大于 0"));
        }
        if self.monitoring.check_interval_secs == 0 {
            return Err(invalid("monitoring.check_interval_secs", "必须大于 0"));
        }
        Ok(())
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
