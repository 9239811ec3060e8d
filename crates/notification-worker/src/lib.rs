//! 通知调度与投递核心
//!
//! 接收来自 CLI、HTTP API、Webhook、进程内调用与定时任务的通知请求，
//! 经订阅展开、令牌桶限流、带退避的重试后交给传输层投递。
//! 各接收方独立投递，单个接收方失败不影响其他接收方。

pub mod bot;
pub mod engine;
pub mod error;
pub mod formatters;
pub mod model;
pub mod monitoring;
pub mod rate_limiter;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod test_utils;
pub mod transport;
pub mod validators;

pub use bot::{BotCommand, CommandLoop, UpdateSource};
pub use engine::{DeliveryEngine, DeliverySettings};
pub use error::{DeliveryError, NotificationError};
pub use model::{Attachment, Category, DeliveryOutcome, FormatMode, NotificationRequest, RecipientId};
pub use monitoring::{
    MetricsSampler, SysinfoSampler, SystemMetrics, SystemMonitor, sample_blocking,
};
pub use rate_limiter::{Admission, RateLimiter};
pub use registry::SubscriptionRegistry;
pub use scheduler::{
    JobContent, JobDispatcher, JobPayload, JobState, JobSummary, Scheduler, TriggerSpec,
};
pub use service::{DeliveryHandle, NotificationDispatcher, Notifier};
pub use transport::{Transport, TransportResult};
