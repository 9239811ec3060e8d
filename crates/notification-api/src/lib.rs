//! 通知服务 HTTP 入口
//!
//! ## 路由
//!
//! - `GET /health`：传输层连通性与组件状态
//! - `POST /webhook/notify`：共享密钥校验后发往默认接收方
//! - `/api/v1/*`：通知发送、订阅管理、定时任务、系统监控（Bearer API Key）
//!
//! ## 模块结构
//!
//! - `dto`: 请求和响应结构
//! - `error`: 错误类型与统一响应
//! - `handlers`: HTTP 请求处理器
//! - `middleware`: API Key 认证、安全响应头
//! - `routes`: 路由配置
//! - `state`: 应用状态

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, Result};
pub use routes::app;
pub use state::{ApiSettings, AppState};
