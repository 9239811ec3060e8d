//! HTTP 请求处理器

pub mod health;
pub mod notify;
pub mod schedule;
pub mod subscription;
pub mod system;
pub mod webhook;

use notification_worker::validators::validate_recipient_id;
use notification_worker::{Category, FormatMode, RecipientId};

use crate::error::{ApiError, Result};

/// 校验并转换接收方 ID 列表
pub(crate) fn parse_recipients<'a>(
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<RecipientId>> {
    ids.into_iter()
        .map(|id| -> Result<RecipientId> {
            let id = id.trim();
            validate_recipient_id(id)?;
            Ok(RecipientId::new(id)?)
        })
        .collect()
}

pub(crate) fn parse_recipient(id: &str) -> Result<RecipientId> {
    parse_recipients([id]).map(|mut ids| ids.remove(0))
}

pub(crate) fn parse_category(category: Option<&str>) -> Result<Option<Category>> {
    category.map(str::parse).transpose().map_err(ApiError::from)
}

pub(crate) fn parse_format(parse_mode: Option<&str>, default: FormatMode) -> Result<FormatMode> {
    match parse_mode {
        Some(mode) => Ok(mode.parse()?),
        None => Ok(default),
    }
}
