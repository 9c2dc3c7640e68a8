//! 用户目录
//!
//! 目标人群选择与设备 token 解析都来自外部用户目录，这里只定义窄接口。

mod memory;
mod postgres;

pub use memory::InMemoryUserDirectory;
pub use postgres::PgUserDirectory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AudienceSelector, UserRef};

/// 按选择器列出目标用户
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn select_users(&self, audience: &AudienceSelector) -> Result<Vec<UserRef>>;
}

/// 解析用户当前的设备 token
///
/// 可能返回空；调用方把错误视为零个 token。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<Vec<String>>;
}
