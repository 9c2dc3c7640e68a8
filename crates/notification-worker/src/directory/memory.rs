//! 内存用户目录
//!
//! 开发与测试使用，可从 JSON 种子文件加载。

use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::{TokenResolver, UserDirectory};
use crate::error::{NotificationError, Result};
use crate::models::{AppUser, AudienceSelector, UserRef};

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<Vec<AppUser>>,
}

impl InMemoryUserDirectory {
    pub fn new(users: Vec<AppUser>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    /// 从 JSON 数组文件加载用户
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NotificationError::Directory(format!("读取用户种子文件失败 {}: {e}", path.display()))
        })?;
        let users: Vec<AppUser> = serde_json::from_str(&raw)?;
        info!(path = %path.display(), count = users.len(), "已加载用户种子数据");
        Ok(Self::new(users))
    }

    /// 新增或替换用户
    pub fn upsert(&self, user: AppUser) {
        let mut users = self.users.write();
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn select_users(&self, audience: &AudienceSelector) -> Result<Vec<UserRef>> {
        let users = self.users.read();
        let selected = match audience {
            AudienceSelector::AllUsers => users.iter().map(AppUser::to_ref).collect(),
            // 保持请求中的顺序，未知 ID 直接忽略
            AudienceSelector::Users { user_ids } => user_ids
                .iter()
                .filter_map(|id| users.iter().find(|u| &u.id == id))
                .map(AppUser::to_ref)
                .collect(),
        };
        Ok(selected)
    }
}

#[async_trait]
impl TokenResolver for InMemoryUserDirectory {
    async fn resolve(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .users
            .read()
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.fcm_tokens.clone())
            .unwrap_or_default())
    }
}
