//! 目标展开
//!
//! 把一组用户展开为 (用户, token) 投递目标。token 解析并发执行，
//! 输出顺序仍是用户顺序加 token 顺序，同一 (user_id, token) 只保留首次出现。

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::directory::TokenResolver;
use crate::models::{NotificationTarget, TargetKey, UserRef};

pub struct TargetExpander {
    resolver: Arc<dyn TokenResolver>,
    resolve_concurrency: usize,
}

impl TargetExpander {
    pub fn new(resolver: Arc<dyn TokenResolver>, resolve_concurrency: usize) -> Self {
        Self {
            resolver,
            resolve_concurrency: resolve_concurrency.max(1),
        }
    }

    pub async fn expand(&self, users: &[UserRef]) -> Vec<NotificationTarget> {
        // buffered 保持输入顺序
        let resolved: Vec<(UserRef, Vec<String>)> = stream::iter(users.iter().cloned())
            .map(|user| async move {
                let tokens = match self.resolver.resolve(&user.id).await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        warn!(user_id = %user.id, error = %e, "解析设备 token 失败，按无 token 处理");
                        Vec::new()
                    }
                };
                (user, tokens)
            })
            .buffered(self.resolve_concurrency)
            .collect()
            .await;

        let mut seen: HashSet<TargetKey> = HashSet::new();
        let mut targets = Vec::new();
        for (user, tokens) in resolved {
            for token in tokens {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let target = NotificationTarget::pending(&user, token);
                if seen.insert(target.key()) {
                    targets.push(target);
                }
            }
        }

        debug!(users = users.len(), targets = targets.len(), "目标展开完成");
        targets
    }
}
