//! PostgreSQL 用户目录
//!
//! 读取 app_users 表，设备 token 存放在 fcm_tokens 文本数组列。

use async_trait::async_trait;
use sqlx::PgPool;

use super::{TokenResolver, UserDirectory};
use crate::error::Result;
use crate::models::{AudienceSelector, UserRef};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    display_name: Option<String>,
}

impl From<UserRow> for UserRef {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
        }
    }
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn select_users(&self, audience: &AudienceSelector) -> Result<Vec<UserRef>> {
        let rows = match audience {
            AudienceSelector::AllUsers => {
                sqlx::query_as::<_, UserRow>(
                    "SELECT id, email, display_name FROM app_users ORDER BY created_at, id",
                )
                .fetch_all(&self.pool)
                .await?
            }
            AudienceSelector::Users { user_ids } => {
                // 按请求顺序返回
                sqlx::query_as::<_, UserRow>(
                    r#"
                    SELECT u.id, u.email, u.display_name
                    FROM unnest($1::text[]) WITH ORDINALITY AS req(id, ord)
                    JOIN app_users u ON u.id = req.id
                    ORDER BY req.ord
                    "#,
                )
                .bind(user_ids)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(UserRef::from).collect())
    }
}

#[async_trait]
impl TokenResolver for PgUserDirectory {
    async fn resolve(&self, user_id: &str) -> Result<Vec<String>> {
        let tokens: Option<Vec<String>> =
            sqlx::query_scalar("SELECT fcm_tokens FROM app_users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tokens.unwrap_or_default())
    }
}
