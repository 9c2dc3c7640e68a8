//! PostgreSQL 活动存储
//!
//! 活动存 notification_logs，目标存 notification_targets 子表，
//! 主键 (log_id, user_id, token) 支撑按目标身份的单行更新。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{CampaignStore, allowed_sources};
use crate::error::{NotificationError, Result};
use crate::models::{
    AdminCreator, AudienceSelector, CampaignStatus, NotificationContent, NotificationLog,
    NotificationTarget, TargetPatch, TargetStatus,
};

/// 内嵌的表结构迁移，由 `Database::connect` 执行
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    title: String,
    body: String,
    image_url: Option<String>,
    deep_link: Option<String>,
    schedule_at: Option<DateTime<Utc>>,
    audience: Json<AudienceSelector>,
    creator_uid: String,
    creator_name: String,
    creator_email: String,
    created_at: DateTime<Utc>,
    processing_status: CampaignStatus,
    processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct TargetRow {
    user_id: String,
    user_email: Option<String>,
    user_name: Option<String>,
    token: String,
    status: TargetStatus,
    error: Option<String>,
    message_id: Option<String>,
    attempted_at: Option<DateTime<Utc>>,
}

impl From<TargetRow> for NotificationTarget {
    fn from(row: TargetRow) -> Self {
        Self {
            user_id: row.user_id,
            user_email: row.user_email,
            user_name: row.user_name,
            token: row.token,
            status: row.status,
            error: row.error,
            message_id: row.message_id,
            attempted_at: row.attempted_at,
        }
    }
}

impl LogRow {
    fn into_log(self, targets: Vec<NotificationTarget>) -> NotificationLog {
        NotificationLog {
            id: self.id,
            content: NotificationContent {
                title: self.title,
                body: self.body,
                image_url: self.image_url,
                deep_link: self.deep_link,
            },
            schedule_at: self.schedule_at,
            audience: self.audience.0,
            admin_creator: AdminCreator {
                uid: self.creator_uid,
                name: self.creator_name,
                email: self.creator_email,
            },
            created_at: self.created_at,
            processing_status: self.processing_status,
            processed_at: self.processed_at,
            targets,
        }
    }
}

fn status_strings(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub struct PgCampaignStore {
    pool: PgPool,
}

impl PgCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 单条语句批量写入目标，position 即展开顺序
    async fn insert_targets(
        tx: &mut Transaction<'_, Postgres>,
        log_id: Uuid,
        targets: &[NotificationTarget],
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let columns = TargetColumns::from_targets(targets);
        sqlx::query(
            r#"
            INSERT INTO notification_targets
                (log_id, position, user_id, user_email, user_name, token,
                 status, error, message_id, attempted_at)
            SELECT $1::uuid, t.*
            FROM UNNEST(
                $2::int[], $3::text[], $4::text[], $5::text[], $6::text[],
                $7::text[], $8::text[], $9::text[], $10::timestamptz[]
            ) AS t
            "#,
        )
        .bind(log_id)
        .bind(columns.positions)
        .bind(columns.user_ids)
        .bind(columns.user_emails)
        .bind(columns.user_names)
        .bind(columns.tokens)
        .bind(columns.statuses)
        .bind(columns.errors)
        .bind(columns.message_ids)
        .bind(columns.attempted_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// 按列展开的目标，供 UNNEST 批量插入
#[derive(Debug, Default, PartialEq)]
struct TargetColumns {
    positions: Vec<i32>,
    user_ids: Vec<String>,
    user_emails: Vec<Option<String>>,
    user_names: Vec<Option<String>>,
    tokens: Vec<String>,
    statuses: Vec<String>,
    errors: Vec<Option<String>>,
    message_ids: Vec<Option<String>>,
    attempted_at: Vec<Option<DateTime<Utc>>>,
}

impl TargetColumns {
    fn from_targets(targets: &[NotificationTarget]) -> Self {
        let mut columns = Self::default();
        for (position, target) in targets.iter().enumerate() {
            columns.positions.push(position as i32);
            columns.user_ids.push(target.user_id.clone());
            columns.user_emails.push(target.user_email.clone());
            columns.user_names.push(target.user_name.clone());
            columns.tokens.push(target.token.clone());
            columns.statuses.push(target.status.as_str().to_string());
            columns.errors.push(target.error.clone());
            columns.message_ids.push(target.message_id.clone());
            columns.attempted_at.push(target.attempted_at);
        }
        columns
    }
}

#[async_trait]
impl CampaignStore for PgCampaignStore {
    async fn load(&self, id: Uuid) -> Result<NotificationLog> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, title, body, image_url, deep_link, schedule_at, audience,
                   creator_uid, creator_name, creator_email, created_at,
                   processing_status, processed_at
            FROM notification_logs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;

        let targets = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT user_id, user_email, user_name, token, status, error, message_id, attempted_at
            FROM notification_targets
            WHERE log_id = $1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(row.into_log(targets.into_iter().map(NotificationTarget::from).collect()))
    }

    async fn save(&self, log: &NotificationLog) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO notification_logs
                (id, title, body, image_url, deep_link, schedule_at, audience,
                 creator_uid, creator_name, creator_email, created_at,
                 processing_status, processed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                body = EXCLUDED.body,
                image_url = EXCLUDED.image_url,
                deep_link = EXCLUDED.deep_link,
                schedule_at = EXCLUDED.schedule_at,
                audience = EXCLUDED.audience,
                processing_status = EXCLUDED.processing_status,
                processed_at = EXCLUDED.processed_at,
                updated_at = NOW()
            "#,
        )
        .bind(log.id)
        .bind(&log.content.title)
        .bind(&log.content.body)
        .bind(&log.content.image_url)
        .bind(&log.content.deep_link)
        .bind(log.schedule_at)
        .bind(Json(&log.audience))
        .bind(&log.admin_creator.uid)
        .bind(&log.admin_creator.name)
        .bind(&log.admin_creator.email)
        .bind(log.created_at)
        .bind(log.processing_status)
        .bind(log.processed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM notification_targets WHERE log_id = $1")
            .bind(log.id)
            .execute(&mut *tx)
            .await?;
        Self::insert_targets(&mut tx, log.id, &log.targets).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn attach_targets(&self, id: Uuid, targets: &[NotificationTarget]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // 行锁串行化同一活动的并发展开
        let status: Option<CampaignStatus> = sqlx::query_scalar(
            "SELECT processing_status FROM notification_logs WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Err(NotificationError::NotFound(id.to_string()));
        };
        if status != CampaignStatus::Pending {
            return Ok(false);
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_targets WHERE log_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            debug!(log_id = %id, existing, "目标已挂载，跳过");
            return Ok(false);
        }

        Self::insert_targets(&mut tx, id, targets).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_target(
        &self,
        log_id: Uuid,
        user_id: &str,
        token: &str,
        patch: &TargetPatch,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_targets
            SET status = $4,
                error = $5,
                message_id = $6,
                attempted_at = COALESCE(attempted_at, $7)
            WHERE log_id = $1 AND user_id = $2 AND token = $3 AND status = 'pending'
            "#,
        )
        .bind(log_id)
        .bind(user_id)
        .bind(token)
        .bind(patch.status)
        .bind(&patch.error)
        .bind(&patch.message_id)
        .bind(patch.attempted_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let from = allowed_sources(from, to);
        if from.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE notification_logs
            SET processing_status = $2,
                processed_at = COALESCE(processed_at, $3),
                updated_at = NOW()
            WHERE id = $1 AND processing_status = ANY($4::text[])
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(processed_at)
        .bind(status_strings(&from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM notification_logs
            WHERE processing_status = 'scheduled' AND schedule_at <= $1
            ORDER BY schedule_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_by_status(&self, statuses: &[CampaignStatus], limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM notification_logs
            WHERE processing_status = ANY($1::text[])
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status_strings(statuses))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
