use async_trait::async_trait;
use sqlx::{PgPool, Row};

use dunning_core::{models::AuditEntry, traits::AuditSink, DunningResult};

/// 只追加的Postgres审计日志
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> DunningResult<AuditEntry> {
        Ok(AuditEntry {
            id: row.try_get("id")?,
            payment_id: row.try_get("payment_id")?,
            campaign_id: row.try_get("campaign_id")?,
            action: row.try_get("action")?,
            actor: row.try_get("actor")?,
            detail: row.try_get("detail")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, entry: &AuditEntry) -> DunningResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (payment_id, campaign_id, action, actor, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.payment_id)
        .bind(entry.campaign_id)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_payment(&self, payment_id: i64) -> DunningResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_id, campaign_id, action, actor, detail, created_at
            FROM audit_log
            WHERE payment_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}
