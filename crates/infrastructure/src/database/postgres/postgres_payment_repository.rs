use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

use dunning_core::{
    models::{FailedPayment, FailedPaymentFilter},
    traits::{FailedPaymentRepository, RecoveryStats},
    DunningError, DunningResult,
};

pub struct PostgresFailedPaymentRepository {
    pool: PgPool,
}

const PAYMENT_COLUMNS: &str = "id, payment_ref, user_id, subscription_id, amount, currency, \
     plan_code, trial_user, status, retry_attempts, last_retry_at, next_retry_at, \
     retry_history, campaign_id, recovered_at, recovered_payment_id, abandoned_at, \
     abandonment_reason, initial_failure_reason, original_payment_id, payment_method_id, \
     version, created_at, updated_at";

impl PostgresFailedPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: &sqlx::postgres::PgRow) -> DunningResult<FailedPayment> {
        let retry_history =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("retry_history")?)?;

        Ok(FailedPayment {
            id: row.try_get("id")?,
            payment_ref: row.try_get("payment_ref")?,
            user_id: row.try_get("user_id")?,
            subscription_id: row.try_get("subscription_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            plan_code: row.try_get("plan_code")?,
            trial_user: row.try_get("trial_user")?,
            status: row.try_get("status")?,
            retry_attempts: row.try_get("retry_attempts")?,
            last_retry_at: row.try_get("last_retry_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            retry_history,
            campaign_id: row.try_get("campaign_id")?,
            recovered_at: row.try_get("recovered_at")?,
            recovered_payment_id: row.try_get("recovered_payment_id")?,
            abandoned_at: row.try_get("abandoned_at")?,
            abandonment_reason: row.try_get("abandonment_reason")?,
            initial_failure_reason: row.try_get("initial_failure_reason")?,
            original_payment_id: row.try_get("original_payment_id")?,
            payment_method_id: row.try_get("payment_method_id")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl FailedPaymentRepository for PostgresFailedPaymentRepository {
    #[instrument(skip(self, payment), fields(user_id = %payment.user_id))]
    async fn create(&self, payment: &FailedPayment) -> DunningResult<FailedPayment> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO failed_payments
                (payment_ref, user_id, subscription_id, amount, currency, plan_code,
                 trial_user, status, retry_attempts, retry_history, campaign_id,
                 initial_failure_reason, original_payment_id, payment_method_id,
                 version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0, $15)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.payment_ref)
        .bind(payment.user_id)
        .bind(payment.subscription_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.plan_code)
        .bind(payment.trial_user)
        .bind(payment.status)
        .bind(payment.retry_attempts)
        .bind(serde_json::to_value(&payment.retry_history)?)
        .bind(payment.campaign_id)
        .bind(&payment.initial_failure_reason)
        .bind(&payment.original_payment_id)
        .bind(&payment.payment_method_id)
        .bind(payment.created_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_payment(&row)?;
        debug!("已创建{}", created.entity_description());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> DunningResult<Option<FailedPayment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM failed_payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    /// 乐观锁比较交换：仅当版本号匹配才写入，版本号随写入自增
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn update(&self, payment: &FailedPayment, expected_version: i64) -> DunningResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE failed_payments
            SET status = $1, retry_attempts = $2, last_retry_at = $3, next_retry_at = $4,
                retry_history = $5, campaign_id = $6, recovered_at = $7,
                recovered_payment_id = $8, abandoned_at = $9, abandonment_reason = $10,
                payment_method_id = $11, version = version + 1, updated_at = NOW()
            WHERE id = $12 AND version = $13
            "#,
        )
        .bind(payment.status)
        .bind(payment.retry_attempts)
        .bind(payment.last_retry_at)
        .bind(payment.next_retry_at)
        .bind(serde_json::to_value(&payment.retry_history)?)
        .bind(payment.campaign_id)
        .bind(payment.recovered_at)
        .bind(&payment.recovered_payment_id)
        .bind(payment.abandoned_at)
        .bind(&payment.abandonment_reason)
        .bind(&payment.payment_method_id)
        .bind(payment.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // 区分记录不存在与版本冲突
            return match self.get_by_id(payment.id).await? {
                Some(_) => {
                    warn!("记录 {} 版本冲突 (期望版本 {})", payment.id, expected_version);
                    Err(DunningError::VersionConflict { id: payment.id })
                }
                None => Err(DunningError::PaymentNotFound { id: payment.id }),
            };
        }
        Ok(())
    }

    async fn list(&self, filter: &FailedPaymentFilter) -> DunningResult<Vec<FailedPayment>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {PAYMENT_COLUMNS} FROM failed_payments WHERE 1=1"
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(campaign_id) = filter.campaign_id {
            builder.push(" AND campaign_id = ").push_bind(campaign_id);
        }
        if let Some(created_after) = filter.created_after {
            builder.push(" AND created_at >= ").push_bind(created_after);
        }
        if let Some(created_before) = filter.created_before {
            builder.push(" AND created_at < ").push_bind(created_before);
        }
        builder.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ").push_bind(offset);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn get_open(&self) -> DunningResult<Vec<FailedPayment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM failed_payments
            WHERE status IN ('pending', 'retrying')
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn recovery_stats(
        &self,
        since: DateTime<Utc>,
        campaign_id: Option<i64>,
    ) -> DunningResult<RecoveryStats> {
        let mut builder = sqlx::QueryBuilder::new(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'recovered') AS recovered,
                COUNT(*) FILTER (WHERE status = 'abandoned') AS abandoned,
                COUNT(*) FILTER (WHERE status IN ('pending', 'retrying')) AS in_progress,
                COALESCE(SUM(amount), 0) AS total_amount,
                COALESCE(SUM(amount) FILTER (WHERE status = 'recovered'), 0) AS recovered_amount,
                COALESCE(SUM(amount) FILTER (WHERE status = 'abandoned'), 0) AS lost_amount,
                AVG(retry_attempts) FILTER (WHERE status IN ('recovered', 'abandoned')) AS avg_attempts
            FROM failed_payments
            WHERE created_at >= "#,
        );
        builder.push_bind(since);
        if let Some(campaign_id) = campaign_id {
            builder.push(" AND campaign_id = ").push_bind(campaign_id);
        }

        let row = builder.build().fetch_one(&self.pool).await?;
        let avg_attempts: Option<Decimal> = row.try_get("avg_attempts")?;

        Ok(RecoveryStats {
            total: row.try_get("total")?,
            recovered: row.try_get("recovered")?,
            abandoned: row.try_get("abandoned")?,
            in_progress: row.try_get("in_progress")?,
            total_amount: row.try_get("total_amount")?,
            recovered_amount: row.try_get("recovered_amount")?,
            lost_amount: row.try_get("lost_amount")?,
            avg_attempts_to_close: avg_attempts.and_then(|d| d.to_f64()),
        })
    }
}
