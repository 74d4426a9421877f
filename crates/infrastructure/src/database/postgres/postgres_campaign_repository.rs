use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use dunning_core::{
    models::{CampaignFilter, DunningCampaign},
    traits::CampaignRepository,
    DunningError, DunningResult,
};

pub struct PostgresCampaignRepository {
    pool: PgPool,
}

impl PostgresCampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_campaign(row: &sqlx::postgres::PgRow) -> DunningResult<DunningCampaign> {
        let trigger_conditions =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("trigger_conditions")?)?;
        let retry_schedule =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("retry_schedule")?)?;

        Ok(DunningCampaign {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            campaign_type: row.try_get("campaign_type")?,
            trigger_conditions,
            retry_schedule,
            channel_templates: row.try_get("channel_templates")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            total_executions: row.try_get("total_executions")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const CAMPAIGN_COLUMNS: &str = "id, name, campaign_type, trigger_conditions, retry_schedule, \
     channel_templates, status, priority, total_executions, created_at, updated_at";

#[async_trait]
impl CampaignRepository for PostgresCampaignRepository {
    #[instrument(skip(self, campaign), fields(campaign_name = %campaign.name))]
    async fn create(&self, campaign: &DunningCampaign) -> DunningResult<DunningCampaign> {
        campaign.validate()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO dunning_campaigns
                (name, campaign_type, trigger_conditions, retry_schedule,
                 channel_templates, status, priority, total_executions)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(&campaign.name)
        .bind(campaign.campaign_type)
        .bind(serde_json::to_value(&campaign.trigger_conditions)?)
        .bind(serde_json::to_value(&campaign.retry_schedule)?)
        .bind(&campaign.channel_templates)
        .bind(campaign.status)
        .bind(campaign.priority)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_campaign(&row)?;
        debug!("已创建{}", created.entity_description());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> DunningResult<Option<DunningCampaign>> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM dunning_campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_campaign).transpose()
    }

    #[instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    async fn update(&self, campaign: &DunningCampaign) -> DunningResult<()> {
        campaign.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE dunning_campaigns
            SET name = $1, campaign_type = $2, trigger_conditions = $3,
                retry_schedule = $4, channel_templates = $5, status = $6,
                priority = $7, updated_at = NOW()
            WHERE id = $8
            "#,
        )
        .bind(&campaign.name)
        .bind(campaign.campaign_type)
        .bind(serde_json::to_value(&campaign.trigger_conditions)?)
        .bind(serde_json::to_value(&campaign.retry_schedule)?)
        .bind(&campaign.channel_templates)
        .bind(campaign.status)
        .bind(campaign.priority)
        .bind(campaign.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DunningError::CampaignNotFound { id: campaign.id });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> DunningResult<()> {
        let result = sqlx::query("DELETE FROM dunning_campaigns WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DunningError::CampaignNotFound { id });
        }
        Ok(())
    }

    async fn list(&self, filter: &CampaignFilter) -> DunningResult<Vec<DunningCampaign>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM dunning_campaigns WHERE 1=1"
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(campaign_type) = filter.campaign_type {
            builder.push(" AND campaign_type = ").push_bind(campaign_type);
        }
        builder.push(" ORDER BY priority DESC, created_at ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ").push_bind(offset);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_campaign).collect()
    }

    async fn get_active(&self) -> DunningResult<Vec<DunningCampaign>> {
        // 排序即为绑定裁决顺序：优先级高者先扫描，同优先级先创建者先扫描
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS} FROM dunning_campaigns
            WHERE status = 'active'
            ORDER BY priority DESC, created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_campaign).collect()
    }

    async fn increment_executions(&self, id: i64) -> DunningResult<()> {
        let result = sqlx::query(
            "UPDATE dunning_campaigns SET total_executions = total_executions + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DunningError::CampaignNotFound { id });
        }
        Ok(())
    }
}
