//! 内存仓储实现
//!
//! 引擎与API的测试基座，语义与Postgres实现一致：get_active 按
//! 优先级排序，update 走版本号比较交换。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use dunning_core::{
    models::{
        AuditEntry, CampaignFilter, DunningCampaign, FailedPayment, FailedPaymentFilter,
        PaymentStatus,
    },
    traits::{AuditSink, CampaignRepository, FailedPaymentRepository, RecoveryStats},
    DunningError, DunningResult,
};

#[derive(Default)]
pub struct MemoryCampaignRepository {
    campaigns: RwLock<HashMap<i64, DunningCampaign>>,
    next_id: AtomicI64,
}

impl MemoryCampaignRepository {
    pub fn new() -> Self {
        Self {
            campaigns: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl CampaignRepository for MemoryCampaignRepository {
    async fn create(&self, campaign: &DunningCampaign) -> DunningResult<DunningCampaign> {
        campaign.validate()?;
        let mut stored = campaign.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.campaigns.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: i64) -> DunningResult<Option<DunningCampaign>> {
        Ok(self.campaigns.read().await.get(&id).cloned())
    }

    async fn update(&self, campaign: &DunningCampaign) -> DunningResult<()> {
        campaign.validate()?;
        let mut campaigns = self.campaigns.write().await;
        match campaigns.get_mut(&campaign.id) {
            Some(existing) => {
                let mut updated = campaign.clone();
                updated.updated_at = Utc::now();
                *existing = updated;
                Ok(())
            }
            None => Err(DunningError::CampaignNotFound { id: campaign.id }),
        }
    }

    async fn delete(&self, id: i64) -> DunningResult<()> {
        match self.campaigns.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(DunningError::CampaignNotFound { id }),
        }
    }

    async fn list(&self, filter: &CampaignFilter) -> DunningResult<Vec<DunningCampaign>> {
        let campaigns = self.campaigns.read().await;
        let mut result: Vec<DunningCampaign> = campaigns
            .values()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.campaign_type.map_or(true, |t| c.campaign_type == t))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        let offset = filter.offset.unwrap_or(0) as usize;
        let result: Vec<DunningCampaign> = result.into_iter().skip(offset).collect();
        match filter.limit {
            Some(limit) => Ok(result.into_iter().take(limit as usize).collect()),
            None => Ok(result),
        }
    }

    async fn get_active(&self) -> DunningResult<Vec<DunningCampaign>> {
        let campaigns = self.campaigns.read().await;
        let mut active: Vec<DunningCampaign> = campaigns
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect();
        // 绑定裁决顺序：优先级降序，同优先级先创建者优先
        active.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(active)
    }

    async fn increment_executions(&self, id: i64) -> DunningResult<()> {
        let mut campaigns = self.campaigns.write().await;
        match campaigns.get_mut(&id) {
            Some(campaign) => {
                campaign.total_executions += 1;
                Ok(())
            }
            None => Err(DunningError::CampaignNotFound { id }),
        }
    }
}

#[derive(Default)]
pub struct MemoryFailedPaymentRepository {
    payments: RwLock<HashMap<i64, FailedPayment>>,
    next_id: AtomicI64,
}

impl MemoryFailedPaymentRepository {
    pub fn new() -> Self {
        Self {
            payments: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl FailedPaymentRepository for MemoryFailedPaymentRepository {
    async fn create(&self, payment: &FailedPayment) -> DunningResult<FailedPayment> {
        let mut stored = payment.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.version = 0;
        self.payments.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: i64) -> DunningResult<Option<FailedPayment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn update(&self, payment: &FailedPayment, expected_version: i64) -> DunningResult<()> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&payment.id) {
            Some(existing) => {
                if existing.version != expected_version {
                    return Err(DunningError::VersionConflict { id: payment.id });
                }
                let mut updated = payment.clone();
                updated.version = expected_version + 1;
                updated.updated_at = Utc::now();
                *existing = updated;
                Ok(())
            }
            None => Err(DunningError::PaymentNotFound { id: payment.id }),
        }
    }

    async fn list(&self, filter: &FailedPaymentFilter) -> DunningResult<Vec<FailedPayment>> {
        let payments = self.payments.read().await;
        let mut result: Vec<FailedPayment> = payments
            .values()
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| filter.user_id.map_or(true, |u| p.user_id == u))
            .filter(|p| filter.campaign_id.map_or(true, |c| p.campaign_id == Some(c)))
            .filter(|p| filter.created_after.map_or(true, |t| p.created_at >= t))
            .filter(|p| filter.created_before.map_or(true, |t| p.created_at < t))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.unwrap_or(0) as usize;
        let result: Vec<FailedPayment> = result.into_iter().skip(offset).collect();
        match filter.limit {
            Some(limit) => Ok(result.into_iter().take(limit as usize).collect()),
            None => Ok(result),
        }
    }

    async fn get_open(&self) -> DunningResult<Vec<FailedPayment>> {
        let payments = self.payments.read().await;
        let mut open: Vec<FailedPayment> = payments
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }

    async fn recovery_stats(
        &self,
        since: DateTime<Utc>,
        campaign_id: Option<i64>,
    ) -> DunningResult<RecoveryStats> {
        let payments = self.payments.read().await;
        let mut stats = RecoveryStats::default();
        let mut closed_attempts = 0i64;
        let mut closed_count = 0i64;
        for payment in payments.values() {
            if payment.created_at < since {
                continue;
            }
            if campaign_id.is_some() && payment.campaign_id != campaign_id {
                continue;
            }
            stats.total += 1;
            stats.total_amount += payment.amount;
            match payment.status {
                PaymentStatus::Recovered => {
                    stats.recovered += 1;
                    stats.recovered_amount += payment.amount;
                    closed_attempts += payment.retry_attempts as i64;
                    closed_count += 1;
                }
                PaymentStatus::Abandoned => {
                    stats.abandoned += 1;
                    stats.lost_amount += payment.amount;
                    closed_attempts += payment.retry_attempts as i64;
                    closed_count += 1;
                }
                _ => stats.in_progress += 1,
            }
        }
        if closed_count > 0 {
            stats.avg_attempts_to_close = Some(closed_attempts as f64 / closed_count as f64);
        }
        Ok(stats)
    }
}

/// 内存审计日志（只追加）
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: RwLock<Vec<AuditEntry>>,
    next_id: AtomicI64,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) -> DunningResult<()> {
        let mut stored = entry.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.push(stored);
        Ok(())
    }

    async fn list_for_payment(&self, payment_id: i64) -> DunningResult<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.payment_id == payment_id)
            .cloned()
            .collect())
    }
}
