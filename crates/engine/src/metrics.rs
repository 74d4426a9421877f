//! 指标聚合器
//!
//! 纯派生的只读统计，从生命周期历史计算活动维度与全局窗口维度的
//! 回收指标，永不变更任何记录状态。

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use dunning_core::{
    models::{FailedPaymentFilter, PaymentStatus},
    traits::{CampaignRepository, FailedPaymentRepository, RecoveryStats},
    DunningError, DunningResult,
};

/// 统计窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalyticsPeriod {
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
    #[serde(rename = "1y")]
    OneYear,
}

impl AnalyticsPeriod {
    pub fn days(&self) -> i64 {
        match self {
            AnalyticsPeriod::SevenDays => 7,
            AnalyticsPeriod::ThirtyDays => 30,
            AnalyticsPeriod::NinetyDays => 90,
            AnalyticsPeriod::OneYear => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsPeriod::SevenDays => "7d",
            AnalyticsPeriod::ThirtyDays => "30d",
            AnalyticsPeriod::NinetyDays => "90d",
            AnalyticsPeriod::OneYear => "1y",
        }
    }
}

impl FromStr for AnalyticsPeriod {
    type Err = DunningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(AnalyticsPeriod::SevenDays),
            "30d" => Ok(AnalyticsPeriod::ThirtyDays),
            "90d" => Ok(AnalyticsPeriod::NinetyDays),
            "1y" => Ok(AnalyticsPeriod::OneYear),
            _ => Err(DunningError::InvalidRequest(format!(
                "无效的统计窗口: {s}，支持 7d/30d/90d/1y"
            ))),
        }
    }
}

/// 单个活动的聚合指标
#[derive(Debug, Clone, Serialize)]
pub struct CampaignMetrics {
    pub campaign_id: i64,
    pub total_executions: i64,
    pub total_failed_payments: i64,
    pub recovered_count: i64,
    pub recovered_amount: Decimal,
    pub abandoned_count: i64,
    /// recovered / total * 100
    pub success_rate: f64,
    /// 从记录创建到恢复的平均天数
    pub average_recovery_time_days: Option<f64>,
}

/// 全局窗口统计
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub period: AnalyticsPeriod,
    pub total_failed_payments: i64,
    pub total_failed_amount: Decimal,
    pub recovered_count: i64,
    pub recovered_amount: Decimal,
    pub abandoned_count: i64,
    pub in_progress_count: i64,
    pub recovery_rate: f64,
}

pub struct MetricsAggregator {
    campaigns: Arc<dyn CampaignRepository>,
    payments: Arc<dyn FailedPaymentRepository>,
}

impl MetricsAggregator {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        payments: Arc<dyn FailedPaymentRepository>,
    ) -> Self {
        Self {
            campaigns,
            payments,
        }
    }

    /// 单个活动的指标
    pub async fn campaign_metrics(&self, campaign_id: i64) -> DunningResult<CampaignMetrics> {
        let campaign = self
            .campaigns
            .get_by_id(campaign_id)
            .await?
            .ok_or(DunningError::CampaignNotFound { id: campaign_id })?;

        let filter = FailedPaymentFilter {
            campaign_id: Some(campaign_id),
            ..Default::default()
        };
        let payments = self.payments.list(&filter).await?;

        let total = payments.len() as i64;
        let mut recovered_count = 0i64;
        let mut recovered_amount = Decimal::ZERO;
        let mut abandoned_count = 0i64;
        let mut recovery_seconds = 0i64;
        for payment in &payments {
            match payment.status {
                PaymentStatus::Recovered => {
                    recovered_count += 1;
                    recovered_amount += payment.amount;
                    if let Some(recovered_at) = payment.recovered_at {
                        recovery_seconds += (recovered_at - payment.created_at).num_seconds();
                    }
                }
                PaymentStatus::Abandoned => abandoned_count += 1,
                _ => {}
            }
        }

        let success_rate = if total > 0 {
            (recovered_count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let average_recovery_time_days = if recovered_count > 0 {
            Some(recovery_seconds as f64 / recovered_count as f64 / 86_400.0)
        } else {
            None
        };

        Ok(CampaignMetrics {
            campaign_id,
            total_executions: campaign.total_executions,
            total_failed_payments: total,
            recovered_count,
            recovered_amount,
            abandoned_count,
            success_rate,
            average_recovery_time_days,
        })
    }

    /// 全局窗口统计
    pub async fn analytics(&self, period: AnalyticsPeriod) -> DunningResult<AnalyticsReport> {
        let since = Utc::now() - Duration::days(period.days());
        let stats: RecoveryStats = self.payments.recovery_stats(since, None).await?;

        Ok(AnalyticsReport {
            period,
            total_failed_payments: stats.total,
            total_failed_amount: stats.total_amount,
            recovered_count: stats.recovered,
            recovered_amount: stats.recovered_amount,
            abandoned_count: stats.abandoned,
            in_progress_count: stats.in_progress,
            recovery_rate: stats.recovery_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parsing() {
        assert_eq!(
            "7d".parse::<AnalyticsPeriod>().unwrap(),
            AnalyticsPeriod::SevenDays
        );
        assert_eq!(
            "1y".parse::<AnalyticsPeriod>().unwrap(),
            AnalyticsPeriod::OneYear
        );
        assert!("2w".parse::<AnalyticsPeriod>().is_err());
    }

    #[test]
    fn test_period_days() {
        assert_eq!(AnalyticsPeriod::SevenDays.days(), 7);
        assert_eq!(AnalyticsPeriod::OneYear.days(), 365);
    }
}
