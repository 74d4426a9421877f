//! 催缴扫描处理器
//!
//! 扫描由外部触发（HTTP 接口或进程内的周期任务），每次调用从持久化
//! 的时间戳重新推导"该不该执行"，不依赖任何常驻定时器。暂停活动
//! 无需取消定时器：下一轮扫描不再选中它的记录即可。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use dunning_core::{
    models::{DunningCampaign, FailedPayment},
    traits::{CampaignRepository, FailedPaymentRepository},
    DunningError, DunningResult,
};

use crate::eligibility;
use crate::executor::{StepExecutor, StepOutcome};

/// 单个活动的扫描结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignScanReport {
    pub campaign_id: i64,
    pub campaign_name: String,
    /// 符合资格的记录数
    pub scanned: usize,
    /// 实际执行了动作的记录数
    pub executed: usize,
    pub recovered: usize,
    pub abandoned: usize,
    pub notifications: usize,
    /// 未到期跳过的记录数
    pub skipped: usize,
    /// 隔离的单条错误数（版本冲突、网关故障等）
    pub errors: usize,
}

/// 一轮扫描的汇总结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub campaigns: Vec<CampaignScanReport>,
}

impl ProcessReport {
    pub fn total_executed(&self) -> usize {
        self.campaigns.iter().map(|c| c.executed).sum()
    }
}

pub struct DunningProcessor {
    campaigns: Arc<dyn CampaignRepository>,
    payments: Arc<dyn FailedPaymentRepository>,
    executor: Arc<StepExecutor>,
}

impl DunningProcessor {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        payments: Arc<dyn FailedPaymentRepository>,
        executor: Arc<StepExecutor>,
    ) -> Self {
        Self {
            campaigns,
            payments,
            executor,
        }
    }

    /// 执行一轮扫描
    pub async fn process(
        &self,
        campaign_id: Option<i64>,
        dry_run: bool,
    ) -> DunningResult<ProcessReport> {
        self.process_at(campaign_id, dry_run, Utc::now()).await
    }

    /// 以显式时间点执行一轮扫描（测试可控时钟）
    ///
    /// `campaign_id` 为 None 时扫描全部激活态活动，按优先级降序、
    /// created_at 升序处理，该顺序同时是未绑定记录的绑定裁决顺序。
    /// 指定活动时，非激活态活动只允许试运行。
    pub async fn process_at(
        &self,
        campaign_id: Option<i64>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> DunningResult<ProcessReport> {
        let targets = match campaign_id {
            Some(id) => {
                let campaign = self
                    .campaigns
                    .get_by_id(id)
                    .await?
                    .ok_or(DunningError::CampaignNotFound { id })?;
                if !campaign.is_active() && !dry_run {
                    return Err(DunningError::InvalidRequest(format!(
                        "活动 {id} 不处于激活状态，只允许试运行"
                    )));
                }
                vec![campaign]
            }
            None => self.campaigns.get_active().await?,
        };

        let open_payments = self.payments.get_open().await?;
        info!(
            "开始催缴扫描: {} 个活动, {} 条未关闭记录, dry_run={}",
            targets.len(),
            open_payments.len(),
            dry_run
        );

        let mut report = ProcessReport {
            dry_run,
            started_at: now,
            campaigns: Vec::with_capacity(targets.len()),
        };
        // 同一轮扫描中每条记录至多被一个活动处理
        let mut handled: HashSet<i64> = HashSet::new();

        for campaign in &targets {
            let scan = self
                .scan_campaign(campaign, &open_payments, &mut handled, dry_run, now)
                .await;
            report.campaigns.push(scan);
        }

        info!(
            "催缴扫描完成: 执行 {} 个动作，覆盖 {} 个活动",
            report.total_executed(),
            report.campaigns.len()
        );
        Ok(report)
    }

    async fn scan_campaign(
        &self,
        campaign: &DunningCampaign,
        open_payments: &[FailedPayment],
        handled: &mut HashSet<i64>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> CampaignScanReport {
        let mut scan = CampaignScanReport {
            campaign_id: campaign.id,
            campaign_name: campaign.name.clone(),
            ..Default::default()
        };

        let eligible = eligibility::find_eligible(campaign, open_payments, now);
        for payment in eligible {
            if handled.contains(&payment.id) {
                continue;
            }
            scan.scanned += 1;

            // 首次选中即绑定：执行器连同绑定一起走乐观锁写入
            let mut snapshot = payment.clone();
            if snapshot.campaign_id.is_none() {
                snapshot.campaign_id = Some(campaign.id);
            }

            match self
                .executor
                .execute_step(&snapshot, campaign, dry_run, now)
                .await
            {
                Ok(StepOutcome::NotDue { .. }) => {
                    scan.skipped += 1;
                    // 步骤未到期也要把首次绑定落盘，否则后续激活的
                    // 高优先级活动会在步骤到期前抢走这条记录
                    if !dry_run && payment.campaign_id.is_none() {
                        if let Err(e) = self.payments.update(&snapshot, payment.version).await {
                            scan.errors += 1;
                            warn!("记录 {} 绑定活动 {} 失败: {}", payment.id, campaign.id, e);
                        }
                    }
                    handled.insert(payment.id);
                }
                Ok(outcome) => {
                    scan.executed += 1;
                    handled.insert(payment.id);
                    match outcome {
                        StepOutcome::Recovered { .. } => scan.recovered += 1,
                        StepOutcome::Exhausted | StepOutcome::Cancelled => scan.abandoned += 1,
                        StepOutcome::NotificationSent { .. } => scan.notifications += 1,
                        _ => {}
                    }
                    if !dry_run {
                        if let Err(e) = self.campaigns.increment_executions(campaign.id).await {
                            warn!("活动 {} 执行计数更新失败: {}", campaign.id, e);
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    scan.errors += 1;
                    handled.insert(payment.id);
                    warn!(
                        "记录 {} 存在并发修改，本轮跳过: {}",
                        payment.id, e
                    );
                }
                Err(e) => {
                    scan.errors += 1;
                    handled.insert(payment.id);
                    error!("记录 {} 执行步骤失败: {}", payment.id, e);
                }
            }
        }

        info!(
            "活动 '{}' 扫描完成: 选中 {}, 执行 {}, 回收 {}, 放弃 {}, 跳过 {}, 错误 {}",
            campaign.name,
            scan.scanned,
            scan.executed,
            scan.recovered,
            scan.abandoned,
            scan.skipped,
            scan.errors
        );
        scan
    }
}
