//! 资格过滤器
//!
//! 纯查询，无副作用：给定一条活动，从未关闭的失败支付记录中
//! 筛出本轮扫描可作用的集合。终态记录在状态过滤这一层就被排除，
//! 使得重复扫描天然幂等。

use chrono::{DateTime, Utc};
use dunning_core::models::{DunningCampaign, FailedPayment};

/// 判断单条记录对某活动是否符合资格
///
/// 条件：
/// 1. 记录未关闭（pending / retrying）；
/// 2. 已绑定本活动，或未绑定、计划槽位可用且满足活动的资格条件。
///
/// 绑定是排他的：绑定到其他活动的记录对本活动永不符合资格。
/// 已绑定但槽位耗尽的记录仍会被选中，由执行器收尾（转为 abandoned）；
/// 未绑定的记录则不会被一条服务不了它的活动绑走。
pub fn is_eligible(
    campaign: &DunningCampaign,
    payment: &FailedPayment,
    now: DateTime<Utc>,
) -> bool {
    if !payment.is_open() {
        return false;
    }
    match payment.campaign_id {
        Some(bound_id) => bound_id == campaign.id,
        None => {
            (payment.retry_attempts as usize) < campaign.retry_schedule.len()
                && campaign.trigger_conditions.matches(payment, now)
        }
    }
}

/// 从候选集中筛出符合资格的记录，保持输入顺序
pub fn find_eligible<'a>(
    campaign: &DunningCampaign,
    candidates: &'a [FailedPayment],
    now: DateTime<Utc>,
) -> Vec<&'a FailedPayment> {
    candidates
        .iter()
        .filter(|p| is_eligible(campaign, p, now))
        .collect()
}
