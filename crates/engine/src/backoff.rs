//! 退避策略
//!
//! 仅对未绑定活动的记录和手动重试生效：绑定活动后，步骤自带的
//! delay_days 优先。指数退避加随机抖动，避免大批同时失败的记录
//! 在同一时刻集中重试压垮网关。

use chrono::{DateTime, Duration, Utc};

/// 退避策略配置
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// 退避天数上限
    pub cap_days: i64,
    /// 随机抖动系数上限（0.0-1.0），实际抖动取 [0, jitter) 均匀分布
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            cap_days: 30,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(cap_days: i64, jitter: f64) -> Self {
        Self { cap_days, jitter }
    }

    /// 无抖动的基础退避天数：min(2^(attempt-1), cap_days)
    ///
    /// attempt 从 1 开始计。基础延迟对连续失败单调不减，到达上限后封顶。
    pub fn base_delay_days(&self, attempt: i32) -> i64 {
        let exponent = (attempt.max(1) - 1).min(62) as u32;
        let delay = 1i64.checked_shl(exponent).unwrap_or(i64::MAX);
        delay.min(self.cap_days)
    }

    /// 计算下次重试时间：now + base * (1 + jitter)
    pub fn next_retry_at(&self, attempt: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        let base_days = self.base_delay_days(attempt) as f64;
        let jitter = rand::random::<f64>() * self.jitter;
        let delay_seconds = (base_days * (1.0 + jitter) * 86_400.0) as i64;
        now + Duration::seconds(delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let policy = BackoffPolicy::new(30, 0.2);
        assert_eq!(policy.base_delay_days(1), 1);
        assert_eq!(policy.base_delay_days(2), 2);
        assert_eq!(policy.base_delay_days(3), 4);
        assert_eq!(policy.base_delay_days(5), 16);
        assert_eq!(policy.base_delay_days(6), 30);
        assert_eq!(policy.base_delay_days(20), 30);
    }

    #[test]
    fn test_base_delay_is_monotonic() {
        let policy = BackoffPolicy::default();
        let mut previous = 0;
        for attempt in 1..=40 {
            let delay = policy.base_delay_days(attempt);
            assert!(delay >= previous, "第{attempt}次退避出现回退");
            previous = delay;
        }
    }

    #[test]
    fn test_next_retry_within_jitter_bounds() {
        let policy = BackoffPolicy::new(30, 0.2);
        let now = Utc::now();
        for attempt in 1..=6 {
            let next = policy.next_retry_at(attempt, now);
            let base = Duration::days(policy.base_delay_days(attempt));
            let upper = Duration::seconds((base.num_seconds() as f64 * 1.2) as i64);
            assert!(next >= now + base);
            assert!(next <= now + upper + Duration::seconds(1));
        }
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(30, 0.0);
        assert_eq!(policy.base_delay_days(i32::MAX), 30);
    }
}
