//! 订阅服务HTTP适配器

use std::time::Duration;

use async_trait::async_trait;

use dunning_core::{
    config::SubscriptionConfig, traits::SubscriptionService, DunningError, DunningResult,
};

pub struct HttpSubscriptionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSubscriptionService {
    pub fn new(config: &SubscriptionConfig) -> DunningResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DunningError::Subscription(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str) -> DunningResult<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| DunningError::Subscription(format!("订阅服务请求失败: {e}")))?;
        if !response.status().is_success() {
            return Err(DunningError::Subscription(format!(
                "订阅服务返回异常状态码: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionService for HttpSubscriptionService {
    async fn mark_payment_current(&self, subscription_id: i64) -> DunningResult<()> {
        self.post(&format!("/v1/subscriptions/{subscription_id}/payment-current"))
            .await
    }

    async fn cancel(&self, subscription_id: i64) -> DunningResult<()> {
        self.post(&format!("/v1/subscriptions/{subscription_id}/cancel"))
            .await
    }

    async fn lower_access(&self, subscription_id: i64) -> DunningResult<()> {
        self.post(&format!("/v1/subscriptions/{subscription_id}/lower-access"))
            .await
    }
}
