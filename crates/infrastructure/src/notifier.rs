//! 通知分发HTTP适配器
//!
//! 模板渲染与实际投递由下游通知服务负责，这里只负责把催缴通知
//! 以 webhook 形式推过去。

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use dunning_core::{
    config::NotifierConfig,
    traits::{DunningNotice, NotificationDispatcher},
    DunningError, DunningResult,
};

pub struct WebhookNotificationDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WebhookNotificationDispatcher {
    pub fn new(config: &NotifierConfig) -> DunningResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DunningError::Notification(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotificationDispatcher {
    async fn dispatch(&self, notice: &DunningNotice) -> DunningResult<()> {
        let url = format!("{}/v1/notifications", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(notice)
            .send()
            .await
            .map_err(|e| DunningError::Notification(format!("通知请求失败: {e}")))?;

        if !response.status().is_success() {
            return Err(DunningError::Notification(format!(
                "通知服务返回异常状态码: {}",
                response.status()
            )));
        }
        debug!(
            "催缴通知已分发: 用户 {}, 渠道 {}",
            notice.user_id,
            notice.channel.as_str()
        );
        Ok(())
    }
}
