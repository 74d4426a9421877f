//! 支付网关HTTP适配器
//!
//! 语义约定：网关返回的拒付是业务结果（ChargeOutcome::Declined），
//! 只有传输层故障和网关5xx才映射为 `DunningError::Gateway`。

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use dunning_core::{
    config::GatewayConfig,
    traits::{ChargeOutcome, ChargeRequest, PaymentGateway},
    DunningError, DunningResult,
};

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status: String,
    payment_id: Option<String>,
    failure_reason: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> DunningResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DunningError::Gateway(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> DunningResult<ChargeOutcome> {
        let url = format!("{}/v1/charges", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| DunningError::Gateway(format!("扣款请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DunningError::Gateway(format!(
                "网关返回异常状态码: {status}"
            )));
        }

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| DunningError::Gateway(format!("解析网关响应失败: {e}")))?;
        debug!("网关扣款响应: status={}", body.status);

        match body.status.as_str() {
            "succeeded" => {
                let gateway_payment_id = body.payment_id.ok_or_else(|| {
                    DunningError::Gateway("成功响应缺少payment_id".to_string())
                })?;
                Ok(ChargeOutcome::Succeeded { gateway_payment_id })
            }
            "declined" => Ok(ChargeOutcome::Declined {
                reason: body
                    .failure_reason
                    .unwrap_or_else(|| "unknown_decline".to_string()),
            }),
            other => Err(DunningError::Gateway(format!(
                "未知的网关响应状态: {other}"
            ))),
        }
    }

    async fn refund(&self, gateway_payment_id: &str, amount: Decimal) -> DunningResult<()> {
        let url = format!("{}/v1/refunds", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "payment_id": gateway_payment_id,
                "amount": amount,
            }))
            .send()
            .await
            .map_err(|e| DunningError::Gateway(format!("退款请求失败: {e}")))?;

        if !response.status().is_success() {
            return Err(DunningError::Gateway(format!(
                "退款被拒绝，状态码: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
