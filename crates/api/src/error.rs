use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dunning_core::DunningError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("催缴引擎错误: {0}")]
    Dunning(#[from] DunningError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Dunning(DunningError::CampaignNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("催缴活动 {id} 不存在"),
                "CAMPAIGN_NOT_FOUND",
            ),
            ApiError::Dunning(DunningError::PaymentNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("失败支付记录 {id} 不存在"),
                "PAYMENT_NOT_FOUND",
            ),
            ApiError::Dunning(DunningError::InvalidCampaign(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("活动配置无效: {msg}"),
                "INVALID_CAMPAIGN",
            ),
            ApiError::Dunning(DunningError::InvalidRequest(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "INVALID_REQUEST",
            ),
            ApiError::Dunning(DunningError::TerminalState { id, status }) => (
                StatusCode::CONFLICT,
                format!("记录 {id} 已处于终态 {status}，不允许再变更"),
                "TERMINAL_STATE",
            ),
            ApiError::Dunning(DunningError::VersionConflict { id }) => (
                StatusCode::CONFLICT,
                format!("记录 {id} 存在并发修改，请重新加载后重试"),
                "VERSION_CONFLICT",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::Dunning(e) => {
                tracing::error!("处理请求时发生内部错误: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "系统内部错误".to_string(),
                    "INTERNAL_ERROR",
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("处理请求时发生内部错误: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "系统内部错误".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let error = ApiError::Dunning(DunningError::PaymentNotFound { id: 42 });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);

        let error = ApiError::Dunning(DunningError::CampaignNotFound { id: 7 });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_conflict_mapping() {
        let error = ApiError::Dunning(DunningError::TerminalState {
            id: 1,
            status: "recovered".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);

        let error = ApiError::Dunning(DunningError::VersionConflict { id: 1 });
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_bad_request_mapping() {
        let error = ApiError::Dunning(DunningError::InvalidRequest("x".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);

        let error = ApiError::BadRequest("y".to_string());
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_gateway_errors_are_internal() {
        let error = ApiError::Dunning(DunningError::Gateway("timeout".to_string()));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
