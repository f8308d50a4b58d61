//! 统一错误处理模块
//!
//! 定义调用层（服务层）共享的错误类型。规则引擎内部错误在进入调用层时
//! 被翻译为这里的变体：无匹配层级属于业务结果（404 类），引擎故障属于 5xx 类。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// 服务层错误类型
#[derive(Debug, Error)]
pub enum ServiceError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 规则引擎错误 ====================
    #[error("规则编译失败: {0}")]
    RuleCompileFailed(String),

    #[error("规则执行失败: {0}")]
    RuleExecutionFailed(String),

    #[error("规则重载超时: 已等待 {seconds} 秒")]
    ReloadTimeout { seconds: u64 },

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::RuleCompileFailed(_) => "RULE_COMPILE_FAILED",
            Self::RuleExecutionFailed(_) => "RULE_EXECUTION_FAILED",
            Self::ReloadTimeout { .. } => "RELOAD_TIMEOUT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ReloadTimeout { .. })
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RuleCompileFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ReloadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) | Self::RuleExecutionFailed(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 是否属于服务端故障（区别于"未找到"这类正常业务结果）
    pub fn is_server_fault(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_error_variants() -> Vec<(ServiceError, StatusCode, &'static str)> {
        vec![
            (
                ServiceError::NotFound {
                    entity: "PricingTier".into(),
                    id: "component=7".into(),
                },
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ServiceError::RuleCompileFailed("unknown attribute".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "RULE_COMPILE_FAILED",
            ),
            (
                ServiceError::RuleExecutionFailed("type mismatch".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "RULE_EXECUTION_FAILED",
            ),
            (
                ServiceError::ReloadTimeout { seconds: 30 },
                StatusCode::GATEWAY_TIMEOUT,
                "RELOAD_TIMEOUT",
            ),
            (
                ServiceError::Validation("tenant_id is required".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ServiceError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ]
    }

    #[test]
    fn test_status_and_code_mapping() {
        for (err, status, code) in all_error_variants() {
            assert_eq!(err.status_code(), status, "status of {}", code);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_not_found_is_not_a_server_fault() {
        let not_found = ServiceError::NotFound {
            entity: "PricingTier".into(),
            id: "1".into(),
        };
        assert!(!not_found.is_server_fault());

        let fault = ServiceError::RuleExecutionFailed("x".into());
        assert!(fault.is_server_fault());
    }

    #[test]
    fn test_is_retryable() {
        let db_err = ServiceError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let not_found = ServiceError::NotFound {
            entity: "PricingTier".into(),
            id: "123".into(),
        };
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_into_response_status() {
        let response = ServiceError::Validation("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ServiceError::Internal("secret detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
