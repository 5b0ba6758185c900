use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::InvoiceStatus;

/// 账务核心统一错误类型
#[derive(Debug, Error)]
pub enum BillingError {
    /// 实体不变量被破坏 (金额非法、超额分配等)
    #[error("validation failed: {0}")]
    Validation(String),

    /// 状态机不允许的迁移
    #[error("invalid invoice status transition from {from} to {to}")]
    InvalidTransition { from: InvoiceStatus, to: InvoiceStatus },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    /// 事务超过截止时间, 已整体回滚
    #[error("transaction timed out during {operation}")]
    Timeout { operation: &'static str },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, BillingError>;

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    /// 存储层失败或超时: 调用方可以重试, 核心内部不重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Timeout { .. } | BillingError::Database(_))
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
            retryable: bool,
        }

        let retryable = self.is_retryable();
        let (status, error, details) = match &self {
            BillingError::Validation(_) | BillingError::InvalidTransition { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(self.to_string()),
            ),
            BillingError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), None),
            BillingError::Conflict(_) => (StatusCode::CONFLICT, self.to_string(), None),
            BillingError::Timeout { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Transaction timed out".to_string(),
                Some(self.to_string()),
            ),
            BillingError::Database(e) => {
                tracing::error!(error = ?e, "database failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            BillingError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(e.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                details,
                retryable,
            }),
        )
            .into_response()
    }
}
