use actix_web::{HttpResponse, ResponseError};
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::entities::RequestStatus;
use crate::models::{ApiResponse, Transition};

pub type AppResult<T> = Result<T, AppError>;

/// 错误大类，供调用方决定是否可以重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 输入不合法或凭证不匹配
    Validation,
    /// 租用竞争、状态竞争
    Conflict,
    /// 请求 / 凭证不存在
    NotFound,
    /// 存储或网络故障
    Transient,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Credential not found")]
    CredentialNotFound,

    #[error("Access code does not match")]
    CodeMismatch,

    #[error("Credential already used")]
    AlreadyUsed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot {transition} a request in status {from}")]
    InvalidTransition {
        from: RequestStatus,
        transition: Transition,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::ValidationError(_) | AppError::CodeMismatch => ErrorCategory::Validation,
            AppError::AlreadyUsed | AppError::Conflict(_) | AppError::InvalidTransition { .. } => {
                ErrorCategory::Conflict
            }
            AppError::CredentialNotFound | AppError::NotFound(_) => ErrorCategory::NotFound,
            AppError::DatabaseError(_) => ErrorCategory::Transient,
            AppError::ConfigError(_) | AppError::InternalError(_) | AppError::SerdeJsonError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// 写入被唯一索引或外键拒绝时归为 Conflict，其余仍是存储错误
    pub fn from_write(err: DbErr, conflict: impl FnOnce() -> String) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_))
            | Some(SqlErr::ForeignKeyConstraintViolation(_)) => AppError::Conflict(conflict()),
            _ => AppError::DatabaseError(err),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status_code, error_code, message) = match self {
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                (
                    actix_web::http::StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    msg.clone(),
                )
            }
            AppError::CredentialNotFound => (
                actix_web::http::StatusCode::NOT_FOUND,
                "CREDENTIAL_NOT_FOUND",
                self.to_string(),
            ),
            AppError::CodeMismatch => {
                log::warn!("Access code mismatch");
                (
                    actix_web::http::StatusCode::BAD_REQUEST,
                    "CODE_MISMATCH",
                    self.to_string(),
                )
            }
            AppError::AlreadyUsed => (
                actix_web::http::StatusCode::CONFLICT,
                "ALREADY_USED",
                self.to_string(),
            ),
            AppError::Conflict(msg) => {
                log::warn!("Conflict: {msg}");
                (
                    actix_web::http::StatusCode::CONFLICT,
                    "CONFLICT",
                    msg.clone(),
                )
            }
            AppError::InvalidTransition { .. } => {
                log::warn!("{self}");
                (
                    actix_web::http::StatusCode::CONFLICT,
                    "INVALID_TRANSITION",
                    self.to_string(),
                )
            }
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
            ),
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                (
                    actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                    "DATABASE_ERROR",
                    "Database error".to_string(),
                )
            }
            _ => {
                log::error!("Internal error: {self}");
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        HttpResponse::build(status_code).json(ApiResponse::error(error_code, message))
    }
}
