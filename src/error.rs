//! Error type shared by every handler.
//!
//! Each variant maps to one HTTP status and a stable machine-readable code;
//! the JSON body is always `{"error": <code>, "message": <text>}`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("export failed: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    fn is_unique_violation(&self) -> bool {
        match self {
            ApiError::Database(sqlx::Error::Database(db)) => {
                // 2067 = SQLITE_CONSTRAINT_UNIQUE, 1555 = SQLITE_CONSTRAINT_PRIMARYKEY
                matches!(db.code().as_deref(), Some("2067") | Some("1555"))
                    || db.message().contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "validation_failed",
            ApiError::Conflict(_) => "conflict",
            ApiError::Database(_) if self.is_unique_violation() => "conflict",
            ApiError::Database(_) => "database_error",
            ApiError::Export(_) => "export_failed",
            ApiError::Hashing(_) | ApiError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) if self.is_unique_violation() => StatusCode::CONFLICT,
            ApiError::Database(_)
            | ApiError::Hashing(_)
            | ApiError::Export(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else if self.is_unique_violation() {
            "record already exists".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(status).json(json!({
            "error": self.code(),
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn maps_variants_to_statuses() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("trip").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::validation("bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::conflict("dup").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn server_errors_hide_details() {
        let resp = ApiError::Internal("secret path /var/db".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "internal_error");
        assert_eq!(value["message"], "internal server error");
    }

    #[actix_web::test]
    async fn client_errors_carry_message() {
        let resp = ApiError::NotFound("shipment").error_response();
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "not_found");
        assert_eq!(value["message"], "shipment not found");
    }
}
