use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::envelope::ErrorBody;
use crate::{
    chat::HubError,
    services::{
        ban_service::BanServiceError, chat_service::ChatServiceError, ip_guard::GuardError,
        whitelist_service::WhitelistServiceError,
    },
    store::StoreError,
};

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn banned(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "banned", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_exceeded",
            message,
        )
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        }

        let details = match self.details {
            Some(serde_json::Value::Object(mut map)) => {
                map.entry("error").or_insert_with(|| json!(self.code));
                serde_json::Value::Object(map)
            }
            Some(other) => json!({ "error": self.code, "context": other }),
            None => json!({ "error": self.code }),
        };

        ErrorBody::new(self.status, self.message)
            .with_details(details)
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err
                .code()
                .unwrap_or_else(|| std::borrow::Cow::Borrowed("unknown"));
            let message = format!("database error {code}");
            return Self::internal_server_error(message)
                .with_details(json!({ "sqlstate": code, "message": db_err.message() }));
        }

        Self::internal_server_error(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::not_found(format!("{what} not found")),
            StoreError::Conflict(message) => {
                Self::new(StatusCode::BAD_REQUEST, "conflict", message)
            }
            StoreError::Database(db_err) => Self::from(db_err),
            StoreError::Corrupt(message) => Self::internal_server_error(message),
        }
    }
}

impl From<ChatServiceError> for ApiError {
    fn from(err: ChatServiceError) -> Self {
        match err {
            ChatServiceError::Validation(message) => Self::bad_request(message),
            ChatServiceError::NotFound(message) => Self::not_found(message),
            ChatServiceError::Hub(hub_err) => Self::from(hub_err),
            ChatServiceError::Store(store_err) => Self::from(store_err),
        }
    }
}

impl From<BanServiceError> for ApiError {
    fn from(err: BanServiceError) -> Self {
        match err {
            BanServiceError::Validation(message) => Self::bad_request(message),
            BanServiceError::NotFound(message) => Self::not_found(message),
            BanServiceError::Store(store_err) => Self::from(store_err),
        }
    }
}

impl From<WhitelistServiceError> for ApiError {
    fn from(err: WhitelistServiceError) -> Self {
        match err {
            WhitelistServiceError::Validation(message) => Self::bad_request(message),
            WhitelistServiceError::NotFound(message) => Self::not_found(message),
            WhitelistServiceError::Store(store_err) => Self::from(store_err),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::PayloadTooLarge { .. } => Self::bad_request(err.to_string()),
            HubError::Closed => Self::service_unavailable(err.to_string()),
            HubError::Encode(_) => Self::internal_server_error(err.to_string()),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Store(store_err) => Self::from(store_err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}
