use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use http::header::{CACHE_CONTROL, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use shared::models::ApiEnvelope;

/// Successful JSON response wrapped as `{code: 200, message: "success", data}`.
#[derive(Debug)]
pub struct ApiResponse<T>(pub T);

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(ApiEnvelope::success(self.0))).into_response()
    }
}

/// Error body used throughout the API; the HTTP status is repeated in `code`.
#[derive(Debug)]
pub struct ErrorBody {
    status: StatusCode,
    envelope: ApiEnvelope<Value>,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            envelope: ApiEnvelope::error(status.as_u16(), message),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.envelope = self.envelope.with_details(details);
        self
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.envelope)).into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}
