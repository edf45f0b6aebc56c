//! HTTP rendering of [`vetline_core::Error`].

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};
use vetline_core::Error;

/// Error returned by every handler; renders `{"success": false, "message": ...}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Store(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Server faults are not described to the client.
    pub fn message(&self) -> String {
        match &self.0 {
            Error::InvalidInput(m)
            | Error::Unauthorized(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::Conflict(m)
            | Error::Unavailable(m) => m.clone(),
            Error::TooManyRequests { message, .. } => message.clone(),
            Error::Timeout(_) => "The request timed out, please retry".to_string(),
            Error::Store(_) | Error::Config(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            Error::TooManyRequests { .. } => warn!(error = %self.0, "Request rate limited"),
            e if e.is_client_error() => {
                debug!(status = status.as_u16(), error = %e, "Request rejected")
            }
            e => error!(status = status.as_u16(), error = %e, "Request failed"),
        }

        let body = Json(json!({
            "success": false,
            "message": self.message(),
        }));
        let mut response = (status, body).into_response();

        if let Error::TooManyRequests {
            retry_after_secs, ..
        } = &self.0
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
