//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Mapping of orchestrator errors onto HTTP responses."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hm_core::{CoreError, ErrorKind};
use tracing::{error, warn};

use crate::wire::ErrorBody;

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::ToolTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::StateCorrupt | ErrorKind::Io | ErrorKind::Tool => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ErrorKind::InvalidRequest, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind);
        if status.is_server_error() {
            error!(kind = %self.kind, message = %self.message, "request failed");
        } else {
            warn!(kind = %self.kind, message = %self.message, "request rejected");
        }
        let body = Json(ErrorBody {
            kind: self.kind,
            message: self.message,
        });
        (status, body).into_response()
    }
}
