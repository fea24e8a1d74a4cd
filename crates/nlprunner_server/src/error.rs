use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nlprunner_protocol::{ErrorDetail, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status and stable error code for this error, shared between the
    /// `IntoResponse` impl (axum-level rejections) and the NLPRP envelope
    /// builder (`dispatch` failures reported with HTTP 200 and `status:
    /// "error"`, per spec.md §4.5).
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::Protocol(ProtocolError::Unauthenticated) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ServerError::Protocol(ProtocolError::ProcessorNotPermitted { .. }) => (StatusCode::FORBIDDEN, "processor_not_permitted"),
            ServerError::Protocol(ProtocolError::ProcessorNotFound { .. }) => (StatusCode::NOT_FOUND, "processor_not_found"),
            ServerError::Protocol(ProtocolError::QueueEntryNotFound(_)) => (StatusCode::NOT_FOUND, "queue_entry_not_found"),
            ServerError::Protocol(ProtocolError::TooManyRecords { .. }) => (StatusCode::BAD_REQUEST, "too_many_records"),
            ServerError::Protocol(ProtocolError::ContentTooLarge { .. }) => (StatusCode::BAD_REQUEST, "content_too_large"),
            ServerError::Protocol(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    pub fn to_error_detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.status_and_code().1, self.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, _) = self.status_and_code();
        let body = Json(self.to_error_detail());
        (status, body).into_response()
    }
}
