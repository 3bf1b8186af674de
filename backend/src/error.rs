//! HTTP-facing error type of the service.

use crate::import::decode::DecodeError;
use crate::import::error::IngestError;
use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The multipart form could not be used as sent.
    #[error("{0}")]
    BadRequest(String),

    #[error("Upload exceeds the {limit_mb} MB limit")]
    PayloadTooLarge { limit_mb: usize },

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("Multipart error: {0}")]
    Multipart(#[from] actix_multipart::MultipartError),

    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// Short machine-readable tag sent as `details`.
    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_form",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::JobNotFound(_) => "job_not_found",
            ApiError::Ingest(IngestError::Decode(DecodeError::EmptyFile)) => "empty_file",
            ApiError::Ingest(IngestError::NoRows) => "no_rows",
            ApiError::Ingest(IngestError::StoreUnavailable(_)) => "datastore_unavailable",
            ApiError::Ingest(_) => "import_failed",
            ApiError::Store(_) => "datastore_error",
            ApiError::Multipart(_) => "invalid_form",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Ingest(IngestError::Decode(DecodeError::EmptyFile))
            | ApiError::Ingest(IngestError::NoRows) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ingest(_) | ApiError::Store(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "details": self.kind(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_import_errors_map_to_status_codes() {
        let empty = ApiError::from(IngestError::Decode(DecodeError::EmptyFile));
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);

        let down = ApiError::from(IngestError::StoreUnavailable(StoreError::Unavailable(
            "refused".into(),
        )));
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(
            ApiError::PayloadTooLarge { limit_mb: 1 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::JobNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn body_carries_message_and_kind() {
        let response = ApiError::from(IngestError::NoRows).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
