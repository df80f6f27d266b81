//! Mapping of domain errors onto HTTP and RPC status codes

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tally_core::TallyError;
use tally_storage::StorageError;
use tracing::{error, warn};

/// Error returned by HTTP handlers
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

/// Status code for a domain error
pub fn status_for(err: &TallyError) -> StatusCode {
    match err {
        TallyError::MissingField(_) | TallyError::NotFound(_) => StatusCode::NOT_FOUND,
        TallyError::UnknownKind(_)
        | TallyError::InvalidMetric(_)
        | TallyError::Serialization(_)
        | TallyError::Integrity(_)
        | TallyError::Crypto(_)
        | TallyError::Compression(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        Self::new(status_for(&err), err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        error!("Store failure: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("store failure: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            warn!(status = self.status.as_u16(), "{}", self.message);
        }
        (self.status, self.message).into_response()
    }
}

/// RPC status for a domain error
pub fn rpc_status(err: &TallyError) -> tonic::Status {
    match status_for(err) {
        StatusCode::NOT_FOUND if matches!(err, TallyError::NotFound(_)) => {
            tonic::Status::not_found(err.to_string())
        }
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
            tonic::Status::invalid_argument(err.to_string())
        }
        _ => tonic::Status::internal(err.to_string()),
    }
}
