//! Crate-wide error taxonomy and its mapping onto HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::DocumentError;
use crate::storage::crypto::CryptoError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing, malformed, invalid or expired bearer credential.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    /// Role claim does not match the role the route requires.
    #[error("forbidden: insufficient role")]
    Forbidden,

    /// The one-time access key was already consumed.
    #[error("access already used")]
    AlreadyUsed,

    #[error("not found: {0}")]
    NotFound(String),

    /// Transient backend failure that survived the retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// At least one chunk of a batch upload failed permanently.
    #[error("batch upload failed for {failed} of {total} chunks")]
    PartialBatchFailure { failed: usize, total: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::AlreadyUsed => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::StoreUnavailable(_)
            | Error::Crypto(_)
            | Error::PartialBatchFailure { .. }
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller. Backend detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            Error::Unauthorized(reason) => format!("Unauthorized: {}", reason),
            Error::Forbidden => "Forbidden: insufficient role".to_string(),
            Error::AlreadyUsed => "This access has already been used".to_string(),
            Error::NotFound(what) => format!("Not found: {}", what),
            Error::BadRequest(msg) => msg.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<DocumentError> for Error {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::NotFound { collection, id } => {
                Error::NotFound(format!("{}/{}", collection, id))
            }
            other => Error::StoreUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = serde_json::json!({ "error": self.public_message() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Unauthorized("malformed credential").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::AlreadyUsed.status(), StatusCode::CONFLICT);
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::StoreUnavailable("timeout".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_backend_detail_not_exposed() {
        let err = Error::StoreUnavailable("pinning host 10.0.0.7 refused".into());
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_document_not_found_maps_to_not_found() {
        let err: Error = DocumentError::NotFound {
            collection: "users".into(),
            id: "u1".into(),
        }
        .into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
