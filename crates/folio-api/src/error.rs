//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error returned by every handler; rendered as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(folio_core::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<folio_core::Error> for ApiError {
    fn from(err: folio_core::Error) -> Self {
        use folio_core::Error;
        match err {
            Error::NotFound(_) => ApiError::NotFound(err.to_string()),
            Error::PermissionDenied(_) => ApiError::Forbidden(err.to_string()),
            Error::InvalidInput(_) | Error::UnsupportedFormat(_) => {
                ApiError::BadRequest(err.to_string())
            }
            Error::Conflict(_) | Error::InvalidTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(err) = &self {
            error!(error = %err, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Error, MaterialStatus};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::NotFound("material 1".into()), StatusCode::NOT_FOUND),
            (Error::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (Error::UnsupportedFormat("x.xyz".into()), StatusCode::BAD_REQUEST),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (
                Error::InvalidTransition {
                    from: MaterialStatus::Completed,
                    to: MaterialStatus::Processing,
                },
                StatusCode::CONFLICT,
            ),
            (Error::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_message_keeps_core_text() {
        let err = ApiError::from(Error::NotFound("material 42".into()));
        assert_eq!(err.to_string(), "Not found: material 42");
    }
}
