use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{debug, error, warn};

use lib_common::core::DispatchError;
use lib_common::records::RecordError;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// # Application Error
///
/// Everything a handler can fail with. Client faults carry their message to
/// the caller; storage faults are logged in full and answered generically.
#[derive(Debug)]
pub enum AppError {
    /// Error from the record service (validation, not-found, conflict, storage).
    Record(RecordError),
    /// No live subscription could be opened (limit reached or shutting down).
    Subscribe(DispatchError),
    /// The query string could not be decoded.
    BadQuery(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Record(RecordError::Validation(_))
            | AppError::Record(RecordError::InvalidSortColumn(_))
            | AppError::BadQuery(_) => StatusCode::BAD_REQUEST,
            AppError::Record(RecordError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Record(RecordError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Record(RecordError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Subscribe(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Record(e) => e.kind(),
            AppError::Subscribe(DispatchError::CapacityReached(_)) => "SubscriberLimitReached",
            AppError::Subscribe(DispatchError::Closed) => "ShuttingDown",
            AppError::BadQuery(_) => "ValidationError",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Record(RecordError::Storage(e)) => {
                error!("Storage error: {}", e);
                INTERNAL_MESSAGE.to_string()
            }
            AppError::Subscribe(e) => {
                warn!("Subscription refused: {}", e);
                self.to_string()
            }
            other => {
                debug!("Request rejected with {}: {}", status, other);
                other.to_string()
            }
        };

        let body = json!({
            "message": message,
            "error_type": self.error_type(),
        });
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Record(e) => write!(f, "{}", e),
            AppError::Subscribe(e) => write!(f, "{}", e),
            AppError::BadQuery(s) => write!(f, "Invalid query string: {}", s),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Record(e) => Some(e),
            AppError::Subscribe(e) => Some(e),
            AppError::BadQuery(_) => None,
        }
    }
}

impl From<RecordError> for AppError {
    fn from(e: RecordError) -> Self {
        AppError::Record(e)
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Subscribe(e)
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::BadQuery(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_common::records::StoreError;
    use std::time::Duration;

    #[test]
    fn record_errors_map_to_http_status() {
        let cases = [
            (RecordError::Validation("\"name\" is required".into()), StatusCode::BAD_REQUEST),
            (RecordError::InvalidSortColumn("color".into()), StatusCode::BAD_REQUEST),
            (RecordError::NotFound("A1".into()), StatusCode::NOT_FOUND),
            (RecordError::Conflict("A1".into()), StatusCode::CONFLICT),
            (
                RecordError::Storage(StoreError::Timeout(Duration::from_secs(5))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
        assert_eq!(
            AppError::from(DispatchError::CapacityReached(1)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn storage_detail_is_not_sent_to_the_caller() {
        let err = AppError::from(RecordError::Storage(StoreError::Backend(
            "password authentication failed for user zoo".into(),
        )));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], INTERNAL_MESSAGE);
        assert_eq!(body["error_type"], "StorageUnavailable");
    }
}
