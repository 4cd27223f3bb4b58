//! Error type for the HTTP layer.
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse` impl maps
//! variants to status codes with a JSON `{"error": ...}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use db::DbError;
use engine::EngineError;
use queue::QueueError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable `X-User-Id` header.
    #[error("missing or invalid X-User-Id header")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => ApiError::NotFound("resource not found".into()),
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Database(other),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidWorkflow(msg) => ApiError::BadRequest(msg),
            EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            EngineError::NotResumable { .. } | EngineError::NotYetDue { .. } => {
                ApiError::Conflict(e.to_string())
            }
            EngineError::Database(db) => db.into(),
            EngineError::Serialization(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Database(db) => db.into(),
            QueueError::NoHandler(_) | QueueError::InvalidTaskData(_) => {
                ApiError::BadRequest(e.to_string())
            }
            QueueError::Handler(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn db_errors_map_to_statuses() {
        assert!(matches!(ApiError::from(DbError::NotFound), ApiError::NotFound(_)));
        assert!(matches!(
            ApiError::from(DbError::Conflict("task is running".into())),
            ApiError::Conflict(m) if m == "task is running"
        ));
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let id = Uuid::new_v4();
        assert!(matches!(
            ApiError::from(EngineError::InvalidWorkflow("bad".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(ApiError::from(EngineError::WorkflowNotFound(id)), ApiError::NotFound(_)));
        assert_eq!(
            ApiError::from(EngineError::Database(DbError::NotFound))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unknown_task_type_is_a_bad_request() {
        let response = ApiError::from(QueueError::NoHandler("fax".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
