use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use conductor_core::error::ConductorError;

/// A `ConductorError` rendered as an HTTP response.
pub struct ApiError(pub ConductorError);

impl From<ConductorError> for ApiError {
    fn from(err: ConductorError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &ConductorError) -> StatusCode {
    match err {
        ConductorError::NotFound(_)
        | ConductorError::UnknownWorkflow(_)
        | ConductorError::UnknownAgent(_) => StatusCode::NOT_FOUND,
        ConductorError::CapacityExceeded { .. } | ConductorError::CollaborationRefused { .. } => {
            StatusCode::CONFLICT
        }
        ConductorError::InvalidWorkflow(_) | ConductorError::InvalidSession(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status_for(&self.0), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_are_404() {
        assert_eq!(
            status_for(&ConductorError::UnknownWorkflow("wf".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ConductorError::NotFound("execution x".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn capacity_is_conflict() {
        let err = ConductorError::CapacityExceeded {
            agent: "triage_agent".into(),
            limit: 1,
        };
        assert_eq!(status_for(&err), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_input_is_422() {
        assert_eq!(
            status_for(&ConductorError::InvalidWorkflow("cycle".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ConductorError::InvalidSession("empty".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
