//! JSON envelope and error → HTTP mapping.
//!
//! Success: `{"success": true, "data": ...}`.
//! Failure: `{"success": false, "error", "code", "trace_id"}`, where the
//! trace id is generated per failure and logged alongside it.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kruise_core::DashError;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
    trace_id: String,
}

/// A [`DashError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub DashError);

impl From<DashError> for ApiError {
    fn from(e: DashError) -> Self {
        Self(e)
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn status_for(e: &DashError) -> StatusCode {
    match e {
        DashError::BadRequest(_) | DashError::OperationNotSupported { .. } => StatusCode::BAD_REQUEST,
        DashError::NotFound { .. } => StatusCode::NOT_FOUND,
        DashError::PreconditionFailed { .. } => StatusCode::CONFLICT,
        DashError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
        DashError::StreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DashError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let trace_id = Uuid::new_v4().to_string();
        let code = self.0.code();
        if status.is_server_error() {
            error!(%trace_id, code, status = status.as_u16(), error = %self.0, "request failed");
        } else {
            warn!(%trace_id, code, status = status.as_u16(), error = %self.0, "request rejected");
        }

        let body = ErrorBody {
            success: false,
            error: self.0.to_string(),
            code,
            trace_id,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn taxonomy_maps_to_statuses() {
        let cases = [
            (DashError::BadRequest("x".into()), 400),
            (DashError::not_found("rollout"), 404),
            (
                DashError::PreconditionFailed {
                    code: "STABLE_REVISION_NOT_FOUND",
                    message: "x".into(),
                },
                409,
            ),
            (DashError::unsupported_kind("job"), 501),
            (DashError::StreamUnavailable("x".into()), 503),
            (DashError::Internal("x".into()), 500),
            (
                DashError::OperationNotSupported {
                    kind: "DaemonSet".into(),
                    operation: "scaled",
                },
                400,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(status_for(&error).as_u16(), status, "{error:?}");
        }
    }

    #[tokio::test]
    async fn error_envelope_carries_code_and_trace_id() {
        let response = ApiError(DashError::not_found("rollout")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["error"], "rollout not found");
        assert!(Uuid::parse_str(body["trace_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn success_envelope_wraps_data() {
        let response = ok(vec!["default"]).into_response();
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({"success": true, "data": ["default"]}));
    }
}
