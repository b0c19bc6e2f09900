//! HTTP surface of the impact service.

mod http;

pub use http::{AppState, ImpactServer};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::ImpactError;
use crate::template::TemplateError;

/// JSON body describing a template failure.
pub fn template_error_body(error: &TemplateError) -> serde_json::Value {
    match error {
        TemplateError::PolicyViolation { construct } => json!({
            "kind": error.kind(),
            "message": error.to_string(),
            "construct": construct.to_string(),
        }),
        TemplateError::Syntax => json!({
            "kind": error.kind(),
            "message": error.to_string(),
        }),
    }
}

/// Maps crate errors onto status codes. Unexpected failures are logged and
/// answered with a generic body.
#[derive(Debug)]
pub struct ApiError(pub ImpactError);

impl From<ImpactError> for ApiError {
    fn from(err: ImpactError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ImpactError::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ImpactError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ImpactError::Template(error) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "content": "", "error": template_error_body(&error) })),
            )
                .into_response(),
            other => {
                log::error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
