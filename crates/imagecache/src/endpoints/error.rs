use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

use imagecache_service::error::ImageError;

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl ResponseError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn image_error_status(err: &ImageError) -> StatusCode {
    match err {
        ImageError::MissingParam(_)
        | ImageError::InvalidUrl(_)
        | ImageError::NoMatchingSource => StatusCode::BAD_REQUEST,
        ImageError::InvalidPath => StatusCode::NOT_FOUND,
        ImageError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
        ImageError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ImageError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
        ImageError::Transform(_) | ImageError::CacheWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ImageError> for ResponseError {
    fn from(err: ImageError) -> Self {
        Self {
            status: image_error_status(&err),
            err: err.into(),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}
