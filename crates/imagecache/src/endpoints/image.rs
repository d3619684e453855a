use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;

use imagecache_service::error::ImageError;
use imagecache_service::request::ImageRequest;
use imagecache_service::services::SharedServices;
use imagecache_service::transform::content_type;

use super::ResponseError;

/// Serves `GET` and `HEAD` requests for `/image?file=...` and `/image?url=...`.
pub async fn get_image(
    State(services): State<SharedServices>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response, ResponseError> {
    let request = ImageRequest {
        method,
        params,
        headers,
    };

    if request.param("file").is_none() && request.param("url").is_none() {
        return Err(ImageError::MissingParam("file").into());
    }

    let data = match services.registry.get_image(&request).await {
        Ok(data) => data,
        Err(error) => {
            let error = ResponseError::from(error);
            tracing::debug!(status = %error.status(), "Rejecting image request");
            return Err(error);
        }
    };

    let content_type = HeaderValue::from_static(content_type(&data));
    let content_length = HeaderValue::from(data.len());
    let body = if request.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(data)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, content_length);
    Ok(response)
}
