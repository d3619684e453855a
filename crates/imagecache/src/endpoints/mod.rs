use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use imagecache_service::metric;
use imagecache_service::services::SharedServices;

mod error;
mod image;

pub use error::ResponseError;

use self::image::get_image;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

/// Records the duration and status code of every request.
async fn request_metrics(request: Request, next: Next) -> Response {
    let start = std::time::Instant::now();
    let response = next.run(request).await;

    metric!(timer("requests.duration") = start.elapsed());
    metric!(
        counter("responses.status_code") += 1,
        "status" => response.status().as_str(),
    );
    response
}

pub fn create_app(services: SharedServices) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(middleware::from_fn(request_metrics));

    Router::new()
        .route("/image", get(get_image).head(get_image))
        .with_state(services)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
