use std::future::{ready, Future};
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

use crate::error::AppError;

pub async fn index() -> &'static str {
    "stream agents worker"
}

/// Index, readiness and liveness routes. Pass a recorder handle to also
/// expose `/metrics`.
pub fn router(liveness: HealthRegistry, recorder: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    match recorder {
        Some(handle) => router
            .route("/metrics", get(move || ready(handle.render())))
            .layer(axum::middleware::from_fn(track_metrics)),
        None => router,
    }
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, AppError> {
    const BUCKETS: &[f64] = &[
        0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .map_err(|e| AppError::Metrics(e.to_string()))?
        .install_recorder()
        .map_err(|e| AppError::Metrics(e.to_string()))
}

/// Serve `router` on an already bound listener until `shutdown` resolves.
/// Binding is left to the caller so that a taken port fails before any work
/// starts.
pub async fn serve<F>(
    listener: TcpListener,
    router: Router,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
