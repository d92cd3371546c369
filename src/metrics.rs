use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bluegreen_registry::metrics as registry_metrics;
use bluegreen_scheduler::metrics as scheduler_metrics;
use bulkload_adapter::metrics as bulkload_metrics;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        scheduler_metrics::register_metrics(registry);
        registry_metrics::register_metrics(registry);
        bulkload_metrics::register_metrics(registry);
    });
}

/// Serve `/metrics` on `port`; `0` disables the endpoint.
pub fn spawn_metrics_server(port: u16) -> Option<JoinHandle<()>> {
    if port == 0 {
        return None;
    }

    register_metrics();
    let registry = Arc::new(global_registry().clone());
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "metrics server listening");
    Some(tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    error!(?err, "metrics server exited with error");
                }
            }
            Err(err) => error!(?err, "failed to bind metrics listener"),
        }
    }))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    match render(&registry) {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(reason) => {
            error!(reason, "failed to render prometheus metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}

/// Text exposition of every registered family.
pub fn render(registry: &Registry) -> Result<(HeaderValue, String), &'static str> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|_| "encode")?;
    let body = String::from_utf8(buffer).map_err(|_| "utf8")?;
    let content_type = HeaderValue::from_str(encoder.format_type()).map_err(|_| "content-type")?;
    Ok((content_type, body))
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_orchestrator_families() {
        register_metrics();
        scheduler_metrics::record_discovered();
        registry_metrics::record_cutover(true);

        let (content_type, body) = render(global_registry()).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
        assert!(body.contains("bluegreen_tasks_discovered_total"));
        assert!(body.contains("bluegreen_cutover_total"));
    }
}
