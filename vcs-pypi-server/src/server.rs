//! HTTP server setup: routes, middleware and the listener loop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{auth, config::Config, pypi, state::AppState};

/// Builds the router serving the index for `state`.
///
/// The index is mounted both at `/` and `/simple/`. `/health` stays reachable
/// without credentials when authentication is required.
pub fn build_router(state: Arc<AppState>) -> Router {
    let index_routes = Router::new()
        .route("/", get(pypi::simple_index))
        .route("/simple/", get(pypi::simple_index))
        .route("/simple", get(simple_redirect))
        .route("/simple/{project}/", get(pypi::project_page))
        .route("/simple/{project}", get(pypi::project_redirect))
        .route("/{project}/", get(pypi::project_page))
        .route("/{project}", get(pypi::project_redirect))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(index_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the index server and serves until the listener fails.
pub async fn run_server(config: Config) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;

    let state = AppState::from_config(config).map_err(|e| {
        error!(error = %e, "Failed to initialize provider");
        anyhow::anyhow!("Failed to initialize provider: {}", e)
    })?;
    info!(
        provider = state.provider.name(),
        owners = state.config.provider.owners.len(),
        ttl_secs = state.config.cache.ttl_seconds,
        "Starting vcs-pypi index"
    );
    if state.config.security.require_authentication {
        info!("Inbound authentication is required");
    }

    let state = Arc::new(state);
    warm_cache(Arc::clone(&state));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|e| {
        error!(host = %host, port = %port, error = %e, "Invalid socket address");
        anyhow::anyhow!("Invalid socket address {}:{}: {}", host, port, e)
    })?;

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind to address");
        anyhow::anyhow!("Failed to bind to {}:{}: {}", host, port, e)
    })?;

    info!("Server listening on http://{}", addr);
    println!("Serving simple index at http://{}:{}/simple/", host, port);
    println!("   pip install --index-url http://{}:{}/simple/ <package>", host, port);

    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}

/// Loads the first snapshot in the background so the first client does not
/// pay for the full provider walk.
fn warm_cache(state: Arc<AppState>) {
    tokio::spawn(async move {
        match state.project_index().await {
            Ok(index) => info!(projects = index.len(), "Initial index loaded"),
            Err(e) => warn!(error = %e, "Initial index load failed; will retry on first request"),
        }
    });
}

async fn simple_redirect() -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, HeaderValue::from_static("simple/"))],
    )
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "index": state.index_state().as_str(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::testing::{file, repo, StaticProvider};
    use crate::provider::RepositoryListing;
    use axum_test::TestServer;

    fn test_server() -> TestServer {
        let provider = StaticProvider::new(vec![RepositoryListing {
            repository: repo("widgets"),
            files: vec![file("widgets-1.0.tar.gz", None)],
        }]);
        let state = AppState::new(Config::for_org("acme"), Arc::new(provider));
        TestServer::new(build_router(Arc::new(state))).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_cache_state() {
        let server = test_server();

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["index"], "empty");

        server.get("/simple/").await.assert_status_ok();
        let body: serde_json::Value = server.get("/health").await.json();
        assert_eq!(body["index"], "fresh");
    }

    #[tokio::test]
    async fn test_simple_without_slash_redirects() {
        let server = test_server();

        let response = server.get("/simple").await;
        assert_eq!(response.status_code(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.header(header::LOCATION), "simple/");
    }

    #[tokio::test]
    async fn test_index_mounted_at_root_and_simple() {
        let server = test_server();

        let root = server.get("/").await.text();
        let simple = server.get("/simple/").await.text();
        assert_eq!(root, simple);
        assert!(root.contains(r#"<a href="widgets/">widgets</a>"#));
    }
}
