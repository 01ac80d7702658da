use crate::{
    config::ServerConfig,
    coordinator::{ShutdownCoordinator, ShutdownState},
    error::Result,
};
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{healthz_handler, readyz_handler, track_connections, work_handler};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) coordinator: Arc<ShutdownCoordinator>,
}

/// Wrap every route of `app` in connection tracking and add the health
/// endpoints.
///
/// Health routes are added after the tracking layer so polling them never
/// counts as in-flight work.
pub fn router(coordinator: Arc<ShutdownCoordinator>, app: Router<ServerState>) -> Router {
    let state = ServerState { coordinator };

    app.layer(middleware::from_fn_with_state(
        state.clone(),
        track_connections,
    ))
    .route("/healthz", get(healthz_handler))
    .route("/readyz", get(readyz_handler))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Routes served by the demo worker
pub fn demo_routes() -> Router<ServerState> {
    Router::new().route("/work", get(work_handler))
}

/// HTTP listener that stops accepting once the coordinator reaches CLEANING_UP
pub struct HttpServer {
    pub(crate) config: ServerConfig,
    pub(crate) coordinator: Arc<ShutdownCoordinator>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve `app` on `listener` until the drain phase is over
    pub async fn serve(&self, listener: TcpListener, app: Router) -> Result<()> {
        let coordinator = Arc::clone(&self.coordinator);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                coordinator.wait_for_state(ShutdownState::CleaningUp).await;
                info!("Closing HTTP listener");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Bind and serve `routes` plus the health endpoints
    pub async fn start(&self, routes: Router<ServerState>) -> Result<()> {
        let listener = self.bind().await?;
        let app = router(Arc::clone(&self.coordinator), routes);
        self.serve(listener, app).await
    }
}
