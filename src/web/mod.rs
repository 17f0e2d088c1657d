//! The web module for handling the Axum API.

pub mod api;

use crate::coordinator::PrinterService;
use std::sync::Arc;

/// Binds `listen` and serves the API until ctrl-c.
pub async fn serve(listen: &str, service: Arc<dyn PrinterService>) -> std::io::Result<()> {
    let app = api::create_router(service);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down web API");
        })
        .await
}
