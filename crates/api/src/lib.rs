//! `api` crate: the axum REST layer over the engine and the task queue.
//!
//! Every route except `/health` acts for the user named in `X-User-Id`.

pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;


pub use dispatcher::ServiceDispatcher;
pub use error::ApiError;
pub use router::build_router;
pub use state::{AppState, ServiceUrls};

use tokio::net::TcpListener;
use tracing::info;

/// Serve the API on `bind` until Ctrl-C.
pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
