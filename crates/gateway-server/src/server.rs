//! HTTP server lifecycle.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::routes::create_router;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;

/// Errors binding or serving the HTTP listener
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured address could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind
        addr: String,
        /// Underlying bind error
        #[source]
        source: io::Error,
    },

    /// The accept loop failed
    #[error("server error: {0}")]
    Serve(#[from] io::Error),
}

/// The gateway HTTP server
pub struct Server {
    state: AppState,
}

impl Server {
    /// Wrap application state for serving
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Bind the configured address and serve until a shutdown signal.
    ///
    /// After the signal the listener stops accepting and in-flight
    /// requests get `server.shutdown_grace` to finish; connections
    /// still open past the grace period are dropped.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound or the accept
    /// loop fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.state.config.server.bind_addr();
        let grace = self.state.config.server.shutdown_grace;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(addr = %addr, "gateway listening");

        let app = create_router(self.state);
        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let signal = shutdown_signal().await;
            info!(signal = %signal, "draining connections");
            let _ = drain_tx.send(());
        });

        tokio::select! {
            result = server => {
                result?;
                info!("gateway stopped");
            }
            () = async {
                // The deadline arms only once the shutdown signal fires.
                let _ = drain_rx.await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    grace_seconds = grace.as_secs(),
                    "shutdown grace period expired, dropping open connections",
                );
            }
        }

        Ok(())
    }
}
