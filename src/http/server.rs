//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::{RatewardenError, Result};
use crate::ratelimit::Limiters;

/// HTTP server for the admission service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiters exposed by the service
    limiters: Limiters,
}

impl HttpServer {
    /// Create a new HTTP server over the given limiters.
    pub fn new(addr: SocketAddr, limiters: Limiters) -> Self {
        Self { addr, limiters }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server for the admission service"
        );

        axum::serve(listener, router(self.limiters))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                RatewardenError::Io(e)
            })
    }
}
