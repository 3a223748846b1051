//! MCP server runner.
//!
//! Runs a [`ServerHandler`] over the configured [`Transport`] until the peer
//! disconnects or a shutdown signal arrives.
//!
//! # Example
//!
//! ```ignore
//! use stability_mcp_common::server::McpServerBuilder;
//! use stability_mcp_common::transport::Transport;
//!
//! McpServerBuilder::new(handler)
//!     .with_transport(Transport::sse(3020))
//!     .run()
//!     .await?;
//! ```

use std::net::SocketAddr;

use rmcp::{ServerHandler, ServiceExt};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::sse::{self, SessionRegistry};
use crate::transport::Transport;

/// Failures of the transport layer itself, as opposed to tool errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The SSE listener could not take its port.
    #[error("Failed to bind to port {port}: {message}")]
    BindFailed { port: u16, message: String },

    /// rmcp or axum gave up on the connection.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serves one handler over stdio or SSE.
pub struct McpServerBuilder<H> {
    handler: H,
    transport: Transport,
    bind_host: String,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl<H> McpServerBuilder<H>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            transport: Transport::default(),
            bind_host: "0.0.0.0".to_string(),
            shutdown_rx: None,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Host the SSE listener binds to (default `0.0.0.0`).
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Stop when the sender fires or is dropped instead of waiting for a signal.
    pub fn with_shutdown(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Run until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(transport = %self.transport, "Starting MCP server");

        match self.transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Sse { port } => self.run_sse(port).await,
        }
    }

    async fn run_stdio(self) -> Result<(), ServerError> {
        use rmcp::transport::io::stdio;

        let shutdown = shutdown_future(self.shutdown_rx);

        let service = self
            .handler
            .serve(stdio())
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        tokio::select! {
            result = service.waiting() => {
                result.map_err(|e| ServerError::Transport(e.to_string()))?;
                tracing::info!("Client disconnected");
                Ok(())
            }
            _ = shutdown => {
                tracing::info!("Received shutdown signal, stopping server");
                Ok(())
            }
        }
    }

    async fn run_sse(self, port: u16) -> Result<(), ServerError> {
        let router = sse::router(self.handler, SessionRegistry::new());

        let bind_addr = format!("{}:{}", self.bind_host, port);
        let tcp_listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                port,
                message: e.to_string(),
            })?;

        tracing::info!(
            port,
            sse = sse::SSE_PATH,
            messages = sse::MESSAGES_PATH,
            "SSE server listening"
        );

        axum::serve(
            tcp_listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_future(self.shutdown_rx))
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

        tracing::info!("SSE server stopped");
        Ok(())
    }
}

async fn shutdown_future(rx: Option<oneshot::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.await;
        }
        None => wait_for_shutdown_signal().await,
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere).
///
/// If a handler cannot be registered the failure is logged and this waits on
/// the remaining one.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let sigterm = async {
            match signal(SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        let sigint = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to register SIGINT handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = sigterm => tracing::info!("Received SIGTERM"),
            _ = sigint => tracing::info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Channel for triggering shutdown programmatically.
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}
