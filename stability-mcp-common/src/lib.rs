//! Stability MCP Common Library
//!
//! Shared configuration, caller context, resource storage, GCS access,
//! model tables, error handling, tracing, and the stdio/SSE server runners
//! used by the Stability AI MCP server.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod gcs;
pub mod models;
pub mod server;
pub mod sse;
pub mod storage;
pub mod tracing;
pub mod transport;

#[cfg(test)]
mod gcs_test;
#[cfg(test)]
mod storage_test;
#[cfg(test)]
mod transport_test;

pub use config::{Config, StorageBackend};
pub use context::CallerContext;
pub use error::{AuthError, ConfigError, Error, GcsError, GcsOperation, Result};
pub use server::{McpServerBuilder, ServerError, shutdown_channel};
pub use storage::{ResourceDescriptor, ResourceStore, StoredResource, build_store};
pub use transport::{Transport, TransportArgs};
