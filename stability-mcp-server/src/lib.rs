//! Stability AI MCP Server Library
//!
//! Exposes Stability AI text-to-image, background removal, creative upscale
//! and structure control as MCP tools, with generated images stored through a
//! pluggable resource store.

pub mod client;
pub mod handler;
pub mod prompts;
pub mod server;
pub mod tools;

pub use client::{
    GenerationRequest, JobHandle, PollPolicy, ProviderImage, SourceImage, StabilityClient,
};
pub use handler::{GenerationResult, ImageHandler, ToolCall};
pub use server::StabilityServer;
pub use tools::ToolKind;
