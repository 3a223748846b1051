//! MCP server implementation for the Stability AI tools.
//!
//! This module provides the MCP server handler that exposes:
//! - the four image tools from [`crate::tools`]
//! - stored images as resources, read through the configured store
//! - the prompt templates from [`crate::prompts`]

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam, GetPromptResult,
    JsonObject, ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
    Prompt, PromptMessage, PromptMessageRole, RawResource, ReadResourceRequestParam,
    ReadResourceResult, Resource, ResourceContents, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::json;
use stability_mcp_common::context::CallerContext;
use stability_mcp_common::error::Error;
use stability_mcp_common::storage::{ResourceDescriptor, StoredResource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handler::{ImageHandler, ToolCall};
use crate::prompts::{PROMPTS, find_prompt, inject_template};
use crate::tools::tool_definitions;

/// Name reported in the MCP handshake.
pub const SERVER_NAME: &str = "stability-ai";

/// MCP server for Stability AI image tools.
#[derive(Clone)]
pub struct StabilityServer {
    handler: Arc<ImageHandler>,
}

impl StabilityServer {
    pub fn new(handler: ImageHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Validate and run a tool call.
    ///
    /// Validation failures never reach the provider.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<&JsonObject>,
        ctx: &CallerContext,
        cancel: CancellationToken,
    ) -> Result<CallToolResult, Error> {
        let call = ToolCall::parse(name, arguments)?;
        info!(tool = %call.kind(), caller = %ctx.ip_or_unknown(), "Calling tool");

        let stored = self.handler.execute(&call, ctx, &cancel).await?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Image saved to {}",
            stored.uri
        ))]))
    }

    /// Resource listing for the current store.
    pub async fn resources(&self, ctx: &CallerContext) -> Result<Vec<Resource>, Error> {
        let listed = self.handler.store().list_resources(ctx).await?;
        Ok(listed.into_iter().map(to_resource).collect())
    }

    /// Read a stored resource as MCP contents.
    pub async fn resource_contents(
        &self,
        uri: &str,
        ctx: &CallerContext,
    ) -> Result<ResourceContents, Error> {
        let stored = self.handler.store().read_resource(uri, ctx).await?;
        to_contents(stored)
    }
}

fn caller_context(context: &RequestContext<RoleServer>) -> CallerContext {
    context
        .extensions
        .get::<CallerContext>()
        .cloned()
        .unwrap_or_default()
}

fn to_resource(descriptor: ResourceDescriptor) -> Resource {
    Resource {
        raw: RawResource {
            uri: descriptor.uri,
            name: descriptor.name,
            title: None,
            description: None,
            mime_type: Some(descriptor.mime_type),
            size: descriptor.size.and_then(|s| u32::try_from(s).ok()),
            icons: None,
            meta: None,
        },
        annotations: None,
    }
}

fn to_contents(stored: StoredResource) -> Result<ResourceContents, Error> {
    if stored.content_type.starts_with("text/") {
        let text = String::from_utf8_lossy(&stored.bytes).into_owned();
        return Ok(ResourceContents::text(text, stored.uri));
    }

    let blob = json!({
        "uri": stored.uri,
        "mimeType": stored.content_type,
        "blob": BASE64.encode(&stored.bytes),
    });
    serde_json::from_value(blob)
        .map_err(|e| Error::invalid_image(format!("cannot encode resource contents: {}", e)))
}

/// Map a domain error to an MCP error, keeping the message.
pub fn to_mcp_error(error: Error) -> McpError {
    let message = error.to_string();
    match error {
        Error::Validation(_) | Error::UnknownTool(_) => McpError::invalid_params(message, None),
        Error::NotFound(_) => McpError::resource_not_found(message, None),
        _ => McpError::internal_error(message, None),
    }
}

impl ServerHandler for StabilityServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo {
            instructions: Some(
                "Image generation and editing with Stability AI. \
                 Use stability-ai-generate-image-sd35 to create images from text, \
                 stability-ai-remove-background, stability-ai-upscale-creative and \
                 stability-ai-control-structure to work on stored images. \
                 Stored images are listed as resources."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            ..Default::default()
        };
        info.server_info.name = SERVER_NAME.to_string();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info
    }

    fn list_tools(
        &self,
        _params: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: tool_definitions(),
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let ctx = caller_context(&context);
            self.dispatch(
                params.name.as_ref(),
                params.arguments.as_ref(),
                &ctx,
                context.ct.clone(),
            )
            .await
            .map_err(to_mcp_error)
        }
    }

    fn list_resources(
        &self,
        _params: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move {
            let ctx = caller_context(&context);
            debug!(caller = %ctx.ip_or_unknown(), "Listing resources");

            let resources = self.resources(&ctx).await.map_err(to_mcp_error)?;
            Ok(ListResourcesResult {
                resources,
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn read_resource(
        &self,
        params: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            let ctx = caller_context(&context);
            debug!(uri = %params.uri, caller = %ctx.ip_or_unknown(), "Reading resource");

            let contents = self
                .resource_contents(&params.uri, &ctx)
                .await
                .map_err(to_mcp_error)?;
            Ok(ReadResourceResult {
                contents: vec![contents],
            })
        }
    }

    fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        async move {
            let prompts = PROMPTS
                .iter()
                .map(|p| Prompt::new(p.name, Some(p.description), None))
                .collect();
            Ok(ListPromptsResult {
                prompts,
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn get_prompt(
        &self,
        params: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<GetPromptResult, McpError>> + Send + '_ {
        async move {
            let prompt = find_prompt(&params.name).ok_or_else(|| {
                McpError::invalid_params(format!("Prompt not found: {}", params.name), None)
            })?;

            let text = inject_template(prompt.template, params.arguments.as_ref());
            Ok(GetPromptResult {
                description: Some(prompt.description.to_string()),
                messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
            })
        }
    }
}
