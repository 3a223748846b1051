//! Tool parameters and execution for the Stability AI image tools.
//!
//! Each tool has a typed parameter struct with a `validate` method that
//! collects every violation. [`ImageHandler::execute`] runs a validated call:
//! resolve the source image, call the provider, decode, store the image and
//! write the metadata sidecar.

use std::path::Path;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stability_mcp_common::context::CallerContext;
use stability_mcp_common::error::{Error, Result};
use stability_mcp_common::models::{
    DEFAULT_SD35_MODEL, ModelRegistry, OutputFormat, SD35_ASPECT_RATIOS, SD35_MODELS,
    STYLE_PRESETS,
};
use stability_mcp_common::storage::{
    METADATA_CONTENT_TYPE, MetadataRecord, ResourceDescriptor, ResourceStore, image_format_for,
    metadata_name_for, validate_resource_name,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{GenerationRequest, MAX_SEED, Operation, SourceImage, StabilityClient};

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 10_000;

/// Default aspect ratio for text-to-image.
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

pub const MIN_CFG_SCALE: f64 = 1.0;
pub const MAX_CFG_SCALE: f64 = 10.0;
pub const MIN_CREATIVITY: f64 = 0.1;
pub const MAX_CREATIVITY: f64 = 0.5;
pub const MIN_CONTROL_STRENGTH: f64 = 0.0;
pub const MAX_CONTROL_STRENGTH: f64 = 1.0;

/// Output formats the text-to-image endpoint can produce.
pub const GENERATE_FORMATS: &[OutputFormat] = &[OutputFormat::Png, OutputFormat::Jpeg];

/// Output formats the background-removal endpoint can produce.
pub const REMOVE_BACKGROUND_FORMATS: &[OutputFormat] = &[OutputFormat::Png, OutputFormat::Webp];

pub const NO_BACKGROUND_SUFFIX: &str = "-no-background";
pub const UPSCALED_SUFFIX: &str = "-upscaled";
pub const STRUCTURE_SUFFIX: &str = "-structure";

/// Validation error details for tool parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The argument that failed validation, as named on the wire.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Fold collected violations into a single `Error::Validation`.
pub fn validation_error(errors: &[ValidationError]) -> Error {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    Error::validation(messages.join("; "))
}

/// Text-to-image parameters for the SD 3.5 family.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageSd35Params {
    /// Text describing the image to generate (max 10000 characters)
    pub prompt: String,

    /// Name for the stored image, without path; the extension follows outputFormat
    pub output_image_file_name: String,

    /// Model: sd3.5-large (default), sd3.5-large-turbo or sd3.5-medium
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Aspect ratio, e.g. 1:1 (default), 16:9, 9:16, 21:9
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,

    /// What to keep out of the image (not supported by sd3.5-large-turbo)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    /// Style preset, e.g. photographic, anime, digital-art
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_preset: Option<String>,

    /// How strictly to follow the prompt (1-10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,

    /// Random seed (0-4294967294); omit for a random one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// png (default) or jpeg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
}

/// Background removal parameters.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBackgroundParams {
    /// URI or name of a stored image (see list_resources)
    pub image_file_uri: String,

    /// Name for the stored result; defaults to <source>-no-background
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image_file_name: Option<String>,

    /// png (default) or webp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
}

/// Creative upscale parameters.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleCreativeParams {
    /// URI or name of a stored image (see list_resources)
    pub image_file_uri: String,

    /// Description of the image, guides the upscale
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    /// How much detail the upscaler may invent (0.1-0.5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creativity: Option<f64>,

    /// Random seed (0-4294967294)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// png (default), jpeg or webp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,

    /// Name for the stored result; defaults to <source>-upscaled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image_file_name: Option<String>,
}

/// Structure-guided generation parameters.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlStructureParams {
    /// URI or name of the reference image (see list_resources)
    pub image_file_uri: String,

    /// What to generate on top of the reference structure
    pub prompt: String,

    /// How closely to follow the reference structure (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_strength: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    /// Random seed (0-4294967294)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// png (default), jpeg or webp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,

    /// Name for the stored result; defaults to <source>-structure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image_file_name: Option<String>,
}

fn check_prompt(errors: &mut Vec<ValidationError>, prompt: &str) {
    if prompt.trim().is_empty() {
        errors.push(ValidationError::new("prompt", "Prompt cannot be empty"));
    } else if prompt.chars().count() > MAX_PROMPT_LENGTH {
        errors.push(ValidationError::new(
            "prompt",
            format!(
                "Prompt length {} exceeds maximum {}",
                prompt.chars().count(),
                MAX_PROMPT_LENGTH
            ),
        ));
    }
}

fn check_seed(errors: &mut Vec<ValidationError>, seed: Option<i64>) {
    if let Some(seed) = seed {
        if !(0..=i64::from(MAX_SEED)).contains(&seed) {
            errors.push(ValidationError::new(
                "seed",
                format!("seed must be between 0 and {}, got {}", MAX_SEED, seed),
            ));
        }
    }
}

fn check_range(
    errors: &mut Vec<ValidationError>,
    field: &str,
    value: Option<f64>,
    min: f64,
    max: f64,
) {
    if let Some(value) = value {
        if !value.is_finite() || value < min || value > max {
            errors.push(ValidationError::new(
                field,
                format!("{} must be between {} and {}, got {}", field, min, max, value),
            ));
        }
    }
}

fn check_format(
    errors: &mut Vec<ValidationError>,
    format: Option<OutputFormat>,
    allowed: &[OutputFormat],
) {
    if let Some(format) = format {
        if !allowed.contains(&format) {
            let names: Vec<&str> = allowed.iter().map(|f| f.as_str()).collect();
            errors.push(ValidationError::new(
                "outputFormat",
                format!(
                    "Unsupported output format '{}'. Valid options: {}",
                    format,
                    names.join(", ")
                ),
            ));
        }
    }
}

fn check_file_name(errors: &mut Vec<ValidationError>, name: Option<&str>) {
    if let Some(name) = name {
        if let Err(e) = validate_resource_name(name) {
            let message = match e {
                Error::Validation(message) => message,
                other => other.to_string(),
            };
            errors.push(ValidationError::new("outputImageFileName", message));
        }
    }
}

fn check_source(errors: &mut Vec<ValidationError>, image_file_uri: &str) {
    if image_file_uri.trim().is_empty() {
        errors.push(ValidationError::new("imageFileUri", "Image URI cannot be empty"));
    }
}

fn seed_u32(seed: Option<i64>) -> Option<u32> {
    seed.and_then(|s| u32::try_from(s).ok())
}

impl GenerateImageSd35Params {
    /// Validate the parameters against the model constraints.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        check_prompt(&mut errors, &self.prompt);

        let model = self.model.as_deref().unwrap_or(DEFAULT_SD35_MODEL);
        match ModelRegistry::resolve_sd35(model) {
            Some(resolved) => {
                if !resolved.supports_negative_prompt
                    && self.negative_prompt.as_deref().is_some_and(|n| !n.is_empty())
                {
                    errors.push(ValidationError::new(
                        "negativePrompt",
                        format!("{} does not support negative prompts", resolved.id),
                    ));
                }
            }
            None => errors.push(ValidationError::new(
                "model",
                format!(
                    "Unknown model '{}'. Valid models: {}",
                    model,
                    SD35_MODELS.iter().map(|m| m.id).collect::<Vec<_>>().join(", ")
                ),
            )),
        }

        if let Some(ratio) = &self.aspect_ratio {
            if !SD35_ASPECT_RATIOS.contains(&ratio.as_str()) {
                errors.push(ValidationError::new(
                    "aspectRatio",
                    format!(
                        "Invalid aspect ratio '{}'. Valid options: {}",
                        ratio,
                        SD35_ASPECT_RATIOS.join(", ")
                    ),
                ));
            }
        }

        if let Some(preset) = &self.style_preset {
            if !STYLE_PRESETS.contains(&preset.as_str()) {
                errors.push(ValidationError::new(
                    "stylePreset",
                    format!("Unknown style preset '{}'", preset),
                ));
            }
        }

        check_range(&mut errors, "cfgScale", self.cfg_scale, MIN_CFG_SCALE, MAX_CFG_SCALE);
        check_seed(&mut errors, self.seed);
        check_format(&mut errors, self.output_format, GENERATE_FORMATS);

        if self.output_image_file_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "outputImageFileName",
                "File name cannot be empty",
            ));
        } else {
            check_file_name(&mut errors, Some(&self.output_image_file_name));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Build the provider request. Call after `validate`.
    pub fn to_request(&self) -> GenerationRequest {
        let model = self.model.as_deref().unwrap_or(DEFAULT_SD35_MODEL);
        let model = ModelRegistry::resolve_sd35(model).map_or(model, |m| m.id);

        let mut request = GenerationRequest::new(
            Operation::GenerateSd35 {
                model: model.to_string(),
                aspect_ratio: self
                    .aspect_ratio
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ASPECT_RATIO.to_string()),
                style_preset: self.style_preset.clone(),
                cfg_scale: self.cfg_scale,
            },
            self.output_format.unwrap_or(OutputFormat::Png),
        );
        request.prompt = Some(self.prompt.clone());
        request.negative_prompt = self.negative_prompt.clone();
        request.seed = seed_u32(self.seed);
        request
    }
}

impl RemoveBackgroundParams {
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        check_source(&mut errors, &self.image_file_uri);
        check_format(&mut errors, self.output_format, REMOVE_BACKGROUND_FORMATS);
        check_file_name(&mut errors, self.output_image_file_name.as_deref());
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn to_request(&self) -> GenerationRequest {
        let mut request = GenerationRequest::new(
            Operation::RemoveBackground,
            self.output_format.unwrap_or(OutputFormat::Png),
        );
        request.source_image = Some(self.image_file_uri.clone());
        request
    }
}

impl UpscaleCreativeParams {
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        check_source(&mut errors, &self.image_file_uri);
        check_prompt(&mut errors, &self.prompt);
        check_range(
            &mut errors,
            "creativity",
            self.creativity,
            MIN_CREATIVITY,
            MAX_CREATIVITY,
        );
        check_seed(&mut errors, self.seed);
        check_file_name(&mut errors, self.output_image_file_name.as_deref());
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn to_request(&self) -> GenerationRequest {
        let mut request = GenerationRequest::new(
            Operation::UpscaleCreative {
                creativity: self.creativity,
            },
            self.output_format.unwrap_or(OutputFormat::Png),
        );
        request.prompt = Some(self.prompt.clone());
        request.negative_prompt = self.negative_prompt.clone();
        request.seed = seed_u32(self.seed);
        request.source_image = Some(self.image_file_uri.clone());
        request
    }
}

impl ControlStructureParams {
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        check_source(&mut errors, &self.image_file_uri);
        check_prompt(&mut errors, &self.prompt);
        check_range(
            &mut errors,
            "controlStrength",
            self.control_strength,
            MIN_CONTROL_STRENGTH,
            MAX_CONTROL_STRENGTH,
        );
        check_seed(&mut errors, self.seed);
        check_file_name(&mut errors, self.output_image_file_name.as_deref());
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn to_request(&self) -> GenerationRequest {
        let mut request = GenerationRequest::new(
            Operation::ControlStructure {
                control_strength: self.control_strength,
            },
            self.output_format.unwrap_or(OutputFormat::Png),
        );
        request.prompt = Some(self.prompt.clone());
        request.negative_prompt = self.negative_prompt.clone();
        request.seed = seed_u32(self.seed);
        request.source_image = Some(self.image_file_uri.clone());
        request
    }
}

/// Strip a trailing image extension, if any.
fn strip_image_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if image_format_for(name).is_some() && !stem.is_empty() => stem,
        _ => name,
    }
}

/// Stored name for a tool's output.
///
/// An explicit name keeps its stem and takes the format's extension. Without
/// one, the source's stem plus `suffix` is used.
pub fn output_file_name(
    requested: Option<&str>,
    source_identifier: Option<&str>,
    suffix: &str,
    format: OutputFormat,
) -> Result<String> {
    let stem = match (requested, source_identifier) {
        (Some(requested), _) => strip_image_extension(requested.trim()).to_string(),
        (None, Some(source)) => {
            let last = source
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(source);
            format!("{}{}", strip_image_extension(last), suffix)
        }
        (None, None) => {
            return Err(Error::validation(
                "outputImageFileName: File name is required",
            ));
        }
    };

    let name = format!("{}.{}", stem, format.extension());
    validate_resource_name(&name)?;
    Ok(name)
}

/// Decoded provider output, ready to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl GenerationResult {
    /// Decode a base64 payload.
    ///
    /// # Errors
    /// Returns `Error::InvalidImage` if the payload is not base64 or is empty.
    pub fn decode(base64_image: &str, format: OutputFormat) -> Result<Self> {
        let bytes = BASE64
            .decode(base64_image.trim())
            .map_err(|e| Error::invalid_image(format!("invalid base64 data: {}", e)))?;
        if bytes.is_empty() {
            return Err(Error::invalid_image("decoded image is empty"));
        }
        Ok(Self { bytes, format })
    }

    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// A validated tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    GenerateImageSd35(GenerateImageSd35Params),
    RemoveBackground(RemoveBackgroundParams),
    UpscaleCreative(UpscaleCreativeParams),
    ControlStructure(ControlStructureParams),
}

impl ToolCall {
    pub fn request(&self) -> GenerationRequest {
        match self {
            ToolCall::GenerateImageSd35(p) => p.to_request(),
            ToolCall::RemoveBackground(p) => p.to_request(),
            ToolCall::UpscaleCreative(p) => p.to_request(),
            ToolCall::ControlStructure(p) => p.to_request(),
        }
    }

    /// Name the result will be stored under.
    pub fn output_name(&self, format: OutputFormat) -> Result<String> {
        match self {
            ToolCall::GenerateImageSd35(p) => {
                output_file_name(Some(&p.output_image_file_name), None, "", format)
            }
            ToolCall::RemoveBackground(p) => output_file_name(
                p.output_image_file_name.as_deref(),
                Some(&p.image_file_uri),
                NO_BACKGROUND_SUFFIX,
                format,
            ),
            ToolCall::UpscaleCreative(p) => output_file_name(
                p.output_image_file_name.as_deref(),
                Some(&p.image_file_uri),
                UPSCALED_SUFFIX,
                format,
            ),
            ToolCall::ControlStructure(p) => output_file_name(
                p.output_image_file_name.as_deref(),
                Some(&p.image_file_uri),
                STRUCTURE_SUFFIX,
                format,
            ),
        }
    }
}

/// Executes validated tool calls against the provider and the resource store.
pub struct ImageHandler {
    client: StabilityClient,
    store: Arc<dyn ResourceStore>,
    save_metadata: bool,
    save_metadata_failed: bool,
    allow_local_source_paths: bool,
}

impl ImageHandler {
    /// Metadata sidecars are on for both outcomes; local source paths are off.
    pub fn new(client: StabilityClient, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            client,
            store,
            save_metadata: true,
            save_metadata_failed: true,
            allow_local_source_paths: false,
        }
    }

    pub fn with_metadata(mut self, save_metadata: bool, save_metadata_failed: bool) -> Self {
        self.save_metadata = save_metadata;
        self.save_metadata_failed = save_metadata_failed;
        self
    }

    /// Accept absolute local paths for source images that are not in the store.
    pub fn with_local_source_paths(mut self, allow: bool) -> Self {
        self.allow_local_source_paths = allow;
        self
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Run a call and store the result.
    ///
    /// On failure a failure sidecar is written (when enabled) before the
    /// error is returned. Sidecar write failures are only logged.
    #[instrument(level = "info", skip_all, fields(caller = %ctx.ip_or_unknown()))]
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<ResourceDescriptor> {
        let request = call.request();
        let output_name = call.output_name(request.output_format)?;
        let request_params = request_params(&request);

        match self.run(&request, &output_name, ctx, cancel).await {
            Ok((descriptor, finish_reason, seed)) => {
                info!(uri = %descriptor.uri, "Image stored");
                if self.save_metadata {
                    let success_info = json!({
                        "uri": descriptor.uri,
                        "contentType": descriptor.mime_type,
                        "size": descriptor.size,
                        "finishReason": finish_reason,
                        "seed": seed,
                    });
                    self.write_sidecar(
                        &output_name,
                        MetadataRecord::success(request_params, success_info),
                    )
                    .await;
                }
                Ok(descriptor)
            }
            Err(e) => {
                warn!(error = %e, operation = request.operation.name(), "Tool call failed");
                if self.save_metadata_failed {
                    self.write_sidecar(
                        &output_name,
                        MetadataRecord::failure(request_params, e.to_string()),
                    )
                    .await;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        output_name: &str,
        ctx: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<(ResourceDescriptor, Option<String>, Option<u64>)> {
        let source = match &request.source_image {
            Some(identifier) => Some(self.load_source(identifier, ctx).await?),
            None => None,
        };

        let image = self.client.submit(request, source, cancel).await?;
        let result = GenerationResult::decode(&image.base64_image, request.output_format)?;

        let descriptor = self
            .store
            .write_resource(output_name, &result.bytes, result.content_type())
            .await?;
        Ok((descriptor, image.finish_reason, image.seed))
    }

    async fn load_source(&self, identifier: &str, ctx: &CallerContext) -> Result<SourceImage> {
        match self.store.read_resource(identifier, ctx).await {
            Ok(resource) => {
                let file_name = resource
                    .uri
                    .rsplit(['/', '\\'])
                    .next()
                    .unwrap_or(identifier)
                    .to_string();
                debug!(uri = %resource.uri, size = resource.bytes.len(), "Loaded source image");
                Ok(SourceImage::new(
                    file_name,
                    resource.bytes,
                    resource.content_type,
                ))
            }
            Err(Error::NotFound(_)) if self.allow_local_source_paths => {
                let raw = identifier.strip_prefix("file://").unwrap_or(identifier);
                let path = Path::new(raw);
                if !path.is_absolute() {
                    return Err(Error::not_found(identifier));
                }
                debug!(path = %path.display(), "Reading source image from local path");
                SourceImage::from_path(path).await.map_err(|e| match e {
                    Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                        Error::not_found(identifier)
                    }
                    other => other,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn write_sidecar(&self, output_name: &str, record: MetadataRecord) {
        let name = metadata_name_for(output_name);
        if let Err(e) = self
            .store
            .write_resource(&name, &record.to_pretty_json(), METADATA_CONTENT_TYPE)
            .await
        {
            warn!(%name, error = %e, "Failed to write metadata sidecar");
        }
    }
}

/// Request parameters as recorded in a metadata sidecar.
///
/// Falls back to `null` with a warning if the request cannot be encoded.
fn request_params<T: Serialize>(request: &T) -> Value {
    serde_json::to_value(request).unwrap_or_else(|e| {
        warn!(error = %e, "Could not encode request parameters for metadata");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_params() -> GenerateImageSd35Params {
        GenerateImageSd35Params {
            prompt: "A lighthouse at dusk".to_string(),
            output_image_file_name: "lighthouse".to_string(),
            model: None,
            aspect_ratio: None,
            negative_prompt: None,
            style_preset: None,
            cfg_scale: None,
            seed: None,
            output_format: None,
        }
    }

    fn fields(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_request_params_for_metadata() {
        let recorded = request_params(&generate_params().to_request());
        assert!(recorded.is_object(), "{}", recorded);
        assert!(recorded.to_string().contains("A lighthouse at dusk"), "{}", recorded);

        let mut unencodable = std::collections::BTreeMap::new();
        unencodable.insert(vec![1u8, 2], "tuple keys are not JSON");
        assert_eq!(request_params(&unencodable), Value::Null);
    }

    #[test]
    fn test_generate_defaults() {
        let params = generate_params();
        assert!(params.validate().is_ok());

        let request = params.to_request();
        assert_eq!(request.output_format, OutputFormat::Png);
        assert!(matches!(
            request.operation,
            Operation::GenerateSd35 { ref model, ref aspect_ratio, .. }
                if model == "sd3.5-large" && aspect_ratio == "1:1"
        ));
    }

    #[test]
    fn test_generate_resolves_model_alias() {
        let mut params = generate_params();
        params.model = Some("turbo".to_string());
        assert!(params.validate().is_ok());
        assert!(matches!(
            params.to_request().operation,
            Operation::GenerateSd35 { ref model, .. } if model == "sd3.5-large-turbo"
        ));
    }

    #[test]
    fn test_generate_collects_all_violations() {
        let mut params = generate_params();
        params.prompt = "   ".to_string();
        params.model = Some("sdxl".to_string());
        params.aspect_ratio = Some("7:3".to_string());
        params.cfg_scale = Some(11.0);
        params.seed = Some(-1);
        params.output_format = Some(OutputFormat::Webp);

        let errors = params.validate().unwrap_err();
        assert_eq!(
            fields(&errors),
            vec!["prompt", "model", "aspectRatio", "cfgScale", "seed", "outputFormat"]
        );
    }

    #[test]
    fn test_generate_prompt_length_limit() {
        let mut params = generate_params();
        params.prompt = "a".repeat(MAX_PROMPT_LENGTH);
        assert!(params.validate().is_ok());

        params.prompt.push('a');
        assert_eq!(fields(&params.validate().unwrap_err()), vec!["prompt"]);
    }

    #[test]
    fn test_turbo_rejects_negative_prompt() {
        let mut params = generate_params();
        params.model = Some("sd3.5-large-turbo".to_string());
        params.negative_prompt = Some("blurry".to_string());
        assert_eq!(fields(&params.validate().unwrap_err()), vec!["negativePrompt"]);
    }

    #[test]
    fn test_seed_bounds() {
        let mut params = generate_params();
        params.seed = Some(i64::from(MAX_SEED));
        assert!(params.validate().is_ok());
        assert_eq!(params.to_request().seed, Some(MAX_SEED));

        params.seed = Some(i64::from(MAX_SEED) + 1);
        assert_eq!(fields(&params.validate().unwrap_err()), vec!["seed"]);
    }

    #[test]
    fn test_remove_background_rejects_jpeg() {
        let params = RemoveBackgroundParams {
            image_file_uri: "cat.png".to_string(),
            output_image_file_name: None,
            output_format: Some(OutputFormat::Jpeg),
        };
        assert_eq!(fields(&params.validate().unwrap_err()), vec!["outputFormat"]);
    }

    #[test]
    fn test_upscale_creativity_range() {
        let mut params = UpscaleCreativeParams {
            image_file_uri: "cat.png".to_string(),
            prompt: "a cat".to_string(),
            negative_prompt: None,
            creativity: Some(0.1),
            seed: None,
            output_format: None,
            output_image_file_name: None,
        };
        assert!(params.validate().is_ok());
        params.creativity = Some(0.6);
        assert_eq!(fields(&params.validate().unwrap_err()), vec!["creativity"]);
    }

    #[test]
    fn test_control_strength_range_and_file_name() {
        let params = ControlStructureParams {
            image_file_uri: "".to_string(),
            prompt: "a castle".to_string(),
            control_strength: Some(1.5),
            negative_prompt: None,
            seed: None,
            output_format: None,
            output_image_file_name: Some("../escape".to_string()),
        };
        assert_eq!(
            fields(&params.validate().unwrap_err()),
            vec!["imageFileUri", "controlStrength", "outputImageFileName"]
        );
    }

    #[test]
    fn test_output_file_name_explicit() {
        let name = output_file_name(Some("sunset.png"), None, "", OutputFormat::Jpeg).unwrap();
        assert_eq!(name, "sunset.jpeg");

        let name = output_file_name(Some("v1.final"), None, "", OutputFormat::Png).unwrap();
        assert_eq!(name, "v1.final.png");
    }

    #[test]
    fn test_output_file_name_derived_from_source() {
        let name = output_file_name(
            None,
            Some("gs://bucket/cat.webp"),
            NO_BACKGROUND_SUFFIX,
            OutputFormat::Png,
        )
        .unwrap();
        assert_eq!(name, "cat-no-background.png");

        let name =
            output_file_name(None, Some("file:///tmp/imgs/dog.jpg"), UPSCALED_SUFFIX, OutputFormat::Webp)
                .unwrap();
        assert_eq!(name, "dog-upscaled.webp");
    }

    #[test]
    fn test_output_file_name_requires_some_name() {
        let result = output_file_name(None, None, "", OutputFormat::Png);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_generation_result_decode() {
        let encoded = BASE64.encode(b"\x89PNG");
        let result = GenerationResult::decode(&encoded, OutputFormat::Png).unwrap();
        assert_eq!(result.bytes, b"\x89PNG".to_vec());
        assert_eq!(result.content_type(), "image/png");

        assert!(matches!(
            GenerationResult::decode("", OutputFormat::Png),
            Err(Error::InvalidImage(_))
        ));
        assert!(matches!(
            GenerationResult::decode("not base64!", OutputFormat::Png),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_validation_error_display() {
        let err = validation_error(&[
            ValidationError::new("prompt", "Prompt cannot be empty"),
            ValidationError::new("seed", "out of range"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid arguments: prompt: Prompt cannot be empty; seed: out of range"
        );
    }
}
