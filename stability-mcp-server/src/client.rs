//! Stability AI REST client.
//!
//! Three endpoints answer synchronously with a base64 image. Creative upscale
//! is asynchronous: the submit call returns a job id that is resolved by
//! polling `GET /v2beta/results/{id}` under a bounded [`PollPolicy`].

use std::path::Path;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use stability_mcp_common::error::{Error, Result};
use stability_mcp_common::models::OutputFormat;
use stability_mcp_common::storage::content_type_for;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Per-call HTTP timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest seed the provider accepts.
pub const MAX_SEED: u32 = 4_294_967_294;

pub const GENERATE_SD3_PATH: &str = "/v2beta/stable-image/generate/sd3";
pub const REMOVE_BACKGROUND_PATH: &str = "/v2beta/stable-image/edit/remove-background";
pub const UPSCALE_CREATIVE_PATH: &str = "/v2beta/stable-image/upscale/creative";
pub const CONTROL_STRUCTURE_PATH: &str = "/v2beta/stable-image/control/structure";
pub const RESULTS_PATH: &str = "/v2beta/results";

/// Backoff schedule for resolving asynchronous jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second fetch
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Upper bound for any single delay, jitter included
    pub max_delay: Duration,
    /// Relative jitter, e.g. `0.1` for ±10%
    pub jitter: f64,
    /// Total number of fetches before giving up
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
            max_attempts: 60,
        }
    }
}

impl PollPolicy {
    /// Delay without jitter after the `retry`-th pending response (0-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay with jitter applied. `unit` is a sample from `[-1, 1]`.
    pub fn jittered_delay(&self, retry: u32, unit: f64) -> Duration {
        let base = self.base_delay(retry).as_secs_f64();
        let spread = self.jitter.clamp(0.0, 1.0) * unit.clamp(-1.0, 1.0);
        let secs = (base * (1.0 + spread)).max(0.0);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

fn jitter_sample() -> f64 {
    rand::rng().random_range(-1.0..=1.0)
}

/// Image bytes sent as the multipart `image` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl SourceImage {
    pub fn new(
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: content_type.into(),
        }
    }

    /// Load a source image from a local file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let content_type = content_type_for(&file_name).to_string();
        Ok(Self {
            file_name,
            bytes,
            content_type,
        })
    }

    fn into_part(self) -> Result<Part> {
        Ok(Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.content_type)?)
    }
}

/// Operation-specific request parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "operation",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Operation {
    GenerateSd35 {
        model: String,
        aspect_ratio: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        style_preset: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cfg_scale: Option<f64>,
    },
    RemoveBackground,
    UpscaleCreative {
        #[serde(skip_serializing_if = "Option::is_none")]
        creativity: Option<f64>,
    },
    ControlStructure {
        #[serde(skip_serializing_if = "Option::is_none")]
        control_strength: Option<f64>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GenerateSd35 { .. } => "generate-sd35",
            Operation::RemoveBackground => "remove-background",
            Operation::UpscaleCreative { .. } => "upscale-creative",
            Operation::ControlStructure { .. } => "control-structure",
        }
    }

    /// Whether the operation works on a source image.
    pub fn needs_source(&self) -> bool {
        !matches!(self, Operation::GenerateSd35 { .. })
    }
}

/// A fully validated provider request.
///
/// Serialized as-is into the `requestParams` of metadata sidecars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    pub output_format: OutputFormat,
    /// Resource identifier of the source image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
}

impl GenerationRequest {
    pub fn new(operation: Operation, output_format: OutputFormat) -> Self {
        Self {
            operation,
            prompt: None,
            negative_prompt: None,
            seed: None,
            output_format,
            source_image: None,
        }
    }

    /// Shared optional fields as multipart text parts.
    fn common_fields(&self, mut form: Form) -> Form {
        if let Some(prompt) = &self.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(negative) = self.negative_prompt.as_ref().filter(|n| !n.is_empty()) {
            form = form.text("negative_prompt", negative.clone());
        }
        if let Some(seed) = self.seed {
            form = form.text("seed", seed.to_string());
        }
        form.text("output_format", self.output_format.as_str())
    }
}

/// Provider job awaiting completion.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub submitted_at: Instant,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            submitted_at: Instant::now(),
        }
    }
}

/// Image returned by the provider, still base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderImage {
    pub base64_image: String,
    pub finish_reason: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    errors: Vec<String>,
}

fn image_from(
    endpoint: &str,
    base64: Option<String>,
    finish_reason: Option<String>,
    seed: Option<u64>,
) -> Result<ProviderImage> {
    match base64.filter(|b| !b.is_empty()) {
        Some(base64_image) => Ok(ProviderImage {
            base64_image,
            finish_reason,
            seed,
        }),
        None => Err(Error::api(endpoint, 200, "No image returned from API")),
    }
}

/// Client for the Stability AI v2beta REST API.
#[derive(Debug, Clone)]
pub struct StabilityClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
}

impl StabilityClient {
    /// Create a client with the default poll policy.
    ///
    /// # Errors
    /// Returns `Error::Transport` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll: PollPolicy::default(),
        })
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Route a request to the matching endpoint.
    ///
    /// # Errors
    /// Returns `Error::Validation` when an operation that needs a source image
    /// has none.
    pub async fn submit(
        &self,
        request: &GenerationRequest,
        source: Option<SourceImage>,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage> {
        let source = move || {
            source.ok_or_else(|| {
                Error::validation(format!(
                    "{} requires a source image",
                    request.operation.name()
                ))
            })
        };

        match request.operation {
            Operation::GenerateSd35 { .. } => self.generate_sd35(request).await,
            Operation::RemoveBackground => self.remove_background(source()?, request).await,
            Operation::UpscaleCreative { .. } => {
                self.upscale_creative(source()?, request, cancel).await
            }
            Operation::ControlStructure { .. } => {
                self.control_structure(source()?, request).await
            }
        }
    }

    /// Text-to-image with the SD 3.5 family.
    #[instrument(level = "info", skip_all, fields(operation = "generate-sd35"))]
    pub async fn generate_sd35(&self, request: &GenerationRequest) -> Result<ProviderImage> {
        let Operation::GenerateSd35 {
            model,
            aspect_ratio,
            style_preset,
            cfg_scale,
        } = &request.operation
        else {
            return Err(Error::validation("generate_sd35 called with a non-generate request"));
        };

        let mut form = Form::new()
            .text("mode", "text-to-image")
            .text("model", model.clone())
            .text("aspect_ratio", aspect_ratio.clone());
        if let Some(preset) = style_preset {
            form = form.text("style_preset", preset.clone());
        }
        if let Some(cfg) = cfg_scale {
            form = form.text("cfg_scale", cfg.to_string());
        }
        let form = request.common_fields(form);

        info!(%model, %aspect_ratio, "Generating image");
        self.post_for_image(GENERATE_SD3_PATH, form).await
    }

    /// Make the background transparent.
    #[instrument(level = "info", skip_all, fields(operation = "remove-background", source = %source.file_name))]
    pub async fn remove_background(
        &self,
        source: SourceImage,
        request: &GenerationRequest,
    ) -> Result<ProviderImage> {
        let form = Form::new()
            .part("image", source.into_part()?)
            .text("output_format", request.output_format.as_str());
        self.post_for_image(REMOVE_BACKGROUND_PATH, form).await
    }

    /// Start a creative upscale job.
    #[instrument(level = "info", skip_all, fields(operation = "upscale-creative", source = %source.file_name))]
    pub async fn submit_upscale_creative(
        &self,
        source: SourceImage,
        request: &GenerationRequest,
    ) -> Result<JobHandle> {
        let mut form = Form::new().part("image", source.into_part()?);
        if let Operation::UpscaleCreative {
            creativity: Some(creativity),
        } = request.operation
        {
            form = form.text("creativity", creativity.to_string());
        }
        let form = request.common_fields(form);

        let endpoint = self.url(UPSCALE_CREATIVE_PATH);
        let response = self.post_form(&endpoint, form).await?;
        let job: JobResponse = response.json().await.map_err(|e| {
            Error::api(&endpoint, 200, format!("Failed to parse job response: {}", e))
        })?;

        info!(job_id = %job.id, "Upscale job submitted");
        Ok(JobHandle::new(job.id))
    }

    /// Submit a creative upscale and wait for the result.
    pub async fn upscale_creative(
        &self,
        source: SourceImage,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage> {
        let job = self.submit_upscale_creative(source, request).await?;
        self.fetch_generation_result(&job, cancel).await
    }

    /// Generate while keeping the structure of the source image.
    #[instrument(level = "info", skip_all, fields(operation = "control-structure", source = %source.file_name))]
    pub async fn control_structure(
        &self,
        source: SourceImage,
        request: &GenerationRequest,
    ) -> Result<ProviderImage> {
        let mut form = Form::new().part("image", source.into_part()?);
        if let Operation::ControlStructure {
            control_strength: Some(strength),
        } = request.operation
        {
            form = form.text("control_strength", strength.to_string());
        }
        let form = request.common_fields(form);
        self.post_for_image(CONTROL_STRUCTURE_PATH, form).await
    }

    /// Poll a job until it completes, fails, runs out of attempts or is cancelled.
    ///
    /// The first fetch is immediate. `200` completes, `202` waits and retries,
    /// any other 2xx/3xx fails with `UnexpectedStatus`.
    #[instrument(level = "info", skip(self, cancel), fields(job_id = %job.id))]
    pub async fn fetch_generation_result(
        &self,
        job: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<ProviderImage> {
        let endpoint = self.url(&format!("{}/{}", RESULTS_PATH, job.id));

        for attempt in 0..self.poll.max_attempts {
            if attempt > 0 {
                let delay = self.poll.jittered_delay(attempt - 1, jitter_sample());
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Job pending, waiting");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let send = self
                .http
                .get(&endpoint)
                .bearer_auth(&self.api_key)
                .header(ACCEPT, "application/json")
                .send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                response = send => response?,
            };

            match response.status().as_u16() {
                200 => {
                    let body: ResultResponse = response.json().await.map_err(|e| {
                        Error::api(&endpoint, 200, format!("Failed to parse result: {}", e))
                    })?;
                    info!(attempts = attempt + 1, "Job complete");
                    return image_from(&endpoint, body.result, body.finish_reason, body.seed);
                }
                202 => continue,
                status if (200..400).contains(&status) => {
                    warn!(status, "Unexpected job status");
                    return Err(Error::UnexpectedStatus(status));
                }
                _ => return Err(classify_failure(&endpoint, response).await),
            }
        }

        let waited = job.submitted_at.elapsed().as_secs();
        warn!(attempts = self.poll.max_attempts, waited, "Job did not complete in time");
        Err(Error::timeout(waited))
    }

    async fn post_for_image(&self, path: &str, form: Form) -> Result<ProviderImage> {
        let endpoint = self.url(path);
        let response = self.post_form(&endpoint, form).await?;
        let status = response.status().as_u16();
        let body: ImageResponse = response.json().await.map_err(|e| {
            Error::api(&endpoint, status, format!("Failed to parse response: {}", e))
        })?;
        image_from(&endpoint, body.image, body.finish_reason, body.seed)
    }

    async fn post_form(&self, endpoint: &str, form: Form) -> Result<reqwest::Response> {
        debug!(%endpoint, "Calling Stability API");
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_failure(endpoint, response).await)
        }
    }
}

/// Map a non-success response to an error.
async fn classify_failure(endpoint: &str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return Error::Transport(e),
    };

    if status == 400 {
        let detail = serde_json::from_str::<ErrorResponse>(&body)
            .map(|parsed| parsed.errors.join(", "))
            .unwrap_or(body);
        return Error::invalid_parameters(detail);
    }
    Error::api(endpoint, status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_poll_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(10));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 60);
        assert_eq!(policy.base_delay(0), Duration::from_secs(10));
        assert_eq!(policy.base_delay(1), Duration::from_secs(15));
        assert_eq!(policy.base_delay(50), Duration::from_secs(60));
    }

    #[test]
    fn test_request_serializes_as_metadata_params() {
        let mut request = GenerationRequest::new(
            Operation::UpscaleCreative {
                creativity: Some(0.35),
            },
            OutputFormat::Webp,
        );
        request.prompt = Some("a sharper cat".to_string());
        request.seed = Some(7);
        request.source_image = Some("cat.png".to_string());

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"], "upscale-creative");
        assert_eq!(json["creativity"], 0.35);
        assert_eq!(json["outputFormat"], "webp");
        assert_eq!(json["sourceImage"], "cat.png");
        assert!(json.get("negativePrompt").is_none());
    }

    #[test]
    fn test_generate_request_uses_camel_case_fields() {
        let request = GenerationRequest::new(
            Operation::GenerateSd35 {
                model: "sd3.5-large".to_string(),
                aspect_ratio: "16:9".to_string(),
                style_preset: None,
                cfg_scale: Some(4.0),
            },
            OutputFormat::Png,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"], "generate-sd35");
        assert_eq!(json["aspectRatio"], "16:9");
        assert_eq!(json["cfgScale"], 4.0);
    }

    #[test]
    fn test_needs_source() {
        assert!(Operation::RemoveBackground.needs_source());
        assert!(
            !Operation::GenerateSd35 {
                model: String::new(),
                aspect_ratio: String::new(),
                style_preset: None,
                cfg_scale: None,
            }
            .needs_source()
        );
    }

    #[tokio::test]
    async fn test_source_image_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let source = SourceImage::from_path(&path).await.unwrap();
        assert_eq!(source.file_name, "cat.jpg");
        assert_eq!(source.content_type, "image/jpeg");
        assert_eq!(source.bytes, b"jpeg".to_vec());
    }

    proptest! {
        #[test]
        fn base_delay_is_monotonic_and_capped(retry in 0u32..200) {
            let policy = PollPolicy::default();
            let current = policy.base_delay(retry);
            let next = policy.base_delay(retry + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= policy.max_delay);
            prop_assert!(current >= policy.initial_delay);
        }

        #[test]
        fn jittered_delay_stays_within_bounds(retry in 0u32..40, unit in -1.0f64..=1.0) {
            let policy = PollPolicy::default();
            let base = policy.base_delay(retry).as_secs_f64();
            let delay = policy.jittered_delay(retry, unit).as_secs_f64();
            prop_assert!(delay <= policy.max_delay.as_secs_f64() + 1e-9);
            prop_assert!(delay >= base * (1.0 - policy.jitter) - 1e-9);
            prop_assert!(delay <= base * (1.0 + policy.jitter) + 1e-9);
        }
    }
}
