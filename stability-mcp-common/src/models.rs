//! Model definitions and registry for the Stable Diffusion 3.5 family,
//! plus the image formats the provider can return.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Encoded image format returned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    /// Every recognized format.
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Png, OutputFormat::Jpeg, OutputFormat::Webp];

    /// Wire value sent as `output_format`.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
        }
    }

    /// File extension used when storing the image.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    /// MIME type of the encoded image.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// Recognize a format from a file extension (case-insensitive, `jpg` included).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::Webp),
            _ => None,
        }
    }

    /// Recognize a format from a MIME type.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.split(';').next().map(str::trim) {
            Some("image/png") => Some(OutputFormat::Png),
            Some("image/jpeg") | Some("image/jpg") => Some(OutputFormat::Jpeg),
            Some("image/webp") => Some(OutputFormat::Webp),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable Diffusion 3.5 model definition.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Sd35Model {
    /// Model identifier sent to the provider
    pub id: &'static str,
    /// Model aliases for convenience
    #[serde(skip)]
    pub aliases: &'static [&'static str],
    /// Whether `negative_prompt` is honored
    pub supports_negative_prompt: bool,
}

// =============================================================================
// Static Model Definitions
// =============================================================================

/// SD 3.5 Large (8B parameters)
pub const SD3_5_LARGE: Sd35Model = Sd35Model {
    id: "sd3.5-large",
    aliases: &["large", "sd35-large", "sd3.5"],
    supports_negative_prompt: true,
};

/// SD 3.5 Large Turbo, distilled for few-step sampling
pub const SD3_5_LARGE_TURBO: Sd35Model = Sd35Model {
    id: "sd3.5-large-turbo",
    aliases: &["turbo", "large-turbo", "sd35-large-turbo"],
    supports_negative_prompt: false,
};

/// SD 3.5 Medium (2.5B parameters)
pub const SD3_5_MEDIUM: Sd35Model = Sd35Model {
    id: "sd3.5-medium",
    aliases: &["medium", "sd35-medium"],
    supports_negative_prompt: true,
};

/// All available SD 3.5 models
pub const SD35_MODELS: &[Sd35Model] = &[SD3_5_LARGE, SD3_5_LARGE_TURBO, SD3_5_MEDIUM];

/// Model used when the caller does not pick one.
pub const DEFAULT_SD35_MODEL: &str = "sd3.5-large";

/// Aspect ratios accepted by the generate endpoint.
pub const SD35_ASPECT_RATIOS: &[&str] = &[
    "16:9", "1:1", "21:9", "2:3", "3:2", "4:5", "5:4", "9:16", "9:21",
];

/// Style presets accepted by the generate and control endpoints.
pub const STYLE_PRESETS: &[&str] = &[
    "3d-model",
    "analog-film",
    "anime",
    "cinematic",
    "comic-book",
    "digital-art",
    "enhance",
    "fantasy-art",
    "isometric",
    "line-art",
    "low-poly",
    "modeling-compound",
    "neon-punk",
    "origami",
    "photographic",
    "pixel-art",
    "tile-texture",
];

/// Model registry for resolution and listing.
pub struct ModelRegistry;

impl ModelRegistry {
    /// Resolve an SD 3.5 model name or alias to its definition.
    ///
    /// # Examples
    ///
    /// ```
    /// use stability_mcp_common::models::ModelRegistry;
    ///
    /// assert_eq!(ModelRegistry::resolve_sd35("turbo").unwrap().id, "sd3.5-large-turbo");
    /// assert!(ModelRegistry::resolve_sd35("sdxl").is_none());
    /// ```
    pub fn resolve_sd35(name: &str) -> Option<&'static Sd35Model> {
        SD35_MODELS
            .iter()
            .find(|model| model.id == name || model.aliases.contains(&name))
    }

    /// List all SD 3.5 models.
    pub fn list_sd35_models() -> &'static [Sd35Model] {
        SD35_MODELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_id_and_alias() {
        assert_eq!(ModelRegistry::resolve_sd35("sd3.5-medium").unwrap().id, "sd3.5-medium");
        assert_eq!(ModelRegistry::resolve_sd35("medium").unwrap().id, "sd3.5-medium");
        assert!(ModelRegistry::resolve_sd35("sdxl-1.0").is_none());
    }

    #[test]
    fn test_default_model_resolves() {
        assert!(ModelRegistry::resolve_sd35(DEFAULT_SD35_MODEL).is_some());
    }

    #[test]
    fn test_turbo_ignores_negative_prompt() {
        assert!(!SD3_5_LARGE_TURBO.supports_negative_prompt);
        assert!(SD3_5_LARGE.supports_negative_prompt);
    }

    #[test]
    fn test_output_format_extensions() {
        assert_eq!(OutputFormat::from_extension("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension("webp"), Some(OutputFormat::Webp));
        assert_eq!(OutputFormat::from_extension("gif"), None);
        assert_eq!(OutputFormat::Png.mime_type(), "image/png");
    }

    #[test]
    fn test_output_format_from_mime() {
        assert_eq!(
            OutputFormat::from_mime_type("image/jpeg; charset=binary"),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(OutputFormat::from_mime_type("text/plain"), None);
    }

    #[test]
    fn test_output_format_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&OutputFormat::Webp).unwrap(), "\"webp\"");
        let parsed: OutputFormat = serde_json::from_str("\"jpeg\"").unwrap();
        assert_eq!(parsed, OutputFormat::Jpeg);
    }
}
