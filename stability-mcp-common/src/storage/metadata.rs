//! Metadata sidecars written next to generated images.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// JSON document describing how an image was produced, or why it was not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub request_params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO-8601 UTC, millisecond precision
    pub timestamp: String,
}

impl MetadataRecord {
    pub fn success(request_params: Value, success_info: Value) -> Self {
        Self {
            request_params,
            success_info: Some(success_info),
            error: None,
            timestamp: now_iso8601(),
        }
    }

    pub fn failure(request_params: Value, error: impl Into<String>) -> Self {
        Self {
            request_params,
            success_info: None,
            error: Some(error.into()),
            timestamp: now_iso8601(),
        }
    }

    /// Pretty-printed JSON body of the sidecar.
    pub fn to_pretty_json(&self) -> Vec<u8> {
        // Serializing plain JSON values and strings cannot fail.
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }
}

/// Sidecar name for an image: same base name, `.txt` extension.
///
/// ```
/// use stability_mcp_common::storage::metadata_name_for;
///
/// assert_eq!(metadata_name_for("cat.png"), "cat.txt");
/// assert_eq!(metadata_name_for("cat"), "cat.txt");
/// ```
pub fn metadata_name_for(resource_name: &str) -> String {
    let stem = match resource_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => resource_name,
    };
    format!("{}.txt", stem)
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_record_shape() {
        let record = MetadataRecord::success(
            json!({ "prompt": "a cat" }),
            json!({ "uri": "file:///tmp/cat.png" }),
        );
        let value: Value = serde_json::from_slice(&record.to_pretty_json()).unwrap();

        assert_eq!(value["requestParams"]["prompt"], "a cat");
        assert_eq!(value["successInfo"]["uri"], "file:///tmp/cat.png");
        assert!(value.get("error").is_none());
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_failure_record_shape() {
        let record = MetadataRecord::failure(json!({ "prompt": "a cat" }), "Invalid parameters: bad size");
        let value: Value = serde_json::from_slice(&record.to_pretty_json()).unwrap();

        assert_eq!(value["error"], "Invalid parameters: bad size");
        assert!(value.get("successInfo").is_none());
    }

    #[test]
    fn test_sidecar_is_pretty_printed() {
        let record = MetadataRecord::failure(json!({}), "boom");
        let text = String::from_utf8(record.to_pretty_json()).unwrap();
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_metadata_name_keeps_inner_dots() {
        assert_eq!(metadata_name_for("v1.2-cat.jpeg"), "v1.2-cat.txt");
        assert_eq!(metadata_name_for(".hidden"), ".hidden.txt");
    }
}
