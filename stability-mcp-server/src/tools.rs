//! Tool registry.
//!
//! [`ToolKind`] maps each tool name to its description, its JSON schema and
//! its typed parameters. [`ToolCall::parse`] is the single validation path:
//! schema shape and typed range checks, reported together.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use schemars::schema_for;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stability_mcp_common::error::{Error, Result};

use crate::handler::{
    ControlStructureParams, GenerateImageSd35Params, RemoveBackgroundParams, ToolCall,
    UpscaleCreativeParams, ValidationError, validation_error,
};

/// The tools this server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GenerateImageSd35,
    RemoveBackground,
    UpscaleCreative,
    ControlStructure,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::GenerateImageSd35,
        ToolKind::RemoveBackground,
        ToolKind::UpscaleCreative,
        ToolKind::ControlStructure,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::GenerateImageSd35 => "stability-ai-generate-image-sd35",
            ToolKind::RemoveBackground => "stability-ai-remove-background",
            ToolKind::UpscaleCreative => "stability-ai-upscale-creative",
            ToolKind::ControlStructure => "stability-ai-control-structure",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::GenerateImageSd35 => {
                "Generate an image from a text prompt with Stable Diffusion 3.5 \
                 (large, large-turbo or medium). Supports aspect ratios, style presets, \
                 negative prompts and seeds. The image is saved to the resource store."
            }
            ToolKind::RemoveBackground => {
                "Remove the background from a stored image, leaving the subject on a \
                 transparent background. The source is a resource URI or name from list_resources."
            }
            ToolKind::UpscaleCreative => {
                "Upscale a stored image to up to 4K resolution, re-imagining detail guided by a \
                 prompt. Works best on small or low quality images. Runs as a provider job and \
                 can take a minute or more."
            }
            ToolKind::ControlStructure => {
                "Generate a new image that keeps the structure (layout, background, pose) of a \
                 stored reference image while following a text prompt."
            }
        }
    }

    /// JSON schema of the tool's arguments.
    pub fn input_schema(self) -> Arc<JsonObject> {
        let schema = match self {
            ToolKind::GenerateImageSd35 => schema_for!(GenerateImageSd35Params),
            ToolKind::RemoveBackground => schema_for!(RemoveBackgroundParams),
            ToolKind::UpscaleCreative => schema_for!(UpscaleCreativeParams),
            ToolKind::ControlStructure => schema_for!(ControlStructureParams),
        };
        match serde_json::to_value(&schema).unwrap_or_default() {
            Value::Object(map) => Arc::new(map),
            _ => Arc::new(JsonObject::new()),
        }
    }

    /// MCP tool definition.
    pub fn definition(self) -> Tool {
        Tool {
            name: Cow::Borrowed(self.name()),
            description: Some(Cow::Borrowed(self.description())),
            input_schema: self.input_schema(),
            annotations: None,
            icons: None,
            meta: None,
            output_schema: None,
            title: None,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Definitions for every tool, in listing order.
pub fn tool_definitions() -> Vec<Tool> {
    ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
}

impl ToolCall {
    /// Validate and type a raw invocation.
    ///
    /// # Errors
    /// `Error::UnknownTool` for an unrecognized name, otherwise
    /// `Error::Validation` naming every violated field.
    pub fn parse(name: &str, arguments: Option<&JsonObject>) -> Result<Self> {
        let kind = ToolKind::from_name(name).ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        let empty = JsonObject::new();
        let arguments = arguments.unwrap_or(&empty);

        match kind {
            ToolKind::GenerateImageSd35 => {
                typed(kind, arguments, GenerateImageSd35Params::validate)
                    .map(ToolCall::GenerateImageSd35)
            }
            ToolKind::RemoveBackground => {
                typed(kind, arguments, RemoveBackgroundParams::validate)
                    .map(ToolCall::RemoveBackground)
            }
            ToolKind::UpscaleCreative => {
                typed(kind, arguments, UpscaleCreativeParams::validate)
                    .map(ToolCall::UpscaleCreative)
            }
            ToolKind::ControlStructure => {
                typed(kind, arguments, ControlStructureParams::validate)
                    .map(ToolCall::ControlStructure)
            }
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::GenerateImageSd35(_) => ToolKind::GenerateImageSd35,
            ToolCall::RemoveBackground(_) => ToolKind::RemoveBackground,
            ToolCall::UpscaleCreative(_) => ToolKind::UpscaleCreative,
            ToolCall::ControlStructure(_) => ToolKind::ControlStructure,
        }
    }
}

type Checks<P> = fn(&P) -> std::result::Result<(), Vec<ValidationError>>;

/// Check against the declared schema, deserialize, then run the typed checks.
///
/// Fields the schema check rejects are dropped and missing required strings
/// are blanked before deserializing, so the typed checks still cover every
/// other field. Errors for an already reported field are not repeated.
fn typed<P>(kind: ToolKind, arguments: &JsonObject, checks: Checks<P>) -> Result<P>
where
    P: DeserializeOwned,
{
    let schema = kind.input_schema();
    let mut errors = check_schema(&schema, arguments);

    let candidate = if errors.is_empty() {
        arguments.clone()
    } else {
        patched_arguments(&schema, arguments, &errors)
    };

    let params: P = match serde_json::from_value(Value::Object(candidate)) {
        Ok(params) => params,
        Err(_) if !errors.is_empty() => return Err(validation_error(&errors)),
        Err(e) => return Err(Error::validation(format!("arguments: {}", e))),
    };

    if let Err(found) = checks(&params) {
        let reported: Vec<String> = errors.iter().map(|e| e.field.clone()).collect();
        errors.extend(found.into_iter().filter(|e| !reported.contains(&e.field)));
    }

    if errors.is_empty() {
        Ok(params)
    } else {
        Err(validation_error(&errors))
    }
}

/// Arguments with rejected fields removed and missing required strings set to `""`.
fn patched_arguments(
    schema: &JsonObject,
    arguments: &JsonObject,
    errors: &[ValidationError],
) -> JsonObject {
    let mut patched: JsonObject = arguments
        .iter()
        .filter(|(field, _)| !errors.iter().any(|e| e.field == **field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();

    let properties = schema.get("properties").and_then(Value::as_object);
    let required = schema.get("required").and_then(Value::as_array);
    for field in required.into_iter().flatten().filter_map(Value::as_str) {
        if patched.contains_key(field) {
            continue;
        }
        let is_string = properties
            .and_then(|p| p.get(field))
            .is_some_and(|property| allowed_types(schema, property, 0) == ["string"]);
        if is_string {
            patched.insert(field.to_string(), Value::String(String::new()));
        }
    }
    patched
}

/// Required fields present and non-null; declared properties of a compatible type.
pub fn check_schema(schema: &JsonObject, arguments: &JsonObject) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            match arguments.get(field) {
                None | Some(Value::Null) => {
                    errors.push(ValidationError::new(field, "Required"));
                }
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return errors;
    };

    for (field, value) in arguments {
        let Some(property) = properties.get(field) else {
            continue;
        };
        if value.is_null() && errors.iter().any(|e| e.field == *field) {
            continue;
        }
        let allowed = allowed_types(schema, property, 0);
        if allowed.is_empty() {
            continue;
        }
        if !allowed.iter().any(|t| type_matches(t, value)) {
            errors.push(ValidationError::new(
                field.as_str(),
                format!("Expected {}, received {}", allowed.join(" or "), json_type(value)),
            ));
        } else if let Some(variants) = enum_values(schema, property, 0) {
            if !value.is_null() && !variants.contains(value) {
                let names: Vec<String> = variants.iter().map(ToString::to_string).collect();
                errors.push(ValidationError::new(
                    field.as_str(),
                    format!("Expected one of {}, received {}", names.join(", "), value),
                ));
            }
        }
    }

    errors
}

const MAX_REF_DEPTH: usize = 8;

fn resolve_ref<'a>(root: &'a JsonObject, schema: &'a Value) -> Option<&'a Value> {
    let reference = schema.get("$ref")?.as_str()?;
    let name = reference.rsplit('/').next()?;
    root.get("definitions")
        .or_else(|| root.get("$defs"))
        .and_then(|defs| defs.get(name))
}

/// JSON types a property schema admits. Empty means unconstrained.
fn allowed_types(root: &JsonObject, schema: &Value, depth: usize) -> Vec<String> {
    if depth > MAX_REF_DEPTH {
        return Vec::new();
    }
    match schema.get("type") {
        Some(Value::String(t)) => return vec![t.clone()],
        Some(Value::Array(types)) => {
            return types
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        _ => {}
    }
    if let Some(target) = resolve_ref(root, schema) {
        return allowed_types(root, target, depth + 1);
    }
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(options) = schema.get(key).and_then(Value::as_array) {
            let mut types = Vec::new();
            for option in options {
                let option_types = allowed_types(root, option, depth + 1);
                if option_types.is_empty() {
                    return Vec::new();
                }
                types.extend(option_types);
            }
            return types;
        }
    }
    Vec::new()
}

/// `enum` values a property schema admits, with `null` added for nullable schemas.
fn enum_values(root: &JsonObject, schema: &Value, depth: usize) -> Option<Vec<Value>> {
    if depth > MAX_REF_DEPTH {
        return None;
    }
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return Some(values.clone());
    }
    if let Some(target) = resolve_ref(root, schema) {
        return enum_values(root, target, depth + 1);
    }
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(options) = schema.get(key).and_then(Value::as_array) {
            let mut values = Vec::new();
            for option in options {
                match enum_values(root, option, depth + 1) {
                    Some(found) => values.extend(found),
                    None if allowed_types(root, option, depth + 1) == ["null"] => {
                        values.push(Value::Null)
                    }
                    None => return None,
                }
            }
            return Some(values);
        }
    }
    None
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
