//! Static prompt templates.
//!
//! Templates may contain `{{key}}` placeholders, which are filled from the
//! prompt arguments when present and non-empty and otherwise left as written.

use rmcp::model::JsonObject;
use serde_json::Value;

/// A named prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub template: &'static str,
}

pub const GENERATE_IMAGE_FROM_TEXT: PromptTemplate = PromptTemplate {
    name: "generate-image-from-text",
    description: "Generate a new image with configurable description, style, and aspect ratio",
    template: "Generate an image for the user using stability-ai-generate-image-sd35. \
               Make sure to ask the user for feedback after the generation.",
};

pub const GENERATE_IMAGE_USING_STRUCTURE: PromptTemplate = PromptTemplate {
    name: "generate-image-using-structure",
    description: "Generate an image while maintaining the structure (i.e. background, context) of a reference image",
    template: "The user should provide an image name or location that matches a resource from \
               list_resources (if the results from this tool are not in recent conversation \
               history, run it again so you have an up-to-date list of resources). Try using \
               stability-ai-control-structure to generate an image that maintains the structure \
               of the indicated image. Make sure to ask the user for feedback after the generation.",
};

pub const UPSCALE_IMAGE: PromptTemplate = PromptTemplate {
    name: "upscale-image",
    description: "Upscale the quality of an image",
    template: "The user should provide an image name or location that matches a resource from \
               list_resources (if the results from this tool are not in recent conversation \
               history, run it again so you have an up-to-date list of resources). Try using \
               stability-ai-upscale-creative to upscale the indicated image. Make sure to ask \
               the user for feedback after the upscaling.",
};

pub const EDIT_IMAGE: PromptTemplate = PromptTemplate {
    name: "edit-image",
    description: "Make a minor modification to an existing image",
    template: r#"The user should provide an image name or location that matches a resource from list_resources (if the results from this tool are not in recent conversation history, run it again so you have an up-to-date list of resources).

At this time, we can only perform one kind of change:
- "remove background": we attempt to make the background of the image transparent, using stability-ai-remove-background

Examples of invalid changes we cannot perform at this time:
- Add {object} (without removing anything)
- Tweak {object} (in a way we cannot rephrase to replace it altogether)

If the user provided something like this, then we should not proceed; inform the user we can only do "remove background" changes.

Make sure to ask the user for feedback after any generation attempt."#,
};

/// Every prompt, in listing order.
pub const PROMPTS: &[PromptTemplate] = &[
    GENERATE_IMAGE_FROM_TEXT,
    GENERATE_IMAGE_USING_STRUCTURE,
    UPSCALE_IMAGE,
    EDIT_IMAGE,
];

pub fn find_prompt(name: &str) -> Option<&'static PromptTemplate> {
    PROMPTS.iter().find(|p| p.name == name)
}

fn argument_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Replace `{{key}}` with the matching argument.
///
/// With no arguments the template is returned unchanged. A placeholder ends
/// at the first `}}` and never spans a line break.
pub fn inject_template(template: &str, arguments: Option<&JsonObject>) -> String {
    let Some(arguments) = arguments else {
        return template.to_string();
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after_open[..end];
        if key.contains('\n') {
            out.push_str("{{");
            rest = after_open;
            continue;
        }

        match arguments.get(key).and_then(argument_text) {
            Some(text) => out.push_str(&text),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}
