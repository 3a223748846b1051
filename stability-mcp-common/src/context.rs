//! Per-request caller metadata.

use std::collections::HashMap;

/// Ambient data about whoever sent the current request.
///
/// Created by a transport bridge for every inbound request and passed by
/// reference to dispatch and to every resource-store call. Stdio requests
/// carry an empty context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Caller IP as resolved by the SSE bridge
    pub ip_address: Option<String>,
    /// Transport headers, lowercase names
    pub headers: HashMap<String, String>,
}

impl CallerContext {
    /// Context for a caller with a known address.
    pub fn with_ip(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            headers: HashMap::new(),
        }
    }

    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// IP for log fields.
    pub fn ip_or_unknown(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context_is_anonymous() {
        let ctx = CallerContext::default();
        assert_eq!(ctx.ip_or_unknown(), "unknown");
        assert!(ctx.header("user-agent").is_none());
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut ctx = CallerContext::with_ip("10.0.0.1");
        ctx.headers.insert("user-agent".into(), "curl/8".into());
        assert_eq!(ctx.header("User-Agent"), Some("curl/8"));
        assert_eq!(ctx.ip_or_unknown(), "10.0.0.1");
    }
}
