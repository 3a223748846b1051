//! Unit tests for transport configuration.

use clap::Parser;

use super::transport::{Transport, TransportArgs};

#[derive(Parser, Debug)]
#[command(name = "stability-mcp-server")]
struct Cli {
    #[command(flatten)]
    transport: TransportArgs,
}

#[test]
fn test_default_is_stdio() {
    let transport = Transport::default();
    assert!(transport.is_stdio());
    assert_eq!(transport.to_string(), "stdio");
}

#[test]
fn test_sse_display_names_port() {
    let transport = Transport::sse(3020);
    assert!(!transport.is_stdio());
    assert_eq!(transport.to_string(), "sse on :3020");
}

#[test]
fn test_no_flags_selects_stdio() {
    let cli = Cli::try_parse_from(["stability-mcp-server"]).unwrap();
    assert_eq!(cli.transport.into_transport(3020), Transport::Stdio);
}

#[test]
fn test_sse_flag_selects_sse_with_configured_port() {
    let cli = Cli::try_parse_from(["stability-mcp-server", "--sse"]).unwrap();
    assert_eq!(cli.transport.into_transport(4000), Transport::Sse { port: 4000 });
}

#[test]
fn test_unknown_flag_is_rejected() {
    let result = Cli::try_parse_from(["stability-mcp-server", "--http"]);
    assert!(result.is_err());
}

#[test]
fn test_positional_argument_is_rejected() {
    let result = Cli::try_parse_from(["stability-mcp-server", "sse"]);
    assert!(result.is_err());
}
