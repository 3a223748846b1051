//! Transport selection: stdio by default, SSE with `--sse`.
//!
//! ```ignore
//! #[derive(clap::Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     transport: TransportArgs,
//! }
//!
//! let transport = Cli::parse().transport.into_transport(config.port);
//! ```

use std::fmt;

use clap::Args;

/// How the server talks to its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// A single client on stdin/stdout.
    #[default]
    Stdio,
    /// HTTP event streams: `GET /sse` subscribes, `POST /messages` sends.
    Sse { port: u16 },
}

impl Transport {
    pub fn sse(port: u16) -> Self {
        Transport::Sse { port }
    }

    /// Stdio serves the local user, which is what allows local source paths.
    pub fn is_stdio(&self) -> bool {
        *self == Transport::Stdio
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio => f.write_str("stdio"),
            Transport::Sse { port } => write!(f, "sse on :{}", port),
        }
    }
}

/// The server's only command-line switch.
///
/// Anything besides `--sse` is rejected by clap with usage and a non-zero exit.
#[derive(Args, Debug, Clone, Default)]
pub struct TransportArgs {
    /// Serve over Server-Sent Events instead of stdio (port from PORT, default 3020)
    #[arg(long)]
    pub sse: bool,
}

impl TransportArgs {
    /// `port` is only used when `--sse` was given.
    pub fn into_transport(self, port: u16) -> Transport {
        match self.sse {
            true => Transport::sse(port),
            false => Transport::Stdio,
        }
    }
}
