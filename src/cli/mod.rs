//! CLI command handling.
//!
//! Provides subcommands for:
//! - Serving the pairing endpoint (`serve`)
//! - Requesting a code from a running server (`request`)

mod request;

pub use request::{describe_response, run_request_command};

use clap::{Parser, Subcommand};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(name = "pairgate")]
#[command(about = "Single-flight device pairing gateway")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the pairing endpoint (default if no subcommand given)
    Serve {
        /// Port to bind, overriding PAIRGATE_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Request a pairing code from a running server
    Request {
        /// Target number, 8-15 digits
        number: String,

        /// Base URL of the pairing server
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
}

impl Cli {
    /// Port override from `serve --port`, if any.
    pub fn port_override(&self) -> Option<u16> {
        match self.command {
            Some(Command::Serve { port }) => port,
            _ => None,
        }
    }
}
