//! ferry: a small file server and interactive client.
//!
//! Clients list, upload, download and remove files in one shared server
//! directory over a private length-prefixed TCP protocol.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod share;
pub mod shell;
pub mod transfer;
pub mod url;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
