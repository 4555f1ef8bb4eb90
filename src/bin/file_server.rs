//! File server
//!
//! Stores uploaded files in a flat storage directory and serves them back.
//!
//! # Usage
//!
//! ```bash
//! file-server --port 8001 --storage storage .txt .pdf
//! ```
//!
//! Without extensions every file name with a plain name is accepted.

use anyhow::Context;
use netbank::cli::{self, FileArgs, FileConfig};
use netbank::core::{install_interrupt_listener, ShutdownContext};
use netbank::io::Channel;
use netbank::service::{run_service, FileHandler};
use netbank::telemetry::init_tracing;
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config: FileConfig = cli::parse_config::<FileArgs, _>()?;
    let _guard = init_tracing(&config.log);

    let ctx = ShutdownContext::new();
    install_interrupt_listener(&ctx)?;

    let handler = FileHandler::new(&config.storage, &config.allowed_extensions)
        .with_context(|| format!("failed to prepare {}", config.storage.display()))?;
    let listener = Channel::listen(config.port)
        .with_context(|| format!("failed to listen on port {}", config.port))?;

    if config.allowed_extensions.is_empty() {
        info!("all file extensions are allowed");
    } else {
        info!(extensions = ?config.allowed_extensions, "restricting uploads");
    }
    run_service(listener, Arc::new(handler), &config.service, &ctx)?;
    Ok(())
}
