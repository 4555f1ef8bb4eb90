//! Logging server
//!
//! Appends one audit line per client event to a log file.
//!
//! ```bash
//! logging-server --port 8002 --file system.log
//! ```

use anyhow::Context;
use netbank::cli::{self, LoggingArgs, LoggingConfig};
use netbank::core::{install_interrupt_listener, ShutdownContext};
use netbank::io::Channel;
use netbank::service::{run_service, AuditLogHandler};
use netbank::telemetry::init_tracing;
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config: LoggingConfig = cli::parse_config::<LoggingArgs, _>()?;
    let _guard = init_tracing(&config.log);

    let ctx = ShutdownContext::new();
    install_interrupt_listener(&ctx)?;

    let handler = AuditLogHandler::open(&config.audit_file)
        .with_context(|| format!("failed to open {}", config.audit_file.display()))?;
    let listener = Channel::listen(config.port)
        .with_context(|| format!("failed to listen on port {}", config.port))?;

    info!(file = %config.audit_file.display(), "audit log ready");
    run_service(listener, Arc::new(handler), &config.service, &ctx)?;
    Ok(())
}
