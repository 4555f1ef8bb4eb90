//! Finance server
//!
//! Serves deposits, withdrawals, balance queries and interest accrual over a
//! fixed-capacity ledger.
//!
//! # Usage
//!
//! ```bash
//! finance-server --port 8000 --max-accounts 100 --threads 4
//! ```
//!
//! The first Ctrl-C stops accepting connections and waits for open ones to
//! finish; a second Ctrl-C exits immediately.
//!
//! # Exit Codes
//!
//! - 0: Clean shutdown
//! - 1: Invalid configuration or the port could not be bound

use anyhow::Context;
use netbank::cli::{self, FinanceArgs, FinanceConfig};
use netbank::core::{install_interrupt_listener, ShutdownContext};
use netbank::io::Channel;
use netbank::service::{run_service, FinanceHandler};
use netbank::telemetry::init_tracing;
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config: FinanceConfig = cli::parse_config::<FinanceArgs, _>()?;
    let _guard = init_tracing(&config.log);

    let ctx = ShutdownContext::new();
    install_interrupt_listener(&ctx)?;

    let handler = FinanceHandler::new(config.capacity, config.batch_workers, config.interest_rate)?;
    let listener = Channel::listen(config.port)
        .with_context(|| format!("failed to listen on port {}", config.port))?;

    info!(
        port = config.port,
        accounts = config.capacity,
        batch_workers = config.batch_workers,
        "finance server ready"
    );
    run_service(listener, Arc::new(handler), &config.service, &ctx)?;
    Ok(())
}
