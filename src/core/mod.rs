//! Core concurrency module
//!
//! This module contains the components every service is built from:
//! - `worker_pool` - Fixed-size thread pool with graceful drain
//! - `ledger` - Fixed-capacity table of per-entry locked accounts
//! - `shutdown` - Process-wide shutdown and interrupt state

pub mod ledger;
pub mod shutdown;
pub mod worker_pool;

pub use ledger::Ledger;
pub use shutdown::{install_interrupt_listener, InterruptAction, RegisteredProcess, ShutdownContext};
pub use worker_pool::{Task, WorkerPool};
