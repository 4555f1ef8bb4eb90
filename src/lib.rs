//! Netbank Library
//! # Overview
//!
//! A small distributed banking system: three TCP services and an
//! interactive client that talks to all of them.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Request, Response, Account, ServiceError)
//! - [`io`] - Wire protocol:
//!   - [`io::frame_codec`] - Length-prefixed, `|`-delimited frames
//!   - [`io::channel`] - Request/response channels over TCP
//! - [`core`] - Concurrency building blocks:
//!   - [`core::worker_pool`] - Fixed-size thread pool with graceful drain
//!   - [`core::ledger`] - Per-account locked balances and interest fan-out
//!   - [`core::shutdown`] - Shutdown flag, interrupt deferral, process registry
//! - [`service`] - The accept loop and the finance, file and logging handlers
//! - [`client`] - Retry coordination and the multi-service client session
//! - [`cli`] - CLI arguments parsing for every binary
//! - [`telemetry`] - `tracing` subscriber setup
//!
//! # Services
//!
//! - **Finance**: deposit, withdraw, balance and interest accrual over a
//!   fixed-capacity ledger
//! - **File**: upload and download of plain-named files, optionally filtered
//!   by extension
//! - **Logging**: one audit line appended per client event
//!
//! Every request is answered with exactly one response, including requests
//! that fail validation. A `Quit` request is always acknowledged before the
//! service closes the connection.

// Module declarations
pub mod cli;
pub mod client;
pub mod core;
pub mod io;
pub mod service;
pub mod telemetry;
pub mod types;

pub use client::{ClientSession, RetryCoordinator};
pub use core::{Ledger, ShutdownContext, WorkerPool};
pub use io::{Channel, ListeningChannel};
pub use types::{Account, Request, RequestKind, Response, ServiceError};
