//! Client side of netbank
//!
//! - `retry` - Interrupt-bracketed attempts with operator-confirmed retry
//! - `session` - Connections to the three services and audited transactions

pub mod retry;
pub mod session;

pub use retry::{NoRetry, Operator, RetryCoordinator, RetryOutcome};
pub use session::{ClientSession, Endpoint, Endpoints, Receipt, ServiceKind};
