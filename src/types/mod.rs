//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Ledger entry types
//! - `request`: Request/response values and request kinds
//! - `error`: Error types for netbank

pub mod account;
pub mod error;
pub mod request;

pub use account::{Account, AccountId};
pub use error::ServiceError;
pub use request::{Request, RequestKind, Response, SubjectId};
