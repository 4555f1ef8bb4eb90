//! Error types for netbank
//!
//! This module defines every error that can occur while serving or issuing
//! requests. The `Display` text of the validation variants is exactly the
//! message placed in a failed [`crate::types::Response`], so converting an
//! error to a response is always `Response::failure(error.to_string())`.
//!
//! # Error Categories
//!
//! - **Transport**: socket create/bind/connect/send/recv failures, short reads
//!   and short writes. The caller may retry the whole round trip.
//! - **Protocol**: a frame that arrived intact but could not be parsed.
//! - **Validation**: bad account id, insufficient funds, disallowed file
//!   names, missing files, client-side preconditions, remote rejections.
//! - **Resource**: local I/O failures opening files or the log destination.
//! - **Task**: a worker pool task that failed to report its outcome.
//! - **Config**: invalid startup configuration.

use super::request::{RequestKind, SubjectId};
use thiserror::Error;

/// Main error type for netbank
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// Socket-level failure, including short reads and writes
    #[error("Transport error during {operation}: {message}")]
    Transport {
        /// What the channel was doing (connect, send, recv, ...)
        operation: String,
        /// Underlying cause
        message: String,
    },

    /// A frame arrived but its contents were not well formed
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the parse failure
        message: String,
    },

    /// Subject id outside `0..capacity`
    ///
    /// Rejected before any ledger entry is touched.
    #[error("Invalid account ID")]
    InvalidAccount {
        /// The id that was requested
        id: SubjectId,
        /// Ledger capacity at the time of the request
        capacity: usize,
    },

    /// Withdrawal larger than the current balance
    ///
    /// The balance is left unchanged.
    #[error("Insufficient funds")]
    InsufficientFunds {
        /// Account id
        id: usize,
        /// Balance at the time of the attempt
        balance: f64,
        /// Requested withdrawal
        requested: f64,
    },

    /// Amount rejected by the client before sending
    #[error("Invalid amount {amount}: must be a positive number")]
    InvalidAmount {
        /// The rejected amount
        amount: f64,
    },

    /// Operation needs a logged-in user
    #[error("Please login first")]
    NotLoggedIn,

    /// Login attempted while a user is already logged in
    #[error("Already logged in as user {user}, please logout first")]
    AlreadyLoggedIn {
        /// Currently logged-in user
        user: SubjectId,
    },

    /// The client holds no channel to the named service
    #[error("Not connected to {service} server")]
    NotConnected {
        /// Service name (finance, file, logging)
        service: String,
    },

    /// The remote service answered with `ok = false`
    #[error("{message}")]
    Rejected {
        /// Message returned by the service
        message: String,
    },

    /// Request kind the receiving service does not handle
    #[error("Unknown RequestType")]
    UnknownRequest {
        /// The kind that was received
        kind: RequestKind,
    },

    /// File name containing path components
    #[error("Invalid file name")]
    FileNameNotAllowed {
        /// The rejected name
        name: String,
    },

    /// Upload without an extension while an allow-list is configured
    #[error("File has no extension")]
    MissingExtension {
        /// The rejected name
        name: String,
    },

    /// Upload whose extension is not on the allow-list
    #[error("File extension not allowed")]
    ExtensionNotAllowed {
        /// The rejected name
        name: String,
        /// The extension found, including the leading dot
        extension: String,
    },

    /// File contents containing the field delimiter
    ///
    /// A download response cannot carry them intact, so such files are
    /// neither stored nor served.
    #[error("File contents contain the reserved '|' character")]
    UnsupportedContent {
        /// The affected file
        name: String,
    },

    /// Download of a file that does not exist in storage
    #[error("File not found")]
    FileNotFound {
        /// The requested name
        name: String,
    },

    /// Local I/O failure
    ///
    /// `context` is the user-facing message; `message` keeps the OS detail
    /// for logs.
    #[error("{context}")]
    Resource {
        /// User-facing description
        context: String,
        /// Underlying cause
        message: String,
    },

    /// A pool task failed without reporting its outcome
    #[error("Task failed: {message}")]
    Task {
        /// Description of the failure
        message: String,
    },

    /// Request received after the service started shutting down
    #[error("Server shutting down")]
    ShuttingDown,

    /// Invalid startup configuration
    #[error("Invalid configuration: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl From<std::io::Error> for ServiceError {
    fn from(error: std::io::Error) -> Self {
        ServiceError::Resource {
            context: format!("I/O error: {}", error),
            message: error.to_string(),
        }
    }
}

impl ServiceError {
    /// Create a Transport error
    pub fn transport(operation: &str, message: impl ToString) -> Self {
        ServiceError::Transport {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a Protocol error
    pub fn protocol(message: impl ToString) -> Self {
        ServiceError::Protocol {
            message: message.to_string(),
        }
    }

    /// Create an InvalidAccount error
    pub fn invalid_account(id: SubjectId, capacity: usize) -> Self {
        ServiceError::InvalidAccount { id, capacity }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(id: usize, balance: f64, requested: f64) -> Self {
        ServiceError::InsufficientFunds {
            id,
            balance,
            requested,
        }
    }

    /// Create a NotConnected error
    pub fn not_connected(service: &str) -> Self {
        ServiceError::NotConnected {
            service: service.to_string(),
        }
    }

    /// Create a Rejected error from a remote failure message
    pub fn rejected(message: impl ToString) -> Self {
        ServiceError::Rejected {
            message: message.to_string(),
        }
    }

    /// Create a Resource error
    pub fn resource(context: &str, cause: impl ToString) -> Self {
        ServiceError::Resource {
            context: context.to_string(),
            message: cause.to_string(),
        }
    }

    /// Create a Task error
    pub fn task(message: impl ToString) -> Self {
        ServiceError::Task {
            message: message.to_string(),
        }
    }

    /// Create a Config error
    pub fn config(message: impl ToString) -> Self {
        ServiceError::Config {
            message: message.to_string(),
        }
    }

    /// Whether the failure happened on the wire rather than in the service
    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transport(
        ServiceError::Transport { operation: "recv".to_string(), message: "connection reset".to_string() },
        "Transport error during recv: connection reset"
    )]
    #[case::protocol(
        ServiceError::Protocol { message: "response has 2 fields".to_string() },
        "Protocol error: response has 2 fields"
    )]
    #[case::invalid_account(
        ServiceError::InvalidAccount { id: 100, capacity: 100 },
        "Invalid account ID"
    )]
    #[case::insufficient_funds(
        ServiceError::InsufficientFunds { id: 5, balance: 100.0, requested: 150.0 },
        "Insufficient funds"
    )]
    #[case::invalid_amount(ServiceError::InvalidAmount { amount: -3.5 }, "Invalid amount -3.5: must be a positive number")]
    #[case::not_logged_in(ServiceError::NotLoggedIn, "Please login first")]
    #[case::already_logged_in(
        ServiceError::AlreadyLoggedIn { user: 7 },
        "Already logged in as user 7, please logout first"
    )]
    #[case::not_connected(
        ServiceError::NotConnected { service: "finance".to_string() },
        "Not connected to finance server"
    )]
    #[case::rejected(ServiceError::Rejected { message: "File not found".to_string() }, "File not found")]
    #[case::unknown_request(ServiceError::UnknownRequest { kind: RequestKind::Login }, "Unknown RequestType")]
    #[case::missing_extension(ServiceError::MissingExtension { name: "README".to_string() }, "File has no extension")]
    #[case::extension_not_allowed(
        ServiceError::ExtensionNotAllowed { name: "a.exe".to_string(), extension: ".exe".to_string() },
        "File extension not allowed"
    )]
    #[case::resource(
        ServiceError::Resource { context: "Failed to create file".to_string(), message: "permission denied".to_string() },
        "Failed to create file"
    )]
    #[case::task(ServiceError::Task { message: "2 tasks did not report".to_string() }, "Task failed: 2 tasks did not report")]
    #[case::unsupported_content(
        ServiceError::UnsupportedContent { name: "a.txt".to_string() },
        "File contents contain the reserved '|' character"
    )]
    #[case::shutting_down(ServiceError::ShuttingDown, "Server shutting down")]
    fn test_error_display(#[case] error: ServiceError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::transport(
        ServiceError::transport("send", "broken pipe"),
        ServiceError::Transport { operation: "send".to_string(), message: "broken pipe".to_string() }
    )]
    #[case::invalid_account(
        ServiceError::invalid_account(-1, 10),
        ServiceError::InvalidAccount { id: -1, capacity: 10 }
    )]
    #[case::not_connected(
        ServiceError::not_connected("logging"),
        ServiceError::NotConnected { service: "logging".to_string() }
    )]
    #[case::resource(
        ServiceError::resource("Failed to write log file", "disk full"),
        ServiceError::Resource { context: "Failed to write log file".to_string(), message: "disk full".to_string() }
    )]
    fn test_helper_functions(#[case] result: ServiceError, #[case] expected: ServiceError) {
        assert_eq!(result, expected);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied");
        let error: ServiceError = io_error.into();
        assert!(matches!(error, ServiceError::Resource { .. }));
        assert_eq!(error.to_string(), "I/O error: Permission denied");
    }

    #[test]
    fn test_is_transport() {
        assert!(ServiceError::transport("recv", "eof").is_transport());
        assert!(!ServiceError::NotLoggedIn.is_transport());
    }
}
