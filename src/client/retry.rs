//! Bracketed retry of client transactions
//!
//! Every attempt runs inside [`ShutdownContext::bracket`], so an interrupt
//! that arrives mid-transaction is held until the attempt has finished. The
//! attempt's result is evaluated only after the bracket has closed and any
//! deferred interrupt has been delivered.

use crate::core::ShutdownContext;
use crate::types::ServiceError;
use tracing::{info, warn};

/// Decides whether a failed operation is attempted again
pub trait Operator {
    /// Ask whether to retry `operation` after `attempt` of `max_attempts`
    /// failed with `error`
    fn confirm_retry(
        &mut self,
        operation: &str,
        error: &ServiceError,
        attempt: u32,
        max_attempts: u32,
    ) -> bool;

    /// Called when the last permitted attempt has failed
    fn attempts_exhausted(&mut self, _operation: &str, _max_attempts: u32) {}
}

/// Operator that never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl Operator for NoRetry {
    fn confirm_retry(&mut self, _: &str, _: &ServiceError, _: u32, _: u32) -> bool {
        false
    }
}

/// How a retried operation ended
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded
    Succeeded(T),
    /// The operator declined to retry after this error
    Declined(ServiceError),
    /// The attempt limit was reached; carries the last error
    Exhausted(ServiceError),
    /// Shutdown was requested after this error
    Interrupted(ServiceError),
}

impl<T> RetryOutcome<T> {
    /// Collapse into the value or the last error
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            RetryOutcome::Succeeded(value) => Ok(value),
            RetryOutcome::Declined(error)
            | RetryOutcome::Exhausted(error)
            | RetryOutcome::Interrupted(error) => Err(error),
        }
    }

    /// Whether an attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded(_))
    }
}

/// Runs transactions with interrupt bracketing and bounded retry
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    ctx: ShutdownContext,
    max_attempts: u32,
}

impl RetryCoordinator {
    /// Create a coordinator allowing `max_attempts` attempts (at least 1)
    pub fn new(ctx: ShutdownContext, max_attempts: u32) -> Self {
        RetryCoordinator {
            ctx,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Shared shutdown state
    pub fn context(&self) -> &ShutdownContext {
        &self.ctx
    }

    /// Attempt limit
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` until it succeeds or the coordinator gives up
    ///
    /// The first attempt always runs. After a failure the coordinator gives
    /// up if shutdown has been requested, if the attempt limit is reached, or
    /// if `operator` declines.
    pub fn run<T, F>(&self, operation: &str, operator: &mut dyn Operator, mut attempt: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Result<T, ServiceError>,
    {
        let mut number = 1;
        loop {
            let error = match self.ctx.bracket(&mut attempt) {
                Ok(value) => return RetryOutcome::Succeeded(value),
                Err(error) => error,
            };
            warn!(operation, attempt = number, error = %error, "attempt failed");

            if self.ctx.is_shutdown_requested() {
                info!(operation, "abandoning retries for shutdown");
                return RetryOutcome::Interrupted(error);
            }
            if number >= self.max_attempts {
                operator.attempts_exhausted(operation, self.max_attempts);
                return RetryOutcome::Exhausted(error);
            }
            if !operator.confirm_retry(operation, &error, number, self.max_attempts) {
                return RetryOutcome::Declined(error);
            }
            if self.ctx.is_shutdown_requested() {
                return RetryOutcome::Interrupted(error);
            }
            number += 1;
        }
    }
}
