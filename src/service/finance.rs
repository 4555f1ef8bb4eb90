//! Finance service request dispatch
//!
//! Maps Deposit, Withdraw, Balance and AccrueInterest requests onto a
//! [`Ledger`]. Interest accrual fans out over a batch pool that lives as long
//! as the handler, separate from the connection pool so that batch tasks
//! never wait behind long-lived connection workers.

use super::RequestHandler;
use crate::core::{Ledger, WorkerPool};
use crate::types::{Request, RequestKind, Response, ServiceError};
use std::sync::Arc;
use tracing::{info, warn};

/// Handler for the finance service
pub struct FinanceHandler {
    ledger: Arc<Ledger>,
    batch_pool: WorkerPool,
    interest_rate: f64,
}

impl FinanceHandler {
    /// Create a handler over a fresh ledger
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of accounts
    /// * `batch_workers` - Size of the interest batch pool; also the upper
    ///   bound for a client's parallelism hint
    /// * `interest_rate` - Rate applied per accrual, e.g. `0.01` for 1%
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if `capacity` or `batch_workers` is
    /// zero.
    pub fn new(capacity: usize, batch_workers: usize, interest_rate: f64) -> Result<Self, ServiceError> {
        Ok(FinanceHandler {
            ledger: Arc::new(Ledger::new(capacity)?),
            batch_pool: WorkerPool::new("finance-batch", batch_workers)?,
            interest_rate,
        })
    }

    /// The ledger backing this handler
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Translate the parallelism hint carried in a request's amount
    ///
    /// Non-finite or sub-1 hints mean "use the whole batch pool"; the ledger
    /// clamps the rest.
    fn parallelism_hint(&self, amount: f64) -> usize {
        if amount.is_finite() && amount >= 1.0 {
            amount as usize
        } else {
            self.batch_pool.worker_count()
        }
    }

    fn accrue_interest(&self, request: &Request) -> Response {
        let parallelism = self.parallelism_hint(request.amount);
        match self
            .ledger
            .accrue_interest_all(self.interest_rate, parallelism, &self.batch_pool)
        {
            Ok(accounts) => {
                info!(accounts, rate = self.interest_rate, "interest accrued");
                Response::success("Interest accrual successful")
            }
            Err(e) => {
                warn!(error = %e, "interest accrual failed");
                Response::failure(format!("Interest accrual failed: {}", e))
            }
        }
    }
}

impl RequestHandler for FinanceHandler {
    fn name(&self) -> &str {
        "finance"
    }

    fn handle(&self, request: &Request, _peer: &str) -> Response {
        if let Err(e) = self.ledger.validate(request.subject_id) {
            return Response::failure(e.to_string());
        }

        let id = request.subject_id;
        match request.kind {
            RequestKind::Deposit => match self.ledger.deposit(id, request.amount) {
                Ok(balance) => Response::success("Deposit successful").with_balance(balance),
                Err(e) => Response::failure(e.to_string()),
            },
            RequestKind::Withdraw => match self.ledger.withdraw(id, request.amount) {
                Ok(balance) => Response::success("Withdrawal successful").with_balance(balance),
                Err(e) => {
                    let response = Response::failure(e.to_string());
                    match e {
                        ServiceError::InsufficientFunds { balance, .. } => response.with_balance(balance),
                        _ => response,
                    }
                }
            },
            RequestKind::Balance => match self.ledger.balance(id) {
                Ok(balance) => Response::success("View balance successful").with_balance(balance),
                Err(e) => Response::failure(e.to_string()),
            },
            RequestKind::AccrueInterest => self.accrue_interest(request),
            kind => Response::failure(ServiceError::UnknownRequest { kind }.to_string()),
        }
    }

    fn on_shutdown(&self) {
        self.batch_pool.shutdown();
    }
}
