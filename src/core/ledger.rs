//! Ledger module
//!
//! This module provides the `Ledger` struct, the finance service's resource
//! table: a fixed number of accounts, each behind its own lock.
//!
//! The Ledger is responsible for:
//! - Rejecting out-of-range ids before any entry is touched
//! - Activating an entry on first use, in the same critical section as the
//!   operation that triggered it
//! - Deposits, withdrawals and balance reads
//! - Fanning interest accrual out over all active entries
//!
//! The slice of entries is sized once and never grows or shrinks, so no
//! table-wide lock exists. Operations on different accounts never contend.

use crate::core::worker_pool::WorkerPool;
use crate::types::{Account, AccountId, ServiceError, SubjectId};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Fixed-capacity table of independently locked accounts
pub struct Ledger {
    /// One entry per valid id, constructed inactive at startup
    accounts: Box<[Mutex<Account>]>,
}

impl Ledger {
    /// Create a ledger with `capacity` inactive entries
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, ServiceError> {
        if capacity == 0 {
            return Err(ServiceError::config("ledger capacity must be at least 1"));
        }
        let accounts = (0..capacity)
            .map(|id| Mutex::new(Account::new(id)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Ledger { accounts })
    }

    /// Number of entries
    pub fn capacity(&self) -> usize {
        self.accounts.len()
    }

    /// Check that `id` addresses an entry
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAccount`] unless `0 <= id < capacity`.
    pub fn validate(&self, id: SubjectId) -> Result<AccountId, ServiceError> {
        usize::try_from(id)
            .ok()
            .filter(|index| *index < self.accounts.len())
            .ok_or_else(|| ServiceError::invalid_account(id, self.accounts.len()))
    }

    fn lock(&self, id: AccountId) -> MutexGuard<'_, Account> {
        self.accounts[id]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on entry `id` under its lock, activating it first if needed
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAccount`] for an out-of-range id, or
    /// whatever `f` returns.
    pub fn update<T, F>(&self, id: SubjectId, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut Account) -> Result<T, ServiceError>,
    {
        let index = self.validate(id)?;
        let mut account = self.lock(index);
        account.ensure_active();
        f(&mut account)
    }

    /// Add `amount` to the balance and return the new balance
    ///
    /// The amount is not validated here; clients reject non-positive amounts
    /// before sending.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAccount`] for an out-of-range id.
    pub fn deposit(&self, id: SubjectId, amount: f64) -> Result<f64, ServiceError> {
        self.update(id, |account| {
            account.balance += amount;
            debug!(account = account.id, amount, balance = account.balance, "deposit");
            Ok(account.balance)
        })
    }

    /// Subtract `amount` if it does not exceed the balance
    ///
    /// # Returns
    ///
    /// The new balance on success.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidAccount`] for an out-of-range id
    /// - [`ServiceError::InsufficientFunds`] if `amount > balance`; the
    ///   balance is unchanged and carried in the error
    pub fn withdraw(&self, id: SubjectId, amount: f64) -> Result<f64, ServiceError> {
        self.update(id, |account| {
            if amount > account.balance {
                return Err(ServiceError::insufficient_funds(
                    account.id,
                    account.balance,
                    amount,
                ));
            }
            account.balance -= amount;
            debug!(account = account.id, amount, balance = account.balance, "withdraw");
            Ok(account.balance)
        })
    }

    /// Current balance of entry `id`
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAccount`] for an out-of-range id.
    pub fn balance(&self, id: SubjectId) -> Result<f64, ServiceError> {
        self.update(id, |account| Ok(account.balance))
    }

    /// Copy of entry `id` without activating it
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAccount`] for an out-of-range id.
    pub fn snapshot(&self, id: SubjectId) -> Result<Account, ServiceError> {
        let index = self.validate(id)?;
        Ok(self.lock(index).clone())
    }

    /// Ids of all active entries in ascending order
    pub fn active_ids(&self) -> Vec<AccountId> {
        (0..self.accounts.len())
            .filter(|id| self.lock(*id).active)
            .collect()
    }

    /// Multiply a positive balance of an active entry by `1 + rate`
    fn apply_interest(&self, id: AccountId, rate: f64) {
        let mut account = self.lock(id);
        if account.active && account.balance > 0.0 {
            account.balance *= 1.0 + rate;
        }
    }

    /// Accrue interest on every active entry using `pool`
    ///
    /// One task per active entry is submitted. At most `parallelism` tasks
    /// are in flight at once; the hint is clamped to
    /// `[1, pool.worker_count()]`. Each task locks only its own entry. The
    /// call returns after every task has reported.
    ///
    /// # Returns
    ///
    /// The number of entries visited.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Task`] if any task ended without reporting
    /// - [`ServiceError::ShuttingDown`] if the pool refuses work
    pub fn accrue_interest_all(
        self: &Arc<Self>,
        rate: f64,
        parallelism: usize,
        pool: &WorkerPool,
    ) -> Result<usize, ServiceError> {
        let ids = self.active_ids();
        let limit = parallelism.clamp(1, pool.worker_count());
        let (tx, rx) = mpsc::channel();

        let mut in_flight = 0usize;
        let mut reported = 0usize;
        let mut failed = 0usize;
        let mut record = |outcome: Option<bool>| match outcome {
            Some(true) => reported += 1,
            _ => failed += 1,
        };

        for id in ids.iter().copied() {
            if in_flight == limit {
                record(rx.recv().ok());
                in_flight -= 1;
            }

            let ledger = Arc::clone(self);
            let completion = Completion::new(tx.clone());
            pool.submit(move || {
                ledger.apply_interest(id, rate);
                completion.report();
            })?;
            in_flight += 1;
        }
        drop(tx);

        while in_flight > 0 {
            record(rx.recv().ok());
            in_flight -= 1;
        }

        if failed > 0 {
            warn!(failed, total = ids.len(), "interest tasks failed");
            return Err(ServiceError::task(format!(
                "{} of {} interest tasks did not report",
                failed,
                ids.len()
            )));
        }
        debug!(accounts = reported, rate, limit, "interest accrued");
        Ok(reported)
    }
}

/// Reports `false` on drop unless the task reported success first
struct Completion {
    tx: Sender<bool>,
    reported: bool,
}

impl Completion {
    fn new(tx: Sender<bool>) -> Self {
        Completion { tx, reported: false }
    }

    fn report(mut self) {
        self.reported = true;
        let _ = self.tx.send(true);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.reported {
            let _ = self.tx.send(false);
        }
    }
}
