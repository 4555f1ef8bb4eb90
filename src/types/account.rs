//! Account-related types for the ledger
//!
//! An [`Account`] is one entry of the finance service's resource table. It is
//! owned by [`crate::core::Ledger`] and only ever touched while the entry's
//! own lock is held.

/// Validated account index into the ledger (`0 <= id < capacity`)
pub type AccountId = usize;

/// Ledger entry state
///
/// Entries exist for the whole process lifetime. An entry starts inactive and
/// is activated in place the first time any operation references its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Position of this entry in the ledger
    pub id: AccountId,

    /// Current balance
    pub balance: f64,

    /// Whether the entry has been referenced yet
    ///
    /// Inactive entries are skipped by interest accrual.
    pub active: bool,
}

impl Account {
    /// Create an inactive entry with a zero balance
    pub fn new(id: AccountId) -> Self {
        Account {
            id,
            balance: 0.0,
            active: false,
        }
    }

    /// Activate the entry if this is its first use
    ///
    /// Must be called with the entry's lock held, in the same critical section
    /// as the operation that follows.
    pub fn ensure_active(&mut self) {
        if !self.active {
            self.balance = 0.0;
            self.active = true;
        }
    }
}
