//! Request and response types exchanged between the client and the services
//!
//! Both types are plain values: they are built once per call site, serialized
//! by [`crate::io::frame_codec`], and never mutated after construction.

/// Subject identifier carried by every request
///
/// For the finance service this is the account id; the logging service uses
/// it as the user id of the audit line. It is signed on the wire, so range
/// validation happens at the ledger.
pub type SubjectId = i64;

/// Operations understood by the services
///
/// The discriminants are the wire codes (0..=8) and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Disconnect from the service (also the fail-safe decode result)
    Quit = 0,
    /// Credit an account
    Deposit = 1,
    /// Debit an account if funds suffice
    Withdraw = 2,
    /// Read an account balance
    Balance = 3,
    /// Store a file on the file service
    UploadFile = 4,
    /// Fetch a file from the file service
    DownloadFile = 5,
    /// Audit event: user logged in
    Login = 6,
    /// Audit event: user logged out
    Logout = 7,
    /// Apply interest to every active account
    AccrueInterest = 8,
}

impl RequestKind {
    /// All kinds in wire-code order
    pub const ALL: [RequestKind; 9] = [
        RequestKind::Quit,
        RequestKind::Deposit,
        RequestKind::Withdraw,
        RequestKind::Balance,
        RequestKind::UploadFile,
        RequestKind::DownloadFile,
        RequestKind::Login,
        RequestKind::Logout,
        RequestKind::AccrueInterest,
    ];

    /// Wire code of this kind
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Map a wire code back to a kind, `None` if out of range
    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }
}

/// A single request sent over a [`crate::io::Channel`]
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Operation to perform
    pub kind: RequestKind,

    /// Account or user id the operation applies to
    pub subject_id: SubjectId,

    /// Amount for deposits and withdrawals, the audited balance for balance
    /// events, or the parallelism hint for interest accrual
    pub amount: f64,

    /// File name for upload/download requests
    pub name: String,

    /// File contents for uploads
    pub payload: String,
}

impl Request {
    /// Create a request with only a kind and subject
    pub fn new(kind: RequestKind, subject_id: SubjectId) -> Self {
        Request {
            kind,
            subject_id,
            amount: 0.0,
            name: String::new(),
            payload: String::new(),
        }
    }

    /// The disconnect request, also returned for frames that fail to parse
    pub fn quit() -> Self {
        Request::new(RequestKind::Quit, 0)
    }

    /// Builder-style setter for `amount`
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    /// Builder-style setter for `name`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder-style setter for `payload`
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// The single response a service returns for each request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    /// Whether the operation succeeded
    pub ok: bool,

    /// Account balance after the operation (finance service only)
    pub balance: f64,

    /// Returned data, e.g. downloaded file contents
    pub payload: String,

    /// Human-readable outcome
    pub message: String,
}

impl Response {
    /// A successful response carrying only a message
    pub fn success(message: impl Into<String>) -> Self {
        Response {
            ok: true,
            message: message.into(),
            ..Response::default()
        }
    }

    /// A failed response carrying only a message
    pub fn failure(message: impl Into<String>) -> Self {
        Response {
            ok: false,
            message: message.into(),
            ..Response::default()
        }
    }

    /// Builder-style setter for `balance`
    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self
    }

    /// Builder-style setter for `payload`
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}
