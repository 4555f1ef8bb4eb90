//! Client session against the finance, file and logging services
//!
//! A [`ClientSession`] holds one [`Channel`] per service and the logged-in
//! user. Each finance or file operation is one transaction made of two round
//! trips: the service request, then an audit request to the logging
//! service. The whole transaction is one attempt of the
//! [`RetryCoordinator`], so an interrupt cannot land between the two steps.
//!
//! A failed audit does not fail the transaction; it is reported as a warning
//! on the [`Receipt`].

use super::retry::{Operator, RetryCoordinator};
use crate::core::{RegisteredProcess, ShutdownContext};
use crate::io::Channel;
use crate::types::{Request, RequestKind, Response, ServiceError, SubjectId};
use std::fmt;
use tracing::{info, warn};

/// The three services a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Finance,
    File,
    Logging,
}

impl ServiceKind {
    /// All services in shutdown order
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Finance, ServiceKind::File, ServiceKind::Logging];

    /// Name used in messages and the process registry
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Finance => "finance",
            ServiceKind::File => "file",
            ServiceKind::Logging => "logging",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Host and port of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where each service listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub finance: Endpoint,
    pub file: Endpoint,
    pub logging: Endpoint,
}

/// Result of a successful client operation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Receipt {
    /// Response of the service that performed the operation
    pub response: Response,
    /// Non-fatal problems, e.g. a failed audit round trip
    pub warnings: Vec<String>,
}

impl Receipt {
    fn new(response: Response, warnings: Vec<String>) -> Self {
        Receipt { response, warnings }
    }
}

/// One connection slot; reconnects lazily after a transport failure
struct Link {
    kind: ServiceKind,
    endpoint: Endpoint,
    channel: Option<Channel>,
    closed: bool,
}

impl Link {
    fn new(kind: ServiceKind, endpoint: Endpoint) -> Self {
        Link {
            kind,
            endpoint,
            channel: None,
            closed: false,
        }
    }

    fn connect(&mut self, ctx: &ShutdownContext) -> Result<&mut Channel, ServiceError> {
        let name = self.kind.name();
        if self.closed {
            return Err(ServiceError::not_connected(name));
        }
        if self.channel.is_none() {
            let channel = Channel::connect(&self.endpoint.host, self.endpoint.port).map_err(|e| {
                warn!(service = %self.kind, endpoint = %self.endpoint, error = %e, "connect failed");
                ServiceError::not_connected(name)
            })?;
            ctx.register(name);
            self.channel = Some(channel);
        }
        self.channel
            .as_mut()
            .ok_or_else(|| ServiceError::not_connected(name))
    }

    /// Send `request`; `ok = false` responses become [`ServiceError::Rejected`]
    fn round_trip(&mut self, ctx: &ShutdownContext, request: &Request) -> Result<Response, ServiceError> {
        let channel = self.connect(ctx)?;
        match channel.send_request(request) {
            Ok(response) if response.ok => Ok(response),
            Ok(response) => Err(ServiceError::rejected(response.message)),
            Err(e) => {
                if e.is_transport() {
                    self.channel = None;
                }
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Send Quit and drop the channel
    fn close(&mut self, ctx: &ShutdownContext) -> Option<Result<(), ServiceError>> {
        self.closed = true;
        let mut channel = self.channel.take()?;
        let result = channel.send_request(&Request::quit()).map(|_| ());
        ctx.mark_terminated(self.kind.name());
        Some(result)
    }
}

struct Links {
    finance: Link,
    file: Link,
    logging: Link,
}

impl Links {
    fn get_mut(&mut self, kind: ServiceKind) -> &mut Link {
        match kind {
            ServiceKind::Finance => &mut self.finance,
            ServiceKind::File => &mut self.file,
            ServiceKind::Logging => &mut self.logging,
        }
    }

    fn get(&self, kind: ServiceKind) -> &Link {
        match kind {
            ServiceKind::Finance => &self.finance,
            ServiceKind::File => &self.file,
            ServiceKind::Logging => &self.logging,
        }
    }

    /// Service round trip followed by its audit round trip
    fn audited(
        &mut self,
        ctx: &ShutdownContext,
        kind: ServiceKind,
        request: &Request,
        audit: impl FnOnce(&Response) -> Request,
    ) -> Result<Receipt, ServiceError> {
        let response = self.get_mut(kind).round_trip(ctx, request)?;
        let warnings = match self.logging.round_trip(ctx, &audit(&response)) {
            Ok(_) => Vec::new(),
            Err(e @ ServiceError::NotConnected { .. }) => vec![e.to_string()],
            Err(e) => vec![format!("Failed to log transaction: {}", e)],
        };
        Ok(Receipt::new(response, warnings))
    }
}

/// A client's connections, login state and retry policy
pub struct ClientSession {
    links: Links,
    retry: RetryCoordinator,
    operator: Box<dyn Operator + Send>,
    user: Option<SubjectId>,
}

impl ClientSession {
    /// Connect to every service
    ///
    /// A service that cannot be reached is left disconnected and logged; it
    /// is retried on first use. Check [`ClientSession::is_connected`].
    pub fn connect(endpoints: &Endpoints, retry: RetryCoordinator, operator: Box<dyn Operator + Send>) -> Self {
        let mut links = Links {
            finance: Link::new(ServiceKind::Finance, endpoints.finance.clone()),
            file: Link::new(ServiceKind::File, endpoints.file.clone()),
            logging: Link::new(ServiceKind::Logging, endpoints.logging.clone()),
        };
        for kind in ServiceKind::ALL {
            if links.get_mut(kind).connect(retry.context()).is_ok() {
                info!(service = %kind, "connected");
            }
        }

        ClientSession {
            links,
            retry,
            operator,
            user: None,
        }
    }

    /// Whether a channel to `kind` is currently open
    pub fn is_connected(&self, kind: ServiceKind) -> bool {
        self.links.get(kind).is_connected()
    }

    /// Endpoint configured for `kind`
    pub fn endpoint(&self, kind: ServiceKind) -> &Endpoint {
        &self.links.get(kind).endpoint
    }

    /// Logged-in user, if any
    pub fn user(&self) -> Option<SubjectId> {
        self.user
    }

    /// Shared shutdown state
    pub fn context(&self) -> &ShutdownContext {
        self.retry.context()
    }

    fn require_user(&self) -> Result<SubjectId, ServiceError> {
        self.user.ok_or(ServiceError::NotLoggedIn)
    }

    fn transact<T>(
        &mut self,
        operation: &str,
        mut step: impl FnMut(&mut Links, &ShutdownContext) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let ClientSession {
            links,
            retry,
            operator,
            ..
        } = self;
        let ctx = retry.context().clone();
        retry
            .run(operation, operator.as_mut(), || step(links, &ctx))
            .into_result()
    }

    /// Log in as `user` via the logging service
    ///
    /// # Errors
    ///
    /// [`ServiceError::AlreadyLoggedIn`] if a user is logged in, otherwise the
    /// last error once retries are given up.
    pub fn login(&mut self, user: SubjectId) -> Result<Receipt, ServiceError> {
        if let Some(current) = self.user {
            return Err(ServiceError::AlreadyLoggedIn { user: current });
        }
        let request = Request::new(RequestKind::Login, user);
        let response = self.transact("login", |links, ctx| links.logging.round_trip(ctx, &request))?;
        self.user = Some(user);
        info!(user, "logged in");
        Ok(Receipt::new(response, Vec::new()))
    }

    /// Log out; always succeeds locally once a user is logged in
    ///
    /// A failed logout audit is reported as a warning.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotLoggedIn`] if nobody is logged in.
    pub fn logout(&mut self) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        let ctx = self.retry.context().clone();
        let request = Request::new(RequestKind::Logout, user);
        let logging = &mut self.links.logging;
        let result = ctx.bracket(|| logging.round_trip(&ctx, &request));
        self.user = None;
        info!(user, "logged out");

        Ok(match result {
            Ok(response) => Receipt::new(response, Vec::new()),
            Err(e) => Receipt::new(
                Response::success("Logged out locally"),
                vec![format!("Logout from server failed: {}", e)],
            ),
        })
    }

    /// Deposit `amount` into the logged-in user's account
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotLoggedIn`] without a logged-in user
    /// - [`ServiceError::InvalidAmount`] unless `amount` is finite and positive
    /// - the last service error once retries are given up
    pub fn deposit(&mut self, amount: f64) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        validate_amount(amount)?;
        let request = Request::new(RequestKind::Deposit, user).with_amount(amount);
        self.transact("deposit", |links, ctx| {
            links.audited(ctx, ServiceKind::Finance, &request, |_| request.clone())
        })
    }

    /// Withdraw `amount` from the logged-in user's account
    ///
    /// # Errors
    ///
    /// As [`ClientSession::deposit`]; an overdraw fails with
    /// [`ServiceError::Rejected`] ("Insufficient funds").
    pub fn withdraw(&mut self, amount: f64) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        validate_amount(amount)?;
        let request = Request::new(RequestKind::Withdraw, user).with_amount(amount);
        self.transact("withdrawal", |links, ctx| {
            links.audited(ctx, ServiceKind::Finance, &request, |_| request.clone())
        })
    }

    /// Balance of the logged-in user's account
    ///
    /// The audit line records the balance that was read.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotLoggedIn`] or the last service error.
    pub fn balance(&mut self) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        let request = Request::new(RequestKind::Balance, user);
        self.transact("balance check", |links, ctx| {
            links.audited(ctx, ServiceKind::Finance, &request, |response| {
                Request::new(RequestKind::Balance, user).with_amount(response.balance)
            })
        })
    }

    /// Store `contents` as `name` on the file service
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotLoggedIn`] or the last service error.
    pub fn upload_file(&mut self, name: &str, contents: &str) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        let request = Request::new(RequestKind::UploadFile, user)
            .with_name(name)
            .with_payload(contents);
        self.transact("file upload", |links, ctx| {
            links.audited(ctx, ServiceKind::File, &request, |_| {
                Request::new(RequestKind::UploadFile, user).with_name(name)
            })
        })
    }

    /// Fetch `name` from the file service; contents are in the response
    /// payload
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotLoggedIn`] or the last service error.
    pub fn download_file(&mut self, name: &str) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        let request = Request::new(RequestKind::DownloadFile, user).with_name(name);
        self.transact("file download", |links, ctx| {
            links.audited(ctx, ServiceKind::File, &request, |_| request.clone())
        })
    }

    /// Accrue interest on every account
    ///
    /// `parallelism` is a hint; the service clamps it to its batch pool size.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotLoggedIn`] or the last service error.
    pub fn accrue_interest(&mut self, parallelism: usize) -> Result<Receipt, ServiceError> {
        let user = self.require_user()?;
        let request = Request::new(RequestKind::AccrueInterest, user).with_amount(parallelism as f64);
        self.transact("interest update", |links, ctx| {
            links.audited(ctx, ServiceKind::Finance, &request, |_| {
                Request::new(RequestKind::AccrueInterest, user)
            })
        })
    }

    /// Snapshot of the services this client has registered
    pub fn server_status(&self) -> Vec<RegisteredProcess> {
        self.retry.context().registry()
    }

    /// Send Quit to every connected service and drop all channels
    ///
    /// Best effort: a failure for one service does not stop the others.
    /// Idempotent; later operations fail with
    /// [`ServiceError::NotConnected`].
    pub fn shutdown(&mut self) -> Vec<(ServiceKind, Result<(), ServiceError>)> {
        let ctx = self.retry.context().clone();
        let mut report = Vec::new();
        for kind in ServiceKind::ALL {
            if let Some(result) = self.links.get_mut(kind).close(&ctx) {
                match &result {
                    Ok(()) => info!(service = %kind, "quit sent"),
                    Err(e) => warn!(service = %kind, error = %e, "quit not delivered"),
                }
                report.push((kind, result));
            }
        }
        self.user = None;
        report
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_amount(amount: f64) -> Result<(), ServiceError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(ServiceError::InvalidAmount { amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::retry::NoRetry;
    use rstest::rstest;

    fn unreachable_endpoints() -> Endpoints {
        // Port 1 on loopback is not expected to accept connections.
        Endpoints {
            finance: Endpoint::new("127.0.0.1", 1),
            file: Endpoint::new("127.0.0.1", 1),
            logging: Endpoint::new("127.0.0.1", 1),
        }
    }

    fn offline_session() -> ClientSession {
        let retry = RetryCoordinator::new(ShutdownContext::new(), 1);
        ClientSession::connect(&unreachable_endpoints(), retry, Box::new(NoRetry))
    }

    #[rstest]
    #[case::zero(0.0)]
    #[case::negative(-5.0)]
    #[case::nan(f64::NAN)]
    #[case::infinite(f64::INFINITY)]
    fn test_validate_amount_rejects(#[case] amount: f64) {
        assert!(matches!(validate_amount(amount), Err(ServiceError::InvalidAmount { .. })));
    }

    #[test]
    fn test_validate_amount_accepts_positive() {
        assert_eq!(validate_amount(0.01), Ok(()));
    }

    #[test]
    fn test_operations_need_login() {
        let mut session = offline_session();

        assert_eq!(session.deposit(10.0), Err(ServiceError::NotLoggedIn));
        assert_eq!(session.withdraw(10.0), Err(ServiceError::NotLoggedIn));
        assert_eq!(session.balance(), Err(ServiceError::NotLoggedIn));
        assert_eq!(session.upload_file("a.txt", "x"), Err(ServiceError::NotLoggedIn));
        assert_eq!(session.download_file("a.txt"), Err(ServiceError::NotLoggedIn));
        assert_eq!(session.accrue_interest(2), Err(ServiceError::NotLoggedIn));
        assert_eq!(session.logout(), Err(ServiceError::NotLoggedIn));
    }

    #[test]
    fn test_unreachable_services_stay_disconnected() {
        let mut session = offline_session();

        for kind in ServiceKind::ALL {
            assert!(!session.is_connected(kind));
        }
        assert!(session.server_status().is_empty());
        assert_eq!(session.login(5), Err(ServiceError::not_connected("logging")));
        assert_eq!(session.user(), None);
        assert!(session.shutdown().is_empty());
    }

    #[test]
    fn test_service_kind_names() {
        let names: Vec<String> = ServiceKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["finance", "file", "logging"]);
        assert_eq!(Endpoint::new("localhost", 8000).to_string(), "localhost:8000");
    }
}
