//! Service loop shared by the finance, file and logging services
//!
//! A service is a [`RequestHandler`] driven by [`run_service`]:
//!
//! 1. The accept loop waits on a [`ListeningChannel`] and submits each
//!    accepted connection to a connection [`WorkerPool`] as one task.
//! 2. That task runs [`serve_connection`], which alternates receive and
//!    respond until the peer sends Quit, disconnects, or shutdown is
//!    requested.
//! 3. Once shutdown is requested the accept loop exits, the pool drains so
//!    in-flight requests finish, and [`RequestHandler::on_shutdown`] runs.
//!
//! Because each connection holds a worker for its lifetime, at most
//! `workers` connections are served at once.

pub mod file;
pub mod finance;
pub mod logging;

pub use file::FileHandler;
pub use finance::FinanceHandler;
pub use logging::AuditLogHandler;

use crate::core::{ShutdownContext, WorkerPool};
use crate::io::{Channel, ListeningChannel, Readiness};
use crate::types::{Request, RequestKind, Response, ServiceError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Message sent in reply to Quit
pub const DISCONNECT_ACK: &str = "Server acknowledged disconnect";

/// Per-service request dispatch
///
/// Implementations are shared by every connection worker, so any mutable
/// state must carry its own synchronization.
pub trait RequestHandler: Send + Sync + 'static {
    /// Service name used in logs and the process registry
    fn name(&self) -> &str;

    /// Produce the response for one request
    ///
    /// Never called for Quit. `peer` is the client address, for logging only.
    fn handle(&self, request: &Request, peer: &str) -> Response;

    /// Called once the listener is bound, before the first accept
    fn on_start(&self, _port: u16) {}

    /// Called after every connection has finished
    fn on_shutdown(&self) {}
}

/// Settings for [`run_service`]
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Connection workers, i.e. the maximum number of concurrently served
    /// connections
    pub workers: usize,

    /// Pause after a failed accept before trying again
    pub accept_backoff: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            workers: 4,
            accept_backoff: Duration::from_secs(1),
        }
    }
}

/// Run the accept loop until shutdown is requested
///
/// Registers the service in `ctx` on start and marks it terminated on exit.
///
/// # Returns
///
/// The number of connections accepted.
///
/// # Errors
///
/// Returns [`ServiceError::Config`] if the connection pool cannot be sized.
/// Accept failures are logged and retried, never returned.
pub fn run_service<H: RequestHandler>(
    listener: ListeningChannel,
    handler: Arc<H>,
    config: &ServiceConfig,
    ctx: &ShutdownContext,
) -> Result<usize, ServiceError> {
    let service = handler.name().to_string();
    let pool = WorkerPool::new(&format!("{}-conn", service), config.workers)?;
    let addr = listener.local_addr();

    ctx.register(&service);
    handler.on_start(addr.port());
    info!(service = %service, addr = %addr, workers = config.workers, "service started");

    let mut accepted = 0usize;
    loop {
        match listener.accept(ctx) {
            Ok(Some(channel)) => {
                accepted += 1;
                let handler = Arc::clone(&handler);
                let ctx = ctx.clone();
                info!(service = %service, peer = %channel.peer_addr(), "client connected");
                if let Err(e) = pool.submit(move || serve_connection(channel, handler.as_ref(), &ctx)) {
                    warn!(service = %service, error = %e, "connection dropped");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(service = %service, error = %e, "accept failed");
                if ctx.is_shutdown_requested() {
                    break;
                }
                backoff(ctx, config.accept_backoff);
            }
        }
    }

    info!(service = %service, "shutting down, waiting for open connections");
    pool.shutdown();
    handler.on_shutdown();
    ctx.mark_terminated(&service);
    info!(service = %service, connections = accepted, "service stopped");
    Ok(accepted)
}

fn backoff(ctx: &ShutdownContext, pause: Duration) {
    let deadline = Instant::now() + pause;
    while !ctx.is_shutdown_requested() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// Serve one connection until Quit, disconnect or shutdown
///
/// Transport errors end this connection only. A request already pending when
/// shutdown is requested is answered with "Server shutting down", except Quit,
/// which is always acknowledged.
pub fn serve_connection<H: RequestHandler + ?Sized>(
    mut channel: Channel,
    handler: &H,
    ctx: &ShutdownContext,
) {
    let peer = channel.peer_addr().to_string();
    let service = handler.name();

    loop {
        match channel.wait_for_request(ctx) {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::Closed) => {
                info!(service, peer = %peer, "client disconnected");
                return;
            }
            Ok(Readiness::Shutdown) => {
                info!(service, peer = %peer, "closing idle connection for shutdown");
                return;
            }
            Err(e) => {
                warn!(service, peer = %peer, error = %e, "connection failed");
                return;
            }
        }

        let request = match channel.receive_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(service, peer = %peer, error = %e, "receive failed");
                return;
            }
        };

        if request.kind == RequestKind::Quit {
            if let Err(e) = channel.send_response(&Response::success(DISCONNECT_ACK)) {
                debug!(service, peer = %peer, error = %e, "disconnect ack not delivered");
            }
            info!(service, peer = %peer, "client quit");
            return;
        }

        if ctx.is_shutdown_requested() {
            let response = Response::failure(ServiceError::ShuttingDown.to_string());
            if let Err(e) = channel.send_response(&response) {
                debug!(service, peer = %peer, error = %e, "shutdown notice not delivered");
            }
            return;
        }

        debug!(
            service,
            peer = %peer,
            kind = ?request.kind,
            subject_id = request.subject_id,
            "request"
        );
        let response = handler.handle(&request, &peer);

        if let Err(e) = channel.send_response(&response) {
            warn!(service, peer = %peer, error = %e, "send failed");
            return;
        }
    }
}
