//! Process-wide shutdown state
//!
//! [`ShutdownContext`] is created once per process and cloned into every
//! component that needs to observe or request shutdown: accept loops,
//! connection loops, the client retry layer and the interrupt listener. All
//! clones share one state.
//!
//! # Interrupt semantics
//!
//! | situation                                  | action                      |
//! |--------------------------------------------|-----------------------------|
//! | first interrupt, no bracket open           | request graceful shutdown   |
//! | interrupt after shutdown was requested     | force exit                  |
//! | first interrupt while a bracket is open    | defer until bracket closes  |
//! | interrupt while one is already deferred    | force exit                  |
//!
//! A deferred interrupt is delivered when the outermost bracket closes, with
//! the same rules as an interrupt arriving at that moment.
//!
//! The shutdown flag is a [`CancellationToken`]; once cancelled it is never
//! reset.

use crate::types::ServiceError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What [`ShutdownContext::on_interrupt`] did with an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Graceful shutdown was requested
    GracefulShutdown,
    /// A bracket is open; the interrupt will be delivered when it closes
    Deferred,
    /// The exit hook was invoked
    ForceExit,
}

/// One entry of the process registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredProcess {
    /// Id of the process that registered the entry
    pub process_id: u32,
    /// Registered name (e.g. `finance`)
    pub name: String,
    /// Cleared by [`ShutdownContext::mark_terminated`]
    pub active: bool,
}

#[derive(Debug, Default)]
struct InterruptState {
    bracket_depth: usize,
    pending: bool,
}

type ExitHook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    token: CancellationToken,
    timed_out: AtomicBool,
    interrupts: Mutex<InterruptState>,
    registry: Mutex<Vec<RegisteredProcess>>,
    exit_hook: ExitHook,
}

/// Shared handle to the process shutdown state
#[derive(Clone)]
pub struct ShutdownContext {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ShutdownContext {
    /// Create a context whose force-exit path terminates the process with
    /// status 1
    pub fn new() -> Self {
        Self::with_exit_hook(|| std::process::exit(1))
    }

    /// Create a context with a custom force-exit action
    pub fn with_exit_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        ShutdownContext {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                timed_out: AtomicBool::new(false),
                interrupts: Mutex::new(InterruptState::default()),
                registry: Mutex::new(Vec::new()),
                exit_hook: Box::new(hook),
            }),
        }
    }

    /// Request graceful shutdown (idempotent)
    pub fn request_shutdown(&self) {
        if !self.inner.token.is_cancelled() {
            info!("shutdown requested");
            self.inner.token.cancel();
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// A token cancelled when shutdown is requested
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Handle one external interrupt
    pub fn on_interrupt(&self) -> InterruptAction {
        let deferred = {
            let mut state = lock(&self.inner.interrupts);
            if state.bracket_depth == 0 {
                None
            } else if state.pending {
                Some(InterruptAction::ForceExit)
            } else {
                state.pending = true;
                Some(InterruptAction::Deferred)
            }
        };

        match deferred {
            Some(InterruptAction::ForceExit) => {
                self.force_exit();
                InterruptAction::ForceExit
            }
            Some(action) => {
                info!("interrupt deferred until the current transaction completes");
                action
            }
            None => self.deliver_interrupt(),
        }
    }

    fn deliver_interrupt(&self) -> InterruptAction {
        if self.is_shutdown_requested() {
            self.force_exit();
            InterruptAction::ForceExit
        } else {
            self.request_shutdown();
            InterruptAction::GracefulShutdown
        }
    }

    fn force_exit(&self) {
        warn!("second interrupt received, forcing exit");
        (self.inner.exit_hook)();
    }

    /// Run `f` with interrupt delivery suspended
    ///
    /// Brackets nest; a deferred interrupt is delivered when the outermost
    /// one closes, including when `f` panics.
    pub fn bracket<T>(&self, f: impl FnOnce() -> T) -> T {
        lock(&self.inner.interrupts).bracket_depth += 1;
        let _guard = BracketGuard { ctx: self };
        f()
    }

    /// Whether a bracket is currently open
    pub fn in_bracket(&self) -> bool {
        lock(&self.inner.interrupts).bracket_depth > 0
    }

    /// Add `name` to the registry as active, reactivating an existing entry
    pub fn register(&self, name: &str) {
        let mut registry = lock(&self.inner.registry);
        match registry.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.active = true,
            None => registry.push(RegisteredProcess {
                process_id: std::process::id(),
                name: name.to_string(),
                active: true,
            }),
        }
        info!(name, "registered");
    }

    /// Mark `name` as no longer active
    pub fn mark_terminated(&self, name: &str) {
        let mut registry = lock(&self.inner.registry);
        for entry in registry.iter_mut().filter(|entry| entry.name == name) {
            entry.active = false;
            info!(name, process_id = entry.process_id, "marked terminated");
        }
    }

    /// Whether `name` is registered and active
    pub fn is_active(&self, name: &str) -> bool {
        lock(&self.inner.registry)
            .iter()
            .any(|entry| entry.name == name && entry.active)
    }

    /// Snapshot of the registry in registration order
    pub fn registry(&self) -> Vec<RegisteredProcess> {
        lock(&self.inner.registry).clone()
    }

    /// Run `operation` and report success only if it succeeded within
    /// `timeout`
    ///
    /// The deadline is checked when the operation returns; a running
    /// operation is never interrupted. No channel call uses this today.
    pub fn execute_with_timeout(&self, operation: impl FnOnce() -> bool, timeout: Duration) -> bool {
        self.inner.timed_out.store(false, Ordering::SeqCst);
        let started = Instant::now();
        let succeeded = operation();

        if started.elapsed() > timeout {
            warn!(?timeout, "operation timed out");
            self.inner.timed_out.store(true, Ordering::SeqCst);
        }
        succeeded && !self.timed_out()
    }

    /// Whether the last [`ShutdownContext::execute_with_timeout`] overran
    pub fn timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownContext")
            .field("requested", &self.is_shutdown_requested())
            .field("timed_out", &self.timed_out())
            .field("registry", &self.registry())
            .finish()
    }
}

struct BracketGuard<'a> {
    ctx: &'a ShutdownContext,
}

impl Drop for BracketGuard<'_> {
    fn drop(&mut self) {
        let deliver = {
            let mut state = lock(&self.ctx.inner.interrupts);
            state.bracket_depth = state.bracket_depth.saturating_sub(1);
            let deliver = state.bracket_depth == 0 && state.pending;
            if deliver {
                state.pending = false;
            }
            deliver
        };

        if deliver {
            info!("delivering deferred interrupt");
            self.ctx.deliver_interrupt();
        }
    }
}

/// Spawn a thread that feeds Ctrl-C presses into `ctx`
///
/// The thread runs a current-thread tokio runtime that awaits
/// `tokio::signal::ctrl_c()` in a loop for the rest of the process life.
///
/// # Errors
///
/// Returns [`ServiceError::Resource`] if the runtime or the thread cannot be
/// created.
pub fn install_interrupt_listener(ctx: &ShutdownContext) -> Result<JoinHandle<()>, ServiceError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ServiceError::resource("Failed to start interrupt listener", e))?;
    let ctx = ctx.clone();

    thread::Builder::new()
        .name("interrupt-listener".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "failed to listen for interrupts");
                        break;
                    }
                    match ctx.on_interrupt() {
                        InterruptAction::GracefulShutdown => {
                            eprintln!("\nShutdown requested. Completing current operation...");
                        }
                        InterruptAction::Deferred => {
                            eprintln!("\nShutdown will begin once the current transaction completes.");
                        }
                        InterruptAction::ForceExit => {}
                    }
                }
            })
        })
        .map_err(|e| ServiceError::resource("Failed to start interrupt listener", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_context() -> (ShutdownContext, Arc<AtomicUsize>) {
        let exits = Arc::new(AtomicUsize::new(0));
        let counter = exits.clone();
        let ctx = ShutdownContext::with_exit_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (ctx, exits)
    }

    #[test]
    fn test_new_context_is_not_shut_down() {
        let ctx = ShutdownContext::new();
        assert!(!ctx.is_shutdown_requested());
        assert!(!ctx.timed_out());
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn test_request_shutdown_is_sticky_and_shared() {
        let ctx = ShutdownContext::new();
        let clone = ctx.clone();

        clone.request_shutdown();
        clone.request_shutdown();

        assert!(ctx.is_shutdown_requested());
        assert!(ctx.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_first_interrupt_is_graceful_second_forces_exit() {
        let (ctx, exits) = counting_context();

        assert_eq!(ctx.on_interrupt(), InterruptAction::GracefulShutdown);
        assert!(ctx.is_shutdown_requested());
        assert_eq!(exits.load(Ordering::SeqCst), 0);

        assert_eq!(ctx.on_interrupt(), InterruptAction::ForceExit);
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_inside_bracket_is_deferred() {
        let (ctx, exits) = counting_context();

        let observed_inside = ctx.bracket(|| {
            assert_eq!(ctx.on_interrupt(), InterruptAction::Deferred);
            ctx.is_shutdown_requested()
        });

        assert!(!observed_inside);
        assert!(ctx.is_shutdown_requested());
        assert_eq!(exits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_interrupt_inside_bracket_forces_exit() {
        let (ctx, exits) = counting_context();

        ctx.bracket(|| {
            assert_eq!(ctx.on_interrupt(), InterruptAction::Deferred);
            assert_eq!(ctx.on_interrupt(), InterruptAction::ForceExit);
        });

        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_interrupt_after_shutdown_forces_exit_on_close() {
        let (ctx, exits) = counting_context();
        ctx.request_shutdown();

        ctx.bracket(|| {
            assert_eq!(ctx.on_interrupt(), InterruptAction::Deferred);
            assert_eq!(exits.load(Ordering::SeqCst), 0);
        });

        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_brackets_deliver_on_outermost_close() {
        let (ctx, _exits) = counting_context();

        ctx.bracket(|| {
            ctx.bracket(|| {
                ctx.on_interrupt();
            });
            assert!(ctx.in_bracket());
            assert!(!ctx.is_shutdown_requested());
        });

        assert!(!ctx.in_bracket());
        assert!(ctx.is_shutdown_requested());
    }

    #[test]
    fn test_bracket_closes_on_panic() {
        let (ctx, _exits) = counting_context();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.bracket(|| {
                ctx.on_interrupt();
                panic!("transaction blew up");
            })
        }));

        assert!(result.is_err());
        assert!(!ctx.in_bracket());
        assert!(ctx.is_shutdown_requested());
    }

    #[test]
    fn test_registry_tracks_activity_in_order() {
        let ctx = ShutdownContext::new();
        ctx.register("finance");
        ctx.register("logging");
        ctx.mark_terminated("finance");

        let registry = ctx.registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry[0].name, "finance");
        assert!(!registry[0].active);
        assert_eq!(registry[1].name, "logging");
        assert!(registry[1].active);
        assert_eq!(registry[1].process_id, std::process::id());

        assert!(!ctx.is_active("finance"));
        assert!(ctx.is_active("logging"));
        assert!(!ctx.is_active("file"));
    }

    #[test]
    fn test_register_reactivates_existing_entry() {
        let ctx = ShutdownContext::new();
        ctx.register("file");
        ctx.mark_terminated("file");
        ctx.register("file");

        assert_eq!(ctx.registry().len(), 1);
        assert!(ctx.is_active("file"));
    }

    #[test]
    fn test_execute_with_timeout() {
        let ctx = ShutdownContext::new();

        assert!(ctx.execute_with_timeout(|| true, Duration::from_secs(5)));
        assert!(!ctx.timed_out());

        assert!(!ctx.execute_with_timeout(|| false, Duration::from_secs(5)));
        assert!(!ctx.timed_out());

        let slow = ctx.execute_with_timeout(
            || {
                thread::sleep(Duration::from_millis(20));
                true
            },
            Duration::from_millis(1),
        );
        assert!(!slow);
        assert!(ctx.timed_out());
    }
}
