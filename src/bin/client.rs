//! Interactive netbank client
//!
//! Connects to the finance, file and logging servers and runs a numbered
//! menu. Each operation is retried on failure after asking the operator.
//!
//! # Usage
//!
//! ```bash
//! netbank-client --finance-host 10.0.0.5 --retries 3
//! ```
//!
//! Diagnostics go to `client.log` (see `--log-file`) so the menu stays
//! readable. Ctrl-C at a prompt ends the session at once; during a
//! transaction it is held until the transaction completes. A second Ctrl-C
//! exits immediately.

use anyhow::Context;
use netbank::cli::{self, ClientArgs, ClientConfig};
use netbank::client::{ClientSession, Operator, Receipt, RetryCoordinator, ServiceKind};
use netbank::core::{install_interrupt_listener, ShutdownContext};
use netbank::telemetry::init_tracing;
use netbank::types::ServiceError;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

const MENU: &str = "
=== Networked Banking System Menu ===
1. Login
2. Deposit
3. Withdraw
4. View Balance
5. Upload File
6. Download File
7. Logout
8. Server Status
9. Accrue Interest
0. Exit
Choose an option: ";

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Terminal lines, read on a helper thread so a prompt can end on shutdown
struct Input {
    lines: Mutex<Receiver<String>>,
    ctx: ShutdownContext,
}

impl Input {
    fn new(lines: Receiver<String>, ctx: ShutdownContext) -> Self {
        Input {
            lines: Mutex::new(lines),
            ctx,
        }
    }

    fn stdin(ctx: &ShutdownContext) -> io::Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Arc::new(Input::new(rx, ctx.clone())))
    }

    /// Read one trimmed line after printing `label`
    ///
    /// `None` at end of input or once shutdown has been requested.
    fn prompt(&self, label: &str) -> io::Result<Option<String>> {
        print!("{}", label);
        io::stdout().flush()?;
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.ctx.is_shutdown_requested() {
                return Ok(None);
            }
            match lines.recv_timeout(INPUT_POLL_INTERVAL) {
                Ok(line) => return Ok(Some(line.trim().to_string())),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

/// Asks on the terminal whether to retry
struct TerminalOperator {
    input: Arc<Input>,
}

impl Operator for TerminalOperator {
    fn confirm_retry(&mut self, operation: &str, error: &ServiceError, attempt: u32, max_attempts: u32) -> bool {
        println!("{} failed: {}", capitalize(operation), error);
        let answer = self
            .input
            .prompt("Operation failed. Retry? (y/n): ")
            .ok()
            .flatten()
            .unwrap_or_default();
        if answer.eq_ignore_ascii_case("y") {
            println!("Retrying {} (attempt {} of {})...", operation, attempt + 1, max_attempts);
            true
        } else {
            println!("Operation canceled.");
            false
        }
    }

    fn attempts_exhausted(&mut self, _operation: &str, _max_attempts: u32) {
        println!("Maximum retry attempts reached.");
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn print_warnings(receipt: &Receipt) {
    for warning in &receipt.warnings {
        println!("Warning: {}", warning);
    }
}

fn report(operation: &str, result: Result<Receipt, ServiceError>, on_success: impl FnOnce(&Receipt)) {
    match result {
        Ok(receipt) => {
            on_success(&receipt);
            print_warnings(&receipt);
        }
        Err(e) => println!("{} failed: {}", operation, e),
    }
}

fn parse<T: FromStr>(input: &str, what: &str) -> Option<T> {
    match input.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            println!("Invalid {}: {}", what, input);
            None
        }
    }
}

/// Run one menu choice; `false` ends the session
fn dispatch(session: &mut ClientSession, input: &Input, choice: &str) -> anyhow::Result<bool> {
    match choice {
        "0" => return Ok(false),
        "1" => {
            let Some(line) = input.prompt("Enter user ID: ")? else {
                return Ok(false);
            };
            if let Some(user) = parse::<i64>(&line, "user ID") {
                report("Login", session.login(user), |_| {
                    println!("Logged in as user {}", user);
                });
            }
        }
        "2" => {
            let Some(line) = input.prompt("Enter amount to deposit: ")? else {
                return Ok(false);
            };
            if let Some(amount) = parse::<f64>(&line, "amount") {
                report("Deposit", session.deposit(amount), |r| {
                    println!("Deposit successful. New balance: {}", r.response.balance);
                });
            }
        }
        "3" => {
            let Some(line) = input.prompt("Enter amount to withdraw: ")? else {
                return Ok(false);
            };
            if let Some(amount) = parse::<f64>(&line, "amount") {
                report("Withdrawal", session.withdraw(amount), |r| {
                    println!("Withdrawal successful. New balance: {}", r.response.balance);
                });
            }
        }
        "4" => report("Balance request", session.balance(), |r| {
            println!("Current balance: {}", r.response.balance);
        }),
        "5" => {
            let Some(path) = input.prompt("Enter filename to upload: ")? else {
                return Ok(false);
            };
            let path = Path::new(&path);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match fs::read_to_string(path) {
                Ok(contents) => report("File upload", session.upload_file(name, &contents), |_| {
                    println!("File upload successful");
                }),
                Err(_) => println!("Error: Could not open file"),
            }
        }
        "6" => {
            let Some(name) = input.prompt("Enter filename to download: ")? else {
                return Ok(false);
            };
            report("File download", session.download_file(&name), |r| {
                match fs::write(&name, &r.response.payload) {
                    Ok(()) => println!("File downloaded successfully"),
                    Err(_) => println!("Error: Could not create output file"),
                }
            });
        }
        "7" => report("Logout", session.logout(), |_| println!("Logged out successfully")),
        "8" => {
            println!("\n=== Server Status ===");
            for entry in session.server_status() {
                let state = if entry.active { "ACTIVE" } else { "TERMINATED" };
                println!("{} (PID: {}): {}", entry.name, entry.process_id, state);
            }
            println!("====================");
        }
        "9" => {
            let Some(line) = input.prompt("Input a number of threads to use: ")? else {
                return Ok(false);
            };
            if let Some(threads) = parse::<usize>(&line, "thread count") {
                report("Interest update", session.accrue_interest(threads), |_| {
                    println!("Interest update successful!");
                });
            }
        }
        _ => println!("Invalid choice. Please try again."),
    }
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    let config: ClientConfig = cli::parse_config::<ClientArgs, _>()?;
    let _guard = init_tracing(&config.log);

    let ctx = ShutdownContext::new();
    install_interrupt_listener(&ctx)?;
    let input = Input::stdin(&ctx).context("failed to start terminal reader")?;

    println!("Connecting to servers...");
    let retry = RetryCoordinator::new(ctx.clone(), config.max_attempts);
    let operator = TerminalOperator {
        input: Arc::clone(&input),
    };
    let mut session = ClientSession::connect(&config.endpoints, retry, Box::new(operator));
    for kind in ServiceKind::ALL {
        let endpoint = session.endpoint(kind);
        if session.is_connected(kind) {
            println!("Connected to {} server at {}", kind, endpoint);
        } else {
            println!("Failed to connect to {} server at {}", kind, endpoint);
        }
    }

    while !ctx.is_shutdown_requested() {
        let Some(choice) = input.prompt(MENU).context("failed to read menu choice")? else {
            break;
        };
        if ctx.is_shutdown_requested() || !dispatch(&mut session, &input, &choice)? {
            break;
        }
    }

    if ctx.is_shutdown_requested() {
        println!("\nPerforming graceful shutdown...");
    } else {
        println!("Exiting normally...");
    }

    println!("Sending shutdown signals to connected servers...");
    for (kind, result) in session.shutdown() {
        match result {
            Ok(()) => println!("QUIT sent to {} server", kind),
            Err(e) => println!("Failed to send QUIT to {} server: {}", kind, e),
        }
    }
    println!("Shutdown complete.");
    Ok(())
}
