use crate::client::{Endpoint, Endpoints};
use crate::service::ServiceConfig;
use crate::telemetry::LogConfig;
use crate::types::ServiceError;
use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Logging options shared by every binary
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Default log filter (e.g. `info`, `netbank=debug`); `RUST_LOG` wins
    ///
    /// Environment variable: `NETBANK_LOG_LEVEL`
    #[arg(long, env = "NETBANK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Ledger service holding account balances
#[derive(Parser, Debug, Clone)]
#[command(name = "finance-server", version)]
#[command(about = "Ledger service: deposits, withdrawals, balances and interest", long_about = None)]
pub struct FinanceArgs {
    /// Port number to listen on
    ///
    /// Environment variable: `NETBANK_FINANCE_PORT`
    #[arg(short, long, env = "NETBANK_FINANCE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Maximum number of accounts
    ///
    /// Environment variable: `NETBANK_MAX_ACCOUNTS`
    #[arg(short, long, env = "NETBANK_MAX_ACCOUNTS", default_value_t = 100)]
    pub max_accounts: usize,

    /// Number of connection worker threads
    ///
    /// Environment variable: `NETBANK_FINANCE_THREADS`
    #[arg(short, long, env = "NETBANK_FINANCE_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Threads reserved for interest accrual (default: CPU cores)
    ///
    /// This is also the upper bound for a client's parallelism hint.
    ///
    /// Environment variable: `NETBANK_BATCH_THREADS`
    #[arg(long, env = "NETBANK_BATCH_THREADS")]
    pub batch_threads: Option<usize>,

    /// Interest rate applied per accrual (0.01 = 1%)
    ///
    /// Environment variable: `NETBANK_INTEREST_RATE`
    #[arg(long, env = "NETBANK_INTEREST_RATE", default_value_t = 0.01)]
    pub interest_rate: f64,

    #[command(flatten)]
    pub log: LogArgs,
}

/// File storage service
#[derive(Parser, Debug, Clone)]
#[command(name = "file-server", version)]
#[command(about = "File service: stores uploads in a flat directory", long_about = None)]
pub struct FileArgs {
    /// Port number to listen on
    ///
    /// Environment variable: `NETBANK_FILE_PORT`
    #[arg(short, long, env = "NETBANK_FILE_PORT", default_value_t = 8001)]
    pub port: u16,

    /// Number of connection worker threads
    ///
    /// Environment variable: `NETBANK_FILE_THREADS`
    #[arg(short, long, env = "NETBANK_FILE_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Directory uploaded files are stored in
    ///
    /// Environment variable: `NETBANK_STORAGE_DIR`
    #[arg(long, env = "NETBANK_STORAGE_DIR", default_value = "storage")]
    pub storage: PathBuf,

    /// Allowed file extensions (e.g. `.txt .pdf`); all are allowed if none given
    #[arg(value_name = "ALLOWED_EXTENSIONS")]
    pub allowed_extensions: Vec<String>,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Audit log service
#[derive(Parser, Debug, Clone)]
#[command(name = "logging-server", version)]
#[command(about = "Logging service: appends one audit line per event", long_about = None)]
pub struct LoggingArgs {
    /// Port number to listen on
    ///
    /// Environment variable: `NETBANK_LOGGING_PORT`
    #[arg(short, long, env = "NETBANK_LOGGING_PORT", default_value_t = 8002)]
    pub port: u16,

    /// Log file to append audit lines to
    ///
    /// Environment variable: `NETBANK_AUDIT_FILE`
    #[arg(short, long, env = "NETBANK_AUDIT_FILE", default_value = "system.log")]
    pub file: PathBuf,

    /// Number of connection worker threads
    ///
    /// Environment variable: `NETBANK_LOGGING_THREADS`
    #[arg(short, long, env = "NETBANK_LOGGING_THREADS", default_value_t = 4)]
    pub threads: usize,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Interactive banking client
#[derive(Parser, Debug, Clone)]
#[command(name = "netbank-client", version)]
#[command(about = "Interactive client for the finance, file and logging services", long_about = None)]
pub struct ClientArgs {
    /// Finance server hostname/IP
    #[arg(long, env = "NETBANK_FINANCE_HOST", default_value = "localhost")]
    pub finance_host: String,

    /// Finance server port
    #[arg(long, env = "NETBANK_FINANCE_PORT", default_value_t = 8000)]
    pub finance_port: u16,

    /// File server hostname/IP
    #[arg(long, env = "NETBANK_FILE_HOST", default_value = "localhost")]
    pub file_host: String,

    /// File server port
    #[arg(long, env = "NETBANK_FILE_PORT", default_value_t = 8001)]
    pub file_port: u16,

    /// Logging server hostname/IP
    #[arg(long, env = "NETBANK_LOGGING_HOST", default_value = "localhost")]
    pub logging_host: String,

    /// Logging server port
    #[arg(long, env = "NETBANK_LOGGING_PORT", default_value_t = 8002)]
    pub logging_port: u16,

    /// Maximum attempts per operation
    #[arg(short, long, env = "NETBANK_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Write client diagnostics to this file instead of stderr
    #[arg(long, env = "NETBANK_CLIENT_LOG", default_value = "client.log")]
    pub log_file: PathBuf,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Validated finance service settings
#[derive(Debug, Clone)]
pub struct FinanceConfig {
    pub port: u16,
    pub capacity: usize,
    pub service: ServiceConfig,
    pub batch_workers: usize,
    pub interest_rate: f64,
    pub log: LogConfig,
}

/// Validated file service settings
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub port: u16,
    pub storage: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub service: ServiceConfig,
    pub log: LogConfig,
}

/// Validated logging service settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub port: u16,
    pub audit_file: PathBuf,
    pub service: ServiceConfig,
    pub log: LogConfig,
}

/// Validated client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub max_attempts: u32,
    pub log: LogConfig,
}

fn service_config(threads: usize, variable: &str) -> Result<ServiceConfig, ServiceError> {
    if threads == 0 {
        return Err(ServiceError::config(format!("{} must be greater than 0", variable)));
    }
    Ok(ServiceConfig {
        workers: threads,
        accept_backoff: Duration::from_secs(1),
    })
}

fn log_config(args: &LogArgs, file: Option<PathBuf>) -> LogConfig {
    LogConfig {
        level: args.log_level.clone(),
        file,
    }
}

impl TryFrom<FinanceArgs> for FinanceConfig {
    type Error = ServiceError;

    fn try_from(args: FinanceArgs) -> Result<Self, Self::Error> {
        if args.max_accounts == 0 {
            return Err(ServiceError::config("NETBANK_MAX_ACCOUNTS must be greater than 0"));
        }
        // Zero falls back to the CPU count.
        let batch_workers = match args.batch_threads {
            Some(0) | None => num_cpus::get(),
            Some(n) => n,
        };
        if !args.interest_rate.is_finite() || args.interest_rate <= -1.0 {
            return Err(ServiceError::config(format!(
                "NETBANK_INTEREST_RATE ({}) must be a finite number above -1",
                args.interest_rate
            )));
        }

        Ok(FinanceConfig {
            port: args.port,
            capacity: args.max_accounts,
            service: service_config(args.threads, "NETBANK_FINANCE_THREADS")?,
            batch_workers,
            interest_rate: args.interest_rate,
            log: log_config(&args.log, None),
        })
    }
}

impl TryFrom<FileArgs> for FileConfig {
    type Error = ServiceError;

    fn try_from(args: FileArgs) -> Result<Self, Self::Error> {
        Ok(FileConfig {
            port: args.port,
            service: service_config(args.threads, "NETBANK_FILE_THREADS")?,
            storage: args.storage,
            allowed_extensions: args.allowed_extensions,
            log: log_config(&args.log, None),
        })
    }
}

impl TryFrom<LoggingArgs> for LoggingConfig {
    type Error = ServiceError;

    fn try_from(args: LoggingArgs) -> Result<Self, Self::Error> {
        Ok(LoggingConfig {
            port: args.port,
            service: service_config(args.threads, "NETBANK_LOGGING_THREADS")?,
            audit_file: args.file,
            log: log_config(&args.log, None),
        })
    }
}

impl TryFrom<ClientArgs> for ClientConfig {
    type Error = ServiceError;

    fn try_from(args: ClientArgs) -> Result<Self, Self::Error> {
        if args.retries == 0 {
            return Err(ServiceError::config("NETBANK_RETRIES must be at least 1"));
        }
        Ok(ClientConfig {
            endpoints: Endpoints {
                finance: Endpoint::new(args.finance_host, args.finance_port),
                file: Endpoint::new(args.file_host, args.file_port),
                logging: Endpoint::new(args.logging_host, args.logging_port),
            },
            max_attempts: args.retries,
            log: log_config(&args.log, Some(args.log_file)),
        })
    }
}
