// CLI module
// Command-line arguments for each binary and their validated configs

mod args;

pub use args::{
    ClientArgs, ClientConfig, FileArgs, FileConfig, FinanceArgs, FinanceConfig, LogArgs, LoggingArgs,
    LoggingConfig,
};

use crate::types::ServiceError;
use clap::Parser;

/// Parse command-line arguments and validate them into a config
///
/// Parsing failures (including `--help`) are handled by clap, which prints
/// the message and exits the process.
///
/// # Errors
///
/// Returns [`ServiceError::Config`] if the parsed values are out of range.
pub fn parse_config<A, C>() -> Result<C, ServiceError>
where
    A: Parser,
    C: TryFrom<A, Error = ServiceError>,
{
    C::try_from(A::parse())
}
