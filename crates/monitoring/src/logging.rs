//! Logging configuration and initialization for the dealer binaries
//!
//! - Console logging to stderr (default) or daily rotating files
//! - Configurable log directory and file prefix
//! - `RUST_LOG` filtering, `info` when unset or invalid

use anyhow::{Result, anyhow};
use std::env;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_FILE_PREFIX: &str = "dealer-cron";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Destination {
    Console,
    File { dir: String, prefix: String },
}

fn destination_from_env() -> Destination {
    let destination = env::var("LOG_DESTINATION").unwrap_or_else(|_| "console".to_string());
    match destination.to_lowercase().as_str() {
        "file" => Destination::File {
            dir: env::var("LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string()),
            prefix: env::var("LOG_FILE_PREFIX").unwrap_or_else(|_| DEFAULT_LOG_FILE_PREFIX.to_string()),
        },
        _ => Destination::Console,
    }
}

/// Initialize tracing with the output destination taken from the environment.
///
/// ## Environment Variables
///
/// - `LOG_DESTINATION`: "console" (stderr) or "file" (default: "console")
/// - `LOG_DIR`: Directory for log files (default: "./logs"), file mode only
/// - `LOG_FILE_PREFIX`: Prefix for log file names (default: "dealer-cron"), file mode only
///
/// In file mode the returned guard owns the background writer; keep it alive
/// until the process is about to exit so buffered lines are flushed.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match destination_from_env() {
        Destination::Console => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize console tracing subscriber: {}", e))?;

            Ok(None)
        }
        Destination::File { dir, prefix } => {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                return Err(anyhow!("Failed to create log directory '{}': {}", dir, e));
            }

            let file_appender = rolling::daily(&dir, &prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize file tracing subscriber: {}", e))?;

            info!("Logging to daily rotating files {}/{}.<YYYY-MM-DD>", dir, prefix);
            if env::var("RUST_LOG").is_err() {
                warn!("RUST_LOG not set, logging at info level");
            }

            Ok(Some(guard))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment is process-wide, so every variable is checked in one test.
    #[test]
    fn test_destination_from_env() {
        unsafe {
            env::remove_var("LOG_DESTINATION");
            env::remove_var("LOG_DIR");
            env::remove_var("LOG_FILE_PREFIX");
        }
        assert_eq!(destination_from_env(), Destination::Console);

        unsafe {
            env::set_var("LOG_DESTINATION", "FILE");
        }
        assert_eq!(
            destination_from_env(),
            Destination::File {
                dir: DEFAULT_LOG_DIR.to_string(),
                prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
            }
        );

        unsafe {
            env::set_var("LOG_DIR", "/var/log/dealer");
            env::set_var("LOG_FILE_PREFIX", "track");
        }
        assert_eq!(
            destination_from_env(),
            Destination::File {
                dir: "/var/log/dealer".to_string(),
                prefix: "track".to_string(),
            }
        );

        unsafe {
            env::set_var("LOG_DESTINATION", "syslog");
        }
        assert_eq!(destination_from_env(), Destination::Console);

        unsafe {
            env::remove_var("LOG_DESTINATION");
            env::remove_var("LOG_DIR");
            env::remove_var("LOG_FILE_PREFIX");
        }
    }
}
