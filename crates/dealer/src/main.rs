use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dealer::cli::Cli;
use dealer::runner;

#[tokio::main]
async fn main() {
    dotenv().ok();

    // --help and --version print and exit here, before logging or locking
    let cli = Cli::parse();

    let log_guard = match monitoring::init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    let code = runner::run(cli, token).await;
    drop(log_guard);
    std::process::exit(code);
}

async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, cancelling run");
                    token.cancel();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, cancelling run"),
            _ = terminate.recv() => info!("Received SIGTERM, cancelling run"),
        }
        token.cancel();
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling run");
            token.cancel();
        }
    }
}
