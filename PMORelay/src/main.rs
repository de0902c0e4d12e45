use std::io::BufRead;

use anyhow::Context;
use pmoconfig::Config;
use pmorelay::{LoggingOptions, RelayConfigExt, RelayServer, init_logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // ========== Configuration ==========
    let config = Config::load_config("").context("Unable to load configuration")?;
    init_logging(LoggingOptions::from_config(&config));

    let relay_config = config.get_relay_config()?;

    if config.is_first_start() {
        info!(
            "First launch detected. Verify settings at {} and restart the program.",
            config.get_config_file()
        );
        return Ok(());
    }

    // ========== Relay ==========
    let listener = RelayServer::new(relay_config)?.bind().await?;

    let shutdown = CancellationToken::new();
    watch_ctrl_c(shutdown.clone());
    watch_stdin(shutdown.clone());

    info!("Press Enter or Ctrl+C to exit.");
    listener.run(shutdown).await?;
    Ok(())
}

fn watch_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received"),
            Err(e) => {
                warn!("Unable to listen for Ctrl+C: {}", e);
                return;
            }
        }
        shutdown.cancel();
    });
}

/// Enter on the console stops the relay. A closed stdin is ignored.
fn watch_stdin(shutdown: CancellationToken) {
    // plain thread: a pending blocking read would hold the runtime on exit
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
            if n > 0 {
                shutdown.cancel();
            }
        }
    });
}
