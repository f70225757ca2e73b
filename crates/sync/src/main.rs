// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use treasure_sync::config::SyncConfig;
use treasure_sync::RunOptions;

/// Connect to the BlindTreasure hubs with the stored session and log events.
#[derive(Debug, Parser)]
#[command(name = "treasure-sync", version)]
struct Cli {
    #[command(flatten)]
    config: SyncConfig,

    /// Log filter (e.g. `info`, `treasure_sync=debug`).
    #[arg(long, default_value = "info", env = "TREASURE_LOG_LEVEL")]
    log_level: String,

    /// Log format: `text` or `json`.
    #[arg(long, default_value = "text", env = "TREASURE_LOG_FORMAT")]
    log_format: String,

    /// Send one prompt to the AI assistant after connecting.
    #[arg(long)]
    ai_prompt: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    treasure_sync::install_crypto_provider();

    let options = RunOptions { ai_prompt: cli.ai_prompt };
    if let Err(e) = treasure_sync::run(cli.config, options).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}
