//! Base DEX arbitrage scanner and order engine entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use base_arb::api::{create_router, AppState};
use base_arb::config::Config;
use base_arb::metrics;
use base_arb::service::ArbService;
use base_arb::token::TokenRegistry;
use base_arb::utils::{short_address, shutdown_signal};

/// Cross-exchange arbitrage scanner and conditional order engine for Base DEXs.
#[derive(Parser, Debug)]
#[command(name = "base-arb")]
#[command(about = "Arbitrage scanner and limit/stop-loss order engine for Base DEXs")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan loop and HTTP API (default).
    Run {
        /// Override simulation mode.
        #[arg(long)]
        dry_run: Option<bool>,

        /// Override the HTTP server port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Run a single scan pass and print the opportunities found.
    ScanOnce {
        /// Maximum number of opportunities to print.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List the built-in tokens.
    Tokens,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("base_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::ScanOnce { limit }) => cmd_scan_once(limit).await,
        Some(Command::Tokens) => cmd_tokens(),
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(None, None).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BASE ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    if let Err(e) = config.validate() {
        println!("FAILED");
        println!("  Error: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed"));
    }
    println!("OK");

    let endpoints = config.feed_endpoints().map_err(|e| anyhow::anyhow!(e))?;

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Min Profit: {}%", config.min_profit_pct);
    println!("  Max Capital: ${}", config.max_capital);
    println!("  Scan Interval: {}s", config.scan_interval_secs);
    println!(
        "  Slippage: {}% (bounds {}%..{}%)",
        config.default_slippage_pct, config.min_slippage_pct, config.max_slippage_pct
    );
    println!(
        "  Gas: {} units @ {} gwei ({})",
        config.gas_units_per_arbitrage, config.gas_price_gwei, config.gas_speed
    );
    if endpoints.is_empty() {
        println!("  Feeds: simulated");
    } else {
        for (id, url) in &endpoints {
            println!("  Feed: {} -> {}", id, url);
        }
    }
    println!("  Dry Run: {}", config.dry_run);
    println!(
        "  Executor: {}",
        if config.is_live() { "http" } else { "simulated" }
    );
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run one scan pass and print the result.
async fn cmd_scan_once(limit: usize) -> anyhow::Result<()> {
    let config = load_config()?;
    let service = ArbService::from_config(config)?;

    let snapshot = service.scan_now().await;

    println!("======================================================================");
    println!("BASE ARB - SCAN #{}", snapshot.version);
    println!("======================================================================");
    if let Some(err) = &snapshot.last_error {
        println!("SCAN FAILED: {}", err);
    }
    for err in &snapshot.feed_errors {
        println!("  dropped: {}", err);
    }

    let top = snapshot.top(Some(limit));
    if top.is_empty() {
        println!("No opportunities above threshold.");
    }
    for opp in &top {
        println!(
            "{:<6} buy {:<12} @ {:>12}  sell {:<12} @ {:>12}  profit ${:>10} ({}%)  gas ${}  [{}]",
            opp.token.symbol,
            opp.buy_exchange,
            opp.buy_price,
            opp.sell_exchange,
            opp.sell_price,
            opp.profit_absolute.round_dp(2),
            opp.profit_percentage.round_dp(3),
            opp.gas_estimate.round_dp(4),
            opp.confidence,
        );
    }
    println!("======================================================================");

    Ok(())
}

/// Print the built-in token list.
fn cmd_tokens() -> anyhow::Result<()> {
    let registry = TokenRegistry::with_defaults();
    for token in registry.all() {
        println!(
            "{:<6} {:<28} {:>2} decimals  {}",
            token.symbol,
            token.name,
            token.decimals,
            short_address(&token.address)
        );
    }
    Ok(())
}

/// Run the scan loop and the HTTP API until shutdown.
async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!(
        mode = if config.dry_run { "SIMULATION" } else { "LIVE" },
        min_profit_pct = %config.min_profit_pct,
        max_capital = %config.max_capital,
        scan_interval_secs = config.scan_interval_secs,
        "Configuration loaded"
    );

    let handle = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled");
            None
        }
    };

    let port = config.port;
    let service = Arc::new(ArbService::from_config(config)?);

    let mut state = AppState::new(Arc::clone(&service));
    if let Some(handle) = handle {
        state = state.with_metrics(handle);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(state);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    info!("Starting scan loop...");
    service.run(shutdown_signal()).await;

    let _ = stop_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }
    // The API may have accepted executions while the scheduler drained.
    service.wait_idle().await;

    let status = service.status();
    info!(
        scans = status.scan_version,
        executions = status.stats.attempts,
        realized_profit = %status.stats.realized_profit,
        "Shutdown complete"
    );
    Ok(())
}
