// =============================================================================
// Momentum Engine — Main Entry Point
// =============================================================================
//
// Boots the engine in whatever mode `DRY_RUN` selects (default: on). The
// dry-run/live switch lives entirely in `Config` — there is no separate
// paused/demo toggle to flip at runtime; an operator wanting live trading
// sets `DRY_RUN=false` in the environment before starting the process.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod config;
mod decision_log;
mod entry_policy;
mod exchange;
mod indicators;
mod market_data;
mod momentum;
mod mtf;
mod orchestrator;
mod persistence;
mod position_manager;
mod sentiment;
mod trend;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;
use crate::exchange::{ExchangeRest, RestClient};
use crate::types::Timeframe;

const CANDLE_TIMEFRAMES: [(Timeframe, u32); 7] = [
    (Timeframe::M1, 200),
    (Timeframe::M5, 200),
    (Timeframe::M15, 200),
    (Timeframe::M30, 100),
    (Timeframe::H1, 100),
    (Timeframe::H4, 100),
    (Timeframe::D1, 30),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("momentum engine starting up");

    let config = Config::from_env();
    if config.dry_run {
        info!("DRY_RUN active — orders are logged, not placed against the live account");
    }

    let cache_dir = std::env::var("CACHE_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./cache"));
    let log_dir = std::env::var("LOG_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./logs"));
    std::fs::create_dir_all(&cache_dir).ok();
    std::fs::create_dir_all(&log_dir).ok();

    let api_key = std::env::var("EXCHANGE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("EXCHANGE_API_SECRET").unwrap_or_default();
    let rest = Arc::new(RestClient::new(api_key, api_secret));

    let state = Arc::new(AppState::new(config));

    // Seed the tracked instrument list: explicit `MARKET` env override, or
    // auto-discovered top markets if none was given.
    let initial_markets = if state.config.markets.is_empty() {
        match rest.all_markets().await {
            Ok(markets) => match rest.ticker(&markets).await {
                Ok(mut tickers) => {
                    tickers.sort_by(|a, b| {
                        b.accumulated_trade_value_24h
                            .partial_cmp(&a.accumulated_trade_value_24h)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    tickers
                        .into_iter()
                        .take(state.config.top_market_count as usize)
                        .map(|t| t.instrument)
                        .collect::<Vec<_>>()
                }
                Err(e) => {
                    warn!(error = %e, "initial ticker fetch failed, falling back to configured markets");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "initial market discovery failed, falling back to configured markets");
                Vec::new()
            }
        }
    } else {
        state.config.markets.clone()
    };
    *state.active_markets.write() = initial_markets.clone();
    info!(count = initial_markets.len(), markets = ?initial_markets, "tracked instruments");

    // Seed candle rings before the decision loop and stream dispatch start
    // touching them: smart_init backfills from cache/REST, never leaving a
    // ring empty at startup if history is available.
    for instrument in &initial_markets {
        let record = state.instrument(instrument);
        for (tf, count) in CANDLE_TIMEFRAMES {
            record.candles.smart_init(tf, count, instrument, rest.as_ref(), &cache_dir).await;
        }
    }
    info!("candle rings seeded");

    orchestrator::spawn_public_stream(state.clone(), initial_markets, cache_dir.clone());

    let private_key = std::env::var("EXCHANGE_API_KEY").unwrap_or_default();
    let private_secret = std::env::var("EXCHANGE_API_SECRET").unwrap_or_default();
    orchestrator::spawn_private_stream(move || sign_private_token(&private_key, &private_secret));

    tokio::spawn(orchestrator::run_decision_loop(state.clone(), rest.clone(), log_dir));
    tokio::spawn(orchestrator::run_macro_refresh_loop(state.clone(), cache_dir));
    tokio::spawn(orchestrator::run_market_refresh_loop(state.clone(), rest.clone()));
    tokio::spawn(orchestrator::run_btc_check_loop(state.clone()));

    info!("all subsystems running — press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    info!("momentum engine shut down complete");
    Ok(())
}

/// Mint the authentication token the private WebSocket channel expects,
/// regenerated on every reconnect: short-lived, per-connection.
fn sign_private_token(api_key: &str, api_secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let nonce = uuid::Uuid::new_v4().to_string();
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(api_secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(nonce.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("{api_key}.{nonce}.{signature}")
}
