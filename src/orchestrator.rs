// =============================================================================
// Orchestrator — stream dispatch, decision tick, and the periodic loops
// =============================================================================
//
// Every scheduled loop here follows the same shape: a `tokio::time::interval`,
// an infinite `loop { tick().await; ... }`, snapshot-then-act so no lock is
// held across an `.await`. Six loops run:
//   - public stream worker + dispatch (candle/trade/orderbook ingestion)
//   - private stream worker + dispatch (order/asset notifications)
//   - per-instrument decision tick (~1 Hz)
//   - macro refresh (TrendAnalyzer + candle persistence, every 60s)
//   - market-list refresh (24h-value re-ranking, every 600s)
//   - BTC-reference check (every 60s)
//
// Trade-tick-arrival indicator recompute (RSI/volatility/fatigue) happens
// inline in the public-stream dispatch rather than in the decision tick, so
// the decision tick always reads an already-fresh `IndicatorsBlock`.
// MA15/MA50/disparity are M5-close-keyed and recompute on the M5 candle
// branch of the same dispatch function.
//
// Market-list refresh here only updates `AppState::active_markets` and logs
// the new ranking; picking up a newly-ranked instrument's live stream still
// requires a process restart, since the exchange-adapter contract has no
// live resubscribe message — see DESIGN.md.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app_state::{AppState, InstrumentRecord};
use crate::entry_policy;
use crate::exchange::{self, ExchangeRest, OrderKind, StreamUpdate};
use crate::indicators::fatigue::calculate_fatigue;
use crate::indicators::moving_average::{disparity, simple_moving_average};
use crate::indicators::rsi::calculate_rsi;
use crate::indicators::volatility::calculate_volatility;
use crate::momentum;
use crate::mtf;
use crate::persistence::{self, TradeLogRow};
use crate::position_manager::{self, Position};
use crate::sentiment::SentimentEngine;
use crate::trend;
use crate::types::{Instrument, OrderSide, Timeframe, Trend};

/// Reference instrument for the BTC downtrend gate.
const BTC_REFERENCE_INSTRUMENT: &str = "BTC-USDT";

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

// -----------------------------------------------------------------------------
// Indicator refresh
// -----------------------------------------------------------------------------

/// Recompute RSI/volatility/fatigue/momentum_exhaustion and the windowed
/// bid/ask volumes. Called on every trade-tick arrival.
fn refresh_tick_indicators(record: &InstrumentRecord) {
    let prices = record.ticks.last_n_prices(60);
    let rsi = calculate_rsi(&prices).unwrap_or(50.0);
    let volatility = calculate_volatility(&prices);

    let windows = record.ticks.windows();
    let total_1m = windows.bid_volume_1m + windows.ask_volume_1m;
    let ask_ratio = if total_1m > 0.0 { windows.ask_volume_1m / total_1m } else { 0.5 };

    let last_two_m1 = record.candles.get_candles(Timeframe::M1, 2);
    let (previous_minute_volume, last_minute_volume) = match last_two_m1.as_slice() {
        [a, b] => (a.volume, b.volume),
        _ => (0.0, 0.0),
    };

    let m5_closes = record.candles.get_closes(Timeframe::M5, 2);
    let delta_5m = match m5_closes.as_slice() {
        [a, b] if a.abs() > f64::EPSILON => (b - a) / a,
        _ => 0.0,
    };

    let fatigue_result = calculate_fatigue(delta_5m, rsi, last_minute_volume, previous_minute_volume, ask_ratio);

    let mut indicators = record.indicators.write();
    indicators.rsi = rsi;
    indicators.volatility = volatility;
    indicators.fatigue = fatigue_result.fatigue;
    indicators.momentum_exhaustion = fatigue_result.momentum_exhaustion;
    indicators.bid_volume_1m = windows.bid_volume_1m;
    indicators.ask_volume_1m = windows.ask_volume_1m;
    indicators.bid_volume_5m = windows.bid_volume_5m;
    indicators.ask_volume_5m = windows.ask_volume_5m;
}

/// Recompute MA15/MA50/disparity. Called when an M5 candle closes.
fn refresh_candle_indicators(record: &InstrumentRecord, current_price: f64) {
    let m5_closes = record.candles.get_closes(Timeframe::M5, 60);
    let ma15 = simple_moving_average(&m5_closes, 15);
    let ma50 = simple_moving_average(&m5_closes, 50);

    let mut indicators = record.indicators.write();
    if let Some(ma) = ma15 {
        indicators.ma15 = ma;
    }
    if let Some(ma) = ma50 {
        indicators.ma50 = ma;
    }
    indicators.disparity = ma15.and_then(|ma| disparity(current_price, ma)).unwrap_or(0.0);
}

// -----------------------------------------------------------------------------
// Stream dispatch
// -----------------------------------------------------------------------------

fn handle_public_update(state: &AppState, cache_dir: &std::path::Path, update: StreamUpdate) {
    match update {
        StreamUpdate::Ticker { .. } => {
            // Price already tracked via trade ticks / candle closes.
        }
        StreamUpdate::Trade { instrument, price, volume, side, timestamp_ms } => {
            let record = state.instrument(&instrument);
            record.ticks.push_tick(timestamp_ms, price, volume, side);
            refresh_tick_indicators(&record);
        }
        StreamUpdate::Orderbook { instrument, units } => {
            state.orderbook.update(&instrument, units);
        }
        StreamUpdate::Candle { instrument, tf, candle, is_closed } => {
            let record = state.instrument(&instrument);
            record.candles.apply_live(tf, candle);
            if is_closed {
                record.candles.append_live(tf, &instrument, &candle, cache_dir);
                if tf == Timeframe::M5 {
                    refresh_candle_indicators(&record, candle.close);
                }
            }
        }
        StreamUpdate::MyOrder { .. } | StreamUpdate::MyAsset => {
            // Private-channel variants never arrive on the public stream.
        }
    }
}

fn handle_private_update(update: StreamUpdate) {
    match update {
        StreamUpdate::MyOrder { uuid, state } => {
            info!(uuid, state, "order state update from private stream");
        }
        StreamUpdate::MyAsset => {
            debug!("asset balances changed");
        }
        _ => {}
    }
}

/// Spawn the public stream worker plus its dispatch task.
pub fn spawn_public_stream(state: Arc<AppState>, instruments: Vec<Instrument>, cache_dir: PathBuf) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = exchange::run_public_stream(&instruments, tx).await {
            error!(error = %e, "public stream worker exited");
        }
    });

    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            handle_public_update(&state, &cache_dir, update);
        }
    });
}

/// Spawn the private stream worker plus its dispatch task.
pub fn spawn_private_stream<F>(token_provider: F)
where
    F: Fn() -> String + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = exchange::run_private_stream(token_provider, tx).await {
            error!(error = %e, "private stream worker exited");
        }
    });

    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            handle_private_update(update);
        }
    });
}

// -----------------------------------------------------------------------------
// Per-instrument decision tick
// -----------------------------------------------------------------------------

/// In `dry_run` mode, buy/sell orders are never sent to `rest` — the
/// position is opened/closed directly at the current tape price, and only
/// the logging/accounting side effects run.
async fn decision_tick<R: ExchangeRest>(instrument: &str, record: &Arc<InstrumentRecord>, state: &AppState, rest: &R, log_dir: &std::path::Path, now: i64) {
    let current_price = record.ticks.last_price().or_else(|| record.candles.last(Timeframe::M1).map(|c| c.close));
    let Some(price) = current_price else {
        return;
    };

    let (held, exit) = {
        let mut guard = record.position.lock();
        match guard.as_mut() {
            Some(position) => (true, position.on_tick(price, now, &state.config).map(|reason| (position.clone(), reason))),
            None => (false, None),
        }
    };

    if let Some((position, reason)) = exit {
        let sell_result = if state.config.dry_run {
            Ok(price)
        } else {
            match rest.place_order(&instrument.to_string(), OrderSide::Sell, OrderKind::Market, Some(position.volume), None).await {
                Ok(order) => Ok(order.price.unwrap_or(price)),
                Err(e) => Err(e),
            }
        };

        match sell_result {
            Ok(sell_price) => {
                let outcome = position_manager::close(&position, sell_price, reason, &state.config);
                state.global.record_trade(outcome.profit);
                {
                    let mut instrument_state = record.state.lock();
                    if outcome.profit < 0.0 {
                        instrument_state.record_loss(now, sell_price);
                    } else {
                        instrument_state.record_profit(sell_price);
                    }
                }
                *record.position.lock() = None;
                persistence::append_trade_log(
                    log_dir,
                    &TradeLogRow {
                        timestamp: now,
                        market: instrument.to_string(),
                        kind: "SELL",
                        price: sell_price,
                        trade_value: position.volume * sell_price,
                        volume: position.volume,
                        profit: outcome.profit,
                        profit_rate: if position.quote_amount > 0.0 { outcome.profit / position.quote_amount } else { 0.0 },
                        cumulative_profit: state.global.cumulative_profit(),
                        reason: reason.to_string(),
                    },
                );
            }
            Err(e) => {
                warn!(instrument, error = %e, "sell order failed, retrying next tick");
            }
        }
        return;
    }

    // Still holding a position that didn't exit this tick — no new entry
    // evaluation for this instrument until it's flat again.
    if held || !state.global.is_market_safe() {
        return;
    }

    let m1_closes = record.candles.get_closes(Timeframe::M1, 60);
    let m5_closes = record.candles.get_closes(Timeframe::M5, 600);
    let m15_closes = record.candles.get_closes(Timeframe::M15, 60);
    let indicators = *record.indicators.read();

    let trend = record
        .trend
        .read()
        .clone()
        .unwrap_or_else(|| trend::analyze(instrument, &m1_closes, &m5_closes, &m15_closes, price, indicators.bid_ratio_1m(), indicators.fatigue, &state.config));

    let mtf_result = mtf::evaluate(instrument, trend.trend, &record.candles.get_candles(Timeframe::M5, 30), &record.candles.get_candles(Timeframe::M15, 15), &state.config);

    let book = state.orderbook.get(instrument);
    let orderbook_imbalance = book.as_ref().map(|b| b.imbalance).unwrap_or(0.0);
    let bid_ask_size_ratio = book.as_ref().and_then(|b| if b.total_ask_size > 0.0 { Some(b.total_bid_size / b.total_ask_size) } else { None }).unwrap_or(1.0);

    let momentum_result = momentum::detect(
        instrument,
        &record.candles.get_candles(Timeframe::M1, 25),
        &record.candles.get_candles(Timeframe::S1, 20),
        &record.candles.get_candles(Timeframe::M5, 5),
        bid_ask_size_ratio,
        orderbook_imbalance,
        indicators.bid_ratio_5m(),
        &mtf_result,
        &state.config,
    );

    let sentiment = SentimentEngine::evaluate(indicators.bid_ratio_1m(), orderbook_imbalance, indicators.rsi, indicators.fatigue, indicators.momentum_exhaustion, indicators.volatility);

    let verdict = {
        let instrument_state = record.state.lock();
        entry_policy::evaluate(
            instrument,
            &instrument_state,
            now,
            price,
            &trend,
            &sentiment,
            indicators.rsi,
            indicators.fatigue,
            &momentum_result,
            indicators.momentum_exhaustion,
            &state.config,
        )
    };

    state.decisions.record(instrument, now, verdict.as_deref());

    let Some(reason) = verdict else {
        let quote_amount = state.config.max_investment;
        let buy_result = if state.config.dry_run {
            Ok(price)
        } else {
            match rest.place_order(&instrument.to_string(), OrderSide::Buy, OrderKind::Price, None, Some(quote_amount)).await {
                Ok(order) => Ok(order.price.unwrap_or(price)),
                Err(e) => Err(e),
            }
        };

        match buy_result {
            Ok(fill_price) => {
                let volume = if fill_price > 0.0 { quote_amount / fill_price } else { 0.0 };
                let position = Position::open(fill_price, now, volume, quote_amount, Some(indicators.volatility), &state.config);
                *record.position.lock() = Some(position);
                record.state.lock().record_trade_opened(now);
                persistence::append_trade_log(
                    log_dir,
                    &TradeLogRow {
                        timestamp: now,
                        market: instrument.to_string(),
                        kind: "BUY",
                        price: fill_price,
                        trade_value: quote_amount,
                        volume,
                        profit: 0.0,
                        profit_rate: 0.0,
                        cumulative_profit: state.global.cumulative_profit(),
                        reason: "entry approved".to_string(),
                    },
                );
            }
            Err(e) => warn!(instrument, error = %e, "buy order failed"),
        }
        return;
    };

    debug!(instrument, reason, "entry blocked this tick");
}

/// ~1 Hz loop: advance every open position and evaluate entries for flat
/// instruments.
pub async fn run_decision_loop<R: ExchangeRest + Send + Sync + 'static>(state: Arc<AppState>, rest: Arc<R>, log_dir: PathBuf) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let now = now_secs();
        for instrument in state.instrument_list() {
            let record = state.instrument(&instrument);
            decision_tick(&instrument, &record, &state, rest.as_ref(), &log_dir, now).await;
        }
    }
}

// -----------------------------------------------------------------------------
// Macro refresh (TrendAnalyzer + candle persistence)
// -----------------------------------------------------------------------------

const PERSISTED_TIMEFRAMES: [Timeframe; 7] =
    [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1, Timeframe::H4, Timeframe::D1];

pub async fn run_macro_refresh_loop(state: Arc<AppState>, cache_dir: PathBuf) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.macro_update_interval_secs));
    loop {
        ticker.tick().await;
        for instrument in state.instrument_list() {
            let record = state.instrument(&instrument);
            let Some(price) = record.ticks.last_price().or_else(|| record.candles.last(Timeframe::M1).map(|c| c.close)) else {
                continue;
            };

            let m1_closes = record.candles.get_closes(Timeframe::M1, 60);
            let m5_closes = record.candles.get_closes(Timeframe::M5, 600);
            let m15_closes = record.candles.get_closes(Timeframe::M15, 60);
            let indicators = *record.indicators.read();

            let trend = trend::analyze(&instrument, &m1_closes, &m5_closes, &m15_closes, price, indicators.bid_ratio_1m(), indicators.fatigue, &state.config);
            *record.trend.write() = Some(trend);

            for tf in PERSISTED_TIMEFRAMES {
                record.candles.persist(tf, &instrument, &cache_dir);
            }
        }
        debug!(instruments = state.instrument_list().len(), "macro refresh complete");
    }
}

// -----------------------------------------------------------------------------
// Market-list refresh
// -----------------------------------------------------------------------------

pub async fn run_market_refresh_loop<R: ExchangeRest + Send + Sync + 'static>(state: Arc<AppState>, rest: Arc<R>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.market_update_interval_secs));
    loop {
        ticker.tick().await;

        let all_markets = match rest.all_markets().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "market refresh: all_markets failed");
                continue;
            }
        };
        let mut tickers = match rest.ticker(&all_markets).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "market refresh: ticker fetch failed");
                continue;
            }
        };

        tickers.sort_by(|a, b| b.accumulated_trade_value_24h.partial_cmp(&a.accumulated_trade_value_24h).unwrap_or(std::cmp::Ordering::Equal));

        let mut ranked: Vec<Instrument> = tickers.into_iter().take(state.config.top_market_count as usize).map(|t| t.instrument).collect();

        for held in state.held_instruments() {
            if !ranked.contains(&held) {
                ranked.push(held);
            }
        }

        info!(count = ranked.len(), "market list refreshed");
        *state.active_markets.write() = ranked;
    }
}

// -----------------------------------------------------------------------------
// BTC-reference check
// -----------------------------------------------------------------------------

pub async fn run_btc_check_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.btc_check_interval_secs));
    loop {
        ticker.tick().await;

        let record = state.instrument(BTC_REFERENCE_INSTRUMENT);
        let closes = record.candles.get_closes(Timeframe::H1, 2);
        let change = match closes.as_slice() {
            [a, b] if a.abs() > f64::EPSILON => (b - a) / a,
            _ => 0.0,
        };

        let btc_trend = if change <= state.config.btc_trend_threshold {
            Trend::Bearish
        } else if change >= state.config.btc_bullish_threshold {
            Trend::Bullish
        } else {
            Trend::Neutral
        };

        *state.global.btc_trend.write() = btc_trend;

        let safe = !(btc_trend == Trend::Bearish && state.config.btc_downtrend_buy_block);
        state.global.set_market_safe(safe);

        debug!(change = format!("{:.4}", change), trend = %btc_trend, market_safe = safe, "btc reference check");
    }
}
