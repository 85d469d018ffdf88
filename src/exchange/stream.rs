// =============================================================================
// WebSocket ingress — field-aliasing normalization + public/private workers
// =============================================================================
//
// The exchange sends message envelopes as `{type|ty, code|cd, ...payload}`
// with both short-form and long-form field names depending on stream and
// exchange version. `normalize` is the single place that resolves this
// aliasing; everything downstream of it consumes only `StreamUpdate`, a
// tagged-variant type that carries no knowledge of the wire format.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::types::{Instrument, OrderBookUnit, Side, Timeframe};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(10);

/// Normalized stream update. Downstream consumers (CandleStore,
/// TickAggregator, OrderBookManager, the order/asset reconciler) match on
/// this and never see a raw JSON envelope.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Ticker {
        instrument: Instrument,
        trade_price: f64,
    },
    Trade {
        instrument: Instrument,
        price: f64,
        volume: f64,
        side: Side,
        timestamp_ms: i64,
    },
    Orderbook {
        instrument: Instrument,
        units: Vec<OrderBookUnit>,
    },
    Candle {
        instrument: Instrument,
        tf: Timeframe,
        candle: crate::types::Candle,
        is_closed: bool,
    },
    /// Private channel: an order placed by this account changed state.
    MyOrder { uuid: String, state: String },
    /// Private channel: account asset balances changed.
    MyAsset,
}

fn field<'a>(v: &'a Value, short: &str, long: &str) -> Option<&'a Value> {
    v.get(short).or_else(|| v.get(long))
}

fn as_str_field<'a>(v: &'a Value, short: &str, long: &str) -> Option<&'a str> {
    field(v, short, long).and_then(|x| x.as_str())
}

fn parse_f64(v: &Value, short: &str, long: &str) -> Option<f64> {
    let x = field(v, short, long)?;
    x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok()))
}

fn parse_i64(v: &Value, short: &str, long: &str) -> Option<i64> {
    let x = field(v, short, long)?;
    x.as_i64().or_else(|| x.as_str().and_then(|s| s.parse().ok()))
}

/// Normalize one raw WS text frame into a `StreamUpdate`. Returns `Ok(None)`
/// for message types the engine doesn't act on (subscription acks, pongs).
pub fn normalize(text: &str) -> Result<Option<StreamUpdate>> {
    let root: Value = serde_json::from_str(text).context("failed to parse WS envelope")?;

    let ty = as_str_field(&root, "ty", "type").unwrap_or_default();
    let instrument = as_str_field(&root, "cd", "code")
        .map(str::to_string)
        .unwrap_or_default();

    let update = match ty {
        "ticker" => {
            let trade_price = parse_f64(&root, "tp", "trade_price").unwrap_or(0.0);
            Some(StreamUpdate::Ticker {
                instrument,
                trade_price,
            })
        }
        "trade" => {
            let price = parse_f64(&root, "tp", "trade_price").unwrap_or(0.0);
            let volume = parse_f64(&root, "tv", "trade_volume").unwrap_or(0.0);
            let is_ask = as_str_field(&root, "ab", "ask_bid")
                .map(|s| s.eq_ignore_ascii_case("ask"))
                .unwrap_or(false);
            let side = if is_ask { Side::Ask } else { Side::Bid };
            let timestamp_ms = parse_i64(&root, "ttms", "trade_timestamp").unwrap_or(0);
            Some(StreamUpdate::Trade {
                instrument,
                price,
                volume,
                side,
                timestamp_ms,
            })
        }
        "orderbook" => {
            let units = parse_orderbook_units(&root)?;
            Some(StreamUpdate::Orderbook { instrument, units })
        }
        t if t.starts_with("candle") => {
            let interval = t.strip_prefix("candle.").unwrap_or("1m");
            let tf = Timeframe::from_wire_code(interval).unwrap_or(Timeframe::M1);
            let candle = crate::types::Candle {
                open_time: parse_i64(&root, "ot", "open_time").unwrap_or(0),
                open: parse_f64(&root, "op", "opening_price").unwrap_or(0.0),
                high: parse_f64(&root, "hp", "high_price").unwrap_or(0.0),
                low: parse_f64(&root, "lp", "low_price").unwrap_or(0.0),
                close: parse_f64(&root, "tp", "trade_price").unwrap_or(0.0),
                volume: parse_f64(&root, "cav", "candle_acc_trade_volume").unwrap_or(0.0),
            };
            let is_closed = field(&root, "st", "stream_type")
                .and_then(|v| v.as_str())
                .map(|s| s.eq_ignore_ascii_case("snapshot"))
                .unwrap_or(true);
            Some(StreamUpdate::Candle {
                instrument,
                tf,
                candle,
                is_closed,
            })
        }
        "myOrder" => {
            let uuid = as_str_field(&root, "oid", "uuid").unwrap_or_default().to_string();
            let state = as_str_field(&root, "s", "state").unwrap_or("wait").to_string();
            Some(StreamUpdate::MyOrder { uuid, state })
        }
        "myAsset" => Some(StreamUpdate::MyAsset),
        _ => None,
    };

    Ok(update)
}

fn parse_orderbook_units(root: &Value) -> Result<Vec<OrderBookUnit>> {
    let units_raw = field(root, "obu", "orderbook_units")
        .and_then(|v| v.as_array())
        .context("missing orderbook_units")?;

    let mut units = Vec::with_capacity(units_raw.len());
    for u in units_raw {
        units.push(OrderBookUnit {
            ask_price: parse_f64(u, "ap", "ask_price").unwrap_or(0.0),
            bid_price: parse_f64(u, "bp", "bid_price").unwrap_or(0.0),
            ask_size: parse_f64(u, "as", "ask_size").unwrap_or(0.0),
            bid_size: parse_f64(u, "bs", "bid_size").unwrap_or(0.0),
        });
    }
    Ok(units)
}

/// Run the public market-data WebSocket: ticker/trade/orderbook/candle for
/// every instrument in `instruments`. Normalized updates are forwarded to
/// `tx`; reconnects with exponential backoff bounded at `RECONNECT_MAX` on
/// any disconnect or read timeout, and never returns except on a cancelled
/// `tx` receiver (caller dropped).
pub async fn run_public_stream(
    instruments: &[Instrument],
    tx: mpsc::UnboundedSender<StreamUpdate>,
) -> Result<()> {
    let mut backoff = RECONNECT_BASE;
    loop {
        match run_public_once(instruments, &tx).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(error = %e, backoff_ms = backoff.as_millis(), "public stream disconnected, reconnecting");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }
    }
}

async fn run_public_once(
    instruments: &[Instrument],
    tx: &mpsc::UnboundedSender<StreamUpdate>,
) -> Result<()> {
    let url = "wss://stream.example-exchange.com/ws/public";
    info!(url, instruments = ?instruments, "connecting public WebSocket");
    let (ws_stream, _resp) = connect_async(url).await.context("public WS connect failed")?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({
        "type": "subscribe",
        "channels": ["ticker", "trade", "orderbook"],
        "codes": instruments,
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to send public subscription")?;

    loop {
        let next = tokio::time::timeout(READ_TIMEOUT, read.next()).await;
        match next {
            Ok(Some(Ok(Message::Text(text)))) => match normalize(&text) {
                Ok(Some(update)) => {
                    if tx.send(update).is_err() {
                        return Ok(()); // receiver gone, cooperative shutdown
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to normalize public WS frame"),
            },
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                error!(error = %e, "public WS read error");
                return Err(e.into());
            }
            Ok(None) => {
                warn!("public WS stream ended");
                return Err(anyhow::anyhow!("public WS stream ended"));
            }
            Err(_) => {
                // read timeout — send a keepalive ping and keep the connection.
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return Err(anyhow::anyhow!("public WS ping failed after read timeout"));
                }
            }
        }
    }
}

/// Run the private account WebSocket (`myOrder`/`myAsset`), authenticated
/// with a bearer token produced by `token_provider`. On disconnect the token
/// is regenerated before reconnecting.
pub async fn run_private_stream<F>(
    token_provider: F,
    tx: mpsc::UnboundedSender<StreamUpdate>,
) -> Result<()>
where
    F: Fn() -> String,
{
    let mut backoff = RECONNECT_BASE;
    loop {
        let token = token_provider();
        match run_private_once(&token, &tx).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(error = %e, backoff_ms = backoff.as_millis(), "private stream disconnected, reconnecting");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }
    }
}

async fn run_private_once(token: &str, tx: &mpsc::UnboundedSender<StreamUpdate>) -> Result<()> {
    let url = "wss://stream.example-exchange.com/ws/private";
    info!(url, "connecting private WebSocket");
    let (ws_stream, _resp) = connect_async(url).await.context("private WS connect failed")?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({
        "type": "subscribe",
        "channels": ["myOrder", "myAsset"],
        "token": token,
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to send private subscription")?;

    loop {
        let next = tokio::time::timeout(READ_TIMEOUT, read.next()).await;
        match next {
            Ok(Some(Ok(Message::Text(text)))) => match normalize(&text) {
                Ok(Some(update)) => {
                    if tx.send(update).is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to normalize private WS frame"),
            },
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                error!(error = %e, "private WS read error");
                return Err(e.into());
            }
            Ok(None) => {
                warn!("private WS stream ended");
                return Err(anyhow::anyhow!("private WS stream ended"));
            }
            Err(_) => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return Err(anyhow::anyhow!("private WS ping failed after read timeout"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_short_form_trade() {
        let text = r#"{"ty":"trade","cd":"BTCUSDT","tp":100.5,"tv":1.2,"ab":"ASK","ttms":1700000000000}"#;
        let update = normalize(text).unwrap().unwrap();
        match update {
            StreamUpdate::Trade { instrument, price, volume, side, timestamp_ms } => {
                assert_eq!(instrument, "BTCUSDT");
                assert_eq!(price, 100.5);
                assert_eq!(volume, 1.2);
                assert_eq!(side, Side::Ask);
                assert_eq!(timestamp_ms, 1700000000000);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn normalizes_long_form_trade_identically() {
        let text = r#"{"type":"trade","code":"BTCUSDT","trade_price":100.5,"trade_volume":1.2,"ask_bid":"ASK","trade_timestamp":1700000000000}"#;
        let update = normalize(text).unwrap().unwrap();
        match update {
            StreamUpdate::Trade { price, volume, side, .. } => {
                assert_eq!(price, 100.5);
                assert_eq!(volume, 1.2);
                assert_eq!(side, Side::Ask);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn normalizes_ticker() {
        let text = r#"{"ty":"ticker","cd":"ETHUSDT","tp":3000.0}"#;
        let update = normalize(text).unwrap().unwrap();
        match update {
            StreamUpdate::Ticker { instrument, trade_price } => {
                assert_eq!(instrument, "ETHUSDT");
                assert_eq!(trade_price, 3000.0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn normalizes_candle_topic_to_timeframe() {
        let text = r#"{"ty":"candle.5m","cd":"BTCUSDT","ot":0,"op":99.0,"hp":101.0,"lp":98.0,"tp":100.0,"cav":10.0,"st":"snapshot"}"#;
        let update = normalize(text).unwrap().unwrap();
        match update {
            StreamUpdate::Candle { tf, candle, is_closed, .. } => {
                assert_eq!(tf, Timeframe::M5);
                assert_eq!(candle.close, 100.0);
                assert!(is_closed);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_normalizes_to_none() {
        let text = r#"{"ty":"subscribed"}"#;
        assert!(normalize(text).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(normalize("not json").is_err());
    }
}
