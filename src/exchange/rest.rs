// =============================================================================
// Exchange REST adapter — HMAC-SHA256 signed requests
// =============================================================================
//
// `ExchangeRest` is the collaborator interface the core assumes;
// `RestClient` is a reference adapter targeting a generic spot-exchange wire
// shape (numeric fields as JSON strings, descending-by-time kline arrays).
// It is explicitly swappable behind the trait — a different exchange only
// needs a new `impl ExchangeRest`.
//
// SECURITY: the secret key is never logged or serialized; signed requests
// carry `X-MBX-APIKEY` as a header and a recvWindow to tolerate clock drift.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::exchange::rate_limit::RateLimitTracker;
use crate::types::{BalanceInfo, Candle, Instrument, OrderSide, Timeframe};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;
/// Bounded retry count for transient HTTP 429 responses.
const MAX_RETRIES: u32 = 4;

/// Order type accepted by `ExchangeRest::place_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    /// Market buy, quote-amount denominated.
    Price,
    /// Market sell, base-volume denominated.
    Market,
    /// Resting limit order.
    Limit,
}

/// Lifecycle state of a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Wait,
    Done,
    Cancel,
}

/// Normalized order acknowledgement / query response.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub uuid: String,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub executed_volume: f64,
    pub state: OrderState,
}

/// Ticker snapshot used by market-list ranking.
#[derive(Debug, Clone)]
pub struct TickerInfo {
    pub instrument: Instrument,
    pub trade_price: f64,
    pub accumulated_trade_value_24h: f64,
}

/// The exchange REST surface the core depends on. One concrete adapter
/// (`RestClient`) is provided; others can be swapped in behind this trait.
pub trait ExchangeRest {
    async fn accounts(&self) -> Result<Vec<BalanceInfo>>;
    async fn ticker(&self, instruments: &[Instrument]) -> Result<Vec<TickerInfo>>;
    /// Returns candles newest-first, per the collaborator contract.
    async fn candles(
        &self,
        tf: Timeframe,
        instrument: &Instrument,
        count: u32,
        before: Option<i64>,
    ) -> Result<Vec<Candle>>;
    async fn orderbook(&self, instrument: &Instrument) -> Result<crate::types::OrderBookUnit>;
    async fn place_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        kind: OrderKind,
        volume: Option<f64>,
        price: Option<f64>,
    ) -> Result<OrderResult>;
    async fn cancel(&self, uuid: &str) -> Result<()>;
    async fn order(&self, uuid: &str) -> Result<OrderResult>;
    async fn closed_orders(&self, instrument: &Instrument) -> Result<Vec<OrderResult>>;
    async fn all_markets(&self) -> Result<Vec<Instrument>>;
}

/// Reference REST adapter: HMAC-signed spot exchange client.
pub struct RestClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: RateLimitTracker,
}

impl RestClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: "https://api.example-exchange.com".to_string(),
            client,
            rate_limit: RateLimitTracker::new(),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Send a GET request, retrying on HTTP 429 with exponential backoff
    /// bounded at `MAX_RETRIES` attempts.
    async fn get_with_retry(&self, url: &str) -> Result<serde_json::Value> {
        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .context("GET request failed")?;

            self.rate_limit.update_from_headers(resp.headers());
            let status = resp.status();

            if status.as_u16() == 429 && attempt < MAX_RETRIES {
                attempt += 1;
                let backoff_ms = 200u64 * 2u64.pow(attempt);
                warn!(attempt, backoff_ms, url, "rate-limited, backing off");
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                continue;
            }

            let body: serde_json::Value = resp
                .json()
                .await
                .context("failed to parse JSON response")?;

            if !status.is_success() {
                anyhow::bail!("GET {} returned {}: {}", url, status, body);
            }
            return Ok(body);
        }
    }

    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl ExchangeRest for RestClient {
    #[instrument(skip(self), name = "rest::accounts")]
    async fn accounts(&self) -> Result<Vec<BalanceInfo>> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);
        let body = self.get_with_retry(&url).await?;

        let balances = body["balances"]
            .as_array()
            .context("account response missing 'balances' array")?;

        let mut out = Vec::with_capacity(balances.len());
        for b in balances {
            let asset = b["asset"].as_str().unwrap_or_default().to_string();
            let free = Self::parse_str_f64(&b["free"]).unwrap_or(0.0);
            let locked = Self::parse_str_f64(&b["locked"]).unwrap_or(0.0);
            out.push(BalanceInfo {
                asset,
                free,
                locked,
            });
        }
        debug!(count = out.len(), "accounts retrieved");
        Ok(out)
    }

    #[instrument(skip(self), name = "rest::ticker")]
    async fn ticker(&self, instruments: &[Instrument]) -> Result<Vec<TickerInfo>> {
        let symbols = instruments.join(",");
        let url = format!("{}/api/v3/ticker/24hr?symbols=[{}]", self.base_url, symbols);
        let body = self.get_with_retry(&url).await?;

        let raw = body.as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let instrument = entry["symbol"].as_str().unwrap_or_default().to_string();
            let trade_price = Self::parse_str_f64(&entry["lastPrice"]).unwrap_or(0.0);
            let accumulated = Self::parse_str_f64(&entry["quoteVolume"]).unwrap_or(0.0);
            out.push(TickerInfo {
                instrument,
                trade_price,
                accumulated_trade_value_24h: accumulated,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), name = "rest::candles")]
    async fn candles(
        &self,
        tf: Timeframe,
        instrument: &Instrument,
        count: u32,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            instrument,
            tf.wire_code(),
            count
        );
        if let Some(ts) = before {
            url.push_str(&format!("&endTime={ts}"));
        }

        let body = self.get_with_retry(&url).await?;
        let raw = body.as_array().context("klines response is not an array")?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 6 {
                warn!(len = arr.len(), "skipping malformed kline entry");
                continue;
            }
            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1])?;
            let high = Self::parse_str_f64(&arr[2])?;
            let low = Self::parse_str_f64(&arr[3])?;
            let close = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])?;
            candles.push(Candle {
                open_time,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        // The collaborator contract returns candles descending by time.
        candles.sort_by(|a, b| b.open_time.cmp(&a.open_time));
        debug!(instrument, tf = %tf, count = candles.len(), "candles fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "rest::orderbook")]
    async fn orderbook(&self, instrument: &Instrument) -> Result<crate::types::OrderBookUnit> {
        let url = format!("{}/api/v3/depth?symbol={}&limit=5", self.base_url, instrument);
        let body = self.get_with_retry(&url).await?;

        let bids = body["bids"].as_array().cloned().unwrap_or_default();
        let asks = body["asks"].as_array().cloned().unwrap_or_default();

        let bid_price = bids.first().and_then(|b| b.get(0)).map(Self::parse_str_f64).transpose()?.unwrap_or(0.0);
        let bid_size = bids.first().and_then(|b| b.get(1)).map(Self::parse_str_f64).transpose()?.unwrap_or(0.0);
        let ask_price = asks.first().and_then(|a| a.get(0)).map(Self::parse_str_f64).transpose()?.unwrap_or(0.0);
        let ask_size = asks.first().and_then(|a| a.get(1)).map(Self::parse_str_f64).transpose()?.unwrap_or(0.0);

        Ok(crate::types::OrderBookUnit {
            ask_price,
            bid_price,
            ask_size,
            bid_size,
        })
    }

    #[instrument(skip(self, price), name = "rest::place_order")]
    async fn place_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        kind: OrderKind,
        volume: Option<f64>,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        if !self.rate_limit.can_place_order() {
            anyhow::bail!("order blocked locally by rate-limit tracker");
        }

        let order_type = match kind {
            OrderKind::Price => "MARKET",
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
        };

        let mut params = format!("symbol={instrument}&side={}&type={order_type}", side);
        if let Some(v) = volume {
            params.push_str(&format!("&quantity={v}"));
        }
        if let Some(p) = price {
            params.push_str(&format!("&price={p}&timeInForce=GTC"));
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST order request failed")?;

        self.rate_limit.record_order_sent();
        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse order response")?;
        if !status.is_success() {
            anyhow::bail!("POST order returned {}: {}", status, body);
        }

        Ok(OrderResult {
            uuid: body["orderId"].as_u64().map(|v| v.to_string()).unwrap_or_default(),
            instrument: instrument.clone(),
            side,
            price,
            volume,
            executed_volume: Self::parse_str_f64(&body["executedQty"]).unwrap_or(0.0),
            state: OrderState::Wait,
        })
    }

    #[instrument(skip(self), name = "rest::cancel")]
    async fn cancel(&self, uuid: &str) -> Result<()> {
        let params = format!("orderId={uuid}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE order request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("DELETE order returned {}", resp.status());
        }
        Ok(())
    }

    #[instrument(skip(self), name = "rest::order")]
    async fn order(&self, uuid: &str) -> Result<OrderResult> {
        let params = format!("orderId={uuid}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);
        let body = self.get_with_retry(&url).await?;

        let state = match body["status"].as_str().unwrap_or("") {
            "FILLED" => OrderState::Done,
            "CANCELED" | "EXPIRED" | "REJECTED" => OrderState::Cancel,
            _ => OrderState::Wait,
        };

        Ok(OrderResult {
            uuid: uuid.to_string(),
            instrument: body["symbol"].as_str().unwrap_or_default().to_string(),
            side: if body["side"].as_str() == Some("BUY") {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            },
            price: Self::parse_str_f64(&body["price"]).ok(),
            volume: Self::parse_str_f64(&body["origQty"]).ok(),
            executed_volume: Self::parse_str_f64(&body["executedQty"]).unwrap_or(0.0),
            state,
        })
    }

    #[instrument(skip(self), name = "rest::closed_orders")]
    async fn closed_orders(&self, instrument: &Instrument) -> Result<Vec<OrderResult>> {
        let params = format!("symbol={instrument}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/allOrders?{}", self.base_url, qs);
        let body = self.get_with_retry(&url).await?;

        let raw = body.as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let state = match entry["status"].as_str().unwrap_or("") {
                "FILLED" => OrderState::Done,
                "CANCELED" | "EXPIRED" | "REJECTED" => OrderState::Cancel,
                _ => continue,
            };
            out.push(OrderResult {
                uuid: entry["orderId"].as_u64().map(|v| v.to_string()).unwrap_or_default(),
                instrument: instrument.clone(),
                side: if entry["side"].as_str() == Some("BUY") {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                },
                price: Self::parse_str_f64(&entry["price"]).ok(),
                volume: Self::parse_str_f64(&entry["origQty"]).ok(),
                executed_volume: Self::parse_str_f64(&entry["executedQty"]).unwrap_or(0.0),
                state,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), name = "rest::all_markets")]
    async fn all_markets(&self) -> Result<Vec<Instrument>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let body = self.get_with_retry(&url).await?;

        let symbols = body["symbols"].as_array().cloned().unwrap_or_default();
        Ok(symbols
            .iter()
            .filter_map(|s| s["symbol"].as_str().map(|s| s.to_string()))
            .collect())
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_and_hex() {
        let client = RestClient::new("key", "secret");
        let sig1 = client.sign("foo=bar");
        let sig2 = client.sign("foo=bar");
        assert_eq!(sig1, sig2);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signed_query_appends_signature() {
        let client = RestClient::new("key", "secret");
        let qs = client.signed_query("symbol=BTCUSDT");
        assert!(qs.contains("timestamp="));
        assert!(qs.contains("recvWindow="));
        assert!(qs.contains("signature="));
    }

    #[test]
    fn debug_redacts_secret() {
        let client = RestClient::new("mykey", "mysecret");
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("mysecret"));
        assert!(dbg.contains("redacted"));
    }
}
