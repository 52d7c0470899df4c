//! Historical candle retrieval: the `MarketDataSource` port, a Binance-shaped
//! public REST adapter, and the chunked-fetch pipeline used by importers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::types::{Candle, Symbol};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMIT_MAX_REQUESTS: usize = 1200;

/// Abstract boundary for historical candle retrieval. Implementers may call
/// a REST API, read a fixture, or replay from storage.
pub trait MarketDataSource {
    fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        start_time_sec: i64,
        end_time_sec: i64,
        max_count: usize,
    ) -> Result<Vec<Candle>>;

    fn ping(&self) -> Result<()>;
    fn server_time(&self) -> Result<i64>;
    fn get_balances(&self) -> Result<Vec<Balance>>;
}

#[derive(Debug, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

/// Sliding-window request-rate limiter shared by concurrent historical
/// fetch calls. Guards against exceeding 1200 requests per 60-second window.
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    max_requests: usize,
    period: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, period: Duration) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            max_requests,
            period,
        }
    }

    /// Blocks the calling thread until a request slot is available, then
    /// records the request.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().unwrap();
                let now = Instant::now();
                while window.front().is_some_and(|&t| now.duration_since(t) >= self.period) {
                    window.pop_front();
                }
                if window.len() < self.max_requests {
                    window.push_back(now);
                    None
                } else {
                    let oldest = *window.front().unwrap();
                    Some(self.period - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(d) => std::thread::sleep(d),
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW)
    }
}

/// Binance-shaped public REST client. Blocking to match the teacher's
/// synchronous fetch style.
pub struct BinanceMarketData {
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    client: reqwest::blocking::Client,
    rate_limiter: RateLimiter,
}

impl BinanceMarketData {
    pub fn new(api_key: Option<String>, api_secret: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, api_secret)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>, api_secret: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            base_url: base_url.to_string(),
            api_key,
            api_secret,
            client,
            rate_limiter: RateLimiter::default(),
        }
    }

    fn sign(&self, query: &str) -> Result<String> {
        let secret = self
            .api_secret
            .as_ref()
            .context("API secret required for signed endpoint")?;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BinanceBalance>,
}

#[derive(Debug, Deserialize)]
struct BinanceBalance {
    asset: String,
    free: String,
    locked: String,
}

impl MarketDataSource for BinanceMarketData {
    fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        start_time_sec: i64,
        end_time_sec: i64,
        max_count: usize,
    ) -> Result<Vec<Candle>> {
        self.rate_limiter.acquire();

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            symbol.as_str(),
            timeframe,
            start_time_sec * 1000,
            end_time_sec * 1000,
            max_count,
        );

        let response = match self.client.get(&url).send() {
            Ok(r) => r,
            Err(_) => return Ok(Vec::new()),
        };
        let rows: Vec<Vec<serde_json::Value>> =
            response.json().context("failed to parse klines response")?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let open_time_ms = row[0].as_i64().unwrap_or(0);
            let open: f64 = row[1].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            let high: f64 = row[2].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            let low: f64 = row[3].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            let close: f64 = row[4].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            let volume: f64 = row[5].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);

            if let Ok(candle) = Candle::new(
                "binance",
                symbol.clone(),
                timeframe,
                open_time_ms / 1000,
                open,
                high,
                low,
                close,
                volume,
            ) {
                candles.push(candle);
            }
        }
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    fn ping(&self) -> Result<()> {
        self.rate_limiter.acquire();
        let url = format!("{}/api/v3/ping", self.base_url);
        self.client.get(&url).send().context("ping failed")?;
        Ok(())
    }

    fn server_time(&self) -> Result<i64> {
        self.rate_limiter.acquire();
        let url = format!("{}/api/v3/time", self.base_url);
        let response = self.client.get(&url).send().context("server time request failed")?;
        let body: serde_json::Value = response.json().context("failed to parse server time")?;
        Ok(body["serverTime"].as_i64().unwrap_or(0) / 1000)
    }

    fn get_balances(&self) -> Result<Vec<Balance>> {
        self.rate_limiter.acquire();
        let api_key = self.api_key.as_ref().context("API key required for account endpoint")?;

        let timestamp = Utc::now().timestamp_millis();
        let query = format!("timestamp={timestamp}");
        let signature = self.sign(&query)?;
        let url = format!("{}/api/v3/account?{}&signature={}", self.base_url, query, signature);

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .context("failed to fetch account balances")?;
        let account: AccountResponse = response.json().context("failed to parse account response")?;

        Ok(account
            .balances
            .into_iter()
            .map(|b| Balance {
                asset: b.asset,
                free: b.free.parse().unwrap_or(0.0),
                locked: b.locked.parse().unwrap_or(0.0),
            })
            .collect())
    }
}

fn timeframe_seconds(timeframe: &str) -> i64 {
    let (num, unit) = timeframe.split_at(timeframe.len().saturating_sub(1));
    let n: i64 = num.parse().unwrap_or(1);
    match unit {
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        "w" => n * 604800,
        _ => 60,
    }
}

/// Fetches `[startTime, endTime)` in `maxCount`-sized chunks, advancing the
/// cursor past gaps so a quiet window doesn't stall the import.
pub fn fetch_range(
    source: &dyn MarketDataSource,
    symbol: &Symbol,
    timeframe: &str,
    start_time_sec: i64,
    end_time_sec: i64,
    max_count: usize,
) -> Result<Vec<Candle>> {
    let step = timeframe_seconds(timeframe);
    let mut cursor = start_time_sec;
    let mut all = Vec::new();

    while cursor < end_time_sec {
        let chunk = source.fetch_candles(symbol, timeframe, cursor, end_time_sec, max_count)?;
        if chunk.is_empty() {
            cursor += max_count as i64 * step;
        } else {
            cursor = chunk.last().unwrap().timestamp + step;
            all.extend(chunk);
        }
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_seconds_parses_common_units() {
        assert_eq!(timeframe_seconds("1m"), 60);
        assert_eq!(timeframe_seconds("4h"), 14400);
        assert_eq!(timeframe_seconds("1d"), 86400);
    }

    struct EmptySource;
    impl MarketDataSource for EmptySource {
        fn fetch_candles(&self, _: &Symbol, _: &str, _: i64, _: i64, _: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }
        fn ping(&self) -> Result<()> {
            Ok(())
        }
        fn server_time(&self) -> Result<i64> {
            Ok(0)
        }
        fn get_balances(&self) -> Result<Vec<Balance>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn fetch_range_advances_past_empty_chunks_instead_of_looping_forever() {
        let source = EmptySource;
        let symbol = Symbol::new("BTCUSDT");
        let result = fetch_range(&source, &symbol, "1h", 0, 100 * 3600, 10).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn rate_limiter_allows_burst_up_to_capacity_without_blocking() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
