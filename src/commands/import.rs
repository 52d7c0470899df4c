//! `import` CLI command: fetch and persist a historical candle range.
//! Exits 0 once at least one candle is stored; a hard failure (REST ping
//! failed, DB open failed) is surfaced as an error up to `main`.

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use crypto_backtest_engine::config::Config;
use crypto_backtest_engine::market_data::{fetch_range, BinanceMarketData, MarketDataSource};
use crypto_backtest_engine::storage::{CandleStore, Storage};
use crypto_backtest_engine::types::Symbol;

const SECONDS_PER_DAY: i64 = 86_400;

pub fn run(symbol: &str, timeframe: &str, days: u32, config: &Config) -> anyhow::Result<()> {
    let source = BinanceMarketData::with_base_url(
        &config.exchange.base_url,
        config.exchange.api_key.clone(),
        config.exchange.api_secret.clone(),
    );
    source.ping().context("exchange ping failed")?;
    info!("exchange reachable");

    let end_time = Utc::now().timestamp();
    let start_time = end_time - days as i64 * SECONDS_PER_DAY;
    let symbol = Symbol::new(symbol);

    let candles = fetch_range(&source, &symbol, timeframe, start_time, end_time, 1000)
        .context("failed to fetch candle history")?;
    info!(candle_count = candles.len(), "candles fetched");

    if candles.is_empty() {
        anyhow::bail!("no candles were returned for the requested range");
    }

    let storage = Storage::open(&config.storage.db_path).context("failed to open database")?;
    storage.insert(&candles).context("failed to persist candles")?;
    info!(
        symbol = symbol.as_str(),
        timeframe,
        stored = candles.len(),
        "import complete"
    );

    Ok(())
}
