//! `test-auth` CLI command: ping, server-time, then an authenticated
//! account read, exiting 0 only once every step passes.

use anyhow::Context;
use tracing::info;

use crypto_backtest_engine::config::Config;
use crypto_backtest_engine::market_data::{BinanceMarketData, MarketDataSource};

pub fn run(api_key: &str, api_secret: &str, config: &Config) -> anyhow::Result<()> {
    let source = BinanceMarketData::with_base_url(
        &config.exchange.base_url,
        Some(api_key.to_string()),
        Some(api_secret.to_string()),
    );

    source.ping().context("ping failed")?;
    info!("ping ok");

    let server_time = source.server_time().context("server time request failed")?;
    info!(server_time, "server time ok");

    let balances = source.get_balances().context("authenticated account read failed")?;
    info!(balance_count = balances.len(), "account read ok");

    for balance in &balances {
        if balance.free > 0.0 || balance.locked > 0.0 {
            println!("{}: free={} locked={}", balance.asset, balance.free, balance.locked);
        }
    }

    println!("authentication check passed");
    Ok(())
}
