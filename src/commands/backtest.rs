//! `backtest` CLI command: run one recipe against one candle history and
//! print the text report.

use anyhow::Context;
use tracing::info;

use crypto_backtest_engine::analyzer::PerformanceAnalyzer;
use crypto_backtest_engine::backtest::{BacktestConfig, BacktestSimulator};
use crypto_backtest_engine::config::Config;
use crypto_backtest_engine::csv_loader;
use crypto_backtest_engine::recipe::Recipe;
use crypto_backtest_engine::types::Symbol;

pub fn run(recipe_path: &str, candles_csv: &str, json_output: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let recipe = Recipe::load_from_file(recipe_path).context("failed to load recipe")?;
    info!(recipe = %recipe.name, "recipe loaded");

    let symbol = Symbol::new(&recipe.market.symbol);
    let candles = csv_loader::load_candles(candles_csv, &recipe.market.exchange, &symbol, &recipe.market.timeframe)
        .context("failed to load candle history")?;
    info!(candle_count = candles.len(), "candle history loaded");

    let backtest_config = BacktestConfig {
        initial_capital: recipe.capital.initial,
        commission_percent: config.defaults.commission_percent / 100.0,
        slippage_percent: config.defaults.slippage_percent / 100.0,
        use_stop_loss: recipe.risk.stop_loss_percent > 0.0,
        use_take_profit: recipe.risk.take_profit_percent > 0.0,
        max_open_positions: recipe.risk.max_open_positions,
    };

    let mut simulator = BacktestSimulator::new(backtest_config);
    let result = simulator.run(recipe, &candles).context("backtest run failed")?;
    let metrics = PerformanceAnalyzer::analyze(&result);

    info!(
        final_equity = result.final_equity,
        total_trades = result.total_trades,
        "backtest complete"
    );

    println!("{}", PerformanceAnalyzer::generate_text_report(&result, &metrics));

    if let Some(path) = json_output {
        let report = PerformanceAnalyzer::generate_json_report(&result, &metrics);
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write JSON report to {path}"))?;
        info!(path, "JSON report written");
    }

    Ok(())
}
