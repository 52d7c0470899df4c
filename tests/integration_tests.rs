//! End-to-end coverage of the Recipe -> SignalGenerator -> BacktestSimulator
//! -> PerformanceAnalyzer pipeline, and the other concrete end-to-end
//! scenarios.

use crypto_backtest_engine::analyzer::PerformanceAnalyzer;
use crypto_backtest_engine::backtest::{BacktestConfig, BacktestSimulator};
use crypto_backtest_engine::portfolio::Portfolio;
use crypto_backtest_engine::recipe::Recipe;
use crypto_backtest_engine::types::{Candle, Symbol, Trade};

fn candle(i: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
    Candle::new("binance", Symbol::new("BTCUSDT"), "1h", i * 3600, o, h, l, c, 10.0).unwrap()
}

const RSI_RECIPE: &str = r#"{
  "name": "rsi_mean_reversion",
  "market": {"exchange":"binance","symbol":"BTCUSDT","timeframe":"1h"},
  "capital": {"initial": 10000, "position_size_percent": 95},
  "risk_management": {"stop_loss_percent": 2, "take_profit_percent": 5,
                      "max_daily_loss_percent": 5, "max_open_positions": 1},
  "indicators": [{"name":"rsi","period":14}],
  "entry_conditions": {"logic":"AND","rules":[{"indicator":"rsi","operator":"<","value":30}]},
  "exit_conditions":  {"logic":"OR", "rules":[{"indicator":"rsi","operator":">","value":70}]}
}"#;

#[test]
fn scenario_1_rsi_mean_reversion_decline_then_recovery() {
    let mut closes: Vec<f64> = (0..50).map(|i| 100.0 - i as f64).collect();
    closes.extend((0..50).map(|i| 50.0 + i as f64));
    let candles: Vec<Candle> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| candle(i as i64, c, c + 0.5, c - 0.5, c))
        .collect();

    let recipe = Recipe::load_from_str(RSI_RECIPE).unwrap();
    let mut simulator = BacktestSimulator::new(BacktestConfig::default());
    let result = simulator.run(recipe, &candles).unwrap();

    assert!(result.total_trades >= 1, "expected at least one trade around the RSI bottom");
    assert!(result.winning_trades >= 1, "expected the recovery leg to close in profit");
}

#[test]
fn scenario_2_stop_loss_fires_exactly_at_the_level() {
    let mut portfolio = Portfolio::new(10_000.0);
    let mut trade = Trade::new_long(Symbol::new("BTCUSDT"), 100.0, 10.0, 0);
    trade.stop_loss_price = 98.0;
    assert!(portfolio.open_position(trade, 0.0, 0.0));

    let cash_before = portfolio.cash();
    portfolio.close_position("T1", 98.0, "Stop-Loss", 0.0, 0.0, 3600);

    let closed = &portfolio.closed_trades()[0];
    assert_eq!(closed.exit_price, 98.0);
    assert_eq!(closed.exit_reason, "Stop-Loss");
    assert_eq!(portfolio.cash(), cash_before + 98.0 * 10.0);
}

#[test]
fn scenario_3_take_profit_loses_the_tie_against_stop_loss() {
    let mut simulator = BacktestSimulator::new(BacktestConfig {
        commission_percent: 0.0,
        slippage_percent: 0.0,
        ..BacktestConfig::default()
    });

    let recipe_json = r#"{
      "name": "tie_check",
      "market": {"exchange":"binance","symbol":"BTCUSDT","timeframe":"1h"},
      "capital": {"initial": 10000, "position_size_percent": 100},
      "risk_management": {"stop_loss_percent": 2, "take_profit_percent": 5,
                          "max_daily_loss_percent": 5, "max_open_positions": 1},
      "indicators": [],
      "entry_conditions": {"logic":"OR","rules":[{"indicator":"close","operator":"==","value":100}]},
      "exit_conditions":  {"logic":"OR","rules":[]}
    }"#;
    let recipe = Recipe::load_from_str(recipe_json).unwrap();
    let candles = vec![
        candle(0, 100.0, 100.5, 99.5, 100.0),
        candle(1, 100.0, 106.0, 97.0, 100.0),
    ];

    let result = simulator.run(recipe, &candles).unwrap();
    let closed = result.trades.iter().find(|t| t.exit_reason == "Stop-Loss");
    assert!(closed.is_some(), "same-bar SL/TP tie must resolve to Stop-Loss");
    assert_eq!(closed.unwrap().exit_price, 98.0);
}

#[test]
fn scenario_4_end_of_data_flushes_the_open_position() {
    let recipe_json = r#"{
      "name": "never_exits",
      "market": {"exchange":"binance","symbol":"BTCUSDT","timeframe":"1h"},
      "capital": {"initial": 10000, "position_size_percent": 50},
      "risk_management": {"stop_loss_percent": 0, "take_profit_percent": 0,
                          "max_daily_loss_percent": 5, "max_open_positions": 1},
      "indicators": [],
      "entry_conditions": {"logic":"OR","rules":[{"indicator":"close","operator":">","value":-1}]},
      "exit_conditions":  {"logic":"OR","rules":[]}
    }"#;
    let recipe = Recipe::load_from_str(recipe_json).unwrap();
    let candles: Vec<Candle> = (0..5).map(|i| candle(i, 100.0, 101.0, 99.0, 100.0 + i as f64)).collect();

    let mut simulator = BacktestSimulator::new(BacktestConfig::default());
    let result = simulator.run(recipe, &candles).unwrap();

    assert_eq!(result.trades.last().unwrap().exit_reason, "End of Backtest");
}

#[test]
fn scenario_5_zero_loss_run_reports_sentinel_profit_factor() {
    let recipe_json = r#"{
      "name": "always_wins",
      "market": {"exchange":"binance","symbol":"BTCUSDT","timeframe":"1h"},
      "capital": {"initial": 10000, "position_size_percent": 50},
      "risk_management": {"stop_loss_percent": 0, "take_profit_percent": 0,
                          "max_daily_loss_percent": 5, "max_open_positions": 5},
      "indicators": [],
      "entry_conditions": {"logic":"OR","rules":[{"indicator":"close","operator":">","value":-1}]},
      "exit_conditions":  {"logic":"OR","rules":[{"indicator":"close","operator":">","value":1000000}]}
    }"#;
    let recipe = Recipe::load_from_str(recipe_json).unwrap();
    let candles: Vec<Candle> = (0..5)
        .map(|i| candle(i, 100.0 + i as f64, 101.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64))
        .collect();

    let mut simulator = BacktestSimulator::new(BacktestConfig::default());
    let result = simulator.run(recipe, &candles).unwrap();
    let metrics = PerformanceAnalyzer::analyze(&result);

    assert_eq!(result.losing_trades, 0);
    assert_eq!(metrics.profit_factor, 999.99);
}

#[test]
fn backtest_run_is_deterministic_across_replays() {
    let mut closes: Vec<f64> = (0..50).map(|i| 100.0 - i as f64).collect();
    closes.extend((0..50).map(|i| 50.0 + i as f64));
    let candles: Vec<Candle> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| candle(i as i64, c, c + 0.5, c - 0.5, c))
        .collect();

    let recipe_a = Recipe::load_from_str(RSI_RECIPE).unwrap();
    let recipe_b = Recipe::load_from_str(RSI_RECIPE).unwrap();

    let mut sim_a = BacktestSimulator::new(BacktestConfig::default());
    let mut sim_b = BacktestSimulator::new(BacktestConfig::default());
    let result_a = sim_a.run(recipe_a, &candles).unwrap();
    let result_b = sim_b.run(recipe_b, &candles).unwrap();

    assert_eq!(result_a.trades.len(), result_b.trades.len());
    assert_eq!(result_a.final_equity, result_b.final_equity);
    for (ta, tb) in result_a.trades.iter().zip(result_b.trades.iter()) {
        assert_eq!(ta.entry_time, tb.entry_time);
        assert_eq!(ta.exit_time, tb.exit_time);
        assert_eq!(ta.pnl, tb.pnl);
    }
}

#[test]
fn final_equity_equals_initial_capital_plus_summed_realized_pnl() {
    let recipe = Recipe::load_from_str(RSI_RECIPE).unwrap();
    let mut closes: Vec<f64> = (0..50).map(|i| 100.0 - i as f64).collect();
    closes.extend((0..50).map(|i| 50.0 + i as f64));
    let candles: Vec<Candle> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| candle(i as i64, c, c + 0.5, c - 0.5, c))
        .collect();

    let mut simulator = BacktestSimulator::new(BacktestConfig::default());
    let result = simulator.run(recipe, &candles).unwrap();

    let summed_pnl: f64 = result.trades.iter().map(|t| t.pnl).sum();
    assert!((result.final_equity - (result.initial_capital + summed_pnl)).abs() < 1e-6);
    assert!(result.peak_equity >= result.final_equity);
    assert!(result.winning_trades + result.losing_trades <= result.total_trades);
}
