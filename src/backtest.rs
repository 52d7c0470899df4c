//! Drives a recipe + candle history to completion and produces a
//! `BacktestResult`. Same-bar ordering is fixed: protective exits (stop-loss,
//! then take-profit) are checked before the signal generator runs, and
//! both entries and exits fill at the current candle's close.

use crate::portfolio::Portfolio;
use crate::recipe::Recipe;
use crate::signal_generator::SignalGenerator;
use crate::types::{BacktestResult, Candle, EngineError, EquityPoint, SignalType, Trade, TradeType};

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_percent: f64,
    pub slippage_percent: f64,
    pub use_stop_loss: bool,
    pub use_take_profit: bool,
    pub max_open_positions: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_percent: 0.001,
            slippage_percent: 0.0005,
            use_stop_loss: true,
            use_take_profit: true,
            max_open_positions: 1,
        }
    }
}

pub struct BacktestSimulator {
    config: BacktestConfig,
    portfolio: Portfolio,
    generator: SignalGenerator,
}

impl BacktestSimulator {
    pub fn new(config: BacktestConfig) -> Self {
        let portfolio = Portfolio::new(config.initial_capital);
        Self {
            config,
            portfolio,
            generator: SignalGenerator::new(),
        }
    }

    /// Runs one full pass over `candles` under `recipe`. Returns
    /// `InsufficientData` if `candles` is empty or an indicator cannot be
    /// computed over the given history.
    pub fn run(&mut self, recipe: Recipe, candles: &[Candle]) -> Result<BacktestResult, EngineError> {
        if candles.is_empty() {
            return Err(EngineError::InsufficientData(
                "no candles supplied to backtest".into(),
            ));
        }

        let position_size_percent = recipe.capital.position_size_percent;
        let stop_loss_percent = recipe.risk.stop_loss_percent;
        let take_profit_percent = recipe.risk.take_profit_percent;
        let recipe_name = recipe.name.clone();
        let symbol = recipe.market.symbol.clone();

        self.generator.load_recipe(recipe);
        self.generator.precalculate_indicators(candles)?;

        let mut peak_equity = self.config.initial_capital;
        let mut equity_curve = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            self.run_protective_exits(candle);

            let signal = self.generator.generate_signal_at(i, candles);
            match signal.signal_type {
                SignalType::Buy => self.handle_buy(
                    candle,
                    position_size_percent,
                    stop_loss_percent,
                    take_profit_percent,
                ),
                SignalType::Sell => self.handle_sell(candle),
                SignalType::None => {}
            }

            let equity = self.portfolio.equity(candle.close);
            let cash = self.portfolio.cash();
            let position_value = self.portfolio.position_value(candle.close);
            peak_equity = peak_equity.max(equity);
            equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity,
                cash,
                position_value,
            });
        }

        let last = candles.last().expect("checked non-empty above");
        self.flush_open_positions(last);

        let final_equity = self.portfolio.equity(last.close);
        peak_equity = peak_equity.max(final_equity);

        let trades: Vec<Trade> = self.portfolio.closed_trades().to_vec();
        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.pnl > 0.0).count();
        let losing_trades = trades.iter().filter(|t| t.pnl < 0.0).count();
        let total_commission = trades.iter().map(|t| t.commission).sum();
        let total_slippage = trades.iter().map(|t| t.slippage).sum();

        let total_return = final_equity - self.config.initial_capital;
        let total_return_percent = if self.config.initial_capital > 0.0 {
            total_return / self.config.initial_capital * 100.0
        } else {
            0.0
        };
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        Ok(BacktestResult {
            recipe_name,
            symbol: symbol.to_string(),
            start_time: candles[0].timestamp,
            end_time: last.timestamp,
            total_candles: candles.len(),
            initial_capital: self.config.initial_capital,
            final_equity,
            peak_equity,
            trades,
            total_trades,
            winning_trades,
            losing_trades,
            equity_curve,
            total_commission,
            total_slippage,
            total_return,
            total_return_percent,
            win_rate,
        })
    }

    /// Closes every open LONG hit by stop-loss or take-profit on this
    /// candle, exactly at the trigger level. Stop-loss is always checked
    /// before take-profit, so a candle that could satisfy both resolves to
    /// the stop-loss exit.
    fn run_protective_exits(&mut self, candle: &Candle) {
        if self.config.use_stop_loss {
            let hits: Vec<(String, f64, f64)> = self
                .portfolio
                .open_trades()
                .iter()
                .filter(|t| t.trade_type == TradeType::Long && t.stop_loss_price > 0.0)
                .filter(|t| candle.low <= t.stop_loss_price)
                .map(|t| (t.id.clone(), t.stop_loss_price, t.quantity))
                .collect();
            for (id, price, qty) in hits {
                let commission = price * qty * self.config.commission_percent;
                let slippage = price * qty * self.config.slippage_percent;
                self.portfolio
                    .close_position(&id, price, "Stop-Loss", commission, slippage, candle.timestamp);
            }
        }

        if self.config.use_take_profit {
            let hits: Vec<(String, f64, f64)> = self
                .portfolio
                .open_trades()
                .iter()
                .filter(|t| t.trade_type == TradeType::Long && t.take_profit_price > 0.0)
                .filter(|t| candle.high >= t.take_profit_price)
                .map(|t| (t.id.clone(), t.take_profit_price, t.quantity))
                .collect();
            for (id, price, qty) in hits {
                let commission = price * qty * self.config.commission_percent;
                let slippage = price * qty * self.config.slippage_percent;
                self.portfolio.close_position(
                    &id,
                    price,
                    "Take-Profit",
                    commission,
                    slippage,
                    candle.timestamp,
                );
            }
        }
    }

    fn handle_buy(
        &mut self,
        candle: &Candle,
        position_size_percent: f64,
        stop_loss_percent: f64,
        take_profit_percent: f64,
    ) {
        if self.portfolio.open_trades_count() as u32 >= self.config.max_open_positions {
            return;
        }

        let allocated = self.portfolio.cash() * position_size_percent / 100.0;
        let quantity = allocated / candle.close;
        if quantity <= 0.0 {
            return;
        }

        let order_value = candle.close * quantity;
        let commission = order_value * self.config.commission_percent;
        let slippage = candle.close * quantity * self.config.slippage_percent;

        let mut trade = Trade::new_long(candle.symbol.clone(), candle.close, quantity, candle.timestamp);
        trade.entry_reason = "Entry conditions met".to_string();
        if stop_loss_percent > 0.0 {
            trade.stop_loss_price = candle.close * (1.0 - stop_loss_percent / 100.0);
        }
        if take_profit_percent > 0.0 {
            trade.take_profit_price = candle.close * (1.0 + take_profit_percent / 100.0);
        }

        self.portfolio.open_position(trade, commission, slippage);
    }

    fn handle_sell(&mut self, candle: &Candle) {
        let ids: Vec<(String, f64)> = self
            .portfolio
            .open_trades()
            .iter()
            .filter(|t| t.trade_type == TradeType::Long)
            .map(|t| (t.id.clone(), t.quantity))
            .collect();

        for (id, qty) in ids {
            let order_value = candle.close * qty;
            let commission = order_value * self.config.commission_percent;
            let slippage = candle.close * qty * self.config.slippage_percent;
            self.portfolio.close_position(
                &id,
                candle.close,
                "Exit Signal",
                commission,
                slippage,
                candle.timestamp,
            );
        }
    }

    fn flush_open_positions(&mut self, last: &Candle) {
        let ids: Vec<(String, f64)> = self
            .portfolio
            .open_trades()
            .iter()
            .map(|t| (t.id.clone(), t.quantity))
            .collect();
        for (id, qty) in ids {
            let order_value = last.close * qty;
            let commission = order_value * self.config.commission_percent;
            let slippage = last.close * qty * self.config.slippage_percent;
            self.portfolio.close_position(
                &id,
                last.close,
                "End of Backtest",
                commission,
                slippage,
                last.timestamp,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;

    fn candle(i: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            exchange: "binance".into(),
            symbol: Symbol::new("BTCUSDT"),
            timeframe: "1h".into(),
            timestamp: i * 3600,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 10.0,
        }
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
    fn rsi_mean_reversion_buys_the_dip_and_sells_the_recovery() {
        let mut closes: Vec<f64> = (0..50).map(|i| 100.0 - i as f64).collect();
        closes.extend((0..50).map(|i| 50.0 + i as f64));
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| candle(i as i64, c, c + 0.5, c - 0.5, c))
            .collect();

        let recipe = Recipe::load_from_str(RSI_RECIPE).unwrap();
        let mut sim = BacktestSimulator::new(BacktestConfig::default());
        let result = sim.run(recipe, &candles).unwrap();

        assert!(result.total_trades >= 1);
        assert!(result.winning_trades >= 1);
    }

    #[test]
    fn stop_loss_closes_at_exactly_the_trigger_level() {
        let mut sim = BacktestSimulator::new(BacktestConfig {
            commission_percent: 0.0,
            slippage_percent: 0.0,
            ..BacktestConfig::default()
        });
        sim.portfolio = Portfolio::new(10_000.0);
        let mut trade = Trade::new_long(Symbol::new("BTCUSDT"), 100.0, 10.0, 0);
        trade.stop_loss_price = 98.0;
        trade.take_profit_price = 0.0;
        assert!(sim.portfolio.open_position(trade, 0.0, 0.0));

        let c = candle(1, 99.0, 101.0, 97.5, 99.0);
        sim.run_protective_exits(&c);

        assert!(sim.portfolio.open_trades().is_empty());
        let closed = &sim.portfolio.closed_trades()[0];
        assert_eq!(closed.exit_price, 98.0);
        assert_eq!(closed.exit_reason, "Stop-Loss");
    }

    #[test]
    fn stop_loss_wins_the_tie_against_take_profit_on_the_same_bar() {
        let mut sim = BacktestSimulator::new(BacktestConfig {
            commission_percent: 0.0,
            slippage_percent: 0.0,
            ..BacktestConfig::default()
        });
        sim.portfolio = Portfolio::new(10_000.0);
        let mut trade = Trade::new_long(Symbol::new("BTCUSDT"), 100.0, 10.0, 0);
        trade.stop_loss_price = 98.0;
        trade.take_profit_price = 105.0;
        assert!(sim.portfolio.open_position(trade, 0.0, 0.0));

        let c = candle(1, 100.0, 106.0, 97.0, 100.0);
        sim.run_protective_exits(&c);

        let closed = &sim.portfolio.closed_trades()[0];
        assert_eq!(closed.exit_price, 98.0);
        assert_eq!(closed.exit_reason, "Stop-Loss");
    }

    #[test]
    fn end_of_data_flushes_the_remaining_open_position() {
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
        let candles: Vec<Candle> = (0..5)
            .map(|i| candle(i, 100.0, 101.0, 99.0, 100.0 + i as f64))
            .collect();

        let mut sim = BacktestSimulator::new(BacktestConfig::default());
        let result = sim.run(recipe, &candles).unwrap();

        assert!(sim.portfolio.open_trades().is_empty());
        assert_eq!(result.trades.last().unwrap().exit_reason, "End of Backtest");
    }

    #[test]
    fn zero_loss_run_reports_a_nonzero_final_equity_gain() {
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

        let mut sim = BacktestSimulator::new(BacktestConfig::default());
        let result = sim.run(recipe, &candles).unwrap();

        assert!(result.final_equity >= result.initial_capital);
        assert_eq!(result.losing_trades, 0);
    }

    #[test]
    fn rejects_empty_candle_history() {
        let recipe = Recipe::load_from_str(RSI_RECIPE).unwrap();
        let mut sim = BacktestSimulator::new(BacktestConfig::default());
        assert!(sim.run(recipe, &[]).is_err());
    }
}
