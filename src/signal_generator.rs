//! Binds a `Recipe` to a candle history and evaluates per-bar BUY/SELL/NONE
//! signals from the recipe's entry/exit rule sets.

use std::collections::HashMap;

use crate::indicators;
use crate::recipe::{ConditionSet, Operator, Recipe, RuleLogic, TradingRule};
use crate::types::{Candle, EngineError, Signal, SignalType, Symbol};

const CROSS_TOLERANCE: f64 = 1e-6;

pub struct SignalGenerator {
    recipe: Option<Recipe>,
    cache: HashMap<String, Vec<f64>>,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalGenerator {
    pub fn new() -> Self {
        Self {
            recipe: None,
            cache: HashMap::new(),
        }
    }

    pub fn load_recipe(&mut self, recipe: Recipe) {
        self.recipe = Some(recipe);
        self.cache.clear();
    }

    /// Computes every indicator named in the recipe once and caches the
    /// resulting series by canonical key. Returns an error if any named
    /// indicator cannot be computed over the given candles (insufficient
    /// data for its period).
    pub fn precalculate_indicators(&mut self, candles: &[Candle]) -> Result<(), EngineError> {
        let recipe = self
            .recipe
            .as_ref()
            .ok_or_else(|| EngineError::InvalidInput("no recipe loaded".into()))?;

        self.cache.clear();
        self.cache
            .insert("close".to_string(), candles.iter().map(|c| c.close).collect());

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();

        for ind in &recipe.indicators {
            let period = ind.period as usize;
            match ind.name.as_str() {
                "sma" => {
                    let series = indicators::sma(&close, period);
                    Self::require_nonempty(&series, &ind.name, candles.len(), period)?;
                    self.cache.insert("sma".into(), series);
                }
                "ema" => {
                    let series = indicators::ema(&close, period);
                    Self::require_nonempty(&series, &ind.name, candles.len(), period)?;
                    self.cache.insert("ema".into(), series);
                }
                "rsi" => {
                    let series = indicators::rsi(&close, period);
                    Self::require_nonempty(&series, &ind.name, candles.len(), period)?;
                    self.cache.insert("rsi".into(), series);
                }
                "macd" => {
                    let fast = *ind.params.get("fast").unwrap_or(&12.0) as usize;
                    let slow = *ind.params.get("slow").unwrap_or(&26.0) as usize;
                    let signal = *ind.params.get("signal").unwrap_or(&9.0) as usize;
                    let result = indicators::macd(&close, fast, slow, signal);
                    Self::require_nonempty(&result.macd_line, &ind.name, candles.len(), slow)?;
                    self.cache.insert("macd".into(), result.macd_line);
                    self.cache.insert("macd_signal".into(), result.signal_line);
                    self.cache.insert("macd_histogram".into(), result.histogram);
                }
                "bollinger" | "bbands" => {
                    let k = *ind.params.get("multiplier").unwrap_or(&2.0);
                    let bb = indicators::bollinger_bands(&close, period, k);
                    Self::require_nonempty(&bb.middle, &ind.name, candles.len(), period)?;
                    self.cache.insert("bb_upper".into(), bb.upper);
                    self.cache.insert("bb_middle".into(), bb.middle);
                    self.cache.insert("bb_lower".into(), bb.lower);
                }
                "atr" => {
                    let series = indicators::atr(candles, period);
                    Self::require_nonempty(&series, &ind.name, candles.len(), period)?;
                    self.cache.insert("atr".into(), series);
                }
                "stochastic" | "stoch" => {
                    let d_period = *ind.params.get("d_period").unwrap_or(&3.0) as usize;
                    let stoch = indicators::stochastic(candles, period, d_period);
                    Self::require_nonempty(&stoch.k, &ind.name, candles.len(), period)?;
                    self.cache.insert("stoch_k".into(), stoch.k);
                    self.cache.insert("stoch_d".into(), stoch.d);
                }
                "obv" => {
                    self.cache.insert("obv".into(), indicators::obv(candles));
                }
                "adx" => {
                    let series = indicators::adx(candles, period);
                    Self::require_nonempty(&series, &ind.name, candles.len(), period * 2)?;
                    self.cache.insert("adx".into(), series);
                }
                "cci" => {
                    let series = indicators::cci(candles, period);
                    Self::require_nonempty(&series, &ind.name, candles.len(), period)?;
                    self.cache.insert("cci".into(), series);
                }
                other => {
                    tracing::warn!(indicator = other, "unknown indicator name, skipping");
                }
            }
        }

        Ok(())
    }

    fn require_nonempty(
        series: &[f64],
        name: &str,
        candle_count: usize,
        period: usize,
    ) -> Result<(), EngineError> {
        if series.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "not enough candles ({candle_count}) for indicator '{name}' with period {period}"
            )));
        }
        Ok(())
    }

    fn get_indicator_value(&self, name: &str, index: usize) -> f64 {
        self.cache
            .get(name)
            .and_then(|series| series.get(index))
            .copied()
            .unwrap_or(f64::NAN)
    }

    fn compare_values(op: Operator, left: f64, right: f64) -> bool {
        if left.is_nan() || right.is_nan() {
            return false;
        }
        match op {
            Operator::LessThan => left < right,
            Operator::LessOrEqual => left <= right,
            Operator::GreaterThan => left > right,
            Operator::GreaterOrEqual => left >= right,
            Operator::Equal => (left - right).abs() < CROSS_TOLERANCE,
            Operator::CrossesAbove | Operator::CrossesBelow => false,
        }
    }

    fn crosses_above(&self, index: usize, rule: &TradingRule) -> bool {
        if index == 0 {
            return false;
        }
        let Some(left_series) = self.cache.get(&rule.indicator) else {
            return false;
        };
        let (prev_left, cur_left) = (left_series[index - 1], left_series[index]);
        let (prev_right, cur_right) = self.right_operand_pair(index, rule);
        if prev_left.is_nan() || cur_left.is_nan() || prev_right.is_nan() || cur_right.is_nan() {
            return false;
        }
        prev_left <= prev_right + CROSS_TOLERANCE && cur_left > cur_right + CROSS_TOLERANCE
    }

    fn crosses_below(&self, index: usize, rule: &TradingRule) -> bool {
        if index == 0 {
            return false;
        }
        let Some(left_series) = self.cache.get(&rule.indicator) else {
            return false;
        };
        let (prev_left, cur_left) = (left_series[index - 1], left_series[index]);
        let (prev_right, cur_right) = self.right_operand_pair(index, rule);
        if prev_left.is_nan() || cur_left.is_nan() || prev_right.is_nan() || cur_right.is_nan() {
            return false;
        }
        prev_left >= prev_right - CROSS_TOLERANCE && cur_left < cur_right - CROSS_TOLERANCE
    }

    /// Right-hand side of a crossing comparison at `index-1` and `index`:
    /// another indicator series when `compare_with` is set, else the
    /// literal threshold repeated at both positions.
    fn right_operand_pair(&self, index: usize, rule: &TradingRule) -> (f64, f64) {
        match &rule.compare_with {
            Some(other) => (
                self.get_indicator_value(other, index - 1),
                self.get_indicator_value(other, index),
            ),
            None => (rule.value, rule.value),
        }
    }

    fn evaluate_rule(&self, index: usize, rule: &TradingRule) -> bool {
        let Some(op) = Operator::parse(&rule.operator) else {
            tracing::warn!(operator = %rule.operator, "unknown operator, rule evaluates false");
            return false;
        };

        match op {
            Operator::CrossesAbove => self.crosses_above(index, rule),
            Operator::CrossesBelow => self.crosses_below(index, rule),
            _ => {
                let left = self.get_indicator_value(&rule.indicator, index);
                if left.is_nan() {
                    return false;
                }
                let right = match &rule.compare_with {
                    Some(other) => self.get_indicator_value(other, index),
                    None => rule.value,
                };
                Self::compare_values(op, left, right)
            }
        }
    }

    fn evaluate_conditions(&self, index: usize, conditions: &ConditionSet) -> bool {
        if conditions.rules.is_empty() {
            return false;
        }
        match conditions.logic {
            RuleLogic::And => conditions.rules.iter().all(|r| self.evaluate_rule(index, r)),
            RuleLogic::Or => conditions.rules.iter().any(|r| self.evaluate_rule(index, r)),
        }
    }

    pub fn check_entry_conditions_at(&self, index: usize) -> bool {
        match &self.recipe {
            Some(recipe) => self.evaluate_conditions(index, &recipe.entry_conditions),
            None => false,
        }
    }

    pub fn check_exit_conditions_at(&self, index: usize) -> bool {
        match &self.recipe {
            Some(recipe) => self.evaluate_conditions(index, &recipe.exit_conditions),
            None => false,
        }
    }

    /// Evaluates entry then exit at `index`; entry wins when both match on
    /// the same bar.
    pub fn generate_signal_at(&self, index: usize, candles: &[Candle]) -> Signal {
        let candle = &candles[index];
        let symbol = candle.symbol.clone();

        if self.check_entry_conditions_at(index) {
            return Signal {
                signal_type: SignalType::Buy,
                symbol,
                price: candle.close,
                timestamp: candle.timestamp,
                reason: "Entry conditions met".to_string(),
            };
        }

        if self.check_exit_conditions_at(index) {
            return Signal {
                signal_type: SignalType::Sell,
                symbol,
                price: candle.close,
                timestamp: candle.timestamp,
                reason: "Exit conditions met".to_string(),
            };
        }

        Signal::none(symbol, candle.close, candle.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Recipe;

    fn make_candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                exchange: "binance".into(),
                symbol: Symbol::new("BTCUSDT"),
                timeframe: "1h".into(),
                timestamp: i as i64 * 3600,
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 10.0,
            })
            .collect()
    }

    const RECIPE_JSON: &str = r#"{
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
    fn monotone_decline_then_recovery_buys_then_sells() {
        let mut closes: Vec<f64> = (0..50).map(|i| 100.0 - i as f64).collect();
        closes.extend((0..50).map(|i| 50.0 + i as f64));
        let candles = make_candles(&closes);

        let recipe = Recipe::load_from_str(RECIPE_JSON).unwrap();
        let mut gen = SignalGenerator::new();
        gen.load_recipe(recipe);
        gen.precalculate_indicators(&candles).unwrap();

        let signals: Vec<Signal> = (0..candles.len())
            .map(|i| gen.generate_signal_at(i, &candles))
            .collect();

        assert!(signals.iter().any(|s| s.signal_type == SignalType::Buy));
        assert!(signals.iter().any(|s| s.signal_type == SignalType::Sell));
    }

    #[test]
    fn empty_rule_set_is_false() {
        let mut recipe = Recipe::load_from_str(RECIPE_JSON).unwrap();
        recipe.entry_conditions.rules.clear();
        let candles = make_candles(&[100.0; 20]);
        let mut gen = SignalGenerator::new();
        gen.load_recipe(recipe);
        gen.precalculate_indicators(&candles).unwrap();
        assert!(!gen.check_entry_conditions_at(15));
    }

    #[test]
    fn entry_wins_over_exit_on_same_bar() {
        let mut recipe = Recipe::load_from_str(RECIPE_JSON).unwrap();
        // Force both entry and exit to match unconditionally.
        recipe.entry_conditions.rules[0].operator = ">".to_string();
        recipe.entry_conditions.rules[0].value = -1.0;
        recipe.exit_conditions.rules[0].operator = ">".to_string();
        recipe.exit_conditions.rules[0].value = -1.0;
        let candles = make_candles(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let mut gen = SignalGenerator::new();
        gen.load_recipe(recipe);
        gen.precalculate_indicators(&candles).unwrap();
        let signal = gen.generate_signal_at(20, &candles);
        assert_eq!(signal.signal_type, SignalType::Buy);
    }
}
