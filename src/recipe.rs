//! Declarative strategy definitions ("recipes") and their JSON loader.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    pub initial: f64,
    #[serde(rename = "position_size_percent")]
    pub position_size_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(rename = "stop_loss_percent", default)]
    pub stop_loss_percent: f64,
    #[serde(rename = "take_profit_percent", default)]
    pub take_profit_percent: f64,
    #[serde(rename = "max_daily_loss_percent", default = "default_max_daily_loss")]
    pub max_daily_loss_percent: f64,
    #[serde(rename = "max_open_positions", default = "default_max_open_positions")]
    pub max_open_positions: u32,
}

fn default_max_daily_loss() -> f64 {
    5.0
}

fn default_max_open_positions() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub name: String,
    #[serde(default = "default_period")]
    pub period: u32,
    #[serde(default)]
    pub params: HashMap<String, f64>,
}

fn default_period() -> u32 {
    14
}

/// Comparison operators a `TradingRule` may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "==")]
    Equal,
    CrossesAbove,
    CrossesBelow,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Operator::LessThan),
            "<=" => Some(Operator::LessOrEqual),
            ">" => Some(Operator::GreaterThan),
            ">=" => Some(Operator::GreaterOrEqual),
            "==" => Some(Operator::Equal),
            "crosses_above" => Some(Operator::CrossesAbove),
            "crosses_below" => Some(Operator::CrossesBelow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingRule {
    pub indicator: String,
    pub operator: String,
    #[serde(default)]
    pub value: f64,
    #[serde(rename = "compare_with", default, skip_serializing_if = "Option::is_none")]
    pub compare_with: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleLogic {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSet {
    pub logic: RuleLogic,
    pub rules: Vec<TradingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub market: MarketConfig,
    pub capital: CapitalConfig,
    #[serde(rename = "risk_management")]
    pub risk: RiskConfig,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
    pub entry_conditions: ConditionSet,
    pub exit_conditions: ConditionSet,
}

impl Recipe {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::InvalidInput(format!("failed to open recipe file: {e}")))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(json: &str) -> Result<Self, EngineError> {
        let recipe: Recipe = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidInput(format!("failed to parse recipe JSON: {e}")))?;
        recipe.validate()?;
        Ok(recipe)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.name.is_empty() {
            return Err(EngineError::InvalidInput("recipe name is required".into()));
        }
        if self.market.exchange.is_empty()
            || self.market.symbol.is_empty()
            || self.market.timeframe.is_empty()
        {
            return Err(EngineError::InvalidInput(
                "market configuration incomplete (exchange, symbol, timeframe required)".into(),
            ));
        }
        if self.capital.initial <= 0.0 {
            return Err(EngineError::InvalidInput(
                "initial capital must be > 0".into(),
            ));
        }
        if self.entry_conditions.rules.is_empty() {
            tracing::warn!(recipe = %self.name, "recipe has no entry conditions");
        }
        if self.exit_conditions.rules.is_empty() {
            tracing::warn!(recipe = %self.name, "recipe has no exit conditions");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
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
    fn loads_the_canonical_example() {
        let recipe = Recipe::load_from_str(EXAMPLE).unwrap();
        assert_eq!(recipe.name, "rsi_mean_reversion");
        assert_eq!(recipe.indicators[0].name, "rsi");
        assert_eq!(recipe.entry_conditions.rules.len(), 1);
    }

    #[test]
    fn rejects_missing_name() {
        let bad = EXAMPLE.replacen("rsi_mean_reversion", "", 1);
        assert!(Recipe::load_from_str(&bad).is_err());
    }

    #[test]
    fn rejects_nonpositive_capital() {
        let bad = EXAMPLE.replace("\"initial\": 10000", "\"initial\": 0");
        assert!(Recipe::load_from_str(&bad).is_err());
    }
}
