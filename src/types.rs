//! Core data types shared across the engine: candles, trades, signals, and
//! the portfolio/backtest record shapes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data.
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },
}

/// One time-bucketed OHLCV sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub exchange: String,
    pub symbol: Symbol,
    pub timeframe: String,
    /// Epoch seconds, aligned to the timeframe boundary.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: impl Into<String>,
        symbol: Symbol,
        timeframe: impl Into<String>,
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            exchange: exchange.into(),
            symbol,
            timeframe: timeframe.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }
        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }
        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Read-only projections over a candle slice. Length equals candle count;
/// positional alignment with the source candles is contractual.
pub struct PriceSeries;

impl PriceSeries {
    pub fn close(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.close).collect()
    }

    pub fn high(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.high).collect()
    }

    pub fn low(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.low).collect()
    }

    pub fn volume(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.volume).collect()
    }
}

/// Trading pair symbol using `Arc<str>` for cheap cloning: symbols are
/// frequently cloned when passed to recipes, trades, and listener maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_lowercase(&self) -> String {
        self.0.to_lowercase()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

/// Direction of a backtest position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

/// A backtest position, open or closed. While `OPEN`, `exit_price` and
/// `exit_time` are zero; PnL fields are only meaningful once `CLOSED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: Symbol,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub status: TradeStatus,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub entry_time: i64,
    pub exit_time: i64,
    pub commission: f64,
    pub slippage: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub entry_reason: String,
    pub exit_reason: String,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
}

impl Trade {
    pub fn new_long(symbol: Symbol, entry_price: f64, quantity: f64, entry_time: i64) -> Self {
        Self {
            id: String::new(),
            symbol,
            trade_type: TradeType::Long,
            status: TradeStatus::Open,
            entry_price,
            exit_price: 0.0,
            quantity,
            entry_time,
            exit_time: 0,
            commission: 0.0,
            slippage: 0.0,
            pnl: 0.0,
            pnl_percent: 0.0,
            entry_reason: String::new(),
            exit_reason: String::new(),
            stop_loss_price: 0.0,
            take_profit_price: 0.0,
        }
    }
}

/// Signal emitted by the signal generator for one candle index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Buy,
    Sell,
    None,
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub signal_type: SignalType,
    pub symbol: Symbol,
    pub price: f64,
    pub timestamp: i64,
    pub reason: String,
}

impl Signal {
    pub fn none(symbol: Symbol, price: f64, timestamp: i64) -> Self {
        Self {
            signal_type: SignalType::None,
            symbol,
            price,
            timestamp,
            reason: String::new(),
        }
    }
}

/// One sample of the equity curve, recorded once per processed candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
    pub cash: f64,
    pub position_value: f64,
}

/// Full outcome of a backtest run, before `PerformanceAnalyzer` enriches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub recipe_name: String,
    pub symbol: String,
    pub start_time: i64,
    pub end_time: i64,
    pub total_candles: usize,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub peak_equity: f64,
    pub trades: Vec<Trade>,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub equity_curve: Vec<EquityPoint>,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    pub win_rate: f64,
}

impl Default for BacktestResult {
    fn default() -> Self {
        Self {
            recipe_name: String::new(),
            symbol: String::new(),
            start_time: 0,
            end_time: 0,
            total_candles: 0,
            initial_capital: 0.0,
            final_equity: 0.0,
            peak_equity: 0.0,
            trades: Vec::new(),
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            equity_curve: Vec::new(),
            total_commission: 0.0,
            total_slippage: 0.0,
            total_return: 0.0,
            total_return_percent: 0.0,
            win_rate: 0.0,
        }
    }
}

/// Risk-adjusted metrics computed by `PerformanceAnalyzer` from a
/// `BacktestResult`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return_percent: f64,
    pub annualized_return_percent: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_percent: f64,
    pub max_drawdown_days: usize,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub average_win: f64,
    pub average_loss: f64,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("websocket error: {0}")]
    WebSocketError(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
