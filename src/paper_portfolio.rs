//! Live paper-trading ledger, kept separate from the backtest `Portfolio`
//! (§4.3): one position per symbol, averaged entry price on repeated buys,
//! and price-driven unrealized PnL refreshed from ticker events.

use std::collections::HashMap;

use crate::types::{EngineError, EngineResult, Symbol};

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: f64,
    pub average_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
}

impl Position {
    fn refresh_pnl(&mut self) {
        self.unrealized_pnl = (self.current_price - self.average_entry_price) * self.quantity;
        self.unrealized_pnl_percent = if self.average_entry_price > 0.0 {
            (self.current_price - self.average_entry_price) / self.average_entry_price * 100.0
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct PaperTrade {
    pub symbol: Symbol,
    pub side: PaperOrderSide,
    pub quantity: f64,
    pub execution_price: f64,
    pub fee: f64,
    pub timestamp: i64,
}

/// A separate lightweight ledger for live paper trading: no open/closed
/// trade history like the backtest `Portfolio`, just current positions and
/// a flat append-only order log.
#[derive(Debug, Clone)]
pub struct PaperPortfolio {
    pub initial_balance: f64,
    pub balance: f64,
    pub positions: HashMap<String, Position>,
    pub trade_history: Vec<PaperTrade>,
    pub fee_rate: f64,
    pub default_slippage: f64,
}

impl PaperPortfolio {
    pub fn new(initial_balance: f64, fee_rate: f64, default_slippage: f64) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: HashMap::new(),
            trade_history: Vec::new(),
            fee_rate,
            default_slippage,
        }
    }

    /// `timestamp` is epoch-seconds supplied by the caller (ticker event
    /// time), never sampled internally.
    pub fn buy(
        &mut self,
        symbol: &Symbol,
        quantity: f64,
        price: f64,
        slippage: f64,
        timestamp: i64,
    ) -> EngineResult<()> {
        if quantity <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "buy quantity must be positive, got {quantity}"
            )));
        }
        let exec_price = price * (1.0 + slippage);
        let cost = quantity * exec_price;
        let fee = cost * self.fee_rate;
        let total = cost + fee;

        if total > self.balance {
            return Err(EngineError::InsufficientCash {
                required: total,
                available: self.balance,
            });
        }

        self.balance -= total;

        let key = symbol.as_str().to_string();
        match self.positions.get_mut(&key) {
            Some(existing) => {
                let new_qty = existing.quantity + quantity;
                existing.average_entry_price =
                    (existing.average_entry_price * existing.quantity + exec_price * quantity) / new_qty;
                existing.quantity = new_qty;
                existing.current_price = price;
                existing.refresh_pnl();
            }
            None => {
                let mut position = Position {
                    symbol: symbol.clone(),
                    quantity,
                    average_entry_price: exec_price,
                    current_price: price,
                    unrealized_pnl: 0.0,
                    unrealized_pnl_percent: 0.0,
                };
                position.refresh_pnl();
                self.positions.insert(key, position);
            }
        }

        self.trade_history.push(PaperTrade {
            symbol: symbol.clone(),
            side: PaperOrderSide::Buy,
            quantity,
            execution_price: exec_price,
            fee,
            timestamp,
        });
        Ok(())
    }

    pub fn sell(
        &mut self,
        symbol: &Symbol,
        quantity: f64,
        price: f64,
        slippage: f64,
        timestamp: i64,
    ) -> EngineResult<()> {
        if quantity <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "sell quantity must be positive, got {quantity}"
            )));
        }

        let key = symbol.as_str().to_string();
        let held = self
            .positions
            .get(&key)
            .map(|p| p.quantity)
            .ok_or_else(|| EngineError::InvalidInput(format!("no open position in {}", symbol.as_str())))?;

        if quantity > held {
            return Err(EngineError::InvalidInput(format!(
                "sell quantity {quantity} exceeds held quantity {held}"
            )));
        }

        let exec_price = price * (1.0 - slippage);
        let proceeds = quantity * exec_price;
        let fee = proceeds * self.fee_rate;
        self.balance += proceeds - fee;

        let position = self.positions.get_mut(&key).expect("checked above");
        position.quantity -= quantity;
        if position.quantity < 1e-4 {
            self.positions.remove(&key);
        } else {
            position.current_price = price;
            position.refresh_pnl();
        }

        self.trade_history.push(PaperTrade {
            symbol: symbol.clone(),
            side: PaperOrderSide::Sell,
            quantity,
            execution_price: exec_price,
            fee,
            timestamp,
        });
        Ok(())
    }

    /// Refreshes a held position's mark price and recomputed unrealized PnL.
    /// A no-op if there is no position in `symbol`.
    pub fn update_price(&mut self, symbol: &Symbol, new_price: f64) {
        if let Some(position) = self.positions.get_mut(symbol.as_str()) {
            position.current_price = new_price;
            position.refresh_pnl();
        }
    }

    /// `balance + Σ unrealized_pnl + Σ (entry_notional)`, which is
    /// algebraically `balance + Σ (quantity × current_price)` — cash plus
    /// the current mark-to-market value of every open position.
    pub fn equity(&self) -> f64 {
        let positions_value: f64 = self
            .positions
            .values()
            .map(|p| p.unrealized_pnl + p.average_entry_price * p.quantity)
            .sum();
        self.balance + positions_value
    }
}
