//! Cash + open-position ledger for the backtest simulator.

use crate::types::{Trade, TradeStatus, TradeType};

pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    next_trade_id: u64,
    open_trades: Vec<Trade>,
    closed_trades: Vec<Trade>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        tracing::info!(capital = initial_capital, "portfolio initialized");
        Self {
            initial_capital,
            cash: initial_capital,
            next_trade_id: 1,
            open_trades: Vec::new(),
            closed_trades: Vec::new(),
        }
    }

    fn generate_trade_id(&mut self) -> String {
        let id = format!("T{}", self.next_trade_id);
        self.next_trade_id += 1;
        id
    }

    /// Requires `cash >= entryPrice * quantity + commission + slippage`;
    /// leaves state unchanged on rejection.
    pub fn open_position(&mut self, mut trade: Trade, commission: f64, slippage: f64) -> bool {
        let position_cost = trade.entry_price * trade.quantity;
        let total_cost = position_cost + commission + slippage;

        if total_cost > self.cash {
            tracing::warn!(
                needed = total_cost,
                have = self.cash,
                "insufficient cash to open position"
            );
            return false;
        }

        if trade.id.is_empty() {
            trade.id = self.generate_trade_id();
        }
        trade.status = TradeStatus::Open;
        trade.commission = commission;
        trade.slippage = slippage;

        self.cash -= total_cost;
        tracing::info!(id = %trade.id, price = trade.entry_price, qty = trade.quantity, "opened position");
        self.open_trades.push(trade);
        true
    }

    /// Locates the trade by ID, moves it from open to closed, and credits
    /// cash. Returns false (no-op) if the ID is not found among open
    /// trades.
    pub fn close_position(
        &mut self,
        trade_id: &str,
        exit_price: f64,
        reason: &str,
        commission: f64,
        slippage: f64,
        exit_time: i64,
    ) -> bool {
        let Some(pos) = self.open_trades.iter().position(|t| t.id == trade_id) else {
            tracing::warn!(id = trade_id, "trade not found");
            return false;
        };

        let mut trade = self.open_trades.remove(pos);
        trade.exit_price = exit_price;
        trade.exit_reason = reason.to_string();
        trade.status = TradeStatus::Closed;
        trade.exit_time = exit_time;
        trade.commission += commission;
        trade.slippage += slippage;

        let entry_value = trade.entry_price * trade.quantity;
        trade.pnl = match trade.trade_type {
            TradeType::Long => {
                (exit_price - trade.entry_price) * trade.quantity - trade.commission - trade.slippage
            }
            TradeType::Short => {
                (trade.entry_price - exit_price) * trade.quantity - trade.commission - trade.slippage
            }
        };
        trade.pnl_percent = if entry_value != 0.0 {
            trade.pnl / entry_value * 100.0
        } else {
            0.0
        };

        let position_value = exit_price * trade.quantity;
        self.cash += position_value - commission - slippage;

        tracing::info!(id = %trade.id, pnl = trade.pnl, reason, "closed position");
        self.closed_trades.push(trade);
        true
    }

    /// `cash + sum(open_trade.qty * current_price)`, or `entry_price` per
    /// trade (zero unrealized PnL) when `current_price == 0`.
    pub fn equity(&self, current_price: f64) -> f64 {
        let mut equity = self.cash;
        for trade in &self.open_trades {
            let price = if current_price > 0.0 {
                current_price
            } else {
                trade.entry_price
            };
            equity += price * trade.quantity;
        }
        equity
    }

    pub fn position_value(&self, current_price: f64) -> f64 {
        self.open_trades
            .iter()
            .map(|t| {
                let price = if current_price > 0.0 {
                    current_price
                } else {
                    t.entry_price
                };
                price * t.quantity
            })
            .sum()
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn open_trades(&self) -> &[Trade] {
        &self.open_trades
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    pub fn open_trades_count(&self) -> usize {
        self.open_trades.len()
    }

    pub fn reset(&mut self, new_initial_capital: f64) {
        self.initial_capital = new_initial_capital;
        self.cash = new_initial_capital;
        self.open_trades.clear();
        self.closed_trades.clear();
        self.next_trade_id = 1;
        tracing::info!(capital = new_initial_capital, "portfolio reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;

    fn long_trade(price: f64, qty: f64) -> Trade {
        Trade::new_long(Symbol::new("BTCUSDT"), price, qty, 0)
    }

    #[test]
    fn open_position_rejects_when_cash_insufficient() {
        let mut p = Portfolio::new(100.0);
        assert!(!p.open_position(long_trade(10.0, 20.0), 0.0, 0.0));
        assert_eq!(p.cash(), 100.0);
    }

    #[test]
    fn open_then_close_credits_cash_and_records_pnl() {
        let mut p = Portfolio::new(1000.0);
        assert!(p.open_position(long_trade(100.0, 5.0), 1.0, 0.5));
        assert_eq!(p.cash(), 1000.0 - 500.0 - 1.5);

        let id = p.open_trades()[0].id.clone();
        assert!(p.close_position(&id, 110.0, "Exit Signal", 1.0, 0.5, 10));

        let closed = &p.closed_trades()[0];
        assert_eq!(closed.pnl, (110.0 - 100.0) * 5.0 - 2.0 - 1.0);
        assert!(p.open_trades().is_empty());
    }

    #[test]
    fn closing_unknown_id_is_noop() {
        let mut p = Portfolio::new(1000.0);
        assert!(!p.close_position("T99", 100.0, "Exit Signal", 0.0, 0.0, 0));
    }

    #[test]
    fn equity_uses_entry_price_when_current_price_zero() {
        let mut p = Portfolio::new(1000.0);
        p.open_position(long_trade(100.0, 2.0), 0.0, 0.0);
        assert_eq!(p.equity(0.0), p.cash() + 200.0);
    }

    #[test]
    fn trade_ids_are_monotonic() {
        let mut p = Portfolio::new(10_000.0);
        p.open_position(long_trade(10.0, 1.0), 0.0, 0.0);
        p.open_position(long_trade(10.0, 1.0), 0.0, 0.0);
        let ids: Vec<&str> = p.open_trades().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
    }
}
