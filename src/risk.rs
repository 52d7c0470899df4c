//! Live/paper-trading risk gate: caps concurrent positions and halts new
//! entries once the day's realized loss breaches a configured percentage of
//! starting-of-day capital. Deliberately has no trailing-stop concept, kept
//! consistent with the backtest simulator's same omission.

#[derive(Debug, Clone)]
pub struct RiskManager {
    max_daily_loss_percent: f64,
    max_open_positions: u32,
    day_start_capital: f64,
    realized_pnl_today: f64,
}

impl RiskManager {
    pub fn new(max_daily_loss_percent: f64, max_open_positions: u32, day_start_capital: f64) -> Self {
        Self {
            max_daily_loss_percent,
            max_open_positions,
            day_start_capital,
            realized_pnl_today: 0.0,
        }
    }

    /// Records a closed trade's realized PnL against today's running total.
    pub fn record_realized_pnl(&mut self, pnl: f64) {
        self.realized_pnl_today += pnl;
    }

    /// Resets the daily loss counter and rebases it on the new day's
    /// starting capital. Callers invoke this once per trading day boundary.
    pub fn start_new_day(&mut self, day_start_capital: f64) {
        self.day_start_capital = day_start_capital;
        self.realized_pnl_today = 0.0;
    }

    fn daily_loss_percent(&self) -> f64 {
        if self.day_start_capital <= 0.0 {
            return 0.0;
        }
        (-self.realized_pnl_today / self.day_start_capital) * 100.0
    }

    pub fn daily_loss_breached(&self) -> bool {
        self.daily_loss_percent() >= self.max_daily_loss_percent
    }

    /// Whether a new entry is permitted given the current open-position
    /// count and today's realized PnL.
    pub fn can_open_position(&self, open_positions: u32) -> bool {
        if self.daily_loss_breached() {
            tracing::warn!(
                loss_pct = self.daily_loss_percent(),
                limit = self.max_daily_loss_percent,
                "daily loss limit breached, rejecting new entry"
            );
            return false;
        }
        if open_positions >= self.max_open_positions {
            tracing::warn!(
                open_positions,
                limit = self.max_open_positions,
                "max open positions reached, rejecting new entry"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_new_entries_once_daily_loss_limit_is_breached() {
        let mut risk = RiskManager::new(5.0, 3, 10_000.0);
        assert!(risk.can_open_position(0));

        risk.record_realized_pnl(-600.0);
        assert!(risk.daily_loss_breached());
        assert!(!risk.can_open_position(0));
    }

    #[test]
    fn rejects_new_entries_once_max_open_positions_reached() {
        let risk = RiskManager::new(5.0, 2, 10_000.0);
        assert!(risk.can_open_position(1));
        assert!(!risk.can_open_position(2));
    }

    #[test]
    fn start_new_day_resets_the_realized_pnl_counter() {
        let mut risk = RiskManager::new(5.0, 3, 10_000.0);
        risk.record_realized_pnl(-600.0);
        assert!(risk.daily_loss_breached());

        risk.start_new_day(10_000.0);
        assert!(!risk.daily_loss_breached());
        assert!(risk.can_open_position(0));
    }
}
