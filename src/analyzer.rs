//! Enriches a `BacktestResult` with risk-adjusted metrics and renders
//! human/machine reports.

use statrs::statistics::Statistics;

use crate::types::{BacktestResult, PerformanceMetrics, Trade};

const SECONDS_PER_YEAR: f64 = 31_557_600.0;
const PROFIT_FACTOR_SENTINEL: f64 = 999.99;
const QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH", "BNB"];

pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    pub fn analyze(result: &BacktestResult) -> PerformanceMetrics {
        let total_return_percent = result.total_return_percent;
        let annualized_return_percent = Self::annualized_return(result);
        let returns = Self::returns(result);

        let (sharpe_ratio, sortino_ratio) = if returns.is_empty() {
            (0.0, 0.0)
        } else {
            (Self::sharpe(&returns), Self::sortino(&returns))
        };

        let (max_drawdown_percent, max_drawdown_days) = Self::max_drawdown(result);
        let profit_factor = Self::profit_factor(&result.trades);
        let (expectancy, average_win, average_loss) = Self::expectancy(&result.trades);

        PerformanceMetrics {
            total_return_percent,
            annualized_return_percent,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown_percent,
            max_drawdown_days,
            profit_factor,
            expectancy,
            average_win,
            average_loss,
        }
    }

    fn annualized_return(result: &BacktestResult) -> f64 {
        let elapsed = (result.end_time - result.start_time) as f64;
        if elapsed <= 0.0 || result.initial_capital <= 0.0 {
            return 0.0;
        }
        let years = elapsed / SECONDS_PER_YEAR;
        ((result.final_equity / result.initial_capital).powf(1.0 / years) - 1.0) * 100.0
    }

    fn returns(result: &BacktestResult) -> Vec<f64> {
        result
            .equity_curve
            .windows(2)
            .filter(|w| w[0].equity > 0.0)
            .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
            .collect()
    }

    fn sharpe(returns: &[f64]) -> f64 {
        let mean = returns.to_vec().mean();
        let stddev = returns.to_vec().std_dev();
        if stddev == 0.0 || stddev.is_nan() {
            0.0
        } else {
            mean / stddev
        }
    }

    fn sortino(returns: &[f64]) -> f64 {
        let mean = returns.to_vec().mean();
        let downside: Vec<f64> = returns.iter().filter(|&&r| r < mean).copied().collect();
        if downside.is_empty() {
            return 0.0;
        }
        let downside_stddev = downside.to_vec().std_dev();
        if downside_stddev == 0.0 || downside_stddev.is_nan() {
            0.0
        } else {
            mean / downside_stddev
        }
    }

    fn max_drawdown(result: &BacktestResult) -> (f64, usize) {
        let mut peak = result.initial_capital;
        let mut max_dd = 0.0;
        let mut streak = 0usize;
        let mut longest_streak = 0usize;

        for point in &result.equity_curve {
            if point.equity > peak {
                peak = point.equity;
                streak = 0;
            } else {
                streak += 1;
                longest_streak = longest_streak.max(streak);
            }
            if peak > 0.0 {
                let dd = (peak - point.equity) / peak * 100.0;
                max_dd = max_dd.max(dd);
            }
        }

        (max_dd, longest_streak)
    }

    fn profit_factor(trades: &[Trade]) -> f64 {
        let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();

        if gross_loss == 0.0 {
            if gross_profit > 0.0 {
                PROFIT_FACTOR_SENTINEL
            } else {
                0.0
            }
        } else {
            gross_profit / gross_loss
        }
    }

    fn expectancy(trades: &[Trade]) -> (f64, f64, f64) {
        if trades.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let total: f64 = trades.iter().map(|t| t.pnl).sum();
        let expectancy = total / trades.len() as f64;

        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();
        let average_win = if wins.is_empty() { 0.0 } else { wins.iter().sum::<f64>() / wins.len() as f64 };
        let average_loss = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };

        (expectancy, average_win, average_loss)
    }

    /// Longest run of consecutive closed trades, in order, whose pnl does
    /// not exceed zero -- a zero-pnl trade counts toward this streak, unlike
    /// the simulator's own winning/losing trade counters.
    fn losing_streak(trades: &[Trade]) -> usize {
        let mut longest = 0usize;
        let mut current = 0usize;
        for t in trades {
            if t.pnl <= 0.0 {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest
    }

    fn winning_streak(trades: &[Trade]) -> usize {
        let mut longest = 0usize;
        let mut current = 0usize;
        for t in trades {
            if t.pnl > 0.0 {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest
    }

    pub fn generate_text_report(result: &BacktestResult, metrics: &PerformanceMetrics) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}\n", "=".repeat(60)));
        out.push_str(&format!("STRATEGY: {}\n", result.recipe_name));
        out.push_str(&format!("SYMBOL:   {}\n", result.symbol));
        out.push_str(&format!("{}\n\n", "=".repeat(60)));

        out.push_str("-- Capital --\n");
        out.push_str(&format!("Initial Capital:     {:.2}\n", result.initial_capital));
        out.push_str(&format!("Final Equity:         {:.2}\n", result.final_equity));
        out.push_str(&format!("Peak Equity:          {:.2}\n\n", result.peak_equity));

        out.push_str("-- Returns --\n");
        out.push_str(&format!("Total Return:         {:.2}%\n", metrics.total_return_percent));
        out.push_str(&format!("Annualized Return:    {:.2}%\n\n", metrics.annualized_return_percent));

        out.push_str("-- Risk Metrics --\n");
        out.push_str(&format!("Sharpe Ratio:         {:.2}\n", metrics.sharpe_ratio));
        out.push_str(&format!("Sortino Ratio:        {:.2}\n", metrics.sortino_ratio));
        out.push_str(&format!("Max Drawdown:         {:.2}%\n", metrics.max_drawdown_percent));
        out.push_str(&format!("Max Drawdown Days:    {}\n\n", metrics.max_drawdown_days));

        out.push_str("-- Trading Stats --\n");
        out.push_str(&format!("Total Trades:         {}\n", result.total_trades));
        out.push_str(&format!("Winning Trades:       {}\n", result.winning_trades));
        out.push_str(&format!("Losing Trades:        {}\n", result.losing_trades));
        out.push_str(&format!("Win Rate:             {:.2}%\n", result.win_rate));
        out.push_str(&format!("Profit Factor:        {:.2}\n", metrics.profit_factor));
        out.push_str(&format!("Expectancy:           {:.2}\n", metrics.expectancy));
        out.push_str(&format!("Average Win:          {:.2}\n", metrics.average_win));
        out.push_str(&format!("Average Loss:         {:.2}\n\n", metrics.average_loss));

        out.push_str("-- Costs --\n");
        out.push_str(&format!("Total Commission:     {:.2}\n", result.total_commission));
        out.push_str(&format!("Total Slippage:       {:.2}\n", result.total_slippage));

        out
    }

    fn split_symbol(full: &str) -> (String, String) {
        for quote in QUOTE_SUFFIXES {
            if full.ends_with(quote) && full.len() > quote.len() {
                let base = &full[..full.len() - quote.len()];
                return (base.to_string(), quote.to_string());
            }
        }
        (full.to_string(), "UNKNOWN".to_string())
    }

    pub fn generate_json_report(result: &BacktestResult, metrics: &PerformanceMetrics) -> serde_json::Value {
        let (base, quote) = Self::split_symbol(&result.symbol);

        let best_trade = result.trades.iter().map(|t| t.pnl).fold(f64::MIN, f64::max);
        let worst_trade = result.trades.iter().map(|t| t.pnl).fold(f64::MAX, f64::min);

        let trades: Vec<serde_json::Value> = result
            .trades
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "entryTime": t.entry_time,
                    "exitTime": t.exit_time,
                    "entryPrice": t.entry_price,
                    "exitPrice": t.exit_price,
                    "quantity": t.quantity,
                    "pnl": t.pnl,
                    "pnlPercent": t.pnl_percent,
                    "exitReason": t.exit_reason,
                })
            })
            .collect();

        serde_json::json!({
            "symbol": {"full": result.symbol, "base": base, "quote": quote},
            "period": {"start": result.start_time, "end": result.end_time, "candles": result.total_candles},
            "capital": {"initial": result.initial_capital, "final": result.final_equity, "peak": result.peak_equity},
            "returns": {
                "totalPercent": metrics.total_return_percent,
                "annualizedPercent": metrics.annualized_return_percent,
            },
            "risk": {
                "sharpeRatio": metrics.sharpe_ratio,
                "sortinoRatio": metrics.sortino_ratio,
                "maxDrawdownPercent": metrics.max_drawdown_percent,
                "maxDrawdownDays": metrics.max_drawdown_days,
            },
            "trading": {
                "totalTrades": result.total_trades,
                "winningTrades": result.winning_trades,
                "losingTrades": result.losing_trades,
                "winRate": result.win_rate,
                "expectancy": metrics.expectancy,
                "averageWin": metrics.average_win,
                "averageLoss": metrics.average_loss,
            },
            "costs": {
                "totalCommission": result.total_commission,
                "totalSlippage": result.total_slippage,
            },
            "performance": {
                "profitFactor": metrics.profit_factor,
                "bestTrade": if result.trades.is_empty() { 0.0 } else { best_trade },
                "worstTrade": if result.trades.is_empty() { 0.0 } else { worst_trade },
                "longestWinningStreak": Self::winning_streak(&result.trades),
                "longestLosingStreak": Self::losing_streak(&result.trades),
            },
            "trades": trades,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EquityPoint, TradeStatus, TradeType};

    fn trade(pnl: f64) -> Trade {
        Trade {
            id: "T1".into(),
            symbol: crate::types::Symbol::new("BTCUSDT"),
            trade_type: TradeType::Long,
            status: TradeStatus::Closed,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            quantity: 1.0,
            entry_time: 0,
            exit_time: 1,
            commission: 0.0,
            slippage: 0.0,
            pnl,
            pnl_percent: pnl,
            entry_reason: String::new(),
            exit_reason: "Exit Signal".into(),
            stop_loss_price: 0.0,
            take_profit_price: 0.0,
        }
    }

    fn base_result(trades: Vec<Trade>, equity_curve: Vec<EquityPoint>) -> BacktestResult {
        BacktestResult {
            recipe_name: "test".into(),
            symbol: "BTCUSDT".into(),
            start_time: 0,
            end_time: (equity_curve.len() as i64).max(1) * 3600,
            total_candles: equity_curve.len(),
            initial_capital: 1000.0,
            final_equity: equity_curve.last().map(|p| p.equity).unwrap_or(1000.0),
            peak_equity: equity_curve.iter().map(|p| p.equity).fold(1000.0, f64::max),
            trades,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            equity_curve,
            total_commission: 0.0,
            total_slippage: 0.0,
            total_return: 0.0,
            total_return_percent: 0.0,
            win_rate: 0.0,
        }
    }

    #[test]
    fn zero_losses_with_wins_reports_sentinel_profit_factor() {
        let trades = vec![trade(10.0), trade(20.0)];
        let result = base_result(trades, vec![]);
        let metrics = PerformanceAnalyzer::analyze(&result);
        assert_eq!(metrics.profit_factor, PROFIT_FACTOR_SENTINEL);
    }

    #[test]
    fn zero_pnl_trade_counts_toward_losing_streak_but_not_either_bucket() {
        let trades = vec![trade(5.0), trade(0.0), trade(0.0), trade(-5.0)];
        assert_eq!(PerformanceAnalyzer::losing_streak(&trades), 3);
        assert_eq!(PerformanceAnalyzer::winning_streak(&trades), 1);
    }

    #[test]
    fn max_drawdown_tracks_the_worst_peak_to_trough_decline() {
        let curve = vec![
            EquityPoint { timestamp: 0, equity: 1000.0, cash: 1000.0, position_value: 0.0 },
            EquityPoint { timestamp: 1, equity: 1200.0, cash: 1200.0, position_value: 0.0 },
            EquityPoint { timestamp: 2, equity: 900.0, cash: 900.0, position_value: 0.0 },
            EquityPoint { timestamp: 3, equity: 1100.0, cash: 1100.0, position_value: 0.0 },
        ];
        let result = base_result(vec![], curve);
        let (dd, _) = PerformanceAnalyzer::max_drawdown(&result);
        assert!((dd - 25.0).abs() < 1e-9);
    }

    #[test]
    fn symbol_split_strips_known_quote_suffixes() {
        assert_eq!(PerformanceAnalyzer::split_symbol("BTCUSDT"), ("BTC".into(), "USDT".into()));
        assert_eq!(PerformanceAnalyzer::split_symbol("ETHBTC"), ("ETH".into(), "BTC".into()));
        assert_eq!(PerformanceAnalyzer::split_symbol("WEIRD"), ("WEIRD".into(), "UNKNOWN".into()));
    }

    #[test]
    fn zero_elapsed_time_yields_zero_annualized_return() {
        let mut result = base_result(vec![], vec![]);
        result.start_time = 100;
        result.end_time = 100;
        assert_eq!(PerformanceAnalyzer::annualized_return(&result), 0.0);
    }
}
