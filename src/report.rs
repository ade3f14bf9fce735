//! Terminal and machine-readable rendering of results.

use crate::engine::BacktestResult;
use crate::error::Result;
use crate::monte_carlo::MonteCarloResult;
use crate::optimizer::{OptimizationResult, ParamSet};
use crate::types::Trade;
use crate::walkforward::WalkForwardResult;
use colored::Colorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Formats results for display.
pub struct ResultFormatter;

impl ResultFormatter {
    fn banner(title: &str) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", format!(" {} ", title).bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();
    }

    /// Format a signed amount with color.
    fn signed(value: f64) -> String {
        if value >= 0.0 {
            format!("+{:.2}", value).green().to_string()
        } else {
            format!("{:.2}", value).red().to_string()
        }
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// `key=value` pairs in key order.
    pub fn format_params(params: &ParamSet) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Print a backtest report to stdout.
    pub fn print_report(result: &BacktestResult) {
        let m = &result.metrics;
        Self::banner("BACKTEST RESULTS");

        println!("{}", "Overview".bold().underline());
        println!("  Strategy:        {}", result.strategy_name);
        if let (Some(first), Some(last)) = (result.equity_curve.first(), result.equity_curve.last())
        {
            println!(
                "  Period:          {} to {}",
                first.timestamp.format("%Y-%m-%d"),
                last.timestamp.format("%Y-%m-%d")
            );
        }
        println!();

        println!("{}", "Performance".bold().underline());
        println!("  Initial Balance: ${:>12.2}", result.initial_balance);
        println!(
            "  Final Equity:    ${:>12.2}  {}",
            result.final_equity(),
            Self::format_pct_change(m.total_return_pct)
        );
        println!("  Net PnL:         ${:>12.2}", m.total_return);
        println!("  Annual Return:   {:>12.2}%", m.annualized_return_pct);
        println!("  Commission:      ${:>12.2}", m.total_commission);
        println!();

        println!("{}", "Risk Metrics".bold().underline());
        println!("  Max Drawdown:    ${:>12.2}", m.max_drawdown);
        println!("  Max Drawdown %:  {:>12.2}%", m.max_drawdown_pct * 100.0);
        println!("  Sharpe Ratio:    {:>12.2}", m.sharpe_ratio);
        println!("  Sortino Ratio:   {:>12.2}", m.sortino_ratio);
        println!("  Calmar Ratio:    {:>12.2}", m.calmar_ratio);
        println!(
            "  Deflated Sharpe: {:>12.2}  (p = {:.3})",
            m.deflated_sharpe_ratio, m.dsr_p_value
        );
        println!();

        println!("{}", "Trade Statistics".bold().underline());
        println!("  Total Trades:    {:>12}", m.total_trades);
        println!(
            "  Winning Trades:  {:>12}  ({:.1}%)",
            m.winning_trades,
            m.win_rate * 100.0
        );
        println!(
            "  Losing Trades:   {:>12}  ({:.1}%)",
            m.losing_trades,
            m.loss_rate * 100.0
        );
        println!("  Profit Factor:   {:>12.2}", m.profit_factor);
        println!("  Win Streak:      {:>12}", m.max_consecutive_wins);
        println!("  Loss Streak:     {:>12}", m.max_consecutive_losses);
        println!();

        println!("{}", "Trade P&L".bold().underline());
        println!("  Average Win:     ${:>11.2}", m.avg_win);
        println!("  Average Loss:    ${:>11.2}", m.avg_loss);
        println!("  Largest Win:     ${:>11.2}", m.largest_win);
        println!("  Largest Loss:    ${:>11.2}", m.largest_loss);
        println!("  Expectancy:      ${:>11.2}", m.expectancy);
        println!("  Payoff Ratio:    {:>12.2}", m.payoff_ratio);
        println!();

        println!("{}", "═".repeat(60).blue());
    }

    /// Table of the most recent `limit` trades.
    pub fn trades_table(trades: &[Trade], limit: usize) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Side", "Size", "Entry", "Exit", "Entry Time", "Exit Time", "PnL", "Reason",
        ]);

        let skip = trades.len().saturating_sub(limit);
        for trade in &trades[skip..] {
            builder.push_record([
                trade.side.to_string(),
                format!("{}", trade.size),
                format!("{:.4}", trade.entry_price),
                format!("{:.4}", trade.exit_price),
                trade.entry_time.format("%Y-%m-%d %H:%M").to_string(),
                trade.exit_time.format("%Y-%m-%d %H:%M").to_string(),
                format!("{:.2}", trade.pnl),
                trade.exit_reason.to_string(),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Ranked optimization results, best first.
    pub fn optimization_table(result: &OptimizationResult) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Rank".to_string(),
            "Parameters".to_string(),
            result.metric.to_string(),
            "Net PnL".to_string(),
            "Max DD %".to_string(),
            "Trades".to_string(),
            "Win Rate".to_string(),
        ]);

        for r in &result.results {
            builder.push_record([
                r.rank.to_string(),
                Self::format_params(&r.params),
                format!("{:.4}", r.metric_value),
                format!("{:.2}", r.metrics.total_return),
                format!("{:.2}", r.metrics.max_drawdown_pct * 100.0),
                r.metrics.total_trades.to_string(),
                format!("{:.1}%", r.metrics.win_rate * 100.0),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_optimization(result: &OptimizationResult) {
        Self::banner("OPTIMIZATION RESULTS");
        println!(
            "  Method: {}   Metric: {}   Evaluated: {}/{}",
            result.method, result.metric, result.evaluated, result.total_combinations
        );
        println!(
            "  Best:   {}  ({} = {:.4})",
            Self::format_params(&result.best_params).bold(),
            result.metric,
            result.best_metric_value
        );
        println!();
        println!("{}", Self::optimization_table(result));

        if !result.sensitivity.is_empty() {
            println!();
            println!("{}", "Parameter Sensitivity".bold().underline());
            for (name, value) in result.most_sensitive() {
                println!("  {:<20} {:.3}", name, value);
            }
        }
    }

    pub fn print_walk_forward(result: &WalkForwardResult) {
        Self::banner("WALK-FORWARD RESULTS");

        let mut builder = Builder::new();
        builder.push_record([
            "Window",
            "In-Sample",
            "Out-of-Sample",
            "Best Params",
            "IS PnL",
            "OOS PnL",
            "OOS Trades",
        ]);
        for w in &result.windows {
            builder.push_record([
                w.index.to_string(),
                format!(
                    "{} .. {}",
                    w.in_sample.start_time.format("%Y-%m-%d"),
                    w.in_sample.end_time.format("%Y-%m-%d")
                ),
                format!(
                    "{} .. {}",
                    w.out_of_sample.start_time.format("%Y-%m-%d"),
                    w.out_of_sample.end_time.format("%Y-%m-%d")
                ),
                Self::format_params(&w.best_params),
                format!("{:.2}", w.in_sample_pnl),
                format!("{:.2}", w.out_of_sample_pnl),
                w.oos_trade_count.to_string(),
            ]);
        }
        println!("{}", builder.build().with(Style::rounded()));
        println!();

        println!("  Windows:          {}", result.num_windows);
        println!("  In-Sample PnL:    {}", Self::signed(result.total_in_sample_pnl));
        println!(
            "  OOS PnL:          {}",
            Self::signed(result.total_out_of_sample_pnl)
        );
        println!("  Robustness Ratio: {:.3}", result.robustness_ratio);
        println!(
            "  OOS Sharpe:       {:.2}",
            result.aggregate_oos_metrics.sharpe_ratio
        );
    }

    pub fn print_monte_carlo(result: &MonteCarloResult) {
        Self::banner("MONTE CARLO RESULTS");
        println!("{}", result.summary());

        let bands = &result.equity_percentiles;
        if let Some(last) = bands.len().checked_sub(1) {
            println!();
            println!("{}", "Final Equity Percentiles".bold().underline());
            for (label, band) in bands.bands() {
                println!("  {:<4} ${:>12.2}", label, band[last]);
            }
        }
    }

    /// Serialize any result as pretty JSON.
    pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(value)?)
    }

    /// Get CSV header.
    pub fn csv_header() -> &'static str {
        "strategy,initial_balance,final_equity,net_pnl,total_return_pct,trades,win_rate,sharpe,max_drawdown_pct"
    }

    /// Export a backtest summary as one CSV line.
    pub fn to_csv_line(result: &BacktestResult) -> String {
        let m = &result.metrics;
        format!(
            "{},{:.2},{:.2},{:.2},{:.2},{},{:.4},{:.4},{:.4}",
            result.strategy_name,
            result.initial_balance,
            result.final_equity(),
            m.total_return,
            m.total_return_pct,
            m.total_trades,
            m.win_rate,
            m.sharpe_ratio,
            m.max_drawdown_pct
        )
    }
}
