//! Performance metrics over a list of completed trades.
//!
//! Everything here is a pure function of the trades and the starting balance.
//! Degenerate inputs (no trades, zero variance, no losses) resolve to fixed
//! default or sentinel values so every field is always a finite number.

use crate::error::BacktestError;
use crate::stats::{self, EULER_GAMMA, PERIODS_PER_YEAR};
use crate::types::Trade;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Profit factor reported when there are no losing trades.
pub const PROFIT_FACTOR_CAP: f64 = 9999.99;

/// Trade-level performance statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub loss_rate: f64,
    /// Net PnL of all trades.
    pub total_return: f64,
    pub total_return_pct: f64,
    pub final_balance: f64,
    pub gross_profit: f64,
    /// Absolute sum of losing trades.
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    /// Mean losing PnL (non-positive).
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    /// Deepest drop from a running equity peak, in currency (non-positive).
    pub max_drawdown: f64,
    /// Deepest drop relative to the running peak, as a fraction (non-positive).
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub annualized_return_pct: f64,
    pub recovery_factor: f64,
    pub expectancy: f64,
    pub expectancy_ratio: f64,
    pub payoff_ratio: f64,
    pub total_commission: f64,
    pub deflated_sharpe_ratio: f64,
    pub dsr_p_value: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            loss_rate: 0.0,
            total_return: 0.0,
            total_return_pct: 0.0,
            final_balance: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            profit_factor: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            annualized_return_pct: 0.0,
            recovery_factor: 0.0,
            expectancy: 0.0,
            expectancy_ratio: 0.0,
            payoff_ratio: 0.0,
            total_commission: 0.0,
            deflated_sharpe_ratio: 0.0,
            dsr_p_value: 1.0,
        }
    }
}

impl Metrics {
    /// All metrics keyed by name.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        let mut map = BTreeMap::new();
        map.insert("total_trades", self.total_trades as f64);
        map.insert("winning_trades", self.winning_trades as f64);
        map.insert("losing_trades", self.losing_trades as f64);
        map.insert("win_rate", self.win_rate);
        map.insert("loss_rate", self.loss_rate);
        map.insert("total_return", self.total_return);
        map.insert("total_return_pct", self.total_return_pct);
        map.insert("final_balance", self.final_balance);
        map.insert("gross_profit", self.gross_profit);
        map.insert("gross_loss", self.gross_loss);
        map.insert("profit_factor", self.profit_factor);
        map.insert("avg_win", self.avg_win);
        map.insert("avg_loss", self.avg_loss);
        map.insert("largest_win", self.largest_win);
        map.insert("largest_loss", self.largest_loss);
        map.insert("max_consecutive_wins", self.max_consecutive_wins as f64);
        map.insert("max_consecutive_losses", self.max_consecutive_losses as f64);
        map.insert("max_drawdown", self.max_drawdown);
        map.insert("max_drawdown_pct", self.max_drawdown_pct);
        map.insert("sharpe_ratio", self.sharpe_ratio);
        map.insert("sortino_ratio", self.sortino_ratio);
        map.insert("calmar_ratio", self.calmar_ratio);
        map.insert("annualized_return_pct", self.annualized_return_pct);
        map.insert("recovery_factor", self.recovery_factor);
        map.insert("expectancy", self.expectancy);
        map.insert("expectancy_ratio", self.expectancy_ratio);
        map.insert("payoff_ratio", self.payoff_ratio);
        map.insert("total_commission", self.total_commission);
        map.insert("deflated_sharpe_ratio", self.deflated_sharpe_ratio);
        map.insert("dsr_p_value", self.dsr_p_value);
        map
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.to_map().get(name).copied()
    }
}

/// Metrics for `trades` against `initial_balance`, assuming a single trial.
pub fn calculate(trades: &[Trade], initial_balance: f64) -> Metrics {
    calculate_with_trials(trades, initial_balance, 1)
}

/// Metrics with the deflated Sharpe corrected for `num_trials` tested
/// parameter combinations.
pub fn calculate_with_trials(trades: &[Trade], initial_balance: f64, num_trials: usize) -> Metrics {
    if trades.is_empty() {
        return Metrics {
            final_balance: initial_balance,
            ..Default::default()
        };
    }

    let n = trades.len();
    let nf = n as f64;
    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();

    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

    let total_return: f64 = pnls.iter().sum();
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum::<f64>().abs();

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        PROFIT_FACTOR_CAP
    };

    let avg_win = stats::mean(&wins);
    let avg_loss = stats::mean(&losses);

    let (max_consecutive_wins, max_consecutive_losses) = streaks(&pnls);
    let (max_drawdown, max_drawdown_pct) = drawdowns(&pnls, initial_balance);

    let base = if initial_balance > 0.0 {
        initial_balance
    } else {
        1.0
    };
    let returns: Vec<f64> = pnls.iter().map(|p| p / base).collect();
    let per_trade_sharpe = per_trade_sharpe(&returns);
    let sharpe_ratio = per_trade_sharpe * PERIODS_PER_YEAR.sqrt();
    let sortino_ratio = sortino(&returns);

    let annualized_return_pct = (total_return / base) * (PERIODS_PER_YEAR / nf) * 100.0;
    let calmar_ratio = if max_drawdown_pct < 0.0 {
        (annualized_return_pct / (max_drawdown_pct * 100.0)).abs()
    } else {
        0.0
    };
    let recovery_factor = if max_drawdown < 0.0 {
        (total_return / max_drawdown).abs()
    } else {
        0.0
    };

    let expectancy = total_return / nf;
    let loss_divisor = if losses.is_empty() || avg_loss == 0.0 {
        1.0
    } else {
        avg_loss.abs()
    };
    let expectancy_ratio = expectancy / loss_divisor;
    let payoff_ratio = if wins.is_empty() || losses.is_empty() || avg_loss == 0.0 {
        0.0
    } else {
        (avg_win / avg_loss).abs()
    };

    let (deflated_sharpe_ratio, dsr_p_value) =
        deflated_sharpe(per_trade_sharpe, n, num_trials);

    Metrics {
        total_trades: n,
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: wins.len() as f64 / nf,
        loss_rate: losses.len() as f64 / nf,
        total_return,
        total_return_pct: total_return / base * 100.0,
        final_balance: initial_balance + total_return,
        gross_profit,
        gross_loss,
        profit_factor,
        avg_win,
        avg_loss,
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
        max_consecutive_wins,
        max_consecutive_losses,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
        annualized_return_pct,
        recovery_factor,
        expectancy,
        expectancy_ratio,
        payoff_ratio,
        total_commission: trades.iter().map(|t| t.commission).sum(),
        deflated_sharpe_ratio,
        dsr_p_value,
    }
}

/// Longest winning and losing runs.
fn streaks(pnls: &[f64]) -> (usize, usize) {
    let mut wins = 0;
    let mut losses = 0;
    let mut max_wins = 0;
    let mut max_losses = 0;
    for &pnl in pnls {
        if pnl > 0.0 {
            wins += 1;
            losses = 0;
            max_wins = max_wins.max(wins);
        } else {
            losses += 1;
            wins = 0;
            max_losses = max_losses.max(losses);
        }
    }
    (max_wins, max_losses)
}

/// Minimum of `equity - peak` and of `(equity - peak) / peak` along the
/// cumulative trade equity curve. Points with a non-positive peak are
/// skipped for the ratio.
fn drawdowns(pnls: &[f64], initial_balance: f64) -> (f64, f64) {
    let mut equity = initial_balance;
    let mut peak = initial_balance;
    let mut max_dd: f64 = 0.0;
    let mut max_dd_pct: f64 = 0.0;

    for &pnl in pnls {
        equity += pnl;
        peak = peak.max(equity);
        let dd = equity - peak;
        max_dd = max_dd.min(dd);
        if peak > 0.0 {
            max_dd_pct = max_dd_pct.min(dd / peak);
        }
    }
    (max_dd, max_dd_pct)
}

/// Mean over sample standard deviation, not annualized.
fn per_trade_sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = stats::std_dev(returns);
    if std == 0.0 {
        return 0.0;
    }
    stats::mean(returns) / std
}

fn sortino(returns: &[f64]) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.len() < 2 {
        return 0.0;
    }
    let downside_dev = stats::std_dev(&downside);
    if downside_dev == 0.0 {
        return 0.0;
    }
    stats::mean(returns) / downside_dev * PERIODS_PER_YEAR.sqrt()
}

/// Expected maximum Sharpe ratio among `num_trials` independent trials
/// under the null hypothesis.
pub fn expected_max_sharpe(num_trials: usize) -> f64 {
    if num_trials <= 1 {
        return 0.0;
    }
    let ln_n = (num_trials as f64).ln();
    let root = (2.0 * ln_n).sqrt();
    root * (1.0 - EULER_GAMMA / (2.0 * ln_n)) + EULER_GAMMA / (2.0 * root)
}

/// Deflated Sharpe ratio and its p-value (Bailey & Lopez de Prado), with the
/// Lo (2002) standard error under normal returns (skew 0, kurtosis 3).
///
/// Returns `(0.0, 1.0)` when the statistic is undefined.
pub fn deflated_sharpe(sharpe: f64, num_observations: usize, num_trials: usize) -> (f64, f64) {
    const SKEW: f64 = 0.0;
    const KURTOSIS: f64 = 3.0;

    if num_observations <= 1 || sharpe == 0.0 || !sharpe.is_finite() {
        return (0.0, 1.0);
    }

    let variance =
        (1.0 - SKEW * sharpe + ((KURTOSIS - 1.0) / 4.0) * sharpe * sharpe)
            / (num_observations - 1) as f64;
    let se = variance.sqrt();
    if se == 0.0 || !se.is_finite() {
        return (0.0, 1.0);
    }

    let dsr = (sharpe - expected_max_sharpe(num_trials)) / se;
    (dsr, 1.0 - stats::normal_cdf(dsr))
}

/// A metric usable as an optimization objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalReturn,
    TotalReturnPct,
    WinRate,
    ProfitFactor,
    #[default]
    SharpeRatio,
    SortinoRatio,
    CalmarRatio,
    RecoveryFactor,
    Expectancy,
    ExpectancyRatio,
    PayoffRatio,
    MaxDrawdown,
    MaxDrawdownPct,
    AnnualizedReturnPct,
    DeflatedSharpeRatio,
    TotalTrades,
}

impl Metric {
    pub const ALL: [Metric; 16] = [
        Metric::TotalReturn,
        Metric::TotalReturnPct,
        Metric::WinRate,
        Metric::ProfitFactor,
        Metric::SharpeRatio,
        Metric::SortinoRatio,
        Metric::CalmarRatio,
        Metric::RecoveryFactor,
        Metric::Expectancy,
        Metric::ExpectancyRatio,
        Metric::PayoffRatio,
        Metric::MaxDrawdown,
        Metric::MaxDrawdownPct,
        Metric::AnnualizedReturnPct,
        Metric::DeflatedSharpeRatio,
        Metric::TotalTrades,
    ];

    /// Extract this metric's value.
    pub fn extract(&self, metrics: &Metrics) -> f64 {
        match self {
            Metric::TotalReturn => metrics.total_return,
            Metric::TotalReturnPct => metrics.total_return_pct,
            Metric::WinRate => metrics.win_rate,
            Metric::ProfitFactor => metrics.profit_factor,
            Metric::SharpeRatio => metrics.sharpe_ratio,
            Metric::SortinoRatio => metrics.sortino_ratio,
            Metric::CalmarRatio => metrics.calmar_ratio,
            Metric::RecoveryFactor => metrics.recovery_factor,
            Metric::Expectancy => metrics.expectancy,
            Metric::ExpectancyRatio => metrics.expectancy_ratio,
            Metric::PayoffRatio => metrics.payoff_ratio,
            Metric::MaxDrawdown => metrics.max_drawdown,
            Metric::MaxDrawdownPct => metrics.max_drawdown_pct,
            Metric::AnnualizedReturnPct => metrics.annualized_return_pct,
            Metric::DeflatedSharpeRatio => metrics.deflated_sharpe_ratio,
            Metric::TotalTrades => metrics.total_trades as f64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::TotalReturn => "total_return",
            Metric::TotalReturnPct => "total_return_pct",
            Metric::WinRate => "win_rate",
            Metric::ProfitFactor => "profit_factor",
            Metric::SharpeRatio => "sharpe_ratio",
            Metric::SortinoRatio => "sortino_ratio",
            Metric::CalmarRatio => "calmar_ratio",
            Metric::RecoveryFactor => "recovery_factor",
            Metric::Expectancy => "expectancy",
            Metric::ExpectancyRatio => "expectancy_ratio",
            Metric::PayoffRatio => "payoff_ratio",
            Metric::MaxDrawdown => "max_drawdown",
            Metric::MaxDrawdownPct => "max_drawdown_pct",
            Metric::AnnualizedReturnPct => "annualized_return_pct",
            Metric::DeflatedSharpeRatio => "deflated_sharpe_ratio",
            Metric::TotalTrades => "total_trades",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let alias = match normalized.as_str() {
            "sharpe" => Some(Metric::SharpeRatio),
            "sortino" => Some(Metric::SortinoRatio),
            "calmar" => Some(Metric::CalmarRatio),
            "pnl" | "net_profit" => Some(Metric::TotalReturn),
            "return" => Some(Metric::TotalReturnPct),
            "dsr" => Some(Metric::DeflatedSharpeRatio),
            _ => None,
        };
        alias
            .or_else(|| Metric::ALL.into_iter().find(|m| m.as_str() == normalized))
            .ok_or_else(|| BacktestError::InvalidInput(format!("Unknown metric: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trades(pnls: &[f64]) -> Vec<Trade> {
        pnls.iter()
            .enumerate()
            .map(|(i, &p)| {
                Trade::with_pnl(
                    p,
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_trades_have_defaults() {
        let m = calculate(&[], 50_000.0);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.dsr_p_value, 1.0);
        assert_eq!(m.final_balance, 50_000.0);
        assert!(m.to_map().values().all(|v| v.is_finite()));
        assert_eq!(m.to_map().len(), 30);
    }

    #[test]
    fn test_reference_scenario() {
        let m = calculate(&trades(&[100.0, 200.0, 150.0, -50.0, -80.0]), 50_000.0);
        assert_eq!(m.total_trades, 5);
        assert!((m.win_rate - 0.6).abs() < 1e-12);
        assert!((m.loss_rate - 0.4).abs() < 1e-12);
        assert!((m.profit_factor - 450.0 / 130.0).abs() < 1e-12);
        assert!((m.profit_factor - 3.46).abs() < 0.01);
        assert_eq!(m.max_consecutive_wins, 3);
        assert_eq!(m.max_consecutive_losses, 2);
        assert!((m.total_return - 320.0).abs() < 1e-12);
        assert!((m.max_drawdown + 130.0).abs() < 1e-12);
        assert!((m.max_drawdown_pct + 130.0 / 50_450.0).abs() < 1e-12);
        assert!((m.expectancy - 64.0).abs() < 1e-12);
        assert!((m.expectancy_ratio - 64.0 / 65.0).abs() < 1e-12);
        assert!((m.payoff_ratio - 150.0 / 65.0).abs() < 1e-12);
        assert!((m.recovery_factor - 320.0 / 130.0).abs() < 1e-12);
        assert!(m.sharpe_ratio > 0.0);
        assert!(m.sortino_ratio > 0.0);
    }

    #[test]
    fn test_no_losses_uses_sentinel() {
        let m = calculate(&trades(&[10.0, 20.0, 30.0]), 1_000.0);
        assert_eq!(m.profit_factor, PROFIT_FACTOR_CAP);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.calmar_ratio, 0.0);
        assert_eq!(m.recovery_factor, 0.0);
        assert_eq!(m.payoff_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        // no losses: divisor falls back to 1.0
        assert!((m.expectancy_ratio - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_pnl_counts_as_loss() {
        let m = calculate(&trades(&[0.0, 10.0]), 1_000.0);
        assert_eq!(m.losing_trades, 1);
        assert!((m.win_rate + m.loss_rate - 1.0).abs() < 1e-12);
        assert_eq!(m.profit_factor, PROFIT_FACTOR_CAP);
    }

    #[test]
    fn test_zero_variance_sharpe() {
        let m = calculate(&trades(&[5.0, 5.0, 5.0, 5.0]), 1_000.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.deflated_sharpe_ratio, 0.0);
        assert_eq!(m.dsr_p_value, 1.0);
    }

    #[test]
    fn test_single_trade() {
        let m = calculate(&trades(&[-25.0]), 1_000.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.max_consecutive_losses, 1);
        assert!((m.max_drawdown + 25.0).abs() < 1e-12);
        assert!(m.calmar_ratio > 0.0);
        assert_eq!(m.dsr_p_value, 1.0);
    }

    #[test]
    fn test_sharpe_uses_sample_std() {
        let pnls = [100.0, -50.0, 200.0, -25.0];
        let m = calculate(&trades(&pnls), 10_000.0);
        let returns: Vec<f64> = pnls.iter().map(|p| p / 10_000.0).collect();
        let expected = stats::mean(&returns) / stats::std_dev(&returns) * 252f64.sqrt();
        assert!((m.sharpe_ratio - expected).abs() < 1e-12);
    }

    #[test]
    fn test_expected_max_sharpe() {
        assert_eq!(expected_max_sharpe(0), 0.0);
        assert_eq!(expected_max_sharpe(1), 0.0);
        let e10 = expected_max_sharpe(10);
        let e100 = expected_max_sharpe(100);
        assert!(e10 > 0.0);
        assert!(e100 > e10);
    }

    #[test]
    fn test_more_trials_deflate_more() {
        let pnls: Vec<f64> = (0..40)
            .map(|i| if i % 3 == 0 { -40.0 } else { 60.0 })
            .collect();
        let one = calculate_with_trials(&trades(&pnls), 10_000.0, 1);
        let many = calculate_with_trials(&trades(&pnls), 10_000.0, 500);
        assert!(many.deflated_sharpe_ratio < one.deflated_sharpe_ratio);
        assert!(many.dsr_p_value > one.dsr_p_value);
        assert!((0.0..=1.0).contains(&many.dsr_p_value));
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("sharpe".parse::<Metric>().unwrap(), Metric::SharpeRatio);
        assert_eq!(
            "profit-factor".parse::<Metric>().unwrap(),
            Metric::ProfitFactor
        );
        assert_eq!("total_return".parse::<Metric>().unwrap(), Metric::TotalReturn);
        assert!("nonsense".parse::<Metric>().is_err());
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
        }
    }

    #[test]
    fn test_metric_extract_matches_map() {
        let m = calculate(&trades(&[100.0, -20.0, 50.0]), 5_000.0);
        for metric in Metric::ALL {
            assert_eq!(Some(metric.extract(&m)), m.get(metric.as_str()));
        }
    }
}
