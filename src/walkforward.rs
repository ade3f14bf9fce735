//! Walk-forward analysis.
//!
//! The bar table is cut into consecutive windows. Each window is split into a
//! leading in-sample block, where the parameter grid is optimized, and a
//! trailing out-of-sample block, where the winning parameters are replayed on
//! data the optimizer never saw. Comparing the two tells how much of the
//! in-sample edge survives.

use crate::data::validate_bars;
use crate::engine::{BacktestConfig, Engine};
use crate::error::{BacktestError, Result};
use crate::metrics::{self, Metrics};
use crate::optimizer::{Optimizer, OptimizerConfig, ParamGrid, ParamSet};
use crate::strategy::StrategyInstance;
use crate::types::{Bar, Trade};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration for walk-forward analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Number of windows the table is cut into.
    pub num_windows: usize,
    /// Fraction of each window used in-sample, strictly between 0 and 1.
    pub in_sample_ratio: f64,
    /// Windows with fewer in-sample bars are skipped.
    pub min_in_sample_bars: usize,
    /// Windows with fewer out-of-sample bars are skipped.
    pub min_out_of_sample_bars: usize,
    /// Grow the in-sample block from the start of the table instead of rolling it.
    #[serde(default)]
    pub anchored: bool,
    /// Process windows on the rayon pool.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_parallel() -> bool {
    true
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            num_windows: 5,
            in_sample_ratio: 0.7,
            min_in_sample_bars: 20,
            min_out_of_sample_bars: 5,
            anchored: false,
            parallel: true,
        }
    }
}

impl WalkForwardConfig {
    pub fn new(num_windows: usize, in_sample_ratio: f64) -> Self {
        Self {
            num_windows,
            in_sample_ratio,
            ..Default::default()
        }
    }

    /// Use anchored (growing) windows instead of rolling windows.
    pub fn with_anchored(mut self) -> Self {
        self.anchored = true;
        self
    }

    pub fn with_min_bars(mut self, in_sample: usize, out_of_sample: usize) -> Self {
        self.min_in_sample_bars = in_sample;
        self.min_out_of_sample_bars = out_of_sample;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_windows == 0 {
            return Err(BacktestError::config("num_windows must be positive"));
        }
        if !(self.in_sample_ratio > 0.0 && self.in_sample_ratio < 1.0) {
            return Err(BacktestError::config(format!(
                "in_sample_ratio must be between 0 and 1, got {}",
                self.in_sample_ratio
            )));
        }
        if self.min_in_sample_bars == 0 || self.min_out_of_sample_bars == 0 {
            return Err(BacktestError::config(
                "Minimum window sizes must be at least one bar",
            ));
        }
        Ok(())
    }
}

/// A contiguous slice of the bar table, `start_index..end_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRange {
    pub start_index: usize,
    /// Exclusive.
    pub end_index: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BarRange {
    fn new(bars: &[Bar], start_index: usize, end_index: usize) -> Self {
        Self {
            start_index,
            end_index,
            start_time: bars[start_index].timestamp,
            end_time: bars[end_index - 1].timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice<'a>(&self, bars: &'a [Bar]) -> &'a [Bar] {
        &bars[self.start_index..self.end_index]
    }
}

/// Window boundaries before any evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub index: usize,
    pub in_sample: BarRange,
    pub out_of_sample: BarRange,
}

/// Outcome of one evaluated window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub index: usize,
    pub in_sample: BarRange,
    pub out_of_sample: BarRange,
    pub best_params: ParamSet,
    /// Net PnL of the best parameters in-sample.
    pub in_sample_pnl: f64,
    /// Net PnL of the same parameters out-of-sample.
    pub out_of_sample_pnl: f64,
    /// Objective value of the best in-sample combination.
    pub in_sample_metric: f64,
    pub oos_trade_count: usize,
    #[serde(skip)]
    oos_trades: Vec<Trade>,
}

impl WindowResult {
    /// OOS PnL relative to IS PnL; 0 when the in-sample run lost money.
    pub fn efficiency(&self) -> f64 {
        if self.in_sample_pnl > 0.0 {
            self.out_of_sample_pnl / self.in_sample_pnl
        } else {
            0.0
        }
    }
}

/// Complete walk-forward analysis results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    /// Number of evaluated windows; always `windows.len()`.
    pub num_windows: usize,
    /// In-sample ratio used.
    pub is_ratio: f64,
    /// Per-bar OOS PnL over per-bar IS PnL, floored at 0.
    pub robustness_ratio: f64,
    /// Evaluated windows in chronological order.
    pub windows: Vec<WindowResult>,
    /// All out-of-sample trades, concatenated in window order.
    pub oos_trades: Vec<Trade>,
    pub aggregate_oos_metrics: Metrics,
    pub total_in_sample_pnl: f64,
    pub total_out_of_sample_pnl: f64,
}

impl WalkForwardResult {
    fn empty(is_ratio: f64, initial_balance: f64) -> Self {
        Self {
            num_windows: 0,
            is_ratio,
            robustness_ratio: 0.0,
            windows: vec![],
            oos_trades: vec![],
            aggregate_oos_metrics: metrics::calculate(&[], initial_balance),
            total_in_sample_pnl: 0.0,
            total_out_of_sample_pnl: 0.0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Walk-Forward Analysis Summary:\n\
             Windows: {}\n\
             In-Sample PnL: {:.2}\n\
             Out-of-Sample PnL: {:.2}\n\
             OOS Trades: {}\n\
             Robustness Ratio: {:.3}",
            self.num_windows,
            self.total_in_sample_pnl,
            self.total_out_of_sample_pnl,
            self.oos_trades.len(),
            self.robustness_ratio
        )
    }

    /// Positive out-of-sample PnL with at least `min_ratio` robustness.
    pub fn is_robust(&self, min_ratio: f64) -> bool {
        self.total_out_of_sample_pnl > 0.0 && self.robustness_ratio >= min_ratio
    }
}

/// Per-bar PnL ratio between out-of-sample and in-sample blocks.
pub fn robustness_ratio(windows: &[WindowResult]) -> f64 {
    let is_pnl: f64 = windows.iter().map(|w| w.in_sample_pnl).sum();
    let oos_pnl: f64 = windows.iter().map(|w| w.out_of_sample_pnl).sum();
    let is_bars: usize = windows.iter().map(|w| w.in_sample.len()).sum();
    let oos_bars: usize = windows.iter().map(|w| w.out_of_sample.len()).sum();

    if is_pnl <= 0.0 || is_bars == 0 || oos_bars == 0 {
        return 0.0;
    }

    let ratio = (oos_pnl / oos_bars as f64) / (is_pnl / is_bars as f64);
    if ratio.is_finite() {
        ratio.max(0.0)
    } else {
        0.0
    }
}

/// Optimizes in-sample and replays out-of-sample, window by window.
pub struct WalkForwardRunner {
    config: WalkForwardConfig,
    backtest_config: BacktestConfig,
    optimizer_config: OptimizerConfig,
}

impl WalkForwardRunner {
    pub fn new(
        config: WalkForwardConfig,
        backtest_config: BacktestConfig,
        optimizer_config: OptimizerConfig,
    ) -> Self {
        Self {
            config,
            backtest_config,
            optimizer_config,
        }
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Window boundaries for a table of `bars`. Windows that fall below the
    /// configured minimums are left out; an invalid config yields none.
    pub fn calculate_windows(&self, bars: &[Bar]) -> Vec<WindowBounds> {
        if let Err(e) = self.config.validate() {
            warn!("No walk-forward windows: {}", e);
            return Vec::new();
        }
        let total = bars.len();
        let window_size = total / self.config.num_windows;
        let mut windows = Vec::with_capacity(self.config.num_windows);

        if window_size == 0 {
            warn!(
                "{} bars cannot fill {} windows",
                total, self.config.num_windows
            );
            return windows;
        }

        for i in 0..self.config.num_windows {
            let start = i * window_size;
            let end = if i + 1 == self.config.num_windows {
                total
            } else {
                (i + 1) * window_size
            };
            let split = start + ((end - start) as f64 * self.config.in_sample_ratio) as usize;
            let is_start = if self.config.anchored { 0 } else { start };

            let is_bars = split - is_start;
            let oos_bars = end - split;
            if is_bars < self.config.min_in_sample_bars
                || oos_bars < self.config.min_out_of_sample_bars
            {
                warn!(
                    "Window {} skipped: {} IS bars, {} OOS bars",
                    i, is_bars, oos_bars
                );
                continue;
            }

            windows.push(WindowBounds {
                index: i,
                in_sample: BarRange::new(bars, is_start, split),
                out_of_sample: BarRange::new(bars, split, end),
            });
        }

        windows
    }

    /// Run the analysis. `factory` builds a fresh strategy for every in-sample
    /// combination and for each out-of-sample replay.
    pub fn run<F>(&self, bars: &[Bar], grid: &ParamGrid, factory: F) -> Result<WalkForwardResult>
    where
        F: Fn(&ParamSet) -> Result<StrategyInstance> + Send + Sync,
    {
        self.config.validate()?;
        self.backtest_config.validate()?;
        if grid.is_empty() || grid.values().any(|v| v.is_empty()) {
            return Err(BacktestError::config(
                "Walk-forward needs a non-empty parameter grid",
            ));
        }
        if bars.is_empty() {
            return Err(BacktestError::NoData);
        }
        validate_bars(bars)?;

        let bounds = self.calculate_windows(bars);
        info!(
            "Running walk-forward analysis: {} windows over {} bars",
            bounds.len(),
            bars.len()
        );

        let evaluate = |window: &WindowBounds| -> Option<WindowResult> {
            match self.evaluate_window(bars, window, grid, &factory) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Window {} failed: {}", window.index, e);
                    None
                }
            }
        };

        let windows: Vec<WindowResult> = if self.config.parallel {
            bounds.par_iter().filter_map(evaluate).collect()
        } else {
            bounds.iter().filter_map(evaluate).collect()
        };

        let initial = self.backtest_config.initial_balance;
        if windows.is_empty() {
            warn!("No walk-forward window could be evaluated");
            return Ok(WalkForwardResult::empty(self.config.in_sample_ratio, initial));
        }

        let oos_trades: Vec<Trade> = windows
            .iter()
            .flat_map(|w| w.oos_trades.iter().cloned())
            .collect();
        let aggregate_oos_metrics = metrics::calculate(&oos_trades, initial);
        let total_in_sample_pnl = windows.iter().map(|w| w.in_sample_pnl).sum();
        let total_out_of_sample_pnl = windows.iter().map(|w| w.out_of_sample_pnl).sum();
        let robustness = robustness_ratio(&windows);

        info!(
            "Walk-forward complete: {} windows, IS PnL {:.2}, OOS PnL {:.2}, robustness {:.3}",
            windows.len(),
            total_in_sample_pnl,
            total_out_of_sample_pnl,
            robustness
        );

        Ok(WalkForwardResult {
            num_windows: windows.len(),
            is_ratio: self.config.in_sample_ratio,
            robustness_ratio: robustness,
            windows,
            oos_trades,
            aggregate_oos_metrics,
            total_in_sample_pnl,
            total_out_of_sample_pnl,
        })
    }

    /// `Ok(None)` when the in-sample sweep evaluated nothing.
    fn evaluate_window<F>(
        &self,
        bars: &[Bar],
        window: &WindowBounds,
        grid: &ParamGrid,
        factory: &F,
    ) -> Result<Option<WindowResult>>
    where
        F: Fn(&ParamSet) -> Result<StrategyInstance> + Send + Sync,
    {
        info!(
            "Processing window {}: IS {} bars, OOS {} bars",
            window.index,
            window.in_sample.len(),
            window.out_of_sample.len()
        );

        let mut config = self.backtest_config.clone();
        config.show_progress = false;

        let mut optimizer_config = self.optimizer_config.clone();
        optimizer_config.show_progress = false;
        let optimizer = Optimizer::new(config.clone(), optimizer_config);
        let sweep = optimizer.grid_search(window.in_sample.slice(bars), grid, factory)?;

        if sweep.evaluated == 0 {
            warn!("Window {} optimization evaluated nothing, skipping", window.index);
            return Ok(None);
        }
        debug!(
            "Window {} best params {:?} ({} = {:.4})",
            window.index, sweep.best_params, sweep.metric, sweep.best_metric_value
        );

        let mut strategy = factory(&sweep.best_params)?;
        let oos = Engine::new(config).run_instance(&mut strategy, window.out_of_sample.slice(bars))?;

        Ok(Some(WindowResult {
            index: window.index,
            in_sample: window.in_sample.clone(),
            out_of_sample: window.out_of_sample.clone(),
            best_params: sweep.best_params,
            in_sample_pnl: sweep.best_metrics.total_return,
            out_of_sample_pnl: oos.total_pnl(),
            in_sample_metric: sweep.best_metric_value,
            oos_trade_count: oos.trades.len(),
            oos_trades: oos.trades,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;
    use crate::optimizer::{param_usize, ParamValue};
    use crate::strategy::{Strategy, StrategyContext};
    use crate::types::Signal;
    use chrono::TimeZone;

    fn create_test_bars(count: usize) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.1);
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    base,
                    base + 2.0,
                    base - 1.0,
                    base + 0.5,
                    1000.0,
                )
            })
            .collect()
    }

    /// Enters on the first bar and exits after `hold` bars.
    struct HoldFor {
        hold: usize,
    }

    impl Strategy for HoldFor {
        fn name(&self) -> &str {
            "HoldFor"
        }

        fn on_bar(&mut self, ctx: &StrategyContext) -> Result<Option<Signal>> {
            if ctx.bar_index == 0 {
                Ok(Some(Signal::buy(1.0)))
            } else if ctx.bar_index == self.hold {
                Ok(Some(Signal::close()))
            } else {
                Ok(None)
            }
        }
    }

    fn factory(params: &ParamSet) -> Result<StrategyInstance> {
        Ok(StrategyInstance::bar_by_bar(HoldFor {
            hold: param_usize(params, "hold")?,
        }))
    }

    fn grid() -> ParamGrid {
        let mut grid = ParamGrid::new();
        grid.insert(
            "hold".to_string(),
            vec![ParamValue::Int(2), ParamValue::Int(5), ParamValue::Int(10)],
        );
        grid
    }

    fn runner(config: WalkForwardConfig) -> WalkForwardRunner {
        WalkForwardRunner::new(
            config,
            BacktestConfig::default(),
            OptimizerConfig::default().with_metric(Metric::TotalReturn),
        )
    }

    #[test]
    fn test_window_calculation() {
        let bars = create_test_bars(500);
        let windows = runner(WalkForwardConfig::new(5, 0.7)).calculate_windows(&bars);
        assert_eq!(windows.len(), 5);

        for window in &windows {
            assert_eq!(window.in_sample.len(), 70);
            assert_eq!(window.out_of_sample.len(), 30);
            assert_eq!(window.in_sample.end_index, window.out_of_sample.start_index);
            assert!(window.in_sample.end_time < window.out_of_sample.start_time);
        }
    }

    #[test]
    fn test_last_window_absorbs_remainder() {
        let bars = create_test_bars(103);
        let windows = runner(WalkForwardConfig::new(4, 0.8)).calculate_windows(&bars);
        assert_eq!(windows.len(), 4);
        let last = windows.last().unwrap();
        assert_eq!(last.out_of_sample.end_index, 103);
        assert_eq!(last.in_sample.start_index, 75);
    }

    #[test]
    fn test_anchored_windows() {
        let bars = create_test_bars(500);
        let windows =
            runner(WalkForwardConfig::new(5, 0.7).with_anchored()).calculate_windows(&bars);

        for window in &windows {
            assert_eq!(window.in_sample.start_index, 0);
            assert!(window.in_sample.end_time < window.out_of_sample.start_time);
        }
        assert!(windows[4].in_sample.len() > windows[0].in_sample.len());
    }

    #[test]
    fn test_invalid_config_yields_no_windows() {
        let bars = create_test_bars(100);
        assert!(runner(WalkForwardConfig::new(0, 0.7))
            .calculate_windows(&bars)
            .is_empty());
        assert!(runner(WalkForwardConfig::new(5, 0.7).with_min_bars(0, 0))
            .calculate_windows(&bars)
            .is_empty());
        assert!(runner(WalkForwardConfig::new(5, 0.7)).calculate_windows(&[]).is_empty());
    }

    #[test]
    fn test_unordered_bars_are_rejected() {
        let mut bars = create_test_bars(300);
        bars.reverse();
        assert!(matches!(
            runner(WalkForwardConfig::new(3, 0.7)).run(&bars, &grid(), factory),
            Err(BacktestError::DataError(_))
        ));
    }

    #[test]
    fn test_small_windows_are_skipped() {
        let bars = create_test_bars(50);
        let windows = runner(WalkForwardConfig::new(10, 0.7)).calculate_windows(&bars);
        assert!(windows.is_empty());
    }

    #[test]
    fn test_run_orders_windows() {
        let bars = create_test_bars(300);
        let result = runner(WalkForwardConfig::new(3, 0.7))
            .run(&bars, &grid(), factory)
            .unwrap();

        assert_eq!(result.num_windows, result.windows.len());
        assert_eq!(result.num_windows, 3);
        for (i, w) in result.windows.iter().enumerate() {
            assert_eq!(w.index, i);
            assert!(w.in_sample.end_index <= w.out_of_sample.start_index);
            assert_eq!(w.best_params["hold"], ParamValue::Int(10));
            assert_eq!(w.oos_trade_count, 1);
        }
        assert_eq!(result.oos_trades.len(), 3);
        assert_eq!(result.aggregate_oos_metrics.total_trades, 3);
        assert!(result.total_in_sample_pnl > 0.0);
        assert!(result.robustness_ratio > 0.0);
    }

    #[test]
    fn test_not_enough_bars_yields_empty_result() {
        let bars = create_test_bars(30);
        let result = runner(WalkForwardConfig::new(5, 0.7))
            .run(&bars, &grid(), factory)
            .unwrap();
        assert_eq!(result.num_windows, 0);
        assert!(result.windows.is_empty());
        assert_eq!(result.robustness_ratio, 0.0);
        assert_eq!(result.aggregate_oos_metrics.total_trades, 0);
    }

    #[test]
    fn test_invalid_config() {
        let bars = create_test_bars(100);
        for config in [WalkForwardConfig::new(0, 0.7), WalkForwardConfig::new(5, 1.0)] {
            assert!(matches!(
                runner(config).run(&bars, &grid(), factory),
                Err(BacktestError::ConfigError(_))
            ));
        }
        assert!(runner(WalkForwardConfig::default())
            .run(&bars, &ParamGrid::new(), factory)
            .is_err());
    }

    fn window(is_pnl: f64, oos_pnl: f64, is_len: usize, oos_len: usize) -> WindowResult {
        let bars = create_test_bars(is_len + oos_len);
        WindowResult {
            index: 0,
            in_sample: BarRange::new(&bars, 0, is_len),
            out_of_sample: BarRange::new(&bars, is_len, is_len + oos_len),
            best_params: ParamSet::new(),
            in_sample_pnl: is_pnl,
            out_of_sample_pnl: oos_pnl,
            in_sample_metric: is_pnl,
            oos_trade_count: 0,
            oos_trades: vec![],
        }
    }

    #[test]
    fn test_robustness_ratio() {
        // 1.0 per bar in-sample, 0.5 per bar out-of-sample
        let windows = vec![window(70.0, 15.0, 70, 30), window(70.0, 15.0, 70, 30)];
        assert!((robustness_ratio(&windows) - 0.5).abs() < 1e-12);

        assert_eq!(robustness_ratio(&[window(-10.0, 50.0, 70, 30)]), 0.0);
        assert_eq!(robustness_ratio(&[window(70.0, -30.0, 70, 30)]), 0.0);
        assert_eq!(robustness_ratio(&[]), 0.0);
    }

    #[test]
    fn test_window_efficiency() {
        assert!((window(100.0, 40.0, 10, 5).efficiency() - 0.4).abs() < 1e-12);
        assert_eq!(window(0.0, 40.0, 10, 5).efficiency(), 0.0);
    }

    #[test]
    fn test_result_summary() {
        let result = WalkForwardResult {
            robustness_ratio: 0.75,
            total_out_of_sample_pnl: 15.0,
            ..WalkForwardResult::empty(0.7, 100_000.0)
        };
        let summary = result.summary();
        assert!(summary.contains("Walk-Forward Analysis"));
        assert!(summary.contains("0.750"));
        assert!(result.is_robust(0.5));
        assert!(!result.is_robust(0.8));
    }
}
