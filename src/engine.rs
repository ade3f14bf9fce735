//! Backtest execution engine.
//!
//! The engine replays a single instrument's bars against one strategy. Each
//! bar is processed in three steps: protective stops and targets are checked
//! against the bar's range, the strategy is consulted at the close, and the
//! mark-to-market equity is recorded. Fills happen at the bar close (or at the
//! stop/target level) with slippage working against the trader.

use crate::data::validate_bars;
use crate::error::{BacktestError, Result};
use crate::metrics::{self, Metrics};
use crate::strategy::{
    SignalArrays, Strategy, StrategyContext, StrategyInstance, VectorizedStrategy,
};
use crate::types::{Bar, EquityPoint, ExitReason, InstrumentSpec, Side, Signal, Trade};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting account balance.
    pub initial_balance: f64,
    /// Commission charged on every fill (entry and exit).
    pub commission: f64,
    /// Slippage per fill, in ticks.
    pub slippage_ticks: f64,
    /// Currency value of a one-point move for one unit.
    pub point_value: f64,
    /// Minimum price increment.
    pub tick_size: f64,
    /// Show progress bar during the run.
    #[serde(default)]
    pub show_progress: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: 100_000.0,
            commission: 0.0,
            slippage_ticks: 0.0,
            point_value: 1.0,
            tick_size: 0.01,
            show_progress: false,
        }
    }
}

impl BacktestConfig {
    /// Build a config from an instrument contract.
    pub fn for_instrument(
        instrument: &InstrumentSpec,
        initial_balance: f64,
        commission: f64,
        slippage_ticks: f64,
    ) -> Self {
        Self {
            initial_balance,
            commission,
            slippage_ticks,
            point_value: instrument.point_value,
            tick_size: instrument.tick_size,
            show_progress: false,
        }
    }

    /// Reject configurations that cannot produce a meaningful simulation.
    pub fn validate(&self) -> Result<()> {
        if !(self.point_value.is_finite() && self.point_value > 0.0) {
            return Err(BacktestError::config(format!(
                "point_value must be positive, got {}",
                self.point_value
            )));
        }
        if !(self.tick_size.is_finite() && self.tick_size > 0.0) {
            return Err(BacktestError::config(format!(
                "tick_size must be positive, got {}",
                self.tick_size
            )));
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(BacktestError::config(format!(
                "initial_balance must be positive, got {}",
                self.initial_balance
            )));
        }
        if !(self.commission.is_finite() && self.commission >= 0.0) {
            return Err(BacktestError::config(format!(
                "commission must be non-negative, got {}",
                self.commission
            )));
        }
        if !(self.slippage_ticks.is_finite() && self.slippage_ticks >= 0.0) {
            return Err(BacktestError::config(format!(
                "slippage_ticks must be non-negative, got {}",
                self.slippage_ticks
            )));
        }
        Ok(())
    }

    /// Slippage per fill in price units.
    pub fn slippage(&self) -> f64 {
        self.slippage_ticks * self.tick_size
    }
}

/// Results from a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub initial_balance: f64,
    /// Completed trades in time order.
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
    /// Starts at the initial balance, then one point per bar.
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_balance)
    }

    /// Net PnL of all trades.
    pub fn total_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    /// Per-trade PnLs, the input of a Monte Carlo run.
    pub fn trade_pnls(&self) -> Vec<f64> {
        self.trades.iter().map(|t| t.pnl).collect()
    }
}

/// Open position, private to a run.
#[derive(Debug, Clone)]
struct Position {
    side: Side,
    size: f64,
    entry_price: f64,
    entry_time: DateTime<Utc>,
    entry_commission: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

impl Position {
    fn unrealized(&self, price: f64, point_value: f64) -> f64 {
        (price - self.entry_price) * self.side.direction() * self.size * point_value
    }

    /// Stop or target touched within `bar`. The stop wins when both are.
    /// A bar that opens beyond the level fills at the open.
    fn triggered_exit(&self, bar: &Bar) -> Option<(f64, ExitReason)> {
        match self.side {
            Side::Long => {
                if let Some(stop) = self.stop_loss {
                    if bar.low <= stop {
                        return Some((bar.open.min(stop), ExitReason::StopLoss));
                    }
                }
                if let Some(target) = self.take_profit {
                    if bar.high >= target {
                        return Some((bar.open.max(target), ExitReason::TakeProfit));
                    }
                }
            }
            Side::Short => {
                if let Some(stop) = self.stop_loss {
                    if bar.high >= stop {
                        return Some((bar.open.max(stop), ExitReason::StopLoss));
                    }
                }
                if let Some(target) = self.take_profit {
                    if bar.low <= target {
                        return Some((bar.open.min(target), ExitReason::TakeProfit));
                    }
                }
            }
        }
        None
    }
}

/// Account state for one run.
struct Simulation<'c> {
    config: &'c BacktestConfig,
    /// Realized balance: initial balance plus closed PnL minus open-trade entry commission.
    balance: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
}

impl<'c> Simulation<'c> {
    fn new(config: &'c BacktestConfig, start: DateTime<Utc>, capacity: usize) -> Self {
        let mut equity_curve = Vec::with_capacity(capacity + 1);
        equity_curve.push(EquityPoint {
            timestamp: start,
            equity: config.initial_balance,
        });
        Self {
            config,
            balance: config.initial_balance,
            position: None,
            trades: Vec::new(),
            equity_curve,
        }
    }

    fn position_side(&self) -> Option<Side> {
        self.position.as_ref().map(|p| p.side)
    }

    fn last_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.balance)
    }

    /// Apply adverse slippage to a fill.
    fn fill_price(&self, price: f64, buying: bool) -> f64 {
        if buying {
            price + self.config.slippage()
        } else {
            price - self.config.slippage()
        }
    }

    fn open(
        &mut self,
        side: Side,
        size: f64,
        bar: &Bar,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) {
        let entry_price = self.fill_price(bar.close, side == Side::Long);
        self.balance -= self.config.commission;
        debug!(
            "Open {} {} @ {:.4} on {}",
            side, size, entry_price, bar.timestamp
        );
        self.position = Some(Position {
            side,
            size,
            entry_price,
            entry_time: bar.timestamp,
            entry_commission: self.config.commission,
            stop_loss,
            take_profit,
        });
    }

    fn close(&mut self, price: f64, time: DateTime<Utc>, reason: ExitReason) {
        let Some(position) = self.position.take() else {
            return;
        };

        let exit_price = self.fill_price(price, position.side == Side::Short);
        let trade = Trade::from_fills(
            position.side,
            position.size,
            position.entry_price,
            exit_price,
            position.entry_time,
            time,
            self.config.point_value,
            position.entry_commission + self.config.commission,
            reason,
        );
        // entry commission was debited at the open
        self.balance += trade.pnl + position.entry_commission;
        debug!(
            "Close {} @ {:.4} ({}): pnl {:.2}",
            trade.side, exit_price, reason, trade.pnl
        );
        self.trades.push(trade);
    }

    fn check_exits(&mut self, bar: &Bar) {
        let triggered = self
            .position
            .as_ref()
            .and_then(|p| p.triggered_exit(bar));
        if let Some((price, reason)) = triggered {
            self.close(price, bar.timestamp, reason);
        }
    }

    fn apply_signal(&mut self, signal: &Signal, bar: &Bar) -> Result<()> {
        let Some(side) = signal.side() else {
            self.close(bar.close, bar.timestamp, ExitReason::Signal);
            return Ok(());
        };

        if !(signal.size.is_finite() && signal.size > 0.0) {
            return Err(BacktestError::InvalidInput(format!(
                "Signal size must be positive, got {}",
                signal.size
            )));
        }

        match self.position_side() {
            Some(current) if current == side => {
                debug!("Ignoring {} signal, position already {}", side, current);
                return Ok(());
            }
            Some(_) => self.close(bar.close, bar.timestamp, ExitReason::Signal),
            None => {}
        }

        self.open(side, signal.size, bar, signal.stop_loss, signal.take_profit);
        Ok(())
    }

    /// Vectorized step: exits first, then entries (flipping if needed).
    fn apply_arrays(&mut self, signals: &SignalArrays, i: usize, bar: &Bar) -> Result<()> {
        let exit = match self.position_side() {
            Some(Side::Long) => signals.exits[i],
            Some(Side::Short) => signals.short_exit(i),
            None => false,
        };
        if exit {
            self.close(bar.close, bar.timestamp, ExitReason::Signal);
        }

        if signals.entries[i] {
            self.apply_signal(&Signal::buy(signals.size), bar)?;
        } else if signals.short_entry(i) {
            self.apply_signal(&Signal::sell(signals.size), bar)?;
        }
        Ok(())
    }

    fn equity(&self, price: f64) -> f64 {
        self.balance
            + self
                .position
                .as_ref()
                .map_or(0.0, |p| p.unrealized(price, self.config.point_value))
    }

    fn mark(&mut self, bar: &Bar) {
        let equity = self.equity(bar.close);
        self.equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity,
        });
    }

    /// Force-close at the last close and hand back the run's output.
    fn finish(mut self, last: &Bar) -> (Vec<Trade>, Vec<EquityPoint>) {
        if self.position.is_some() {
            self.close(last.close, last.timestamp, ExitReason::EndOfData);
            let balance = self.balance;
            if let Some(point) = self.equity_curve.last_mut() {
                point.equity = balance;
            }
        }
        (self.trades, self.equity_curve)
    }
}

/// Styled progress bar shared by the engine and the optimizer.
pub(crate) fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Main backtest engine.
#[derive(Debug, Clone)]
pub struct Engine {
    config: BacktestConfig,
}

impl Engine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(BacktestConfig::default())
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn prepare(&self, bars: &[Bar]) -> Result<()> {
        self.config.validate()?;
        if bars.is_empty() {
            return Err(BacktestError::NoData);
        }
        validate_bars(bars)
    }

    fn progress(&self, len: usize) -> Option<ProgressBar> {
        self.config.show_progress.then(|| progress_bar(len as u64))
    }

    /// Run a bar-by-bar strategy over `bars`.
    ///
    /// Errors raised by the strategy abort the run and are returned as-is.
    pub fn run(&self, strategy: &mut dyn Strategy, bars: &[Bar]) -> Result<BacktestResult> {
        self.prepare(bars)?;
        info!(
            "Running backtest: {} ({} bars)",
            strategy.name(),
            bars.len()
        );

        strategy.init();
        let warmup = strategy.warmup_period();
        let progress = self.progress(bars.len());
        let mut sim = Simulation::new(&self.config, bars[0].timestamp, bars.len());

        for (i, bar) in bars.iter().enumerate() {
            sim.check_exits(bar);

            if i >= warmup {
                let ctx = StrategyContext {
                    bar_index: i,
                    bars: &bars[..=i],
                    position: sim.position_side(),
                    equity: sim.last_equity(),
                };
                if let Some(signal) = strategy.on_bar(&ctx)? {
                    sim.apply_signal(&signal, bar)?;
                }
            }

            sim.mark(bar);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        strategy.on_finish();

        Ok(self.finish(strategy.name(), sim, bars))
    }

    /// Run a vectorized strategy over `bars`.
    pub fn run_vectorized(
        &self,
        strategy: &dyn VectorizedStrategy,
        bars: &[Bar],
    ) -> Result<BacktestResult> {
        self.prepare(bars)?;
        info!(
            "Running vectorized backtest: {} ({} bars)",
            strategy.name(),
            bars.len()
        );

        let signals = strategy.generate_signals(bars)?;
        signals.validate(bars.len())?;

        let mut sim = Simulation::new(&self.config, bars[0].timestamp, bars.len());
        for (i, bar) in bars.iter().enumerate() {
            sim.check_exits(bar);
            sim.apply_arrays(&signals, i, bar)?;
            sim.mark(bar);
        }

        Ok(self.finish(strategy.name(), sim, bars))
    }

    /// Run either strategy variant.
    pub fn run_instance(
        &self,
        instance: &mut StrategyInstance,
        bars: &[Bar],
    ) -> Result<BacktestResult> {
        match instance {
            StrategyInstance::BarByBar(strategy) => self.run(strategy.as_mut(), bars),
            StrategyInstance::Vectorized(strategy) => self.run_vectorized(strategy.as_ref(), bars),
        }
    }

    fn finish(&self, name: &str, sim: Simulation<'_>, bars: &[Bar]) -> BacktestResult {
        let (trades, equity_curve) = match bars.last() {
            Some(last) => sim.finish(last),
            None => (sim.trades, sim.equity_curve),
        };
        let metrics = metrics::calculate(&trades, self.config.initial_balance);

        info!(
            "Backtest complete: {} trades, net PnL {:.2}, Sharpe {:.2}",
            metrics.total_trades, metrics.total_return, metrics.sharpe_ratio
        );

        BacktestResult {
            strategy_name: name.to_string(),
            initial_balance: self.config.initial_balance,
            trades,
            metrics,
            equity_curve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct Scripted {
        signals: HashMap<usize, Signal>,
        fail_on: Option<usize>,
    }

    impl Scripted {
        fn new(signals: Vec<(usize, Signal)>) -> Self {
            Self {
                signals: signals.into_iter().collect(),
                fail_on: None,
            }
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        fn on_bar(&mut self, ctx: &StrategyContext) -> Result<Option<Signal>> {
            if self.fail_on == Some(ctx.bar_index) {
                return Err(BacktestError::strategy("boom"));
            }
            Ok(self.signals.get(&ctx.bar_index).copied())
        }
    }

    struct ScriptedArrays(SignalArrays);

    impl VectorizedStrategy for ScriptedArrays {
        fn name(&self) -> &str {
            "ScriptedArrays"
        }

        fn generate_signals(&self, _bars: &[Bar]) -> Result<SignalArrays> {
            Ok(self.0.clone())
        }
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i),
            open,
            high,
            low,
            close,
            1000.0,
        )
    }

    /// Closes 100, 101, ... with a 2-point range around each close.
    fn create_test_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                bar(i as i64, c, c + 1.0, c - 1.0, c)
            })
            .collect()
    }

    fn futures_config() -> BacktestConfig {
        BacktestConfig {
            initial_balance: 10_000.0,
            commission: 2.0,
            slippage_ticks: 1.0,
            point_value: 50.0,
            tick_size: 0.25,
            show_progress: false,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(BacktestConfig::default().validate().is_ok());

        let mut config = BacktestConfig::default();
        config.point_value = 0.0;
        assert!(matches!(
            config.validate(),
            Err(BacktestError::ConfigError(_))
        ));

        let mut config = BacktestConfig::default();
        config.tick_size = -0.25;
        assert!(config.validate().is_err());

        let engine = Engine::new(config);
        let mut strategy = Scripted::new(vec![]);
        assert!(engine.run(&mut strategy, &create_test_bars(5)).is_err());
    }

    #[test]
    fn test_for_instrument() {
        let es = InstrumentSpec::new("ES", 0.25, 50.0);
        let config = BacktestConfig::for_instrument(&es, 25_000.0, 2.5, 1.0);
        assert_eq!(config.point_value, 50.0);
        assert!((config.slippage() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_bars() {
        let engine = Engine::with_defaults();
        let mut strategy = Scripted::new(vec![]);
        assert!(matches!(
            engine.run(&mut strategy, &[]),
            Err(BacktestError::NoData)
        ));
    }

    #[test]
    fn test_unordered_bars_are_rejected() {
        let engine = Engine::with_defaults();
        let days = [5, 2, 2, 0];
        let bars: Vec<Bar> = days
            .iter()
            .map(|&d| bar(d, 100.0, 101.0, 99.0, 100.0))
            .collect();

        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0))]);
        assert!(matches!(
            engine.run(&mut strategy, &bars),
            Err(BacktestError::DataError(_))
        ));

        let mut duplicated = create_test_bars(4);
        duplicated[2].timestamp = duplicated[1].timestamp;
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0))]);
        assert!(matches!(
            engine.run(&mut strategy, &duplicated),
            Err(BacktestError::DataError(_))
        ));
    }

    #[test]
    fn test_round_trip_with_costs() {
        let engine = Engine::new(futures_config());
        let bars = create_test_bars(6);
        let mut strategy = Scripted::new(vec![(1, Signal::buy(1.0)), (3, Signal::close())]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        assert_eq!(result.trades.len(), 1);

        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        assert!((trade.entry_price - 101.25).abs() < 1e-10);
        assert!((trade.exit_price - 102.75).abs() < 1e-10);
        assert!((trade.pnl_points - 1.5).abs() < 1e-10);
        assert!((trade.commission - 4.0).abs() < 1e-10);
        assert!((trade.pnl - (1.5 * 50.0 - 4.0)).abs() < 1e-10);
        assert_eq!(trade.exit_reason, ExitReason::Signal);

        assert_eq!(result.equity_curve.len(), bars.len() + 1);
        assert_eq!(result.equity_curve[0].equity, 10_000.0);
        assert!((result.final_equity() - (10_000.0 + trade.pnl)).abs() < 1e-9);
    }

    #[test]
    fn test_mark_to_market_equity() {
        let mut config = futures_config();
        config.commission = 0.0;
        config.slippage_ticks = 0.0;
        let engine = Engine::new(config);
        let bars = create_test_bars(5);
        let mut strategy = Scripted::new(vec![(1, Signal::buy(1.0))]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        // entry at 101, bar 3 closes at 103
        assert!((result.equity_curve[4].equity - (10_000.0 + 2.0 * 50.0)).abs() < 1e-9);
        // forced close at 104 on the last bar
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfData);
        assert!((result.final_equity() - (10_000.0 + 3.0 * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_stop_loss_touched_intrabar() {
        let mut config = futures_config();
        config.commission = 0.0;
        let engine = Engine::new(config);
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 100.5, 97.0, 99.5),
            bar(2, 99.5, 100.0, 99.0, 99.5),
        ];
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0).with_stop_loss(98.0))]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert!((trade.exit_price - 97.75).abs() < 1e-10);
        assert_eq!(trade.exit_time, bars[1].timestamp);
    }

    #[test]
    fn test_gap_through_stop_fills_at_open() {
        let mut config = futures_config();
        config.slippage_ticks = 0.0;
        let engine = Engine::new(config);
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 95.0, 96.0, 94.0, 95.5),
        ];
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0).with_stop_loss(98.0))]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        assert!((result.trades[0].exit_price - 95.0).abs() < 1e-10);
    }

    #[test]
    fn test_stop_wins_when_both_levels_touched() {
        let engine = Engine::new(BacktestConfig::default());
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 110.0, 90.0, 100.0),
        ];
        let mut strategy = Scripted::new(vec![(
            0,
            Signal::buy(1.0).with_stop_loss(95.0).with_take_profit(105.0),
        )]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        assert_eq!(result.trades[0].exit_reason, ExitReason::StopLoss);
        assert!((result.trades[0].exit_price - 95.0).abs() < 1e-10);
    }

    #[test]
    fn test_short_take_profit() {
        let engine = Engine::new(BacktestConfig::default());
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 99.0, 99.5, 93.0, 94.0),
        ];
        let mut strategy = Scripted::new(vec![(0, Signal::sell(2.0).with_take_profit(95.0))]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert!((trade.pnl - 10.0).abs() < 1e-10);
    }

    #[test]
    fn test_flip_closes_then_opens() {
        let engine = Engine::new(BacktestConfig::default());
        let bars = create_test_bars(6);
        let mut strategy = Scripted::new(vec![
            (0, Signal::buy(1.0)),
            (1, Signal::buy(1.0)),
            (2, Signal::sell(1.0)),
            (4, Signal::close()),
        ]);

        let result = engine.run(&mut strategy, &bars).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].side, Side::Long);
        assert_eq!(result.trades[1].side, Side::Short);
        assert!(result.trades[0].exit_time <= result.trades[1].entry_time);
        assert!((result.trades[0].pnl - 2.0).abs() < 1e-10);
        assert!((result.trades[1].pnl + 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_strategy_error_propagates() {
        let engine = Engine::with_defaults();
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0))]);
        strategy.fail_on = Some(3);
        assert!(matches!(
            engine.run(&mut strategy, &create_test_bars(6)),
            Err(BacktestError::StrategyError(_))
        ));
    }

    #[test]
    fn test_invalid_signal_size() {
        let engine = Engine::with_defaults();
        let mut strategy = Scripted::new(vec![(0, Signal::buy(0.0))]);
        assert!(matches!(
            engine.run(&mut strategy, &create_test_bars(3)),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_vectorized_matches_bar_by_bar() {
        let engine = Engine::new(futures_config());
        let bars = create_test_bars(10);

        let mut entries = vec![false; 10];
        let mut exits = vec![false; 10];
        let mut short_entries = vec![false; 10];
        let short_exits = vec![false; 10];
        entries[1] = true;
        exits[4] = true;
        short_entries[4] = true;
        entries[7] = true;
        let arrays =
            SignalArrays::long_only(entries, exits).with_shorts(short_entries, short_exits);

        let mut scripted = Scripted::new(vec![
            (1, Signal::buy(1.0)),
            (4, Signal::sell(1.0)),
            (7, Signal::buy(1.0)),
        ]);

        let bar_result = engine.run(&mut scripted, &bars).unwrap();
        let vec_result = engine
            .run_vectorized(&ScriptedArrays(arrays), &bars)
            .unwrap();

        assert_eq!(bar_result.trades, vec_result.trades);
        assert_eq!(bar_result.equity_curve, vec_result.equity_curve);
        assert_eq!(vec_result.trades.len(), 3);
    }

    #[test]
    fn test_vectorized_length_mismatch() {
        let engine = Engine::with_defaults();
        let arrays = SignalArrays::long_only(vec![false; 3], vec![false; 3]);
        let result = engine.run_vectorized(&ScriptedArrays(arrays), &create_test_bars(5));
        assert!(matches!(result, Err(BacktestError::InvalidInput(_))));
    }

    #[test]
    fn test_run_instance_dispatch() {
        let engine = Engine::with_defaults();
        let bars = create_test_bars(5);
        let mut instance = StrategyInstance::bar_by_bar(Scripted::new(vec![(0, Signal::buy(1.0))]));
        let result = engine.run_instance(&mut instance, &bars).unwrap();
        assert_eq!(result.strategy_name, "Scripted");
        assert_eq!(result.trades.len(), 1);
    }
}
