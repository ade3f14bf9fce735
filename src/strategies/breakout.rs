//! Donchian channel breakout.

use crate::data::{highest_high, lowest_low};
use crate::error::{BacktestError, Result};
use crate::optimizer::{param_bool_or, param_f64, param_usize, ParamSet};
use crate::strategy::{Strategy, StrategyContext, StrategyInstance};
use crate::types::{Side, Signal};

/// Donchian Channel Breakout Strategy.
///
/// # Parameters
/// - `entry_period`: Period for entry channel (default: 20)
/// - `exit_period`: Period for exit channel (default: 10)
/// - `stop_loss_pct` / `take_profit_pct`: optional protective levels, in
///   percent of the entry close
///
/// # Signals
/// - Long: high breaks above highest high of the prior `entry_period` bars
/// - Short: low breaks below the entry channel, when shorting is enabled
/// - Exit: price breaks the exit channel against the position
#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    entry_period: usize,
    exit_period: usize,
    allow_short: bool,
    stop_loss_pct: Option<f64>,
    take_profit_pct: Option<f64>,
}

impl BreakoutStrategy {
    pub fn new(entry_period: usize, exit_period: usize) -> Result<Self> {
        if entry_period == 0 || exit_period == 0 {
            return Err(BacktestError::strategy("Channel periods must be positive"));
        }
        Ok(Self {
            entry_period,
            exit_period,
            allow_short: false,
            stop_loss_pct: None,
            take_profit_pct: None,
        })
    }

    /// Turtle-style 20/10 channels.
    pub fn default_params() -> Self {
        Self {
            entry_period: 20,
            exit_period: 10,
            allow_short: false,
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }

    pub fn with_shorts(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    pub fn with_stop_loss_pct(mut self, pct: f64) -> Self {
        self.stop_loss_pct = Some(pct);
        self
    }

    pub fn with_take_profit_pct(mut self, pct: f64) -> Self {
        self.take_profit_pct = Some(pct);
        self
    }

    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let mut strategy = Self::new(
            param_usize(params, "entry_period")?,
            param_usize(params, "exit_period")?,
        )?
        .with_shorts(param_bool_or(params, "allow_short", false));
        if params.contains_key("stop_loss_pct") {
            strategy.stop_loss_pct = Some(param_f64(params, "stop_loss_pct")?);
        }
        if params.contains_key("take_profit_pct") {
            strategy.take_profit_pct = Some(param_f64(params, "take_profit_pct")?);
        }
        Ok(strategy)
    }

    fn entry(&self, side: Side, price: f64) -> Signal {
        let dir = side.direction();
        let mut signal = match side {
            Side::Long => Signal::buy(1.0),
            Side::Short => Signal::sell(1.0),
        };
        if let Some(pct) = self.stop_loss_pct {
            signal = signal.with_stop_loss(price * (1.0 - dir * pct / 100.0));
        }
        if let Some(pct) = self.take_profit_pct {
            signal = signal.with_take_profit(price * (1.0 + dir * pct / 100.0));
        }
        signal
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &str {
        "Donchian Breakout"
    }

    fn on_bar(&mut self, ctx: &StrategyContext) -> Result<Option<Signal>> {
        let history = ctx.history();
        let current = ctx.current_bar();

        if ctx.is_flat() {
            let (Some(high), Some(low)) = (
                highest_high(history, self.entry_period),
                lowest_low(history, self.entry_period),
            ) else {
                return Ok(None);
            };

            if current.high > high {
                return Ok(Some(self.entry(Side::Long, current.close)));
            }
            if self.allow_short && current.low < low {
                return Ok(Some(self.entry(Side::Short, current.close)));
            }
            return Ok(None);
        }

        let (Some(high), Some(low)) = (
            highest_high(history, self.exit_period),
            lowest_low(history, self.exit_period),
        ) else {
            return Ok(None);
        };

        if (ctx.is_long() && current.low < low) || (ctx.is_short() && current.high > high) {
            return Ok(Some(Signal::close()));
        }
        Ok(None)
    }

    fn warmup_period(&self) -> usize {
        self.entry_period.max(self.exit_period)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("entry_period".to_string(), self.entry_period.to_string()),
            ("exit_period".to_string(), self.exit_period.to_string()),
        ]
    }
}

pub fn breakout_factory(params: &ParamSet) -> Result<StrategyInstance> {
    Ok(StrategyInstance::bar_by_bar(BreakoutStrategy::from_params(params)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::types::{Bar, ExitReason};
    use chrono::{TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    c,
                    c + 1.0,
                    c - 1.0,
                    c,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_breakout_entry_and_channel_exit() {
        // flat range, breakout up, then a drop through the exit channel
        let mut closes = vec![100.0; 10];
        closes.extend([103.0, 105.0, 107.0, 104.0, 99.0, 98.0]);
        let bars = bars_from_closes(&closes);

        let mut strategy = BreakoutStrategy::new(5, 3).unwrap();
        let result = Engine::with_defaults().run(&mut strategy, &bars).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        assert_eq!(trade.entry_price, 103.0);
        assert_eq!(trade.exit_reason, ExitReason::Signal);
        assert_eq!(trade.exit_price, 99.0);
    }

    #[test]
    fn test_protective_stop() {
        let mut closes = vec![100.0; 10];
        closes.extend([110.0, 90.0, 95.0]);
        let bars = bars_from_closes(&closes);

        let mut strategy = BreakoutStrategy::new(5, 3).unwrap().with_stop_loss_pct(5.0);
        let result = Engine::with_defaults().run(&mut strategy, &bars).unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        // gapped through the 104.5 stop, filled at the open
        assert_eq!(trade.exit_price, 90.0);
    }

    #[test]
    fn test_short_breakdown() {
        let mut closes = vec![100.0; 10];
        closes.extend([96.0, 94.0]);
        let bars = bars_from_closes(&closes);

        let mut long_only = BreakoutStrategy::new(5, 3).unwrap();
        assert!(Engine::with_defaults()
            .run(&mut long_only, &bars)
            .unwrap()
            .trades
            .is_empty());

        let mut shorts = BreakoutStrategy::new(5, 3).unwrap().with_shorts(true);
        let result = Engine::with_defaults().run(&mut shorts, &bars).unwrap();
        assert_eq!(result.trades[0].side, Side::Short);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfData);
    }

    #[test]
    fn test_invalid_periods() {
        assert!(BreakoutStrategy::new(0, 5).is_err());
        let mut params = ParamSet::new();
        params.insert("entry_period".into(), 20i64.into());
        assert!(breakout_factory(&params).is_err());
    }
}
