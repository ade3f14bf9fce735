//! Simple Moving Average Crossover Strategy.
//!
//! A classic trend-following strategy: go long when the fast average crosses
//! above the slow one, and exit (or reverse short) on the opposite cross.
//! Both the bar-by-bar and the vectorized forms read the same averages and
//! trade on the same bars.

use crate::data::sma;
use crate::error::{BacktestError, Result};
use crate::optimizer::{param_bool_or, param_f64, param_usize, ParamSet};
use crate::strategy::{SignalArrays, Strategy, StrategyContext, StrategyInstance, VectorizedStrategy};
use crate::types::{Bar, Signal};

/// Direction of a crossover between two consecutive bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cross {
    Bullish,
    Bearish,
}

fn detect_cross(prev_fast: f64, prev_slow: f64, fast: f64, slow: f64) -> Option<Cross> {
    if prev_fast <= prev_slow && fast > slow {
        Some(Cross::Bullish)
    } else if prev_fast >= prev_slow && fast < slow {
        Some(Cross::Bearish)
    } else {
        None
    }
}

fn check_periods(fast_period: usize, slow_period: usize) -> Result<()> {
    if fast_period == 0 || fast_period >= slow_period {
        return Err(BacktestError::strategy(format!(
            "Fast period must be positive and less than slow period ({} / {})",
            fast_period, slow_period
        )));
    }
    Ok(())
}

/// SMA Crossover Strategy.
///
/// # Parameters
/// - `fast_period`: Period for the fast moving average (default: 10)
/// - `slow_period`: Period for the slow moving average (default: 30)
/// - `allow_short`: Reverse into a short on a bearish cross (default: false)
/// - `size`: Position size per entry (default: 1)
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
    allow_short: bool,
    size: f64,
    prev: Option<(f64, f64)>,
}

impl SmaCrossover {
    /// Create a new SMA Crossover strategy.
    pub fn new(fast_period: usize, slow_period: usize) -> Result<Self> {
        check_periods(fast_period, slow_period)?;
        Ok(Self {
            fast_period,
            slow_period,
            allow_short: false,
            size: 1.0,
            prev: None,
        })
    }

    /// Create with default parameters (10/30).
    pub fn default_params() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
            allow_short: false,
            size: 1.0,
            prev: None,
        }
    }

    pub fn with_shorts(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    /// Build from `fast_period`, `slow_period` and the optional
    /// `allow_short` and `size` parameters.
    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let size = match params.get("size") {
            Some(_) => param_f64(params, "size")?,
            None => 1.0,
        };
        Ok(Self::new(
            param_usize(params, "fast_period")?,
            param_usize(params, "slow_period")?,
        )?
        .with_shorts(param_bool_or(params, "allow_short", false))
        .with_size(size))
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "SMA Crossover"
    }

    fn init(&mut self) {
        self.prev = None;
    }

    fn on_bar(&mut self, ctx: &StrategyContext) -> Result<Option<Signal>> {
        let history = ctx.history();
        let (Some(fast), Some(slow)) = (
            sma(history, self.fast_period),
            sma(history, self.slow_period),
        ) else {
            return Ok(None);
        };

        let cross = self
            .prev
            .and_then(|(prev_fast, prev_slow)| detect_cross(prev_fast, prev_slow, fast, slow));
        self.prev = Some((fast, slow));

        Ok(match cross {
            Some(Cross::Bullish) => Some(Signal::buy(self.size)),
            Some(Cross::Bearish) if self.allow_short => Some(Signal::sell(self.size)),
            Some(Cross::Bearish) => Some(Signal::close()),
            None => None,
        })
    }

    /// The first call only primes the previous averages.
    fn warmup_period(&self) -> usize {
        self.slow_period - 1
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("fast_period".to_string(), self.fast_period.to_string()),
            ("slow_period".to_string(), self.slow_period.to_string()),
            ("allow_short".to_string(), self.allow_short.to_string()),
        ]
    }
}

/// Vectorized form of [`SmaCrossover`].
#[derive(Debug, Clone)]
pub struct SmaCrossoverSignals {
    fast_period: usize,
    slow_period: usize,
    allow_short: bool,
    size: f64,
}

impl SmaCrossoverSignals {
    pub fn new(fast_period: usize, slow_period: usize) -> Result<Self> {
        check_periods(fast_period, slow_period)?;
        Ok(Self {
            fast_period,
            slow_period,
            allow_short: false,
            size: 1.0,
        })
    }

    pub fn with_shorts(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let bar_by_bar = SmaCrossover::from_params(params)?;
        Ok(Self {
            fast_period: bar_by_bar.fast_period,
            slow_period: bar_by_bar.slow_period,
            allow_short: bar_by_bar.allow_short,
            size: bar_by_bar.size,
        })
    }
}

impl VectorizedStrategy for SmaCrossoverSignals {
    fn name(&self) -> &str {
        "SMA Crossover (vectorized)"
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<SignalArrays> {
        let n = bars.len();
        let averages: Vec<Option<(f64, f64)>> = (0..n)
            .map(|i| {
                let history = &bars[..=i];
                Some((sma(history, self.fast_period)?, sma(history, self.slow_period)?))
            })
            .collect();

        let mut bullish = vec![false; n];
        let mut bearish = vec![false; n];
        for i in 1..n {
            if let (Some((pf, ps)), Some((f, s))) = (averages[i - 1], averages[i]) {
                match detect_cross(pf, ps, f, s) {
                    Some(Cross::Bullish) => bullish[i] = true,
                    Some(Cross::Bearish) => bearish[i] = true,
                    None => {}
                }
            }
        }

        let arrays = if self.allow_short {
            SignalArrays::long_only(bullish.clone(), bearish.clone()).with_shorts(bearish, bullish)
        } else {
            SignalArrays::long_only(bullish, bearish)
        };
        Ok(arrays.with_size(self.size))
    }
}

/// Strategy factory for parameter sweeps over the bar-by-bar form.
pub fn sma_crossover_factory(params: &ParamSet) -> Result<StrategyInstance> {
    Ok(StrategyInstance::bar_by_bar(SmaCrossover::from_params(params)?))
}

/// Strategy factory for parameter sweeps over the vectorized form.
pub fn vectorized_sma_factory(params: &ParamSet) -> Result<StrategyInstance> {
    Ok(StrategyInstance::vectorized(SmaCrossoverSignals::from_params(params)?))
}
