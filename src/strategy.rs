//! Strategy contracts.
//!
//! Two closed variants are supported: [`Strategy`] is consulted once per bar
//! and may keep state, [`VectorizedStrategy`] computes boolean signal arrays
//! for the whole table up front. Callers hand either one to the engine
//! wrapped in a [`StrategyInstance`].

use crate::error::{BacktestError, Result};
use crate::types::{Bar, Side, Signal};

/// Context provided to bar-by-bar strategies.
///
/// `bars` is already truncated to the current bar, so no future data is
/// reachable from inside a callback.
#[derive(Debug)]
pub struct StrategyContext<'a> {
    /// Index of the current bar in the table.
    pub bar_index: usize,
    /// Bars up to and including the current one.
    pub bars: &'a [Bar],
    /// Side of the open position, if any.
    pub position: Option<Side>,
    /// Mark-to-market equity at the previous bar close.
    pub equity: f64,
}

impl<'a> StrategyContext<'a> {
    /// Get the current bar.
    pub fn current_bar(&self) -> &Bar {
        &self.bars[self.bar_index]
    }

    /// Get the previous bar, if available.
    pub fn prev_bar(&self) -> Option<&Bar> {
        if self.bar_index > 0 {
            Some(&self.bars[self.bar_index - 1])
        } else {
            None
        }
    }

    /// Get all bars up to and including current.
    pub fn history(&self) -> &[Bar] {
        &self.bars[..=self.bar_index]
    }

    pub fn is_long(&self) -> bool {
        self.position == Some(Side::Long)
    }

    pub fn is_short(&self) -> bool {
        self.position == Some(Side::Short)
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }
}

/// Stateful strategy driven bar by bar.
pub trait Strategy: Send + Sync {
    /// Returns the name of the strategy.
    fn name(&self) -> &str;

    /// Called once at the start of every run.
    fn init(&mut self) {}

    /// Inspect the current bar and optionally emit a signal.
    ///
    /// Returning an error aborts the run.
    fn on_bar(&mut self, ctx: &StrategyContext) -> Result<Option<Signal>>;

    /// Called after the last bar.
    fn on_finish(&mut self) {}

    /// Number of leading bars during which `on_bar` is not called.
    fn warmup_period(&self) -> usize {
        0
    }

    /// Strategy parameters as key-value pairs for logging.
    fn parameters(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// Whole-series signals produced by a [`VectorizedStrategy`].
///
/// Every array is aligned to the bar table. Entries open (or flip into) a
/// long, exits close a long. The optional short arrays do the same for the
/// short side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalArrays {
    pub entries: Vec<bool>,
    pub exits: Vec<bool>,
    pub short_entries: Option<Vec<bool>>,
    pub short_exits: Option<Vec<bool>>,
    /// Position size used for every entry.
    pub size: f64,
}

impl SignalArrays {
    /// Long-only signals with unit size.
    pub fn long_only(entries: Vec<bool>, exits: Vec<bool>) -> Self {
        Self {
            entries,
            exits,
            short_entries: None,
            short_exits: None,
            size: 1.0,
        }
    }

    /// Attach short-side arrays.
    pub fn with_shorts(mut self, short_entries: Vec<bool>, short_exits: Vec<bool>) -> Self {
        self.short_entries = Some(short_entries);
        self.short_exits = Some(short_exits);
        self
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    /// Check that every array matches the table length.
    pub fn validate(&self, len: usize) -> Result<()> {
        let check = |name: &str, arr: &[bool]| {
            if arr.len() != len {
                Err(BacktestError::InvalidInput(format!(
                    "{} has {} values, expected {}",
                    name,
                    arr.len(),
                    len
                )))
            } else {
                Ok(())
            }
        };

        check("entries", &self.entries)?;
        check("exits", &self.exits)?;
        if let Some(arr) = &self.short_entries {
            check("short_entries", arr)?;
        }
        if let Some(arr) = &self.short_exits {
            check("short_exits", arr)?;
        }
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(BacktestError::InvalidInput(format!(
                "Signal size must be positive, got {}",
                self.size
            )));
        }
        Ok(())
    }

    pub(crate) fn short_entry(&self, i: usize) -> bool {
        self.short_entries.as_ref().is_some_and(|v| v[i])
    }

    pub(crate) fn short_exit(&self, i: usize) -> bool {
        self.short_exits.as_ref().is_some_and(|v| v[i])
    }
}

/// Strategy that evaluates the whole table at once.
pub trait VectorizedStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Compute signal arrays aligned to `bars`.
    fn generate_signals(&self, bars: &[Bar]) -> Result<SignalArrays>;
}

/// A strategy supplied by the caller, in either variant.
pub enum StrategyInstance {
    BarByBar(Box<dyn Strategy>),
    Vectorized(Box<dyn VectorizedStrategy>),
}

impl StrategyInstance {
    pub fn bar_by_bar(strategy: impl Strategy + 'static) -> Self {
        StrategyInstance::BarByBar(Box::new(strategy))
    }

    pub fn vectorized(strategy: impl VectorizedStrategy + 'static) -> Self {
        StrategyInstance::Vectorized(Box::new(strategy))
    }

    pub fn name(&self) -> &str {
        match self {
            StrategyInstance::BarByBar(s) => s.name(),
            StrategyInstance::Vectorized(s) => s.name(),
        }
    }
}

impl std::fmt::Debug for StrategyInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyInstance::BarByBar(s) => write!(f, "BarByBar({})", s.name()),
            StrategyInstance::Vectorized(s) => write!(f, "Vectorized({})", s.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    100.0,
                    101.0,
                    99.0,
                    100.0 + i as f64,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_context_history_is_bounded() {
        let data = bars(10);
        let ctx = StrategyContext {
            bar_index: 4,
            bars: &data[..5],
            position: None,
            equity: 0.0,
        };
        assert_eq!(ctx.history().len(), 5);
        assert_eq!(ctx.current_bar().close, 104.0);
        assert_eq!(ctx.prev_bar().map(|b| b.close), Some(103.0));
        assert!(ctx.is_flat());
    }

    #[test]
    fn test_signal_array_validation() {
        let arrays = SignalArrays::long_only(vec![false; 5], vec![false; 5]);
        assert!(arrays.validate(5).is_ok());
        assert!(arrays.validate(4).is_err());

        let shorts = arrays.clone().with_shorts(vec![false; 5], vec![false; 3]);
        assert!(matches!(
            shorts.validate(5),
            Err(BacktestError::InvalidInput(_))
        ));

        let zero = arrays.with_size(0.0);
        assert!(zero.validate(5).is_err());
    }
}
