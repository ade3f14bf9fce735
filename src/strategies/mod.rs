//! Built-in trading strategies.
//!
//! - [`SmaCrossover`]: Simple Moving Average crossover, bar by bar
//! - [`SmaCrossoverSignals`]: the same rule as whole-series signal arrays
//! - [`BreakoutStrategy`]: Donchian channel breakout
//!
//! [`StrategyKind`] names each one so configuration files and the CLI can
//! pick a factory for parameter sweeps.

mod breakout;
mod sma_crossover;

pub use breakout::{breakout_factory, BreakoutStrategy};
pub use sma_crossover::{
    sma_crossover_factory, vectorized_sma_factory, SmaCrossover, SmaCrossoverSignals,
};

use crate::error::{BacktestError, Result};
use crate::optimizer::ParamSet;
use crate::strategy::StrategyInstance;
use std::fmt;
use std::str::FromStr;

/// Signature shared by every strategy factory.
pub type StrategyFactory = fn(&ParamSet) -> Result<StrategyInstance>;

/// Built-in strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    SmaCrossover,
    SmaCrossoverVectorized,
    Breakout,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::SmaCrossover,
        StrategyKind::SmaCrossoverVectorized,
        StrategyKind::Breakout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SmaCrossover => "sma-crossover",
            StrategyKind::SmaCrossoverVectorized => "sma-crossover-vectorized",
            StrategyKind::Breakout => "breakout",
        }
    }

    pub fn factory(&self) -> StrategyFactory {
        match self {
            StrategyKind::SmaCrossover => sma_crossover_factory,
            StrategyKind::SmaCrossoverVectorized => vectorized_sma_factory,
            StrategyKind::Breakout => breakout_factory,
        }
    }

    pub fn build(&self, params: &ParamSet) -> Result<StrategyInstance> {
        (self.factory())(params)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "sma-crossover" | "sma" => Ok(StrategyKind::SmaCrossover),
            "sma-crossover-vectorized" | "sma-vectorized" => {
                Ok(StrategyKind::SmaCrossoverVectorized)
            }
            "breakout" | "donchian" => Ok(StrategyKind::Breakout),
            _ => Err(BacktestError::config(format!(
                "Unknown strategy '{}'. Available: {}",
                s,
                StrategyKind::ALL.map(|k| k.as_str()).join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            "sma_crossover".parse::<StrategyKind>().unwrap(),
            StrategyKind::SmaCrossover
        );
        assert_eq!(
            "Donchian".parse::<StrategyKind>().unwrap(),
            StrategyKind::Breakout
        );
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("rsi".parse::<StrategyKind>().is_err());
    }
}
