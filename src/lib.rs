//! quantbench - evaluation core for single-instrument trading strategies.
//!
//! # Overview
//!
//! quantbench replays a strategy over historical OHLCV bars and answers the
//! questions that come after a single backtest:
//!
//! - **Backtesting**: bar-by-bar or vectorized signals, fills at bar close
//!   with per-fill commission and adverse tick slippage
//! - **Metrics**: return, drawdown, Sharpe/Sortino/Calmar, trade statistics,
//!   and a deflated Sharpe ratio that accounts for the number of trials
//! - **Optimization**: exhaustive grid search or seeded random search,
//!   evaluated in parallel and ranked by a chosen metric
//! - **Walk-forward analysis**: rolling or anchored in-sample optimization
//!   followed by out-of-sample validation
//! - **Monte Carlo**: trade-order resampling for ruin probability, VaR and
//!   equity percentile bands
//!
//! # Quick Start
//!
//! ```no_run
//! use quantbench::data::{load_csv, DataConfig};
//! use quantbench::engine::{BacktestConfig, Engine};
//! use quantbench::strategies::SmaCrossover;
//!
//! let bars = load_csv("data/ES.csv", &DataConfig::default()).unwrap();
//! let engine = Engine::new(BacktestConfig::default());
//!
//! let mut strategy = SmaCrossover::new(10, 30).unwrap();
//! let result = engine.run(&mut strategy, &bars).unwrap();
//!
//! println!("Net PnL: {:.2}", result.metrics.total_return);
//! println!("Sharpe:  {:.2}", result.metrics.sharpe_ratio);
//! ```
//!
//! # Creating Custom Strategies
//!
//! Implement the [`Strategy`] trait. Returning `None` keeps the current
//! position.
//!
//! ```
//! use quantbench::error::Result;
//! use quantbench::strategy::{Strategy, StrategyContext};
//! use quantbench::types::Signal;
//!
//! struct BuyTheDip {
//!     drop: f64,
//! }
//!
//! impl Strategy for BuyTheDip {
//!     fn name(&self) -> &str {
//!         "Buy The Dip"
//!     }
//!
//!     fn on_bar(&mut self, ctx: &StrategyContext) -> Result<Option<Signal>> {
//!         let bar = ctx.current_bar();
//!         match ctx.prev_bar() {
//!             Some(prev) if ctx.is_flat() && bar.close < prev.close - self.drop => {
//!                 Ok(Some(Signal::buy(1.0)))
//!             }
//!             Some(prev) if ctx.is_long() && bar.close > prev.close => Ok(Some(Signal::close())),
//!             _ => Ok(None),
//!         }
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Bars, signals, trades and instrument specs
//! - [`data`]: CSV loading, validation, indicators and the bar cache
//! - [`strategy`]: Strategy traits and the per-bar context
//! - [`engine`]: Backtest execution
//! - [`metrics`]: Performance metrics and the ranking [`Metric`] enum
//! - [`optimizer`]: Parameter grids, random search and ranking
//! - [`walkforward`]: Walk-forward optimization
//! - [`monte_carlo`]: Trade resampling simulation
//! - [`strategies`]: Built-in strategies
//! - [`config`]: TOML run configuration
//! - [`report`]: Terminal tables, JSON and CSV output

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod monte_carlo;
pub mod optimizer;
pub mod report;
pub mod stats;
pub mod strategies;
pub mod strategy;
pub mod types;
pub mod walkforward;

// Re-exports for convenience
pub use config::RunFileConfig;
pub use engine::{BacktestConfig, BacktestResult, Engine};
pub use error::{BacktestError, Result};
pub use metrics::{Metric, Metrics};
pub use monte_carlo::{run_monte_carlo, MonteCarloConfig, MonteCarloResult, MonteCarloSimulator};
pub use optimizer::{
    OptimizationMethod, OptimizationResult, Optimizer, OptimizerConfig, ParamGrid, ParamSet,
    ParamSpace, ParamSpec, ParamValue, RankedResult,
};
pub use report::ResultFormatter;
pub use strategies::StrategyKind;
pub use strategy::{SignalArrays, Strategy, StrategyContext, StrategyInstance, VectorizedStrategy};
pub use types::{Bar, EquityPoint, ExitReason, InstrumentSpec, Side, Signal, SignalAction, Trade};
pub use walkforward::{
    WalkForwardConfig, WalkForwardResult, WalkForwardRunner, WindowBounds, WindowResult,
};
