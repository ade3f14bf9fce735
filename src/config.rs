//! Configuration file support.
//!
//! A run file is TOML with one section per component. Every field has a
//! default, so a file only needs the settings it changes.

use crate::data::DataConfig;
use crate::engine::BacktestConfig;
use crate::error::{BacktestError, Result};
use crate::metrics::Metric;
use crate::monte_carlo::MonteCarloConfig;
use crate::optimizer::{OptimizationMethod, OptimizerConfig, ParamGrid, ParamSet, ParamSpace};
use crate::strategies::StrategyKind;
use crate::types::InstrumentSpec;
use crate::walkforward::WalkForwardConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete run configuration loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFileConfig {
    #[serde(default)]
    pub instrument: InstrumentSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub walk_forward: WalkForwardSettings,
    #[serde(default)]
    pub monte_carlo: MonteCarloSettings,
}

/// Contract specification of the traded instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Minimum price increment.
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,
    /// Currency value of one full point of price movement.
    #[serde(default = "default_point_value")]
    pub point_value: f64,
}

fn default_symbol() -> String {
    "SYMBOL".to_string()
}
fn default_tick_size() -> f64 {
    0.01
}
fn default_point_value() -> f64 {
    1.0
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            tick_size: default_tick_size(),
            point_value: default_point_value(),
        }
    }
}

impl InstrumentSettings {
    pub fn to_spec(&self) -> InstrumentSpec {
        InstrumentSpec::new(self.symbol.clone(), self.tick_size, self.point_value)
    }
}

/// Data source settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the CSV file; the CLI argument takes precedence.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub date_format: Option<String>,
    /// Field delimiter; detected when absent.
    #[serde(default)]
    pub delimiter: Option<char>,
}

impl DataSettings {
    pub fn to_data_config(&self) -> Result<DataConfig> {
        let delimiter = match self.delimiter {
            Some(c) if c.is_ascii() => Some(c as u8),
            Some(c) => {
                return Err(BacktestError::config(format!(
                    "Delimiter must be a single ASCII character, got {:?}",
                    c
                )))
            }
            None => None,
        };
        Ok(DataConfig {
            date_format: self.date_format.clone(),
            delimiter,
            ..Default::default()
        })
    }
}

/// Account and cost settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_balance")]
    pub initial_balance: f64,
    /// Commission charged per fill.
    #[serde(default)]
    pub commission: f64,
    /// Adverse slippage per fill, in ticks.
    #[serde(default)]
    pub slippage_ticks: f64,
}

fn default_balance() -> f64 {
    100_000.0
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_balance(),
            commission: 0.0,
            slippage_ticks: 0.0,
        }
    }
}

/// Strategy selection, fixed parameters and the sweep grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySettings {
    #[serde(default = "default_strategy")]
    pub name: String,
    /// Parameters for a single run.
    #[serde(default)]
    pub params: ParamSet,
    /// Candidate values for grid search and walk-forward.
    #[serde(default)]
    pub grid: ParamGrid,
}

fn default_strategy() -> String {
    "sma-crossover".to_string()
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            name: default_strategy(),
            params: ParamSet::new(),
            grid: ParamGrid::new(),
        }
    }
}

impl StrategySettings {
    pub fn kind(&self) -> Result<StrategyKind> {
        self.name.parse()
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default = "default_method")]
    pub method: OptimizationMethod,
    /// Candidates drawn by random search.
    #[serde(default = "default_trials")]
    pub trials: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Sampling space for random search.
    #[serde(default)]
    pub space: ParamSpace,
}

fn default_top_n() -> usize {
    20
}
fn default_true() -> bool {
    true
}
fn default_method() -> OptimizationMethod {
    OptimizationMethod::Grid
}
fn default_trials() -> usize {
    100
}
fn default_seed() -> u64 {
    42
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            top_n: default_top_n(),
            parallel: true,
            method: default_method(),
            trials: default_trials(),
            seed: default_seed(),
            space: ParamSpace::new(),
        }
    }
}

/// Walk-forward settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSettings {
    #[serde(default = "default_windows")]
    pub num_windows: usize,
    #[serde(default = "default_is_ratio")]
    pub in_sample_ratio: f64,
    #[serde(default = "default_min_is")]
    pub min_in_sample_bars: usize,
    #[serde(default = "default_min_oos")]
    pub min_out_of_sample_bars: usize,
    #[serde(default)]
    pub anchored: bool,
}

fn default_windows() -> usize {
    5
}
fn default_is_ratio() -> f64 {
    0.7
}
fn default_min_is() -> usize {
    20
}
fn default_min_oos() -> usize {
    5
}

impl Default for WalkForwardSettings {
    fn default() -> Self {
        Self {
            num_windows: default_windows(),
            in_sample_ratio: default_is_ratio(),
            min_in_sample_bars: default_min_is(),
            min_out_of_sample_bars: default_min_oos(),
            anchored: false,
        }
    }
}

/// Monte Carlo settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloSettings {
    #[serde(default = "default_simulations")]
    pub num_simulations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub ruin_threshold: f64,
    #[serde(default)]
    pub block_size: Option<usize>,
}

fn default_simulations() -> usize {
    1000
}

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            num_simulations: default_simulations(),
            seed: default_seed(),
            ruin_threshold: 0.0,
            block_size: None,
        }
    }
}

impl RunFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Engine configuration, validated against the instrument contract.
    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        let config = BacktestConfig::for_instrument(
            &self.instrument.to_spec(),
            self.backtest.initial_balance,
            self.backtest.commission,
            self.backtest.slippage_ticks,
        );
        config.validate()?;
        Ok(config)
    }

    pub fn to_optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            metric: self.optimizer.metric,
            top_n: self.optimizer.top_n,
            parallel: self.optimizer.parallel,
            show_progress: false,
        }
    }

    pub fn to_walk_forward_config(&self) -> Result<WalkForwardConfig> {
        let wf = &self.walk_forward;
        let config = WalkForwardConfig {
            num_windows: wf.num_windows,
            in_sample_ratio: wf.in_sample_ratio,
            min_in_sample_bars: wf.min_in_sample_bars,
            min_out_of_sample_bars: wf.min_out_of_sample_bars,
            anchored: wf.anchored,
            parallel: self.optimizer.parallel,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_monte_carlo_config(&self) -> Result<MonteCarloConfig> {
        let mc = &self.monte_carlo;
        if !mc.ruin_threshold.is_finite() {
            return Err(BacktestError::config("ruin_threshold must be finite"));
        }
        Ok(MonteCarloConfig {
            num_simulations: mc.num_simulations,
            seed: mc.seed,
            ruin_threshold: mc.ruin_threshold,
            parallel: self.optimizer.parallel,
            block_size: mc.block_size,
        })
    }

    /// Sweep grid; errors when the file declares none.
    pub fn param_grid(&self) -> Result<ParamGrid> {
        if self.strategy.grid.is_empty() {
            return Err(BacktestError::config(
                "No [strategy.grid] section in configuration",
            ));
        }
        Ok(self.strategy.grid.clone())
    }

    /// Random search space; errors when the file declares none.
    pub fn param_space(&self) -> Result<ParamSpace> {
        if self.optimizer.space.is_empty() {
            return Err(BacktestError::config(
                "No [optimizer.space] section in configuration",
            ));
        }
        Ok(self.optimizer.space.clone())
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# quantbench run configuration

[instrument]
symbol = "ES"
tick_size = 0.25
point_value = 50.0

[data]
# path = "data/es_daily.csv"
# date_format = "%Y-%m-%d"
# delimiter = ","

[backtest]
initial_balance = 100000.0
commission = 2.5        # per fill
slippage_ticks = 1.0

[strategy]
name = "sma-crossover"   # or "sma-crossover-vectorized", "breakout"

[strategy.params]
fast_period = 10
slow_period = 30
allow_short = false

[strategy.grid]
fast_period = [5, 10, 15, 20]
slow_period = [30, 40, 50, 60]

[optimizer]
metric = "sharpe_ratio"
top_n = 10
parallel = true
method = "grid"          # or "random"
trials = 100
seed = 42

[optimizer.space]
fast_period = { min = 5, max = 25, step = 1 }
slow_period = { min = 30, max = 90, step = 5 }

[walk_forward]
num_windows = 5
in_sample_ratio = 0.7
min_in_sample_bars = 20
min_out_of_sample_bars = 5
anchored = false

[monte_carlo]
num_simulations = 1000
seed = 42
ruin_threshold = 0.0
"#
        .to_string()
    }
}
