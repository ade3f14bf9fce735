//! Monte Carlo resampling of trade outcomes.
//!
//! A completed run's trade PnLs are resampled with replacement into many
//! synthetic equity paths. Across the paths the simulator reports the chance
//! of ruin and of profit, the distribution of final returns, drawdown
//! statistics, and per-step percentile bands of equity.
//!
//! Every trial draws from its own generator, seeded from the configured seed
//! and the trial index, so results are the same whether trials run in
//! sequence or on the rayon pool.
//!
//! # Example
//!
//! ```ignore
//! use quantbench::monte_carlo::{MonteCarloConfig, MonteCarloSimulator};
//!
//! let simulator = MonteCarloSimulator::new(MonteCarloConfig::default().with_seed(7));
//! let mc = simulator.simulate_result(&backtest_result);
//! println!("P(ruin) = {:.1}%", mc.probability_of_ruin);
//! ```

use crate::engine::BacktestResult;
use crate::stats::{mean, percentile, sort_floats, std_dev};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for Monte Carlo simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Number of simulated paths.
    pub num_simulations: usize,
    /// Base seed; each trial derives its own stream from it.
    pub seed: u64,
    /// A path is ruined once equity touches this level or below.
    pub ruin_threshold: f64,
    /// Run trials on the rayon pool.
    pub parallel: bool,
    /// Resample contiguous blocks of trades instead of single trades.
    #[serde(default)]
    pub block_size: Option<usize>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_simulations: 1000,
            seed: 42,
            ruin_threshold: 0.0,
            parallel: true,
            block_size: None,
        }
    }
}

impl MonteCarloConfig {
    /// Create config for quick analysis.
    pub fn quick() -> Self {
        Self {
            num_simulations: 100,
            ..Default::default()
        }
    }

    /// Create config for thorough analysis.
    pub fn thorough() -> Self {
        Self {
            num_simulations: 10000,
            ..Default::default()
        }
    }

    pub fn with_simulations(mut self, n: usize) -> Self {
        self.num_simulations = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ruin_threshold(mut self, threshold: f64) -> Self {
        self.ruin_threshold = threshold;
        self
    }

    /// Resample blocks of `size` consecutive trades, preserving serial
    /// correlation within each block.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = Some(size);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Per-step percentile bands across all simulated paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityPercentiles {
    pub p5: Vec<f64>,
    pub p25: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p95: Vec<f64>,
}

impl EquityPercentiles {
    /// Number of steps in every band.
    pub fn len(&self) -> usize {
        self.p50.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p50.is_empty()
    }

    /// Bands keyed by label, lowest first.
    pub fn bands(&self) -> [(&'static str, &[f64]); 5] {
        [
            ("p5", &self.p5),
            ("p25", &self.p25),
            ("p50", &self.p50),
            ("p75", &self.p75),
            ("p95", &self.p95),
        ]
    }
}

/// Results from Monte Carlo simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    /// Paths simulated; 0 when there was nothing to resample.
    pub num_simulations: usize,
    /// Trades per path.
    pub num_trades: usize,
    pub initial_balance: f64,
    /// Percent of paths that touched the ruin threshold.
    pub probability_of_ruin: f64,
    /// Percent of paths ending above the initial balance.
    pub probability_of_profit: f64,
    /// Final returns, in percent of the initial balance.
    pub mean_return: f64,
    pub median_return: f64,
    pub std_return: f64,
    /// Loss at the 5th return percentile, as a positive percent.
    pub value_at_risk_95: f64,
    /// Mean loss of the paths at or beyond the VaR, as a positive percent.
    pub conditional_value_at_risk_95: f64,
    /// Mean of each path's worst peak-to-trough decline, in percent.
    pub mean_max_drawdown_pct: f64,
    pub max_drawdown_95th_pct: f64,
    pub equity_percentiles: EquityPercentiles,
}

impl MonteCarloResult {
    fn empty(num_trades: usize, initial_balance: f64) -> Self {
        Self {
            num_trades,
            initial_balance,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_simulations == 0
    }

    /// Generate summary report.
    pub fn summary(&self) -> String {
        format!(
            r#"Monte Carlo Simulation Results
==============================
Simulations: {}
Trades per path: {}

Returns:
  Mean: {:.2}%
  Median: {:.2}%
  Std Dev: {:.2}%
  P(Profit): {:.1}%

Risk:
  P(Ruin): {:.1}%
  Mean Max DD: {:.2}%
  95th %ile DD: {:.2}%
  VaR (95%): {:.2}%
  CVaR (95%): {:.2}%"#,
            self.num_simulations,
            self.num_trades,
            self.mean_return,
            self.median_return,
            self.std_return,
            self.probability_of_profit,
            self.probability_of_ruin,
            self.mean_max_drawdown_pct,
            self.max_drawdown_95th_pct,
            self.value_at_risk_95,
            self.conditional_value_at_risk_95,
        )
    }
}

/// Seed for trial `trial`, derived with a splitmix64 step so neighbouring
/// trials get unrelated streams.
pub fn trial_seed(seed: u64, trial: u64) -> u64 {
    let mut z = seed.wrapping_add(trial.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One simulated path.
struct Trial {
    path: Vec<f64>,
    max_drawdown_pct: f64,
    ruined: bool,
}

/// Monte Carlo simulator for strategy analysis.
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    /// Resample the trades of a finished backtest.
    pub fn simulate_result(&self, result: &BacktestResult) -> MonteCarloResult {
        self.simulate(&result.trade_pnls(), result.initial_balance)
    }

    /// Resample `pnls` into synthetic equity paths starting at `initial_balance`.
    pub fn simulate(&self, pnls: &[f64], initial_balance: f64) -> MonteCarloResult {
        let n = self.config.num_simulations;
        if pnls.is_empty() || n == 0 {
            debug!("Nothing to simulate ({} trades, {} simulations)", pnls.len(), n);
            return MonteCarloResult::empty(pnls.len(), initial_balance);
        }

        info!(
            "Running {} Monte Carlo simulations over {} trades",
            n,
            pnls.len()
        );

        let run = |t: u64| self.run_trial(pnls, initial_balance, t);
        let trials: Vec<Trial> = if self.config.parallel {
            (0..n as u64).into_par_iter().map(run).collect()
        } else {
            (0..n as u64).map(run).collect()
        };

        self.aggregate(trials, pnls.len(), initial_balance)
    }

    fn run_trial(&self, pnls: &[f64], initial_balance: f64, trial: u64) -> Trial {
        let mut rng = Pcg64::seed_from_u64(trial_seed(self.config.seed, trial));
        let samples = match self.config.block_size {
            Some(size) if size > 1 => block_resample(&mut rng, pnls, size),
            _ => (0..pnls.len())
                .map(|_| pnls[rng.gen_range(0..pnls.len())])
                .collect(),
        };

        let mut path = Vec::with_capacity(samples.len() + 1);
        let mut equity = initial_balance;
        let mut peak = initial_balance;
        let mut max_drawdown_pct: f64 = 0.0;
        let mut ruined = equity <= self.config.ruin_threshold;
        path.push(equity);

        for pnl in samples {
            equity += pnl;
            path.push(equity);
            ruined |= equity <= self.config.ruin_threshold;
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown_pct = max_drawdown_pct.max((peak - equity) / peak * 100.0);
            }
        }

        Trial {
            path,
            max_drawdown_pct,
            ruined,
        }
    }

    fn aggregate(&self, trials: Vec<Trial>, num_trades: usize, initial_balance: f64) -> MonteCarloResult {
        let n = trials.len();
        let count = n as f64;

        let mut returns: Vec<f64> = trials
            .iter()
            .map(|t| {
                let final_equity = t.path.last().copied().unwrap_or(initial_balance);
                if initial_balance > 0.0 {
                    (final_equity - initial_balance) / initial_balance * 100.0
                } else {
                    0.0
                }
            })
            .collect();
        let profitable = trials
            .iter()
            .filter(|t| t.path.last().is_some_and(|&e| e > initial_balance))
            .count();
        let ruined = trials.iter().filter(|t| t.ruined).count();

        let mean_return = mean(&returns);
        let std_return = std_dev(&returns);
        sort_floats(&mut returns);
        let median_return = percentile(&returns, 0.5);

        let tail = percentile(&returns, 0.05);
        let tail_returns: Vec<f64> = returns.iter().copied().filter(|&r| r <= tail).collect();
        let value_at_risk_95 = -tail;
        let conditional_value_at_risk_95 = if tail_returns.is_empty() {
            value_at_risk_95
        } else {
            -mean(&tail_returns)
        };

        let mut drawdowns: Vec<f64> = trials.iter().map(|t| t.max_drawdown_pct).collect();
        let mean_max_drawdown_pct = mean(&drawdowns);
        sort_floats(&mut drawdowns);
        let max_drawdown_95th_pct = percentile(&drawdowns, 0.95);

        let equity_percentiles = step_percentiles(&trials);

        info!(
            "Monte Carlo complete: P(ruin) {:.1}%, P(profit) {:.1}%, median return {:.2}%",
            ruined as f64 / count * 100.0,
            profitable as f64 / count * 100.0,
            median_return
        );

        MonteCarloResult {
            num_simulations: n,
            num_trades,
            initial_balance,
            probability_of_ruin: ruined as f64 / count * 100.0,
            probability_of_profit: profitable as f64 / count * 100.0,
            mean_return,
            median_return,
            std_return,
            value_at_risk_95,
            conditional_value_at_risk_95,
            mean_max_drawdown_pct,
            max_drawdown_95th_pct,
            equity_percentiles,
        }
    }
}

/// Concatenate randomly chosen blocks of consecutive trades up to the
/// original length.
fn block_resample(rng: &mut impl Rng, pnls: &[f64], block_size: usize) -> Vec<f64> {
    let n = pnls.len();
    let block_size = block_size.min(n);
    let starts = n - block_size + 1;

    let mut result = Vec::with_capacity(n);
    while result.len() < n {
        let start = rng.gen_range(0..starts);
        result.extend_from_slice(&pnls[start..start + block_size]);
    }
    result.truncate(n);
    result
}

/// Percentile bands computed independently at every step.
fn step_percentiles(trials: &[Trial]) -> EquityPercentiles {
    let steps = trials.first().map_or(0, |t| t.path.len());
    let mut bands = EquityPercentiles {
        p5: Vec::with_capacity(steps),
        p25: Vec::with_capacity(steps),
        p50: Vec::with_capacity(steps),
        p75: Vec::with_capacity(steps),
        p95: Vec::with_capacity(steps),
    };

    let mut column = Vec::with_capacity(trials.len());
    for step in 0..steps {
        column.clear();
        column.extend(trials.iter().map(|t| t.path[step]));
        sort_floats(&mut column);
        bands.p5.push(percentile(&column, 0.05));
        bands.p25.push(percentile(&column, 0.25));
        bands.p50.push(percentile(&column, 0.50));
        bands.p75.push(percentile(&column, 0.75));
        bands.p95.push(percentile(&column, 0.95));
    }

    bands
}

/// Resample `pnls` with the default configuration and the given size and seed.
pub fn run_monte_carlo(
    pnls: &[f64],
    initial_balance: f64,
    num_simulations: usize,
    seed: u64,
) -> MonteCarloResult {
    let config = MonteCarloConfig::default()
        .with_simulations(num_simulations)
        .with_seed(seed);
    MonteCarloSimulator::new(config).simulate(pnls, initial_balance)
}
