//! Parameter optimization.
//!
//! The optimizer runs one backtest per parameter combination, ranks the
//! combinations by a chosen [`Metric`], and measures how strongly each
//! parameter drives that metric.
//!
//! - **Grid search** enumerates the full Cartesian product of a [`ParamGrid`].
//! - **Random search** draws `num_trials` candidates from a [`ParamSpace`]
//!   with a seeded generator, so identical inputs give identical output.
//!
//! Combinations whose strategy cannot be built, or whose run fails, are
//! logged and left out. Evaluations may run in parallel; results are sorted
//! only after every evaluation has finished, so ranking never depends on
//! completion order.
//!
//! # Example
//!
//! ```ignore
//! use quantbench::optimizer::{Optimizer, OptimizerConfig, ParamGrid, ParamValue};
//!
//! let mut grid = ParamGrid::new();
//! grid.insert("fast_period".into(), vec![ParamValue::Int(5), ParamValue::Int(10)]);
//! grid.insert("slow_period".into(), vec![ParamValue::Int(20), ParamValue::Int(40)]);
//!
//! let optimizer = Optimizer::new(BacktestConfig::default(), OptimizerConfig::default());
//! let result = optimizer.grid_search(&bars, &grid, sma_crossover_factory)?;
//! println!("best: {:?} -> {:.3}", result.best_params, result.best_metric_value);
//! ```

use crate::data::validate_bars;
use crate::engine::{progress_bar, BacktestConfig, Engine};
use crate::error::{BacktestError, Result};
use crate::metrics::{self, Metric, Metrics};
use crate::stats::pearson_correlation;
use crate::strategy::StrategyInstance;
use crate::types::Bar;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Ranking value substituted for `+inf`.
pub const RANK_VALUE_CAP: f64 = 999.0;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ParamValue {
    /// Numeric view used for sensitivity analysis.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            ParamValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Non-negative integral view, for periods and counts.
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as usize),
            ParamValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            ParamValue::Int(v) => Some(*v != 0),
            ParamValue::Str(s) => s.trim().parse().ok(),
            ParamValue::Float(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Integers, then floats, then booleans; anything else is kept as text.
impl FromStr for ParamValue {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BacktestError::InvalidInput("Empty parameter value".into()));
        }
        if let Ok(v) = s.parse::<i64>() {
            return Ok(ParamValue::Int(v));
        }
        if let Ok(v) = s.parse::<f64>() {
            return Ok(ParamValue::Float(v));
        }
        if let Ok(v) = s.parse::<bool>() {
            return Ok(ParamValue::Bool(v));
        }
        Ok(ParamValue::Str(s.to_string()))
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

/// One parameter assignment, keyed by name in a fixed order.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Candidate values per parameter for grid search.
pub type ParamGrid = BTreeMap<String, Vec<ParamValue>>;

/// Sampling specification per parameter for random search.
pub type ParamSpace = BTreeMap<String, ParamSpec>;

/// How random search draws one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    /// Integer range `min..=max` on a `step` lattice.
    IntRange { min: i64, max: i64, step: i64 },
    /// Explicit discrete set.
    Choice(Vec<ParamValue>),
}

impl ParamSpec {
    pub fn range(min: i64, max: i64, step: i64) -> Self {
        ParamSpec::IntRange { min, max, step }
    }

    pub fn choice(values: impl IntoIterator<Item = impl Into<ParamValue>>) -> Self {
        ParamSpec::Choice(values.into_iter().map(Into::into).collect())
    }

    fn validate(&self, name: &str) -> Result<()> {
        match self {
            ParamSpec::IntRange { min, max, step } => {
                if *step <= 0 || max < min {
                    return Err(BacktestError::config(format!(
                        "Parameter '{}' has invalid range {}..={} step {}",
                        name, min, max, step
                    )));
                }
            }
            ParamSpec::Choice(values) => {
                if values.is_empty() {
                    return Err(BacktestError::config(format!(
                        "Parameter '{}' has no choices",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every value this spec can produce.
    pub fn values(&self) -> Vec<ParamValue> {
        match self {
            ParamSpec::IntRange { min, max, step } if *step > 0 => (*min..=*max)
                .step_by(*step as usize)
                .map(ParamValue::Int)
                .collect(),
            ParamSpec::IntRange { .. } => vec![],
            ParamSpec::Choice(values) => values.clone(),
        }
    }

    /// Uniformly draw one value.
    pub fn sample(&self, rng: &mut impl Rng) -> ParamValue {
        match self {
            ParamSpec::IntRange { min, max, step } if *step > 0 && min <= max => {
                // widened: a span over the full i64 domain overflows
                let (min, step) = (i128::from(*min), i128::from(*step));
                let steps = (i128::from(*max) - min) / step;
                let value = min + rng.gen_range(0..=steps) * step;
                ParamValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
            }
            ParamSpec::IntRange { min, .. } => ParamValue::Int(*min),
            ParamSpec::Choice(values) => values[rng.gen_range(0..values.len())].clone(),
        }
    }
}

/// Fetch a non-negative integer parameter.
pub fn param_usize(params: &ParamSet, name: &str) -> Result<usize> {
    params
        .get(name)
        .and_then(ParamValue::as_usize)
        .ok_or_else(|| BacktestError::strategy(format!("Missing or invalid parameter '{}'", name)))
}

/// Fetch a numeric parameter.
pub fn param_f64(params: &ParamSet, name: &str) -> Result<f64> {
    params
        .get(name)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| BacktestError::strategy(format!("Missing or invalid parameter '{}'", name)))
}

/// Fetch a boolean parameter, falling back to `default` when absent.
pub fn param_bool_or(params: &ParamSet, name: &str, default: bool) -> bool {
    params
        .get(name)
        .and_then(ParamValue::as_bool)
        .unwrap_or(default)
}

/// Search method that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMethod {
    Grid,
    Random,
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationMethod::Grid => write!(f, "grid"),
            OptimizationMethod::Random => write!(f, "random"),
        }
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Objective to maximize.
    pub metric: Metric,
    /// How many ranked results to keep.
    pub top_n: usize,
    /// Evaluate combinations on the rayon pool.
    pub parallel: bool,
    /// Show progress bar across combinations.
    pub show_progress: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            metric: Metric::SharpeRatio,
            top_n: 20,
            parallel: true,
            show_progress: false,
        }
    }
}

impl OptimizerConfig {
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// One ranked combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub params: ParamSet,
    pub metrics: Metrics,
    /// Objective value used for ranking (infinities capped).
    pub metric_value: f64,
    /// 1-based rank.
    pub rank: usize,
}

/// Outcome of a grid or random search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub method: OptimizationMethod,
    pub metric: Metric,
    /// Combinations attempted.
    pub total_combinations: usize,
    /// Combinations that ran successfully.
    pub evaluated: usize,
    /// Empty when nothing was evaluated.
    pub best_params: ParamSet,
    pub best_metric_value: f64,
    pub best_metrics: Metrics,
    /// Top-N combinations, best first.
    pub results: Vec<RankedResult>,
    /// Absolute correlation of each parameter with the objective.
    pub sensitivity: BTreeMap<String, f64>,
}

impl OptimizationResult {
    /// Parameters sorted by sensitivity, most influential first.
    pub fn most_sensitive(&self) -> Vec<(&str, f64)> {
        let mut items: Vec<(&str, f64)> = self
            .sensitivity
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        items.sort_by(|a, b| b.1.total_cmp(&a.1));
        items
    }
}

/// Objective value as used for ranking. Infinities are capped at
/// +/-[`RANK_VALUE_CAP`]; NaN ranks last.
pub fn rank_value(value: f64) -> f64 {
    if value.is_nan() {
        -RANK_VALUE_CAP
    } else if value == f64::INFINITY {
        RANK_VALUE_CAP
    } else if value == f64::NEG_INFINITY {
        -RANK_VALUE_CAP
    } else {
        value
    }
}

/// Enumerate the Cartesian product of a grid in key order.
pub fn generate_combinations(grid: &ParamGrid) -> Vec<ParamSet> {
    let names: Vec<&String> = grid.keys().collect();
    let values: Vec<&Vec<ParamValue>> = grid.values().collect();
    let mut combinations = Vec::with_capacity(num_combinations(grid));
    combinations_recursive(&names, &values, 0, ParamSet::new(), &mut combinations);
    combinations
}

fn combinations_recursive(
    names: &[&String],
    values: &[&Vec<ParamValue>],
    depth: usize,
    current: ParamSet,
    result: &mut Vec<ParamSet>,
) {
    if depth == names.len() {
        result.push(current);
        return;
    }

    for value in values[depth] {
        let mut next = current.clone();
        next.insert(names[depth].clone(), value.clone());
        combinations_recursive(names, values, depth + 1, next, result);
    }
}

/// Number of combinations a grid expands to.
pub fn num_combinations(grid: &ParamGrid) -> usize {
    if grid.is_empty() {
        return 0;
    }
    grid.values().map(|v| v.len()).product()
}

/// Draw `num_trials` candidates. Parameters are sampled in key order from a
/// single generator, so the sequence depends only on the seed and the space.
pub fn sample_candidates(space: &ParamSpace, num_trials: usize, seed: u64) -> Vec<ParamSet> {
    let mut rng = Pcg64::seed_from_u64(seed);
    (0..num_trials)
        .map(|_| {
            space
                .iter()
                .map(|(name, spec)| (name.clone(), spec.sample(&mut rng)))
                .collect()
        })
        .collect()
}

/// A successful evaluation before ranking.
struct Evaluation {
    params: ParamSet,
    metrics: Metrics,
    metric_value: f64,
}

/// Drives many backtests over a parameter space.
pub struct Optimizer {
    backtest_config: BacktestConfig,
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(backtest_config: BacktestConfig, config: OptimizerConfig) -> Self {
        Self {
            backtest_config,
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Exhaustive search over every combination in `grid`.
    pub fn grid_search<F>(
        &self,
        bars: &[Bar],
        grid: &ParamGrid,
        factory: F,
    ) -> Result<OptimizationResult>
    where
        F: Fn(&ParamSet) -> Result<StrategyInstance> + Send + Sync,
    {
        if grid.is_empty() {
            return Err(BacktestError::config("Parameter grid is empty"));
        }
        if let Some((name, _)) = grid.iter().find(|(_, values)| values.is_empty()) {
            return Err(BacktestError::config(format!(
                "Parameter '{}' has no values",
                name
            )));
        }

        let candidates = generate_combinations(grid);
        let names: Vec<String> = grid.keys().cloned().collect();
        self.evaluate(bars, OptimizationMethod::Grid, candidates, &names, &factory)
    }

    /// Seeded random search drawing `num_trials` candidates from `space`.
    pub fn random_search<F>(
        &self,
        bars: &[Bar],
        space: &ParamSpace,
        num_trials: usize,
        seed: u64,
        factory: F,
    ) -> Result<OptimizationResult>
    where
        F: Fn(&ParamSet) -> Result<StrategyInstance> + Send + Sync,
    {
        if space.is_empty() {
            return Err(BacktestError::config("Parameter space is empty"));
        }
        if num_trials == 0 {
            return Err(BacktestError::config("num_trials must be positive"));
        }
        for (name, spec) in space {
            spec.validate(name)?;
        }

        let candidates = sample_candidates(space, num_trials, seed);
        let names: Vec<String> = space.keys().cloned().collect();
        self.evaluate(bars, OptimizationMethod::Random, candidates, &names, &factory)
    }

    fn evaluate<F>(
        &self,
        bars: &[Bar],
        method: OptimizationMethod,
        candidates: Vec<ParamSet>,
        names: &[String],
        factory: &F,
    ) -> Result<OptimizationResult>
    where
        F: Fn(&ParamSet) -> Result<StrategyInstance> + Send + Sync,
    {
        self.backtest_config.validate()?;
        if bars.is_empty() {
            return Err(BacktestError::NoData);
        }
        validate_bars(bars)?;

        let total = candidates.len();
        info!(
            "Optimizing {} combinations ({} search, metric {})",
            total, method, self.config.metric
        );

        let mut config = self.backtest_config.clone();
        config.show_progress = false;
        let engine = Engine::new(config);

        let progress = self
            .config
            .show_progress
            .then(|| progress_bar(total as u64));

        let run_one = |params: &ParamSet| -> Option<Evaluation> {
            let outcome = self.evaluate_one(&engine, bars, params, total, factory);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            match outcome {
                Ok(evaluation) => Some(evaluation),
                Err(e) => {
                    warn!("Optimization run failed for {:?}: {}", params, e);
                    None
                }
            }
        };

        let evaluations: Vec<Evaluation> = if self.config.parallel {
            candidates.par_iter().filter_map(run_one).collect()
        } else {
            candidates.iter().filter_map(run_one).collect()
        };

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        Ok(self.rank(method, total, names, evaluations))
    }

    fn evaluate_one<F>(
        &self,
        engine: &Engine,
        bars: &[Bar],
        params: &ParamSet,
        num_trials: usize,
        factory: &F,
    ) -> Result<Evaluation>
    where
        F: Fn(&ParamSet) -> Result<StrategyInstance> + Send + Sync,
    {
        let mut instance = factory(params)?;
        let result = engine.run_instance(&mut instance, bars)?;
        let metrics =
            metrics::calculate_with_trials(&result.trades, result.initial_balance, num_trials);
        let metric_value = rank_value(self.config.metric.extract(&metrics));
        debug!("{:?} -> {} = {:.4}", params, self.config.metric, metric_value);
        Ok(Evaluation {
            params: params.clone(),
            metrics,
            metric_value,
        })
    }

    fn rank(
        &self,
        method: OptimizationMethod,
        total: usize,
        names: &[String],
        mut evaluations: Vec<Evaluation>,
    ) -> OptimizationResult {
        let evaluated = evaluations.len();
        if evaluated < total {
            warn!("{} of {} combinations failed", total - evaluated, total);
        }

        let sensitivity = sensitivity(names, &evaluations);

        // stable: ties keep enumeration order
        evaluations.sort_by(|a, b| b.metric_value.total_cmp(&a.metric_value));

        let (best_params, best_metric_value, best_metrics) = match evaluations.first() {
            Some(best) => (best.params.clone(), best.metric_value, best.metrics.clone()),
            None => (ParamSet::new(), 0.0, Metrics::default()),
        };

        let results: Vec<RankedResult> = evaluations
            .into_iter()
            .take(self.config.top_n)
            .enumerate()
            .map(|(i, e)| RankedResult {
                params: e.params,
                metrics: e.metrics,
                metric_value: e.metric_value,
                rank: i + 1,
            })
            .collect();

        info!(
            "Optimization complete: {}/{} evaluated, best {} = {:.4}",
            evaluated, total, self.config.metric, best_metric_value
        );

        OptimizationResult {
            method,
            metric: self.config.metric,
            total_combinations: total,
            evaluated,
            best_params,
            best_metric_value,
            best_metrics,
            results,
            sensitivity,
        }
    }
}

/// Minimum successful evaluations before correlations are reported.
const MIN_SENSITIVITY_SAMPLES: usize = 5;

/// |Pearson r| between each parameter and the objective. Zero when there are
/// too few evaluations or a parameter has a non-numeric value.
fn sensitivity(names: &[String], evaluations: &[Evaluation]) -> BTreeMap<String, f64> {
    let ys: Vec<f64> = evaluations.iter().map(|e| e.metric_value).collect();

    names
        .iter()
        .map(|name| {
            if evaluations.len() <= MIN_SENSITIVITY_SAMPLES {
                return (name.clone(), 0.0);
            }
            let xs: Option<Vec<f64>> = evaluations
                .iter()
                .map(|e| e.params.get(name).and_then(ParamValue::as_f64))
                .collect();
            let value = xs
                .map(|xs| pearson_correlation(&xs, &ys).abs())
                .unwrap_or(0.0);
            (name.clone(), value)
        })
        .collect()
}
