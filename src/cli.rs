//! Command-line interface for the evaluation core.

use quantbench::config::RunFileConfig;
use quantbench::data::load_csv;
use quantbench::engine::{BacktestResult, Engine};
use quantbench::error::{BacktestError, Result};
use quantbench::metrics::Metric;
use quantbench::monte_carlo::MonteCarloSimulator;
use quantbench::optimizer::{OptimizationMethod, Optimizer, ParamGrid, ParamSet, ParamValue};
use quantbench::report::ResultFormatter;
use quantbench::strategies::StrategyKind;
use quantbench::types::Bar;
use quantbench::walkforward::WalkForwardRunner;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// quantbench - backtesting, optimization and robustness analysis for trading strategies.
#[derive(Parser)]
#[command(name = "quantbench")]
#[command(version)]
#[command(about = "Evaluate trading strategies: backtest, optimize, walk-forward, Monte Carlo")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by every analysis subcommand.
#[derive(Args)]
pub struct CommonArgs {
    /// Path to CSV data file (overrides [data].path)
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// TOML run configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Strategy: sma-crossover, sma-crossover-vectorized, breakout
    #[arg(short = 'S', long)]
    pub strategy: Option<String>,

    /// Initial balance
    #[arg(short, long)]
    pub balance: Option<f64>,

    /// Commission per fill
    #[arg(long)]
    pub commission: Option<f64>,

    /// Slippage per fill, in ticks
    #[arg(long)]
    pub slippage_ticks: Option<f64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single backtest
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Strategy parameter as key=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Number of most recent trades to list
        #[arg(long, default_value = "10")]
        trades: usize,
    },

    /// Optimize strategy parameters
    Optimize {
        #[command(flatten)]
        common: CommonArgs,

        /// Grid axis as key=v1,v2,... (repeatable, overrides [strategy.grid])
        #[arg(short, long = "grid", value_name = "KEY=VALUES")]
        grid: Vec<String>,

        /// Metric to maximize
        #[arg(short, long)]
        metric: Option<String>,

        /// Search method
        #[arg(long, value_enum)]
        method: Option<MethodArg>,

        /// Random search trials
        #[arg(long)]
        trials: Option<usize>,

        /// Random search seed
        #[arg(long)]
        seed: Option<u64>,

        /// Number of ranked results to keep
        #[arg(long)]
        top: Option<usize>,
    },

    /// Walk-forward optimization and out-of-sample validation
    WalkForward {
        #[command(flatten)]
        common: CommonArgs,

        /// Grid axis as key=v1,v2,... (repeatable, overrides [strategy.grid])
        #[arg(short, long = "grid", value_name = "KEY=VALUES")]
        grid: Vec<String>,

        /// Metric to maximize in-sample
        #[arg(short, long)]
        metric: Option<String>,

        /// Number of windows
        #[arg(short = 'w', long)]
        windows: Option<usize>,

        /// In-sample fraction of each window
        #[arg(long)]
        ratio: Option<f64>,

        /// Grow the in-sample block from the start of the data
        #[arg(long)]
        anchored: bool,
    },

    /// Monte Carlo resampling of a backtest's trades
    MonteCarlo {
        #[command(flatten)]
        common: CommonArgs,

        /// Strategy parameter as key=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Number of simulations
        #[arg(short = 'n', long)]
        simulations: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate an example configuration file
    Init {
        /// Path of the config file to write
        #[arg(short, long, default_value = "quantbench.toml")]
        file: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Grid,
    Random,
}

impl From<MethodArg> for OptimizationMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Grid => OptimizationMethod::Grid,
            MethodArg::Random => OptimizationMethod::Random,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            common,
            params,
            trades,
        } => run_backtest(common, params, *trades, cli.output),
        Commands::Optimize {
            common,
            grid,
            metric,
            method,
            trials,
            seed,
            top,
        } => {
            let mut config = load_config(common)?;
            apply_grid(&mut config, grid)?;
            apply_metric(&mut config, metric.as_deref())?;
            if let Some(method) = method {
                config.optimizer.method = (*method).into();
            }
            if let Some(trials) = trials {
                config.optimizer.trials = *trials;
            }
            if let Some(seed) = seed {
                config.optimizer.seed = *seed;
            }
            if let Some(top) = top {
                config.optimizer.top_n = *top;
            }
            run_optimization(common, &config, cli.output)
        }
        Commands::WalkForward {
            common,
            grid,
            metric,
            windows,
            ratio,
            anchored,
        } => {
            let mut config = load_config(common)?;
            apply_grid(&mut config, grid)?;
            apply_metric(&mut config, metric.as_deref())?;
            if let Some(windows) = windows {
                config.walk_forward.num_windows = *windows;
            }
            if let Some(ratio) = ratio {
                config.walk_forward.in_sample_ratio = *ratio;
            }
            config.walk_forward.anchored |= *anchored;
            run_walk_forward(common, &config, cli.output)
        }
        Commands::MonteCarlo {
            common,
            params,
            simulations,
            seed,
        } => {
            let mut config = load_config(common)?;
            apply_params(&mut config, params)?;
            if let Some(n) = simulations {
                config.monte_carlo.num_simulations = *n;
            }
            if let Some(seed) = seed {
                config.monte_carlo.seed = *seed;
            }
            run_monte_carlo(common, &config, cli.output)
        }
        Commands::Init { file } => init_config(file),
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(common: &CommonArgs) -> Result<RunFileConfig> {
    let mut config = match &common.config {
        Some(path) => RunFileConfig::load(path)?,
        None => RunFileConfig::default(),
    };

    if let Some(strategy) = &common.strategy {
        config.strategy.name = strategy.clone();
    }
    if let Some(balance) = common.balance {
        config.backtest.initial_balance = balance;
    }
    if let Some(commission) = common.commission {
        config.backtest.commission = commission;
    }
    if let Some(slippage) = common.slippage_ticks {
        config.backtest.slippage_ticks = slippage;
    }
    Ok(config)
}

fn split_assignment(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| {
            BacktestError::InvalidInput(format!("Expected KEY=VALUE, got '{}'", arg))
        })
}

fn apply_params(config: &mut RunFileConfig, args: &[String]) -> Result<()> {
    for arg in args {
        let (key, value) = split_assignment(arg)?;
        config
            .strategy
            .params
            .insert(key.to_string(), value.parse::<ParamValue>()?);
    }
    Ok(())
}

fn apply_grid(config: &mut RunFileConfig, args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }
    let mut grid = ParamGrid::new();
    for arg in args {
        let (key, values) = split_assignment(arg)?;
        let values = values
            .split(',')
            .map(str::parse::<ParamValue>)
            .collect::<Result<Vec<_>>>()?;
        grid.insert(key.to_string(), values);
    }
    config.strategy.grid = grid;
    Ok(())
}

fn apply_metric(config: &mut RunFileConfig, metric: Option<&str>) -> Result<()> {
    if let Some(metric) = metric {
        config.optimizer.metric = metric.parse::<Metric>()?;
    }
    Ok(())
}

fn load_bars(common: &CommonArgs, config: &RunFileConfig) -> Result<Vec<Bar>> {
    let path = match (&common.data, &config.data.path) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => PathBuf::from(path),
        (None, None) => {
            return Err(BacktestError::config(
                "No data file given (use --data or [data].path)",
            ))
        }
    };
    load_csv(&path, &config.data.to_data_config()?)
}

/// Single-run parameters: defaults for the SMA crossover unless overridden.
fn run_params(config: &RunFileConfig, kind: StrategyKind) -> ParamSet {
    let mut params = ParamSet::new();
    match kind {
        StrategyKind::SmaCrossover | StrategyKind::SmaCrossoverVectorized => {
            params.insert("fast_period".into(), ParamValue::Int(10));
            params.insert("slow_period".into(), ParamValue::Int(30));
        }
        StrategyKind::Breakout => {
            params.insert("entry_period".into(), ParamValue::Int(20));
            params.insert("exit_period".into(), ParamValue::Int(10));
        }
    }
    params.extend(config.strategy.params.clone());
    params
}

fn backtest(
    config: &RunFileConfig,
    bars: &[Bar],
    show_progress: bool,
) -> Result<BacktestResult> {
    let kind = config.strategy.kind()?;
    let mut backtest_config = config.to_backtest_config()?;
    backtest_config.show_progress = show_progress;

    let params = run_params(config, kind);
    info!("Strategy {} with {}", kind, ResultFormatter::format_params(&params));
    let mut strategy = kind.build(&params)?;
    Engine::new(backtest_config).run_instance(&mut strategy, bars)
}

fn run_backtest(
    common: &CommonArgs,
    params: &[String],
    trades: usize,
    output: OutputFormat,
) -> Result<()> {
    let mut config = load_config(common)?;
    apply_params(&mut config, params)?;
    let bars = load_bars(common, &config)?;
    let result = backtest(&config, &bars, output == OutputFormat::Text)?;

    match output {
        OutputFormat::Text => {
            ResultFormatter::print_report(&result);
            if trades > 0 && !result.trades.is_empty() {
                println!();
                println!("{}", ResultFormatter::trades_table(&result.trades, trades));
            }
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&result)?),
        OutputFormat::Csv => {
            println!("{}", ResultFormatter::csv_header());
            println!("{}", ResultFormatter::to_csv_line(&result));
        }
    }
    Ok(())
}

fn warn_csv_fallback() {
    warn!("CSV output is only available for `run`; printing text");
}

fn run_optimization(common: &CommonArgs, config: &RunFileConfig, output: OutputFormat) -> Result<()> {
    let bars = load_bars(common, config)?;
    let kind = config.strategy.kind()?;
    let mut optimizer_config = config.to_optimizer_config();
    optimizer_config.show_progress = output == OutputFormat::Text;
    let optimizer = Optimizer::new(config.to_backtest_config()?, optimizer_config);

    let result = match config.optimizer.method {
        OptimizationMethod::Grid => {
            optimizer.grid_search(&bars, &config.param_grid()?, kind.factory())?
        }
        OptimizationMethod::Random => optimizer.random_search(
            &bars,
            &config.param_space()?,
            config.optimizer.trials,
            config.optimizer.seed,
            kind.factory(),
        )?,
    };

    if result.evaluated == 0 {
        return Err(BacktestError::OptimizationError(format!(
            "All {} combinations failed",
            result.total_combinations
        )));
    }

    match output {
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&result)?),
        OutputFormat::Text => ResultFormatter::print_optimization(&result),
        OutputFormat::Csv => {
            warn_csv_fallback();
            ResultFormatter::print_optimization(&result);
        }
    }
    Ok(())
}

fn run_walk_forward(common: &CommonArgs, config: &RunFileConfig, output: OutputFormat) -> Result<()> {
    let bars = load_bars(common, config)?;
    let kind = config.strategy.kind()?;
    let runner = WalkForwardRunner::new(
        config.to_walk_forward_config()?,
        config.to_backtest_config()?,
        config.to_optimizer_config(),
    );
    let result = runner.run(&bars, &config.param_grid()?, kind.factory())?;

    match output {
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&result)?),
        OutputFormat::Text => ResultFormatter::print_walk_forward(&result),
        OutputFormat::Csv => {
            warn_csv_fallback();
            ResultFormatter::print_walk_forward(&result);
        }
    }
    Ok(())
}

fn run_monte_carlo(common: &CommonArgs, config: &RunFileConfig, output: OutputFormat) -> Result<()> {
    let bars = load_bars(common, config)?;
    let result = backtest(config, &bars, false)?;
    info!("Resampling {} trades", result.trades.len());

    let simulator = MonteCarloSimulator::new(config.to_monte_carlo_config()?);
    let mc = simulator.simulate_result(&result);
    if mc.is_empty() {
        warn!("Backtest produced no trades; nothing to resample");
    }

    match output {
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&mc)?),
        OutputFormat::Text => ResultFormatter::print_monte_carlo(&mc),
        OutputFormat::Csv => {
            warn_csv_fallback();
            ResultFormatter::print_monte_carlo(&mc);
        }
    }
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    fs::write(path, RunFileConfig::example())?;
    println!("Created example configuration file: {}", path.display());
    println!("\nEdit this file, then run for example:");
    println!("  quantbench optimize -c {} -d data.csv", path.display());
    Ok(())
}
