//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Bar validation accepts consistent OHLC and rejects inverted ranges
//! 2. Metrics stay within their documented bounds for any trade list
//! 3. Monte Carlo outputs are bounded, ordered and reproducible
//! 4. Backtest engine invariants hold under random inputs

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use quantbench::engine::{BacktestConfig, Engine};
use quantbench::metrics;
use quantbench::monte_carlo::run_monte_carlo;
use quantbench::optimizer::{generate_combinations, num_combinations, ParamGrid, ParamValue};
use quantbench::strategies::SmaCrossover;
use quantbench::types::{Bar, Trade};

// ============================================================================
// Generators
// ============================================================================

/// Valid OHLC values where low <= open/close <= high.
fn valid_ohlc_strategy() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (10.0..10000.0f64).prop_flat_map(|base| {
        let variation = base * 0.1;
        (
            Just(base),
            0.0..variation,
            0.0..variation,
            0.0..=1.0f64,
            0.0..=1.0f64,
        )
            .prop_map(|(base, h_off, l_off, o_frac, c_frac)| {
                let high = base + h_off;
                let low = base - l_off;
                let open = (low + o_frac * (high - low)).clamp(low, high);
                let close = (low + c_frac * (high - low)).clamp(low, high);
                (open, high, low, close)
            })
    })
}

/// Trade PnLs including exact zeros, which count as losses.
fn pnl_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => -500.0..500.0f64,
        1 => Just(0.0),
    ]
}

fn trades_from_pnls(pnls: &[f64]) -> Vec<Trade> {
    pnls.iter()
        .enumerate()
        .map(|(i, &pnl)| {
            Trade::with_pnl(
                pnl,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
            )
        })
        .collect()
}

fn oscillating_bars(num_bars: usize, amplitude: f64) -> Vec<Bar> {
    (0..num_bars)
        .map(|i| {
            let base = 100.0 + (i as f64 * 0.3).sin() * amplitude;
            Bar::new(
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                base,
                base + 2.0,
                base - 2.0,
                base + (i as f64 * 0.5).cos(),
                100_000.0,
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // ========================================================================
    // Bar Validation
    // ========================================================================

    #[test]
    fn valid_ohlc_passes_validation((open, high, low, close) in valid_ohlc_strategy()) {
        let bar = Bar::new(Utc::now(), open, high, low, close, 1000.0);
        prop_assert!(bar.validate());
        prop_assert!(bar.high >= bar.low);
    }

    #[test]
    fn inverted_range_fails_validation(base in 10.0..1000.0f64, offset in 1.0..100.0f64) {
        let bar = Bar::new(Utc::now(), base, base, base + offset, base, 1000.0);
        prop_assert!(!bar.validate());
    }

    // ========================================================================
    // Metrics Invariants
    // ========================================================================

    #[test]
    fn win_and_loss_rates_partition_trades(
        pnls in prop::collection::vec(pnl_strategy(), 1..60)
    ) {
        let m = metrics::calculate(&trades_from_pnls(&pnls), 10_000.0);
        prop_assert_eq!(m.total_trades, pnls.len());
        prop_assert_eq!(m.winning_trades + m.losing_trades, m.total_trades);
        prop_assert!((0.0..=1.0).contains(&m.win_rate));
        prop_assert!((m.win_rate + m.loss_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_is_non_positive(
        pnls in prop::collection::vec(pnl_strategy(), 0..60)
    ) {
        let m = metrics::calculate(&trades_from_pnls(&pnls), 10_000.0);
        prop_assert!(m.max_drawdown <= 0.0);
        prop_assert!(m.max_drawdown_pct <= 0.0);
        if pnls.iter().all(|&p| p >= 0.0) {
            prop_assert_eq!(m.max_drawdown, 0.0);
        }
    }

    #[test]
    fn total_return_matches_sum_of_pnls(
        pnls in prop::collection::vec(pnl_strategy(), 0..60)
    ) {
        let m = metrics::calculate(&trades_from_pnls(&pnls), 10_000.0);
        let sum: f64 = pnls.iter().sum();
        prop_assert!((m.total_return - sum).abs() < 1e-6);
        prop_assert!((m.final_balance - (10_000.0 + sum)).abs() < 1e-6);
    }

    // ========================================================================
    // Monte Carlo Invariants
    // ========================================================================

    #[test]
    fn monte_carlo_probabilities_are_bounded(
        pnls in prop::collection::vec(pnl_strategy(), 1..40),
        seed in any::<u64>()
    ) {
        let result = run_monte_carlo(&pnls, 5_000.0, 50, seed);
        prop_assert_eq!(result.num_simulations, 50);
        prop_assert!((0.0..=100.0).contains(&result.probability_of_ruin));
        prop_assert!((0.0..=100.0).contains(&result.probability_of_profit));
        prop_assert!(result.mean_max_drawdown_pct >= 0.0);
    }

    #[test]
    fn monte_carlo_percentiles_are_ordered(
        pnls in prop::collection::vec(pnl_strategy(), 1..40),
        seed in any::<u64>()
    ) {
        let result = run_monte_carlo(&pnls, 5_000.0, 50, seed);
        let bands = &result.equity_percentiles;
        prop_assert_eq!(bands.len(), pnls.len() + 1);
        for i in 0..bands.len() {
            prop_assert!(bands.p5[i] <= bands.p25[i]);
            prop_assert!(bands.p25[i] <= bands.p50[i]);
            prop_assert!(bands.p50[i] <= bands.p75[i]);
            prop_assert!(bands.p75[i] <= bands.p95[i]);
        }
        prop_assert!((bands.p50[0] - 5_000.0).abs() < 1e-9);
    }

    #[test]
    fn monte_carlo_is_deterministic_per_seed(
        pnls in prop::collection::vec(pnl_strategy(), 1..30),
        seed in any::<u64>()
    ) {
        let a = run_monte_carlo(&pnls, 5_000.0, 40, seed);
        let b = run_monte_carlo(&pnls, 5_000.0, 40, seed);
        prop_assert_eq!(a, b);
    }

    // ========================================================================
    // Parameter Grid
    // ========================================================================

    #[test]
    fn grid_size_is_product_of_axes(sizes in prop::collection::vec(1..5usize, 1..4)) {
        let mut grid = ParamGrid::new();
        for (axis, &size) in sizes.iter().enumerate() {
            grid.insert(
                format!("p{}", axis),
                (0..size as i64).map(ParamValue::Int).collect(),
            );
        }
        let expected: usize = sizes.iter().product();
        prop_assert_eq!(num_combinations(&grid), expected);

        let combos = generate_combinations(&grid);
        prop_assert_eq!(combos.len(), expected);
        for combo in &combos {
            prop_assert_eq!(combo.len(), sizes.len());
        }
    }

    // ========================================================================
    // Backtest Engine Invariants
    // ========================================================================

    #[test]
    fn backtest_trade_count_matches_metrics(
        num_bars in 50..200usize,
        amplitude in 2.0..20.0f64,
        slippage_ticks in 0.0..5.0f64
    ) {
        let bars = oscillating_bars(num_bars, amplitude);
        let config = BacktestConfig {
            initial_balance: 50_000.0,
            slippage_ticks,
            commission: 1.0,
            ..Default::default()
        };

        let engine = Engine::new(config);
        let mut strategy = SmaCrossover::new(5, 15).unwrap();
        let result = engine.run(&mut strategy, &bars).unwrap();

        prop_assert_eq!(result.metrics.total_trades, result.trades.len());
        prop_assert_eq!(result.equity_curve.len(), bars.len() + 1);
        let expected_final = result.initial_balance + result.total_pnl();
        prop_assert!((result.final_equity() - expected_final).abs() < 1e-6);
    }

    #[test]
    fn backtest_is_deterministic(num_bars in 30..120usize) {
        let bars = oscillating_bars(num_bars, 8.0);
        let engine = Engine::with_defaults();

        let mut first = SmaCrossover::new(3, 10).unwrap();
        let mut second = SmaCrossover::new(3, 10).unwrap();
        let a = engine.run(&mut first, &bars).unwrap();
        let b = engine.run(&mut second, &bars).unwrap();

        prop_assert_eq!(a.trades, b.trades);
        prop_assert_eq!(a.equity_curve, b.equity_curve);
    }
}
