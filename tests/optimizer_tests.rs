use chanscan::config::{BacktestConfig, OptimizerConfig, ScanConfig};
use chanscan::model::bar::{Bar, Timeframe};
use chanscan::optimizer::{optimize, should_optimize};

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Bar {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::D1,
            open_time_ms: 1_600_000_000_000 + i as u64 * 86_400_000,
            open: *c,
            high: c * 1.02,
            low: c * 0.98,
            close: *c,
            volume: 10.0,
        })
        .collect()
}

fn trending_bars(count: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..count)
        .map(|i| {
            let wobble = 1.0 + 0.04 * ((i as f64 * 0.7).sin());
            100.0 * (0.0015 * i as f64).exp() * wobble
        })
        .collect();
    bars_from_closes(&closes)
}

fn seeded_config() -> OptimizerConfig {
    OptimizerConfig {
        enabled: true,
        max_trials: 15,
        lookback_min: 50,
        lookback_max: 150,
        seed: Some(99),
        ..OptimizerConfig::default()
    }
}

#[test]
fn trial_budget_is_respected() {
    let bars = trending_bars(300);
    let outcome = optimize(
        "BTCUSDT",
        &bars,
        &ScanConfig::default(),
        &seeded_config(),
        &BacktestConfig::default(),
    );
    assert_eq!(outcome.trials.len(), 15);
    for (i, t) in outcome.trials.iter().enumerate() {
        assert_eq!(t.trial_index, i);
    }
}

#[test]
fn all_invalid_trials_fall_back_to_documented_defaults() {
    // Force every backtest to be implausible: a negative cap rejects any
    // finite return.
    let mut opt = seeded_config();
    opt.max_plausible_return_pct = -1.0;

    let bars = trending_bars(300);
    let scan = ScanConfig::default();
    let outcome = optimize("BTCUSDT", &bars, &scan, &opt, &BacktestConfig::default());

    assert!(outcome.fell_back);
    assert!(outcome.best_objective.is_none());
    assert_eq!(outcome.params.degree, scan.degree);
    assert!((outcome.params.k - scan.k).abs() < f64::EPSILON);
    assert_eq!(outcome.params.lookback, scan.lookback);
    assert!(outcome.trials.iter().all(|t| !t.valid));
}

#[test]
fn best_selection_tracks_max_valid_objective() {
    let bars = trending_bars(120);
    let mut opt = seeded_config();
    opt.lookback_min = 50;
    opt.lookback_max = 350;
    opt.max_trials = 25;

    let outcome = optimize(
        "BTCUSDT",
        &bars,
        &ScanConfig::default(),
        &opt,
        &BacktestConfig::default(),
    );
    assert_eq!(outcome.trials.len(), 25);
    if let Some(best) = outcome.best_objective {
        for t in outcome.trials.iter().filter(|t| t.valid) {
            assert!(t.objective <= best + 1e-12);
        }
    }
}

#[test]
fn optimization_gated_to_major_symbols() {
    let opt = seeded_config();
    assert!(should_optimize("ETHUSDT", &opt));
    assert!(!should_optimize("PEPEUSDT", &opt));
}
