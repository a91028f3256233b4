//! Randomized parameter search over (degree, k, lookback).
//!
//! Each trial is a full fit + backtest; trials that fail to fit, blow past
//! the plausible-return cap, or produce non-finite metrics are recorded as
//! invalid and excluded from best-selection. They never abort the search.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::backtest::simulate;
use crate::config::{BacktestConfig, OptimizerConfig, ScanConfig};
use crate::model::bar::Bar;
use crate::model::channel::ChannelParams;
use crate::model::report::OptimizationTrial;

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub params: ChannelParams,
    pub trials: Vec<OptimizationTrial>,
    /// True when every trial was invalid and the documented defaults were
    /// returned instead of a searched optimum.
    pub fell_back: bool,
    pub best_objective: Option<f64>,
}

/// Whether the optimizer should run for this symbol at all. Cost control:
/// only the configured major assets get a search, everything else reuses
/// the scan defaults.
pub fn should_optimize(symbol: &str, opt: &OptimizerConfig) -> bool {
    opt.enabled && opt.major_symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
}

pub fn optimize(
    symbol: &str,
    bars: &[Bar],
    scan: &ScanConfig,
    opt: &OptimizerConfig,
    bt: &BacktestConfig,
) -> OptimizationOutcome {
    let defaults = ChannelParams::new(scan.degree, scan.k, scan.lookback);
    let mut rng = match opt.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Lookbacks must leave at least two bars to replay.
    let lookback_cap = opt.lookback_max.min(bars.len().saturating_sub(2));

    let mut trials = Vec::with_capacity(opt.max_trials);
    let mut best: Option<(f64, ChannelParams)> = None;

    for trial_index in 0..opt.max_trials {
        let degree = *opt
            .degree_choices
            .choose(&mut rng)
            .unwrap_or(&scan.degree);
        let k = rng.gen_range(opt.k_min..=opt.k_max);
        let lookback = if lookback_cap >= opt.lookback_min {
            rng.gen_range(opt.lookback_min..=lookback_cap)
        } else {
            // Window too short for the configured range; the trial is
            // evaluated anyway and recorded as invalid below.
            opt.lookback_min
        };
        let params = ChannelParams::new(degree, k, lookback);

        let (objective, valid) = match simulate(bars, params, scan, bt) {
            Ok(result) => {
                let plausible = result.total_return_pct.abs() <= opt.max_plausible_return_pct;
                let objective =
                    result.total_return_pct - opt.drawdown_penalty * result.max_drawdown_pct;
                if plausible && objective.is_finite() {
                    (objective, true)
                } else {
                    tracing::debug!(
                        symbol,
                        trial_index,
                        total_return_pct = result.total_return_pct,
                        "Trial rejected as implausible"
                    );
                    (0.0, false)
                }
            }
            Err(e) => {
                tracing::debug!(symbol, trial_index, error = %e, "Trial evaluation failed");
                (0.0, false)
            }
        };

        if valid {
            match &best {
                Some((best_obj, _)) if *best_obj >= objective => {}
                _ => best = Some((objective, params)),
            }
        }

        trials.push(OptimizationTrial {
            trial_index,
            degree,
            k,
            lookback,
            objective,
            valid,
        });
    }

    match best {
        Some((objective, params)) => {
            tracing::info!(
                symbol,
                degree = params.degree,
                k = params.k,
                lookback = params.lookback,
                objective,
                trials = trials.len(),
                "Optimization selected parameters"
            );
            OptimizationOutcome {
                params,
                trials,
                fell_back: false,
                best_objective: Some(objective),
            }
        }
        None => {
            tracing::warn!(
                symbol,
                trials = trials.len(),
                "All optimization trials invalid, falling back to defaults"
            );
            OptimizationOutcome {
                params: defaults,
                trials,
                fell_back: true,
                best_objective: None,
            }
        }
    }
}
