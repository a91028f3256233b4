//! Per-run orchestration: a bounded worker pool scans assets in parallel,
//! each asset's Load -> (Optimize) -> Fit -> Classify -> Backtest chain is
//! strictly sequential, and recoverable failures degrade that one asset
//! only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::backtest::simulate;
use crate::config::Config;
use crate::error::ScanError;
use crate::loader::{HistoryLoader, KlineSource};
use crate::model::bar::{Bar, Timeframe};
use crate::model::channel::ChannelParams;
use crate::model::report::{AssetReport, FailedAsset, OptimizationTrial, RunSummary};
use crate::model::signal::{HoldReason, RiskLevel, Signal, SignalAction};
use crate::optimizer::{optimize, should_optimize};
use crate::regression::{classify, fit_channel};
use crate::store::ScanArtifact;

enum TaskResult {
    Done(Box<ScanArtifact>),
    Failed(FailedAsset),
    Skipped(String),
}

/// Scan `symbols` with the worker pool and return every artifact produced
/// plus the run summary. Partial success is the normal case; the caller
/// decides what run-level failure means from the summary.
pub async fn run_scan<S: KlineSource + 'static>(
    loader: Arc<HistoryLoader<S>>,
    config: Arc<Config>,
    symbols: Vec<String>,
) -> (Vec<ScanArtifact>, RunSummary) {
    let started = Instant::now();
    let timeframe = match config.scan.parsed_timeframe() {
        Ok(tf) => tf,
        Err(e) => {
            // Config is validated on load; this is a programming error
            // guard, not a user path.
            tracing::error!(error = %e, "Invalid timeframe reached the runner");
            return (Vec::new(), RunSummary::default());
        }
    };
    let days = config.scan.days;
    let deadline = if config.runner.run_deadline_secs > 0 {
        Some(started + Duration::from_secs(config.runner.run_deadline_secs))
    } else {
        None
    };
    let asset_timeout = Duration::from_secs(config.runner.asset_timeout_secs.max(1));
    let semaphore = Arc::new(Semaphore::new(config.runner.max_workers));

    let mut tasks = JoinSet::new();
    for symbol in symbols {
        let loader = loader.clone();
        let config = config.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return TaskResult::Skipped(symbol),
            };
            // Assets not yet started when the deadline passes are skipped;
            // in-flight ones run to their own timeout.
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(symbol = %symbol, "Run deadline passed, skipping asset");
                    return TaskResult::Skipped(symbol);
                }
            }
            match tokio::time::timeout(
                asset_timeout,
                scan_asset(&loader, &config, &symbol, timeframe, days),
            )
            .await
            {
                Ok(Ok(artifact)) => TaskResult::Done(Box::new(artifact)),
                Ok(Err(e)) => {
                    tracing::warn!(symbol = %symbol, kind = e.kind(), error = %e, "Asset scan failed");
                    TaskResult::Failed(FailedAsset {
                        symbol,
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    tracing::warn!(symbol = %symbol, "Asset scan timed out");
                    TaskResult::Failed(FailedAsset {
                        symbol,
                        kind: "timeout".to_string(),
                        reason: format!("scan exceeded {}s", asset_timeout.as_secs()),
                    })
                }
            }
        });
    }

    let mut artifacts = Vec::new();
    let mut summary = RunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(TaskResult::Done(artifact)) => {
                summary.succeeded += 1;
                artifacts.push(*artifact);
            }
            Ok(TaskResult::Failed(failed)) => summary.failed.push(failed),
            Ok(TaskResult::Skipped(symbol)) => summary.skipped.push(symbol),
            Err(e) => {
                tracing::error!(error = %e, "Scan task panicked");
                summary.failed.push(FailedAsset {
                    symbol: "<unknown>".to_string(),
                    kind: "panic".to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    summary.duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        duration_ms = summary.duration_ms,
        "Scan run complete"
    );
    (artifacts, summary)
}

/// One asset's full pipeline. Recoverable model failures degrade to a HOLD
/// record with a reason code; only fetch-level failures are reported as
/// errors.
async fn scan_asset<S: KlineSource>(
    loader: &HistoryLoader<S>,
    config: &Config,
    symbol: &str,
    timeframe: Timeframe,
    days: u32,
) -> Result<ScanArtifact, ScanError> {
    let bars = loader.load_unchecked(symbol, timeframe, days).await?;
    let now_ms = chrono::Utc::now().timestamp_millis() as u64;

    if bars.len() < loader.min_bars() {
        let Some(last) = bars.last() else {
            return Err(ScanError::InsufficientData {
                symbol: symbol.to_string(),
                got: 0,
                need: loader.min_bars(),
            });
        };
        tracing::warn!(
            symbol,
            got = bars.len(),
            need = loader.min_bars(),
            "Insufficient history, degrading to HOLD"
        );
        let params = ChannelParams::new(config.scan.degree, config.scan.k, config.scan.lookback);
        return Ok(hold_artifact(
            &bars,
            last.close,
            params,
            HoldReason::InsufficientData,
            now_ms,
        ));
    }

    let defaults = ChannelParams::new(config.scan.degree, config.scan.k, config.scan.lookback);
    let (params, trials) = if should_optimize(symbol, &config.optimizer) {
        let outcome = optimize(
            symbol,
            &bars,
            &config.scan,
            &config.optimizer,
            &config.backtest,
        );
        (outcome.params, outcome.trials)
    } else {
        (defaults, Vec::new())
    };

    // A rejected fit falls back to the scan defaults once; a second
    // rejection degrades the asset to HOLD.
    let channel = match fit_channel(&bars, params, &config.scan, now_ms) {
        Ok(channel) => channel,
        Err(first_err) if params != defaults => {
            tracing::warn!(symbol, error = %first_err, "Fit rejected, retrying with defaults");
            match fit_channel(&bars, defaults, &config.scan, now_ms) {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "Default fit rejected too, degrading to HOLD");
                    let last = bars.last().unwrap();
                    return Ok(hold_artifact(
                        &bars,
                        last.close,
                        defaults,
                        HoldReason::FitRejected,
                        now_ms,
                    ));
                }
            }
        }
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Fit rejected, degrading to HOLD");
            let last = bars.last().unwrap();
            return Ok(hold_artifact(
                &bars,
                last.close,
                defaults,
                HoldReason::FitRejected,
                now_ms,
            ));
        }
    };

    let signal = classify(&channel, &bars, &config.scan);

    let backtest = match simulate(&bars, channel.params, &config.scan, &config.backtest) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Backtest invalid, reporting zeroed metrics");
            None
        }
    };

    Ok(artifact_from_signal(&bars, signal, trials, backtest, now_ms))
}

fn artifact_from_signal(
    bars: &[Bar],
    signal: Signal,
    trials: Vec<OptimizationTrial>,
    backtest: Option<crate::model::report::BacktestResult>,
    now_ms: u64,
) -> ScanArtifact {
    let bar_time_ms = bars.last().map(|b| b.open_time_ms).unwrap_or(0);
    let params = signal.channel.params;
    let (total_return_pct, sharpe_ratio, max_drawdown_pct) = backtest
        .map(|b| (b.total_return_pct, b.sharpe_ratio, b.max_drawdown_pct))
        .unwrap_or((0.0, 0.0, 0.0));
    let report = AssetReport {
        symbol: signal.symbol.clone(),
        timeframe: signal.timeframe,
        action: signal.action,
        current_price: signal.current_price,
        lower_band: signal.channel.lower_band,
        upper_band: signal.channel.upper_band,
        potential_return_pct: signal.potential_return_pct,
        strength: signal.strength,
        risk: signal.risk,
        total_return_pct,
        sharpe_ratio,
        max_drawdown_pct,
        params,
        bar_time_ms,
        analysis_ts_ms: now_ms,
        hold_reason: signal.hold_reason.map(|r| r.as_str().to_string()),
        trials,
    };
    ScanArtifact {
        report,
        recent_bars: tail_bars(bars, params.lookback),
    }
}

/// Degraded record: HOLD with a reason code, bands pinned to the last
/// price, metrics zeroed.
fn hold_artifact(
    bars: &[Bar],
    price: f64,
    params: ChannelParams,
    reason: HoldReason,
    now_ms: u64,
) -> ScanArtifact {
    let last = bars.last().expect("hold_artifact requires at least one bar");
    let report = AssetReport {
        symbol: last.symbol.clone(),
        timeframe: last.timeframe,
        action: SignalAction::Hold,
        current_price: price,
        lower_band: price,
        upper_band: price,
        potential_return_pct: 0.0,
        strength: 0.0,
        risk: RiskLevel::High,
        total_return_pct: 0.0,
        sharpe_ratio: 0.0,
        max_drawdown_pct: 0.0,
        params,
        bar_time_ms: last.open_time_ms,
        analysis_ts_ms: now_ms,
        hold_reason: Some(reason.as_str().to_string()),
        trials: Vec::new(),
    };
    ScanArtifact {
        report,
        recent_bars: tail_bars(bars, params.lookback),
    }
}

fn tail_bars(bars: &[Bar], lookback: usize) -> Vec<Bar> {
    let start = bars.len().saturating_sub(lookback);
    bars[start..].to_vec()
}
