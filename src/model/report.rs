use serde::{Deserialize, Serialize};

use crate::model::bar::Timeframe;
use crate::model::channel::ChannelParams;
use crate::model::signal::{RiskLevel, SignalAction};

/// Output of one backtest replay over a bar history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub total_return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub trade_count: usize,
    pub bars_used: usize,
    pub final_equity: f64,
}

/// One optimizer proposal and its evaluated objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTrial {
    pub trial_index: usize,
    pub degree: usize,
    pub k: f64,
    pub lookback: usize,
    pub objective: f64,
    pub valid: bool,
}

/// One row of the per-run result schema: everything downstream consumers
/// (CSV/JSON output, ingestion) need for a single asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub action: SignalAction,
    pub current_price: f64,
    pub lower_band: f64,
    pub upper_band: f64,
    pub potential_return_pct: f64,
    pub strength: f64,
    pub risk: RiskLevel,
    pub total_return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub params: ChannelParams,
    /// Open time of the newest bar the signal was computed from. Part of
    /// the persistence upsert key, so re-running on the same window is a
    /// no-op.
    pub bar_time_ms: u64,
    /// Wall-clock timestamp of the analysis.
    pub analysis_ts_ms: u64,
    pub hold_reason: Option<String>,
    pub trials: Vec<OptimizationTrial>,
}

/// Storage tier a batch actually landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageTier {
    Primary,
    Fallback,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Tagged outcome of a pipeline stage. Degradation is data, not an
/// exception path.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Ok(T),
    Degraded(T, String),
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ok(v) | Self::Degraded(v, _) => Some(v),
            Self::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One asset that did not produce a valid result, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAsset {
    pub symbol: String,
    pub kind: String,
    pub reason: String,
}

/// Aggregated outcome of one scan run. Partial success is the expected
/// common case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: Vec<FailedAsset>,
    pub skipped: Vec<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len() + self.skipped.len()
    }
}
