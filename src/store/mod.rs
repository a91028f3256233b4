//! Ingestion & persistence pipeline.
//!
//! Per run: COLLECT -> VALIDATE -> PERSIST_PRIMARY -> (PERSIST_ANALYTICS)
//! -> DONE, degrading PRIMARY failures to the in-memory fallback tier.
//! Record-level violations exclude the record and are reported; they never
//! abort the batch.

pub mod duckdb;
pub mod fallback;
pub mod sqlite;

use std::collections::HashSet;
use std::path::Path;

use uuid::Uuid;

use crate::config::StorageConfig;
use crate::model::bar::{Bar, Timeframe};
use crate::model::report::{AssetReport, StageOutcome, StorageTier};

use self::duckdb::DuckDbStore;
use self::fallback::FallbackStore;
use self::sqlite::SqliteStore;

/// Everything the runner hands over for one asset: the result row plus
/// the bars backing it (persisted into the ohlc table).
#[derive(Debug, Clone)]
pub struct ScanArtifact {
    pub report: AssetReport,
    pub recent_bars: Vec<Bar>,
}

#[derive(Debug)]
pub struct IngestionReport {
    pub batch_id: String,
    pub accepted: usize,
    pub rejected: Vec<(String, String)>,
    pub outcome: StageOutcome<StorageTier>,
    pub analytics_ok: bool,
}

impl IngestionReport {
    pub fn tier(&self) -> Option<StorageTier> {
        self.outcome.value().copied()
    }
}

pub struct IngestionPipeline {
    primary: Option<SqliteStore>,
    analytics: Option<DuckDbStore>,
    fallback: FallbackStore,
    fallback_enabled: bool,
    retention_days: u32,
}

impl IngestionPipeline {
    /// Open the configured tiers. A tier that fails to open logs a warning
    /// and is treated as unavailable; the pipeline itself always
    /// constructs so the fallback tier can serve.
    pub fn new(cfg: &StorageConfig) -> Self {
        let primary = match SqliteStore::open(Path::new(&cfg.sqlite_path)) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(path = %cfg.sqlite_path, error = %e, "Primary store unavailable");
                None
            }
        };
        let analytics = if cfg.analytics_enabled {
            match DuckDbStore::open(Path::new(&cfg.duckdb_path)) {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!(path = %cfg.duckdb_path, error = %e, "Analytics store unavailable");
                    None
                }
            }
        } else {
            None
        };
        Self {
            primary,
            analytics,
            fallback: FallbackStore::new(),
            fallback_enabled: cfg.fallback_enabled,
            retention_days: cfg.retention_days,
        }
    }

    pub fn from_parts(
        primary: Option<SqliteStore>,
        analytics: Option<DuckDbStore>,
        retention_days: u32,
    ) -> Self {
        Self {
            primary,
            analytics,
            fallback: FallbackStore::new(),
            fallback_enabled: true,
            retention_days,
        }
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Run the full state machine over one batch of artifacts.
    pub fn ingest(&mut self, artifacts: &[ScanArtifact], now_ms: u64) -> IngestionReport {
        let batch_id = Uuid::new_v4().to_string();

        // VALIDATE
        let mut seen: HashSet<(String, Timeframe)> = HashSet::new();
        let mut records: Vec<AssetReport> = Vec::with_capacity(artifacts.len());
        let mut bars: Vec<Bar> = Vec::new();
        let mut rejected: Vec<(String, String)> = Vec::new();
        for artifact in artifacts {
            let r = &artifact.report;
            match validate_record(r) {
                Ok(()) => {
                    if !seen.insert((r.symbol.clone(), r.timeframe)) {
                        rejected.push((r.symbol.clone(), "duplicate symbol in batch".to_string()));
                        continue;
                    }
                    records.push(r.clone());
                    bars.extend(artifact.recent_bars.iter().cloned());
                }
                Err(violation) => {
                    tracing::warn!(symbol = %r.symbol, violation = %violation, "Record rejected");
                    rejected.push((r.symbol.clone(), violation));
                }
            }
        }

        if records.is_empty() {
            return IngestionReport {
                batch_id,
                accepted: 0,
                rejected,
                outcome: StageOutcome::Failed("no valid records in batch".to_string()),
                analytics_ok: false,
            };
        }

        let window_key = window_key(&records);

        // PERSIST_PRIMARY
        let primary_result = match &mut self.primary {
            Some(store) => store
                .upsert_bars(&bars)
                .and_then(|_| {
                    store.write_batch(
                        &batch_id,
                        &window_key,
                        now_ms,
                        StorageTier::Primary,
                        &records,
                    )
                })
                .map_err(|e| e.to_string()),
            None => Err("primary store not open".to_string()),
        };

        let outcome = match primary_result {
            Ok(()) => {
                tracing::info!(
                    batch_id = %batch_id,
                    records = records.len(),
                    "Batch committed to primary store"
                );
                StageOutcome::Ok(StorageTier::Primary)
            }
            Err(reason) if self.fallback_enabled => {
                // PERSIST_FALLBACK: reduced functionality, consumers still
                // get latest prices.
                tracing::warn!(
                    batch_id = %batch_id,
                    reason = %reason,
                    "Primary store write failed, degrading to fallback tier"
                );
                self.fallback.record_batch(&batch_id, &records);
                StageOutcome::Degraded(StorageTier::Fallback, reason)
            }
            Err(reason) => {
                tracing::error!(
                    batch_id = %batch_id,
                    reason = %reason,
                    "Primary store write failed and fallback is disabled"
                );
                StageOutcome::Failed(reason)
            }
        };

        // PERSIST_ANALYTICS: best-effort, only after a primary commit.
        let analytics_ok = if matches!(outcome, StageOutcome::Ok(_)) {
            match &mut self.analytics {
                Some(store) => match store.append_batch(&batch_id, now_ms, &records) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(batch_id = %batch_id, error = %e, "Analytics append failed");
                        false
                    }
                },
                None => false,
            }
        } else {
            false
        };

        IngestionReport {
            batch_id,
            accepted: records.len(),
            rejected,
            outcome,
            analytics_ok,
        }
    }

    /// Latest price for a key from the best tier that has it.
    pub fn latest_price(&self, symbol: &str, timeframe: Timeframe) -> Option<f64> {
        if let Some(store) = &self.primary {
            if let Ok(Some(price)) = store.latest_price(symbol, timeframe) {
                return Some(price);
            }
        }
        self.fallback.latest(symbol, timeframe).map(|r| r.price)
    }

    /// Purge batches past the retention window from every durable tier.
    pub fn purge_expired(&mut self, now_ms: u64) -> (usize, usize) {
        let cutoff = now_ms.saturating_sub(self.retention_days as u64 * 86_400_000);
        let mut batches = 0usize;
        let mut history = 0usize;
        if let Some(store) = &mut self.primary {
            match store.purge_older_than(cutoff) {
                Ok((b, signals, trials)) => {
                    batches = b;
                    tracing::info!(batches = b, signals, trials, "Purged expired primary rows");
                }
                Err(e) => tracing::warn!(error = %e, "Primary purge failed"),
            }
        }
        if let Some(store) = &mut self.analytics {
            match store.purge_older_than(cutoff) {
                Ok(rows) => history = rows,
                Err(e) => tracing::warn!(error = %e, "Analytics purge failed"),
            }
        }
        (batches, history)
    }

    pub fn primary(&self) -> Option<&SqliteStore> {
        self.primary.as_ref()
    }

    pub fn fallback(&self) -> &FallbackStore {
        &self.fallback
    }
}

fn window_key(records: &[AssetReport]) -> String {
    let timeframe = records
        .first()
        .map(|r| r.timeframe.as_str())
        .unwrap_or("none");
    let head = records.iter().map(|r| r.bar_time_ms).max().unwrap_or(0);
    format!("{timeframe}:{head}")
}

/// Record-level validation. Returns the first violation found.
fn validate_record(r: &AssetReport) -> Result<(), String> {
    if r.symbol.is_empty() {
        return Err("empty symbol".to_string());
    }
    if r.symbol.len() < 5
        || r.symbol.len() > 20
        || !r.symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(format!("malformed symbol '{}'", r.symbol));
    }
    let numerics = [
        ("current_price", r.current_price),
        ("lower_band", r.lower_band),
        ("upper_band", r.upper_band),
        ("potential_return", r.potential_return_pct),
        ("strength", r.strength),
        ("total_return", r.total_return_pct),
        ("sharpe_ratio", r.sharpe_ratio),
        ("max_drawdown", r.max_drawdown_pct),
    ];
    for (name, value) in numerics {
        if !value.is_finite() {
            return Err(format!("non-finite {name}"));
        }
    }
    if r.current_price <= 0.0 || r.lower_band <= 0.0 || r.upper_band <= 0.0 {
        return Err("non-positive price or band".to_string());
    }
    if r.lower_band > r.upper_band {
        return Err(format!(
            "inverted bands: lower {} > upper {}",
            r.lower_band, r.upper_band
        ));
    }
    if r.total_return_pct.abs() >= 10_000.0 {
        return Err(format!("implausible total return {}", r.total_return_pct));
    }
    if r.potential_return_pct < 0.0 || r.potential_return_pct >= 10_000.0 {
        return Err(format!(
            "potential return out of bounds: {}",
            r.potential_return_pct
        ));
    }
    if r.params.degree == 0 || r.params.lookback == 0 {
        return Err("missing channel parameters".to_string());
    }
    if r.bar_time_ms == 0 {
        return Err("missing bar time".to_string());
    }
    Ok(())
}
