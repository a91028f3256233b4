//! Degraded-mode tier: an in-memory latest-record map kept per
//! (symbol, timeframe) so consumers still see basic data (latest price
//! and signal) when no durable tier is reachable.

use std::collections::HashMap;

use crate::model::bar::Timeframe;
use crate::model::report::AssetReport;
use crate::model::signal::SignalAction;

#[derive(Debug, Clone, PartialEq)]
pub struct LatestRecord {
    pub price: f64,
    pub action: SignalAction,
    pub bar_time_ms: u64,
    pub batch_id: String,
}

#[derive(Default)]
pub struct FallbackStore {
    latest: HashMap<(String, Timeframe), LatestRecord>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the newest record per key; replays of older windows are
    /// ignored so a stale re-ingest cannot roll the view back.
    pub fn record_batch(&mut self, batch_id: &str, records: &[AssetReport]) {
        for r in records {
            let key = (r.symbol.clone(), r.timeframe);
            let newer = self
                .latest
                .get(&key)
                .map(|existing| r.bar_time_ms >= existing.bar_time_ms)
                .unwrap_or(true);
            if newer {
                self.latest.insert(
                    key,
                    LatestRecord {
                        price: r.current_price,
                        action: r.action,
                        bar_time_ms: r.bar_time_ms,
                        batch_id: batch_id.to_string(),
                    },
                );
            }
        }
    }

    pub fn latest(&self, symbol: &str, timeframe: Timeframe) -> Option<&LatestRecord> {
        self.latest.get(&(symbol.to_string(), timeframe))
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
