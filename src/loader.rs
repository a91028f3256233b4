//! Historical bar loading with a keyed in-process cache.
//!
//! Each (symbol, timeframe) cache entry is guarded by its own async mutex:
//! exactly one fetch may be in flight per key while other keys proceed
//! concurrently. Cached bars are superseded by newer fetches, never edited.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::binance::rest::{MarketDataClient, MAX_KLINES_PER_REQUEST};
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::model::bar::{Bar, Timeframe};

/// Source of kline pages. The REST client is the production impl; tests
/// script their own.
pub trait KlineSource: Send + Sync {
    fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time_ms: Option<u64>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Bar>, ScanError>> + Send;
}

impl KlineSource for MarketDataClient {
    async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Bar>, ScanError> {
        MarketDataClient::klines(self, symbol, timeframe, start_time_ms, limit).await
    }
}

#[derive(Default)]
struct CacheEntry {
    bars: Vec<Bar>,
}

pub struct HistoryLoader<S: KlineSource> {
    source: Arc<S>,
    min_bars: usize,
    max_days: u32,
    known_symbols: Vec<String>,
    cache: Mutex<HashMap<(String, Timeframe), Arc<tokio::sync::Mutex<CacheEntry>>>>,
}

impl<S: KlineSource> HistoryLoader<S> {
    pub fn new(source: Arc<S>, cfg: &ScanConfig) -> Self {
        Self {
            source,
            min_bars: cfg.min_bars,
            max_days: cfg.max_days,
            known_symbols: cfg.known_symbols(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load `days` of bars for (symbol, timeframe), oldest first,
    /// requiring at least `min_bars`. Serves from cache with a delta fetch
    /// when the cached head is within one bar interval of now; performs a
    /// full windowed fetch otherwise.
    pub async fn load(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        days: u32,
    ) -> Result<Vec<Bar>, ScanError> {
        let bars = self.load_unchecked(symbol, timeframe, days).await?;
        if bars.len() < self.min_bars {
            return Err(ScanError::InsufficientData {
                symbol: symbol.trim().to_ascii_uppercase(),
                got: bars.len(),
                need: self.min_bars,
            });
        }
        Ok(bars)
    }

    /// Same as `load` but without the minimum-bar floor; callers that can
    /// degrade to a HOLD record use this and apply the floor themselves.
    pub async fn load_unchecked(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        days: u32,
    ) -> Result<Vec<Bar>, ScanError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if !self.known_symbols.iter().any(|s| s == &symbol) {
            return Err(ScanError::Validation(format!(
                "unknown symbol '{symbol}'"
            )));
        }
        let days = days.min(self.max_days).max(1);

        let entry = {
            let mut cache = self.cache.lock().unwrap();
            cache
                .entry((symbol.clone(), timeframe))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(CacheEntry::default())))
                .clone()
        };
        // Per-key exclusion: concurrent loads of the same key wait here,
        // other keys are untouched.
        let mut entry = entry.lock().await;

        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let interval = timeframe.interval_ms();
        let needed = timeframe.bars_for_days(days).max(1);
        let window_start = now_ms.saturating_sub(days as u64 * 86_400_000);

        let fresh_head = entry
            .bars
            .last()
            .map(|b| now_ms.saturating_sub(b.open_time_ms) <= interval * 2)
            .unwrap_or(false);

        if fresh_head {
            // Refetch from the newest cached bar: it may have been open
            // when cached, and the source returns it plus anything newer.
            let head_time = entry.bars.last().unwrap().open_time_ms;
            let fetched = self
                .fetch_paged(&symbol, timeframe, head_time, needed)
                .await?;
            if let Some(first_new) = fetched.first() {
                let cut = first_new.open_time_ms;
                entry.bars.retain(|b| b.open_time_ms < cut);
            }
            entry.bars.extend(fetched);
            tracing::debug!(symbol = %symbol, timeframe = %timeframe, "Cache delta refresh");
        } else {
            entry.bars = self
                .fetch_paged(&symbol, timeframe, window_start, needed)
                .await?;
            tracing::debug!(
                symbol = %symbol,
                timeframe = %timeframe,
                bars = entry.bars.len(),
                "Cache full refresh"
            );
        }

        // Serve only the requested window from the tail.
        let mut bars: Vec<Bar> = entry
            .bars
            .iter()
            .filter(|b| b.open_time_ms >= window_start)
            .cloned()
            .collect();
        if bars.len() > needed {
            bars.drain(..bars.len() - needed);
        }
        Ok(bars)
    }

    pub fn min_bars(&self) -> usize {
        self.min_bars
    }

    async fn fetch_paged(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: u64,
        needed: usize,
    ) -> Result<Vec<Bar>, ScanError> {
        let interval = timeframe.interval_ms();
        let mut out: Vec<Bar> = Vec::with_capacity(needed);
        let mut cursor = start_ms;
        let max_pages = needed / MAX_KLINES_PER_REQUEST + 2;

        for _ in 0..max_pages {
            let page = self
                .source
                .klines(symbol, timeframe, Some(cursor), MAX_KLINES_PER_REQUEST)
                .await?;
            let page_len = page.len();
            for bar in page {
                if out.last().map(|b: &Bar| bar.open_time_ms > b.open_time_ms).unwrap_or(true) {
                    out.push(bar);
                }
            }
            if page_len < MAX_KLINES_PER_REQUEST {
                break;
            }
            match out.last() {
                Some(last) => cursor = last.open_time_ms + interval,
                None => break,
            }
        }
        Ok(out)
    }
}
