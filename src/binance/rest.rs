use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::SourceConfig;
use crate::error::ScanError;
use crate::model::bar::{Bar, Timeframe};

use super::types::{parse_kline_row, ApiErrorResponse, ServerTimeResponse};

/// Most bars one klines request may return.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

pub struct MarketDataClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
    rate_limit_per_minute: u32,
    // Request count in the current minute window
    request_count: AtomicU64,
    window_start: Mutex<Instant>,
}

impl MarketDataClient {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.rest_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            rate_limit_per_minute: cfg.rate_limit_per_minute.max(1),
            request_count: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        })
    }

    fn check_rate_limit(&self) {
        let mut start = self.window_start.lock().unwrap();
        if start.elapsed().as_secs() >= 60 {
            *start = Instant::now();
            self.request_count.store(0, Ordering::Relaxed);
        }
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        let soft_cap = (self.rate_limit_per_minute as u64 * 8) / 10;
        if count > soft_cap {
            tracing::warn!(count, limit = self.rate_limit_per_minute, "Approaching source rate limit");
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v3/ping", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .context("ping failed")?
            .error_for_status()
            .context("ping returned error status")?;
        Ok(())
    }

    pub async fn server_time(&self) -> Result<u64> {
        let url = format!("{}/api/v3/time", self.base_url);
        let resp: ServerTimeResponse = self
            .http
            .get(&url)
            .send()
            .await
            .context("server_time failed")?
            .json()
            .await?;
        Ok(resp.server_time)
    }

    /// Fetch one page of klines, oldest first. `start_time_ms` bounds the
    /// window from below for delta fetches. Transient failures (network,
    /// 429, 5xx) are retried with exponential backoff; persistent failure
    /// becomes a `DataFetch` error scoped to this symbol.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Bar>, ScanError> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            timeframe.as_str(),
            limit
        );
        if let Some(start) = start_time_ms {
            url.push_str(&format!("&startTime={}", start));
        }

        let mut attempt = 0u32;
        loop {
            self.check_rate_limit();
            match self.fetch_kline_page(&url, symbol, timeframe).await {
                Ok(bars) => return Ok(bars),
                Err(FetchFailure::Fatal(reason)) => {
                    return Err(ScanError::DataFetch {
                        symbol: symbol.to_string(),
                        reason,
                    });
                }
                Err(FetchFailure::Transient(reason)) => {
                    if attempt >= self.max_retries {
                        return Err(ScanError::DataFetch {
                            symbol: symbol.to_string(),
                            reason: format!("{} (after {} retries)", reason, attempt),
                        });
                    }
                    let backoff = self.retry_backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        symbol,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        reason = %reason,
                        "Transient kline fetch failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_kline_page(
        &self,
        url: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, FetchFailure> {
        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(err) => format!("API error (code {}): {}", err.code, err.msg),
                Err(_) => format!("HTTP {}: {}", status, body),
            };
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(FetchFailure::Transient(reason));
            }
            return Err(FetchFailure::Fatal(reason));
        }

        let rows: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| FetchFailure::Transient(format!("JSON decode failed: {e}")))?;

        let mut bars = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;
        for row in &rows {
            match parse_kline_row(row, symbol, timeframe) {
                Some(bar) => bars.push(bar),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::warn!(symbol, dropped, "Dropped malformed kline rows");
        }
        bars.sort_by_key(|b| b.open_time_ms);
        Ok(bars)
    }
}

enum FetchFailure {
    Transient(String),
    Fatal(String),
}
