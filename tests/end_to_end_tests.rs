//! Full-chain scenario: scripted price source -> scan run -> ingestion ->
//! store readback -> output files.

use std::sync::Arc;

use chanscan::config::Config;
use chanscan::error::ScanError;
use chanscan::loader::{HistoryLoader, KlineSource};
use chanscan::model::bar::{Bar, Timeframe};
use chanscan::output;
use chanscan::runner::run_scan;
use chanscan::store::sqlite::SqliteStore;
use chanscan::store::IngestionPipeline;

struct GrowthSource;

impl KlineSource for GrowthSource {
    async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Bar>, ScanError> {
        let interval = timeframe.interval_ms();
        let now = chrono::Utc::now().timestamp_millis() as u64;
        let head = now - (now % interval);
        let count = 240usize;
        let start = start_time_ms.unwrap_or(0);
        Ok((0..count)
            .map(|i| {
                let t = head - (count - 1 - i) as u64 * interval;
                let c = 100.0 * (0.0005 * i as f64).exp()
                    + 0.4 * (((i as f64 * 12.9898).sin() * 43_758.547) % 1.0);
                Bar {
                    symbol: symbol.to_string(),
                    timeframe,
                    open_time_ms: t,
                    open: c,
                    high: c * 1.01,
                    low: c * 0.99,
                    close: c,
                    volume: 2.0,
                }
            })
            .filter(|b| b.open_time_ms >= start)
            .take(limit)
            .collect())
    }
}

#[tokio::test]
async fn scan_ingest_readback_and_output() {
    let mut config = Config::default();
    config.scan.days = 220;
    config.scan.lookback = 180;
    config.scan.degree = 4;
    config.scan.k = 2.0;
    let config = Arc::new(config);
    let loader = Arc::new(HistoryLoader::new(Arc::new(GrowthSource), &config.scan));

    let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    let (artifacts, summary) = run_scan(loader, config.clone(), symbols).await;
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failed.is_empty());

    for artifact in &artifacts {
        let r = &artifact.report;
        assert!(r.lower_band > 0.0);
        assert!(r.lower_band <= r.upper_band);
        assert!(r.current_price.is_finite());
        assert!(r.sharpe_ratio.is_finite());
        assert!(!artifact.recent_bars.is_empty());
    }

    // Ingest into on-disk stores and read the latest batch back.
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStore::open(&dir.path().join("primary.sqlite")).unwrap();
    let mut pipeline = IngestionPipeline::from_parts(Some(sqlite), None, 30);
    let now_ms = chrono::Utc::now().timestamp_millis() as u64;
    let ingestion = pipeline.ingest(&artifacts, now_ms);
    assert_eq!(ingestion.accepted, 2);

    let rows = pipeline.primary().unwrap().latest_signals().unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert!(["BUY", "SELL", "HOLD"].contains(&row.action.as_str()));
        assert!(row.lower_band <= row.upper_band);
    }

    // Output files carry one row per asset.
    let reports: Vec<_> = artifacts.iter().map(|a| a.report.clone()).collect();
    let csv_path = dir.path().join("signals.csv");
    let json_path = dir.path().join("signals.json");
    output::write_csv(&reports, &csv_path).unwrap();
    output::write_json(&reports, &json_path).unwrap();

    let csv_lines = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv_lines.lines().count(), 3);
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 2);
}
