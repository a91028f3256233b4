use std::sync::Arc;

use chanscan::config::Config;
use chanscan::error::ScanError;
use chanscan::loader::{HistoryLoader, KlineSource};
use chanscan::model::bar::{Bar, Timeframe};
use chanscan::model::signal::SignalAction;
use chanscan::runner::run_scan;

/// Serves a fixed bar set per symbol; listed symbols fail every fetch.
struct FixtureSource {
    bars: Vec<Bar>,
    fail_symbols: Vec<String>,
}

impl KlineSource for FixtureSource {
    async fn klines(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        start_time_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Bar>, ScanError> {
        if self.fail_symbols.iter().any(|s| s == symbol) {
            return Err(ScanError::DataFetch {
                symbol: symbol.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        let start = start_time_ms.unwrap_or(0);
        Ok(self
            .bars
            .iter()
            .filter(|b| b.symbol == symbol && b.open_time_ms >= start)
            .take(limit)
            .cloned()
            .collect())
    }
}

fn daily_bars_ending_now(symbol: &str, count: usize) -> Vec<Bar> {
    let interval = Timeframe::D1.interval_ms();
    let now = chrono::Utc::now().timestamp_millis() as u64;
    let head = now - (now % interval);
    (0..count)
        .map(|i| {
            let t = head - (count - 1 - i) as u64 * interval;
            let c = 100.0 * (0.001 * i as f64).exp() * (1.0 + 0.02 * ((i as f64 * 0.9).sin()));
            Bar {
                symbol: symbol.to_string(),
                timeframe: Timeframe::D1,
                open_time_ms: t,
                open: c,
                high: c * 1.02,
                low: c * 0.98,
                close: c,
                volume: 3.0,
            }
        })
        .collect()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.scan.days = 300;
    config.scan.lookback = 120;
    config.runner.max_workers = 2;
    config
}

#[tokio::test]
async fn one_failing_symbol_does_not_poison_the_others() {
    let mut bars = daily_bars_ending_now("BTCUSDT", 320);
    bars.extend(daily_bars_ending_now("BNBUSDT", 320));
    let source = FixtureSource {
        bars,
        fail_symbols: vec!["ETHUSDT".to_string()],
    };
    let config = Arc::new(test_config());
    let loader = Arc::new(HistoryLoader::new(Arc::new(source), &config.scan));

    let (artifacts, summary) = run_scan(
        loader,
        config,
        vec![
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "BNBUSDT".to_string(),
        ],
    )
    .await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].symbol, "ETHUSDT");
    assert_eq!(summary.failed[0].kind, "data_fetch");
    assert!(summary.skipped.is_empty());

    let mut produced: Vec<&str> = artifacts.iter().map(|a| a.report.symbol.as_str()).collect();
    produced.sort_unstable();
    assert_eq!(produced, vec!["BNBUSDT", "BTCUSDT"]);
    for artifact in &artifacts {
        assert!(artifact.report.lower_band <= artifact.report.upper_band);
        assert!(artifact.report.current_price.is_finite());
    }
}

#[tokio::test]
async fn short_history_degrades_to_hold_with_reason_code() {
    let source = FixtureSource {
        bars: daily_bars_ending_now("BTCUSDT", 20),
        fail_symbols: Vec::new(),
    };
    let config = Arc::new(test_config());
    let loader = Arc::new(HistoryLoader::new(Arc::new(source), &config.scan));

    let (artifacts, summary) = run_scan(loader, config, vec!["BTCUSDT".to_string()]).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(artifacts.len(), 1);
    let report = &artifacts[0].report;
    assert_eq!(report.action, SignalAction::Hold);
    assert_eq!(report.hold_reason.as_deref(), Some("hold.insufficient_data"));
    assert_eq!(report.lower_band, report.upper_band);
}

#[tokio::test]
async fn optimizer_runs_only_for_major_symbols() {
    let mut bars = daily_bars_ending_now("BTCUSDT", 320);
    bars.extend(daily_bars_ending_now("DOGEUSDT", 320));
    let source = FixtureSource {
        bars,
        fail_symbols: Vec::new(),
    };
    let mut config = test_config();
    config.optimizer.enabled = true;
    config.optimizer.max_trials = 5;
    config.optimizer.seed = Some(11);
    let config = Arc::new(config);
    let loader = Arc::new(HistoryLoader::new(Arc::new(source), &config.scan));

    let (artifacts, _) = run_scan(
        loader,
        config,
        vec!["BTCUSDT".to_string(), "DOGEUSDT".to_string()],
    )
    .await;

    let btc = artifacts.iter().find(|a| a.report.symbol == "BTCUSDT").unwrap();
    let doge = artifacts.iter().find(|a| a.report.symbol == "DOGEUSDT").unwrap();
    assert_eq!(btc.report.trials.len(), 5);
    assert!(doge.report.trials.is_empty());
}

#[tokio::test]
async fn empty_history_is_a_per_asset_failure() {
    let source = FixtureSource {
        bars: Vec::new(),
        fail_symbols: Vec::new(),
    };
    let config = Arc::new(test_config());
    let loader = Arc::new(HistoryLoader::new(Arc::new(source), &config.scan));

    let (artifacts, summary) = run_scan(loader, config, vec!["BTCUSDT".to_string()]).await;
    assert!(artifacts.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].kind, "insufficient_data");
}
