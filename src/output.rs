//! CSV/JSON result writers: one row per asset per run.

use std::path::Path;

use serde::Serialize;

use crate::error::ScanError;
use crate::model::report::AssetReport;

/// Flattened output row matching the external record schema.
#[derive(Debug, Serialize)]
pub struct ResultRow {
    pub symbol: String,
    pub timeframe: String,
    pub current_price: f64,
    pub lower_band: f64,
    pub upper_band: f64,
    pub signal: String,
    pub potential_return: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub degree: usize,
    pub kstd: f64,
    pub lookback: usize,
    pub analysis_timestamp: String,
}

impl From<&AssetReport> for ResultRow {
    fn from(r: &AssetReport) -> Self {
        let ts = chrono::DateTime::from_timestamp_millis(r.analysis_ts_ms as i64)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        Self {
            symbol: r.symbol.clone(),
            timeframe: r.timeframe.as_str().to_string(),
            current_price: r.current_price,
            lower_band: r.lower_band,
            upper_band: r.upper_band,
            signal: r.action.as_str().to_string(),
            potential_return: r.potential_return_pct,
            total_return: r.total_return_pct,
            sharpe_ratio: r.sharpe_ratio,
            max_drawdown: r.max_drawdown_pct,
            degree: r.params.degree,
            kstd: r.params.k,
            lookback: r.params.lookback,
            analysis_timestamp: ts,
        }
    }
}

pub fn write_csv(reports: &[AssetReport], path: &Path) -> Result<(), ScanError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| ScanError::Io(std::io::Error::other(e.to_string())))?;
    for report in reports {
        writer
            .serialize(ResultRow::from(report))
            .map_err(|e| ScanError::Io(std::io::Error::other(e.to_string())))?;
    }
    writer
        .flush()
        .map_err(|e| ScanError::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}

pub fn write_json(reports: &[AssetReport], path: &Path) -> Result<(), ScanError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let rows: Vec<ResultRow> = reports.iter().map(ResultRow::from).collect();
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bar::Timeframe;
    use crate::model::channel::ChannelParams;
    use crate::model::signal::{RiskLevel, SignalAction};

    fn report() -> AssetReport {
        AssetReport {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::D1,
            action: SignalAction::Buy,
            current_price: 93.0,
            lower_band: 95.0,
            upper_band: 110.0,
            potential_return_pct: 15.8,
            strength: 13.3,
            risk: RiskLevel::Medium,
            total_return_pct: 22.0,
            sharpe_ratio: 1.4,
            max_drawdown_pct: 9.5,
            params: ChannelParams::new(4, 2.0, 200),
            bar_time_ms: 1_700_000_000_000,
            analysis_ts_ms: 1_700_000_100_000,
            hold_reason: None,
            trials: Vec::new(),
        }
    }

    #[test]
    fn csv_round_trips_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&[report()], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("symbol,timeframe,current_price"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("BTCUSDT,1d,93.0"));
        assert!(row.contains("BUY"));
    }

    #[test]
    fn json_emits_schema_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&[report()], &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let row = &value.as_array().unwrap()[0];
        assert_eq!(row["symbol"], "BTCUSDT");
        assert_eq!(row["signal"], "BUY");
        assert_eq!(row["degree"], 4);
        assert!(row["analysis_timestamp"].as_str().unwrap().starts_with("2023-"));
    }
}
