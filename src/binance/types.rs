use serde::Deserialize;
use serde_json::Value;

use crate::model::bar::{Bar, Timeframe};

/// Binance error payload returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    pub server_time: u64,
}

/// Parse one kline row from the array-of-arrays payload:
/// `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
/// Numeric fields arrive string-encoded. Malformed rows yield None and are
/// dropped by the caller.
pub fn parse_kline_row(row: &Value, symbol: &str, timeframe: Timeframe) -> Option<Bar> {
    let fields = row.as_array()?;
    if fields.len() < 6 {
        return None;
    }
    let open_time_ms = fields[0].as_u64()?;
    let open = value_to_f64(&fields[1])?;
    let high = value_to_f64(&fields[2])?;
    let low = value_to_f64(&fields[3])?;
    let close = value_to_f64(&fields[4])?;
    let volume = value_to_f64(&fields[5])?;

    let bar = Bar {
        symbol: symbol.to_string(),
        timeframe,
        open_time_ms,
        open,
        high,
        low,
        close,
        volume,
    };
    if bar.is_well_formed() {
        Some(bar)
    } else {
        None
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_valid_row() {
        let row = json!([1700000000000u64, "100.0", "105.5", "99.0", "103.2", "1234.5", 1700086399999u64]);
        let bar = parse_kline_row(&row, "BTCUSDT", Timeframe::D1).unwrap();
        assert_eq!(bar.open_time_ms, 1_700_000_000_000);
        assert!((bar.high - 105.5).abs() < f64::EPSILON);
        assert!((bar.volume - 1234.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_rejects_short_and_malformed_rows() {
        assert!(parse_kline_row(&json!([1, "2"]), "BTCUSDT", Timeframe::D1).is_none());
        assert!(parse_kline_row(&json!("nope"), "BTCUSDT", Timeframe::D1).is_none());
        let bad_ohlc = json!([1700000000000u64, "100", "90", "99", "103", "1"]);
        assert!(parse_kline_row(&bad_ohlc, "BTCUSDT", Timeframe::D1).is_none());
    }
}
