use serde::{Deserialize, Serialize};

/// Supported bar intervals for scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    D1,
    H4,
    H1,
    M15,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" => Some(Self::D1),
            "4h" => Some(Self::H4),
            "1h" => Some(Self::H1),
            "15m" => Some(Self::M15),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::D1 => "1d",
            Self::H4 => "4h",
            Self::H1 => "1h",
            Self::M15 => "15m",
        }
    }

    pub fn interval_ms(&self) -> u64 {
        match self {
            Self::D1 => 86_400_000,
            Self::H4 => 14_400_000,
            Self::H1 => 3_600_000,
            Self::M15 => 900_000,
        }
    }

    /// Bars per year at this interval, used to annualize Sharpe ratios.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Self::D1 => 365.0,
            Self::H4 => 365.0 * 6.0,
            Self::H1 => 365.0 * 24.0,
            Self::M15 => 365.0 * 96.0,
        }
    }

    /// Bars needed to cover `days` of history.
    pub fn bars_for_days(&self, days: u32) -> usize {
        let per_day = 86_400_000 / self.interval_ms();
        (days as u64 * per_day) as usize
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV observation. Immutable once cached; newer fetches supersede,
/// never mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// OHLC sanity: high dominates, low is dominated, volume non-negative,
    /// all fields finite and prices positive.
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return false;
        }
        self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }
}
