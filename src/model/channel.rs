use serde::{Deserialize, Serialize};

use crate::model::bar::Timeframe;

/// Parameter set for one channel fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub degree: usize,
    pub k: f64,
    pub lookback: usize,
}

impl ChannelParams {
    pub fn new(degree: usize, k: f64, lookback: usize) -> Self {
        Self {
            degree,
            k,
            lookback,
        }
    }
}

/// Fitted trend plus dispersion bands for one (symbol, timeframe, params).
/// Recomputed on each scan, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub params: ChannelParams,
    /// Trend value at the most recent bar, in price space.
    pub trend: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub fitted_at_ms: u64,
}

impl Channel {
    /// Band invariant: both bands finite, positive, ordered.
    pub fn bands_valid(&self) -> bool {
        self.lower_band.is_finite()
            && self.upper_band.is_finite()
            && self.lower_band > 0.0
            && self.lower_band <= self.upper_band
    }

    pub fn band_width(&self) -> f64 {
        self.upper_band - self.lower_band
    }
}
