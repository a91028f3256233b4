use serde::{Deserialize, Serialize};

use crate::model::bar::Timeframe;
use crate::model::channel::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "HOLD" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse volatility bucket attached to each signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Stable taxonomy for why an asset degraded to HOLD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    InsufficientData,
    FitRejected,
    BacktestInvalid,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientData => "hold.insufficient_data",
            Self::FitRejected => "hold.fit_rejected",
            Self::BacktestInvalid => "hold.backtest_invalid",
        }
    }
}

/// Discrete classification of current price against a channel.
/// Ephemeral: rebuilt on every evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub action: SignalAction,
    pub current_price: f64,
    /// Band-to-band move left on the table, in percent. 0 for HOLD.
    pub potential_return_pct: f64,
    /// Penetration depth beyond the nearer band, 0-100.
    pub strength: f64,
    pub risk: RiskLevel,
    pub channel: Channel,
    pub hold_reason: Option<HoldReason>,
}
