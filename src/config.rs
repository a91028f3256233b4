use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::model::bar::Timeframe;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub scan: ScanConfig,
    pub optimizer: OptimizerConfig,
    pub backtest: BacktestConfig,
    pub storage: StorageConfig,
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub rest_base_url: String,
    /// Optional, sent as a header when present. Filled from the
    /// environment, never from the TOML file.
    #[serde(skip)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub rate_limit_per_minute: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://api.binance.com".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            rate_limit_per_minute: 1200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Known-asset list; requests for symbols outside it are rejected.
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub days: u32,
    pub max_days: u32,
    pub min_bars: usize,
    /// Default channel parameters, also the fallback when a fit or the
    /// whole optimizer run is rejected.
    pub degree: usize,
    pub k: f64,
    pub lookback: usize,
    /// Bands farther than this multiple from current price are clamped.
    pub band_clamp: f64,
    /// Fitted coefficients above this magnitude reject the fit.
    pub coeff_limit: f64,
    /// Annualized realized-vol thresholds for the risk buckets.
    pub vol_medium: f64,
    pub vol_high: f64,
    /// Bars of log returns used for realized volatility.
    pub vol_window: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
                "SOLUSDT".to_string(),
                "XRPUSDT".to_string(),
                "ADAUSDT".to_string(),
                "DOGEUSDT".to_string(),
                "AVAXUSDT".to_string(),
                "DOTUSDT".to_string(),
                "LINKUSDT".to_string(),
            ],
            timeframe: "1d".to_string(),
            days: 365,
            max_days: 720,
            min_bars: 50,
            degree: 4,
            k: 2.0,
            lookback: 200,
            band_clamp: 2.0,
            coeff_limit: 1e10,
            vol_medium: 0.40,
            vol_high: 0.80,
            vol_window: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub max_trials: usize,
    pub degree_choices: Vec<usize>,
    pub k_min: f64,
    pub k_max: f64,
    pub lookback_min: usize,
    pub lookback_max: usize,
    /// Objective = total return - penalty * max drawdown.
    pub drawdown_penalty: f64,
    /// Trials whose backtest return exceeds this magnitude are invalid.
    pub max_plausible_return_pct: f64,
    /// Optimization only runs for these symbols; others reuse defaults.
    pub major_symbols: Vec<String>,
    /// Fixed RNG seed for reproducible searches; None seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_trials: 30,
            degree_choices: vec![2, 3, 4, 5, 6],
            k_min: 1.5,
            k_max: 3.0,
            lookback_min: 50,
            lookback_max: 350,
            drawdown_penalty: 0.5,
            max_plausible_return_pct: 10_000.0,
            major_symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub fee_pct: f64,
    pub slippage_pct: f64,
    /// Bars between channel refits during replay.
    pub refit_interval: usize,
    pub initial_equity: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            fee_pct: 0.1,
            slippage_pct: 0.05,
            refit_interval: 5,
            initial_equity: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sqlite_path: String,
    pub duckdb_path: String,
    pub analytics_enabled: bool,
    /// When false, a primary-store failure fails the batch instead of
    /// degrading to the in-memory tier.
    pub fallback_enabled: bool,
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/chanscan.sqlite".to_string(),
            duckdb_path: "data/chanscan.duckdb".to_string(),
            analytics_enabled: true,
            fallback_enabled: true,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_workers: usize,
    pub asset_timeout_secs: u64,
    /// 0 disables the run-level deadline.
    pub run_deadline_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            asset_timeout_secs: 120,
            run_deadline_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "chanscan.log".to_string(),
        }
    }
}

impl ScanConfig {
    pub fn parsed_timeframe(&self) -> Result<Timeframe> {
        Timeframe::parse(&self.timeframe).with_context(|| {
            format!(
                "invalid timeframe '{}': expected one of 1d/4h/1h/15m",
                self.timeframe
            )
        })
    }

    /// Known symbols, upper-cased and deduplicated, order preserved.
    pub fn known_symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = if path.exists() {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<Config>(&config_str)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Config::default()
        };

        config.source.api_key = std::env::var("CHANSCAN_API_KEY").ok();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scan.parsed_timeframe()?;
        if self.scan.symbols.is_empty() {
            bail!("scan.symbols must not be empty");
        }
        if self.scan.days == 0 || self.scan.days > self.scan.max_days {
            bail!(
                "scan.days must be in 1..={} (got {})",
                self.scan.max_days,
                self.scan.days
            );
        }
        if self.scan.min_bars < 2 {
            bail!("scan.min_bars must be >= 2");
        }
        if !(1..=8).contains(&self.scan.degree) {
            bail!("scan.degree must be in 1..=8 (got {})", self.scan.degree);
        }
        if !self.scan.k.is_finite() || self.scan.k <= 0.0 {
            bail!("scan.k must be a positive finite number");
        }
        if self.scan.lookback < self.scan.min_bars {
            bail!(
                "scan.lookback ({}) must be >= scan.min_bars ({})",
                self.scan.lookback,
                self.scan.min_bars
            );
        }
        if self.scan.band_clamp <= 1.0 {
            bail!("scan.band_clamp must be > 1.0");
        }
        if self.optimizer.degree_choices.is_empty()
            || self.optimizer.degree_choices.iter().any(|d| !(1..=8).contains(d))
        {
            bail!("optimizer.degree_choices must be non-empty, each in 1..=8");
        }
        if self.optimizer.k_min <= 0.0 || self.optimizer.k_max < self.optimizer.k_min {
            bail!("optimizer k range invalid: [{}, {}]", self.optimizer.k_min, self.optimizer.k_max);
        }
        if self.optimizer.lookback_min < self.scan.min_bars
            || self.optimizer.lookback_max < self.optimizer.lookback_min
        {
            bail!(
                "optimizer lookback range invalid: [{}, {}]",
                self.optimizer.lookback_min,
                self.optimizer.lookback_max
            );
        }
        if self.optimizer.max_trials == 0 {
            bail!("optimizer.max_trials must be >= 1");
        }
        if self.backtest.fee_pct < 0.0 || self.backtest.slippage_pct < 0.0 {
            bail!("backtest fee/slippage percentages must be >= 0");
        }
        if self.backtest.refit_interval == 0 {
            bail!("backtest.refit_interval must be >= 1");
        }
        if self.backtest.initial_equity <= 0.0 {
            bail!("backtest.initial_equity must be > 0");
        }
        if self.runner.max_workers == 0 {
            bail!("runner.max_workers must be >= 1");
        }
        if self.storage.retention_days == 0 {
            bail!("storage.retention_days must be >= 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parse_partial_toml_keeps_defaults() {
        let toml_str = r#"
[scan]
symbols = ["BTCUSDT", "ETHUSDT"]
timeframe = "4h"
days = 180

[optimizer]
enabled = true
max_trials = 20

[storage]
sqlite_path = "/tmp/x.sqlite"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.scan.symbols.len(), 2);
        assert_eq!(config.scan.timeframe, "4h");
        assert_eq!(config.scan.days, 180);
        assert_eq!(config.scan.degree, 4);
        assert!(config.optimizer.enabled);
        assert_eq!(config.optimizer.max_trials, 20);
        assert_eq!(config.storage.sqlite_path, "/tmp/x.sqlite");
        assert_eq!(config.runner.max_workers, 4);
    }

    #[test]
    fn known_symbols_dedup_and_uppercase() {
        let mut cfg = ScanConfig::default();
        cfg.symbols = vec![
            "btcusdt".to_string(),
            "ETHUSDT".to_string(),
            "BTCUSDT".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(
            cfg.known_symbols(),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        let mut config = Config::default();
        config.scan.days = 10_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.degree = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.optimizer.k_max = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.timeframe = "3m".to_string();
        assert!(config.validate().is_err());
    }
}
