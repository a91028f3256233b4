//! Polynomial trend fitting over log-price and channel classification.
//!
//! The fit runs on normalized series (mean subtracted, divided by standard
//! deviation) so high-degree fits stay conditioned; coefficients are
//! validated before bands are built, and bands are clamped to a multiple
//! of current price to reject extrapolation artifacts.

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::model::bar::Bar;
use crate::model::channel::{Channel, ChannelParams};
use crate::model::signal::{RiskLevel, Signal, SignalAction};

struct FitCore {
    coeffs: Vec<f64>,
    xs_norm: Vec<f64>,
    y_mean: f64,
    y_std: f64,
    sigma_log: f64,
}

fn fit_core(bars: &[Bar], params: ChannelParams, cfg: &ScanConfig) -> Result<FitCore, ScanError> {
    let window = window_slice(bars, params.lookback);
    if window.len() < params.degree + 2 {
        return Err(ScanError::NumericInstability(format!(
            "window of {} bars too short for degree {}",
            window.len(),
            params.degree
        )));
    }

    let log_closes: Vec<f64> = window.iter().map(|b| b.close.ln()).collect();
    let xs: Vec<f64> = (0..log_closes.len()).map(|i| i as f64).collect();

    let (xs_norm, _x_mean, _x_std) = normalize(&xs);
    let (ys_norm, y_mean, y_std) = normalize(&log_closes);

    let coeffs = polyfit(&xs_norm, &ys_norm, params.degree)?;
    for c in &coeffs {
        if !c.is_finite() || c.abs() > cfg.coeff_limit {
            return Err(ScanError::NumericInstability(format!(
                "fitted coefficient {:e} exceeds safety threshold",
                c
            )));
        }
    }

    // Residual sigma in log space over the window.
    let mut sq_sum = 0.0;
    for (x, y) in xs_norm.iter().zip(&ys_norm) {
        let r = y - eval_poly(&coeffs, *x);
        sq_sum += r * r;
    }
    let sigma_norm = (sq_sum / xs_norm.len() as f64).sqrt();
    let sigma_log = sigma_norm * y_std;

    Ok(FitCore {
        coeffs,
        xs_norm,
        y_mean,
        y_std,
        sigma_log,
    })
}

impl FitCore {
    fn trend_log_at(&self, idx: usize) -> f64 {
        eval_poly(&self.coeffs, self.xs_norm[idx]) * self.y_std + self.y_mean
    }
}

/// One point of the fitted channel curve, in price space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPoint {
    pub trend: f64,
    pub lower: f64,
    pub upper: f64,
}

/// The fitted trend and bands across the whole lookback window, unclamped.
/// One entry per window bar, oldest first.
pub fn channel_curve(
    bars: &[Bar],
    params: ChannelParams,
    cfg: &ScanConfig,
) -> Result<Vec<BandPoint>, ScanError> {
    let core = fit_core(bars, params, cfg)?;
    let mut out = Vec::with_capacity(core.xs_norm.len());
    for idx in 0..core.xs_norm.len() {
        let trend_log = core.trend_log_at(idx);
        out.push(BandPoint {
            trend: trend_log.exp(),
            lower: (trend_log - params.k * core.sigma_log).exp(),
            upper: (trend_log + params.k * core.sigma_log).exp(),
        });
    }
    Ok(out)
}

/// Fit a regression channel over the last `params.lookback` bars.
pub fn fit_channel(
    bars: &[Bar],
    params: ChannelParams,
    cfg: &ScanConfig,
    fitted_at_ms: u64,
) -> Result<Channel, ScanError> {
    let core = fit_core(bars, params, cfg)?;
    let window = window_slice(bars, params.lookback);
    let last = window.last().unwrap();
    let price = last.close;

    let trend_log = core.trend_log_at(core.xs_norm.len() - 1);
    let trend = trend_log.exp();
    let mut upper = (trend_log + params.k * core.sigma_log).exp();
    let mut lower = (trend_log - params.k * core.sigma_log).exp();

    if !upper.is_finite() || !lower.is_finite() || lower <= 0.0 || lower > upper {
        return Err(ScanError::NumericInstability(format!(
            "bands rejected: lower={lower}, upper={upper}"
        )));
    }

    // Economically implausible bands from boundary extrapolation get
    // clamped toward current price; an inversion after clamping means the
    // whole fit is off.
    upper = upper.min(price * cfg.band_clamp);
    lower = lower.max(price / cfg.band_clamp);
    if lower > upper {
        return Err(ScanError::NumericInstability(format!(
            "bands inverted after clamp: lower={lower}, upper={upper}, price={price}"
        )));
    }

    Ok(Channel {
        symbol: last.symbol.clone(),
        timeframe: last.timeframe,
        params,
        trend,
        upper_band: upper,
        lower_band: lower,
        fitted_at_ms,
    })
}

/// Classify current price against a channel. Pure: same channel and bars
/// always yield the same signal.
pub fn classify(channel: &Channel, bars: &[Bar], cfg: &ScanConfig) -> Signal {
    let price = bars.last().map(|b| b.close).unwrap_or(channel.trend);
    let (action, potential_return_pct) = if price < channel.lower_band {
        (
            SignalAction::Buy,
            (channel.upper_band - channel.lower_band) / channel.lower_band * 100.0,
        )
    } else if price > channel.upper_band {
        (
            SignalAction::Sell,
            (channel.upper_band - channel.lower_band) / channel.upper_band * 100.0,
        )
    } else {
        (SignalAction::Hold, 0.0)
    };

    let width = channel.band_width();
    let strength = if width <= 0.0 {
        0.0
    } else {
        match action {
            SignalAction::Buy => ((channel.lower_band - price) / width * 100.0).clamp(0.0, 100.0),
            SignalAction::Sell => ((price - channel.upper_band) / width * 100.0).clamp(0.0, 100.0),
            SignalAction::Hold => 0.0,
        }
    };

    let vol = realized_volatility(bars, cfg.vol_window);
    let annualized = vol * channel.timeframe.periods_per_year().sqrt();
    let risk = risk_from_volatility(annualized, cfg.vol_medium, cfg.vol_high);

    Signal {
        symbol: channel.symbol.clone(),
        timeframe: channel.timeframe,
        action,
        current_price: price,
        potential_return_pct,
        strength,
        risk,
        channel: channel.clone(),
        hold_reason: None,
    }
}

fn window_slice(bars: &[Bar], lookback: usize) -> &[Bar] {
    let start = bars.len().saturating_sub(lookback);
    &bars[start..]
}

/// Mean/sigma normalization. A flat series (sigma ~ 0) maps to all zeros
/// with std reported as 1 so denormalization stays the identity.
fn normalize(values: &[f64]) -> (Vec<f64>, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        return (vec![0.0; values.len()], mean, 1.0);
    }
    (values.iter().map(|v| (v - mean) / std).collect(), mean, std)
}

/// Least-squares polynomial fit via normal equations with partial-pivot
/// Gaussian elimination. Inputs are expected normalized.
fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Result<Vec<f64>, ScanError> {
    let m = degree + 1;
    let mut gram = vec![vec![0.0f64; m]; m];
    let mut rhs = vec![0.0f64; m];

    let mut powers = vec![0.0f64; 2 * degree + 1];
    for (x, y) in xs.iter().zip(ys) {
        let mut p = 1.0;
        for slot in powers.iter_mut() {
            *slot += p;
            p *= x;
        }
        let mut p = 1.0;
        for r in rhs.iter_mut() {
            *r += p * y;
            p *= x;
        }
    }
    for (j, row) in gram.iter_mut().enumerate() {
        for (k, cell) in row.iter_mut().enumerate() {
            *cell = powers[j + k];
        }
    }

    solve_linear(gram, rhs)
}

fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ScanError> {
    let n = b.len();
    for col in 0..n {
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-12 {
            return Err(ScanError::NumericInstability(
                "singular normal equations".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0f64; n];
    for col in (0..n).rev() {
        let mut sum = b[col];
        for k in (col + 1)..n {
            sum -= a[col][k] * x[k];
        }
        x[col] = sum / a[col][col];
    }
    Ok(x)
}

fn eval_poly(coeffs: &[f64], x: f64) -> f64 {
    let mut acc = 0.0;
    for c in coeffs.iter().rev() {
        acc = acc * x + c;
    }
    acc
}

/// Per-bar standard deviation of log returns over the trailing window.
fn realized_volatility(bars: &[Bar], window: usize) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    let start = bars.len().saturating_sub(window + 1);
    let closes: Vec<f64> = bars[start..].iter().map(|b| b.close).collect();
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
    var.sqrt()
}

fn risk_from_volatility(annualized: f64, medium: f64, high: f64) -> RiskLevel {
    if annualized >= high {
        RiskLevel::High
    } else if annualized >= medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
