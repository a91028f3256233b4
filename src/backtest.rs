//! Bar-by-bar replay of the channel signal logic with transaction costs.

use crate::config::{BacktestConfig, ScanConfig};
use crate::error::ScanError;
use crate::model::bar::Bar;
use crate::model::channel::{Channel, ChannelParams};
use crate::model::report::BacktestResult;
use crate::regression::fit_channel;

/// Replay history with the given channel parameters. The channel is refit
/// every `refit_interval` bars on completed history only, so a bar's
/// signal never sees its own close. Long-only: enter on BUY, exit on
/// SELL, fee and slippage charged on each side.
pub fn simulate(
    bars: &[Bar],
    params: ChannelParams,
    scan: &ScanConfig,
    cfg: &BacktestConfig,
) -> Result<BacktestResult, ScanError> {
    let need = params.lookback + 2;
    if bars.len() < need {
        let symbol = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
        return Err(ScanError::InsufficientData {
            symbol,
            got: bars.len(),
            need,
        });
    }

    let fee = cfg.fee_pct / 100.0;
    let slippage = cfg.slippage_pct / 100.0;

    let mut cash = cfg.initial_equity;
    let mut qty = 0.0f64;
    let mut trade_count = 0usize;
    let mut channel: Option<Channel> = None;
    let mut equity_curve = Vec::with_capacity(bars.len() - params.lookback);

    for i in params.lookback..bars.len() {
        let step = i - params.lookback;
        if step % cfg.refit_interval == 0 {
            // A failed refit keeps the previous channel; the replay only
            // pauses trading until a fit succeeds again.
            match fit_channel(&bars[..i], params, scan, bars[i].open_time_ms) {
                Ok(c) => channel = Some(c),
                Err(ScanError::NumericInstability(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let close = bars[i].close;
        if let Some(c) = &channel {
            if close < c.lower_band && qty == 0.0 {
                let exec = close * (1.0 + slippage);
                qty = cash * (1.0 - fee) / exec;
                cash = 0.0;
                trade_count += 1;
            } else if close > c.upper_band && qty > 0.0 {
                let exec = close * (1.0 - slippage);
                cash = qty * exec * (1.0 - fee);
                qty = 0.0;
            }
        }

        let equity = cash + qty * close;
        if !equity.is_finite() || equity <= 0.0 {
            return Err(ScanError::NumericInstability(format!(
                "equity curve degenerate at bar {i}: {equity}"
            )));
        }
        equity_curve.push(equity);
    }

    let final_equity = *equity_curve.last().unwrap();
    let total_return_pct = (final_equity / cfg.initial_equity - 1.0) * 100.0;
    let periods_per_year = bars[0].timeframe.periods_per_year();
    let sharpe_ratio = sharpe(&equity_curve, periods_per_year);
    let max_drawdown_pct = max_drawdown(&equity_curve) * 100.0;

    if !total_return_pct.is_finite() || !sharpe_ratio.is_finite() || !max_drawdown_pct.is_finite() {
        return Err(ScanError::NumericInstability(
            "non-finite backtest metrics".to_string(),
        ));
    }

    Ok(BacktestResult {
        total_return_pct,
        sharpe_ratio,
        max_drawdown_pct,
        trade_count,
        bars_used: equity_curve.len(),
        final_equity,
    })
}

/// Annualized mean/sigma of per-bar equity returns. 0 when sigma is ~0.
fn sharpe(equity_curve: &[f64], periods_per_year: f64) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        return 0.0;
    }
    (mean / std) * periods_per_year.sqrt()
}

/// Largest peak-to-trough decline as a fraction of the peak.
fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bar::Timeframe;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                symbol: "BTCUSDT".to_string(),
                timeframe: Timeframe::D1,
                open_time_ms: i as u64 * 86_400_000,
                open: *c,
                high: c * 1.02,
                low: c * 0.98,
                close: *c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn simulate_needs_enough_bars() {
        let bars = bars_from_closes(&[100.0; 30]);
        let err = simulate(
            &bars,
            ChannelParams::new(2, 2.0, 60),
            &ScanConfig::default(),
            &BacktestConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }

    #[test]
    fn flat_series_produces_zero_return_and_no_trades() {
        let bars = bars_from_closes(&vec![100.0; 120]);
        let result = simulate(
            &bars,
            ChannelParams::new(2, 2.0, 60),
            &ScanConfig::default(),
            &BacktestConfig::default(),
        )
        .unwrap();
        assert_eq!(result.trade_count, 0);
        assert!(result.total_return_pct.abs() < 1e-9);
        assert_eq!(result.sharpe_ratio, 0.0);
        assert_eq!(result.max_drawdown_pct, 0.0);
    }

    #[test]
    fn equity_curve_metrics_stay_finite_on_trending_series() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 * (0.002 * i as f64).exp() * (1.0 + 0.03 * ((i % 11) as f64 - 5.0) / 5.0))
            .collect();
        let bars = bars_from_closes(&closes);
        let result = simulate(
            &bars,
            ChannelParams::new(3, 1.8, 80),
            &ScanConfig::default(),
            &BacktestConfig::default(),
        )
        .unwrap();
        assert!(result.total_return_pct.is_finite());
        assert!(result.sharpe_ratio.is_finite());
        assert!(result.max_drawdown_pct >= 0.0);
        assert!(result.final_equity > 0.0);
        assert_eq!(result.bars_used, 200 - 80);
    }

    #[test]
    fn max_drawdown_matches_hand_computed_curve() {
        let curve = [100.0, 120.0, 90.0, 110.0, 80.0];
        let dd = max_drawdown(&curve);
        // Worst decline: 120 -> 80.
        assert!((dd - (120.0 - 80.0) / 120.0).abs() < 1e-12);
    }

    #[test]
    fn sharpe_zero_for_constant_curve() {
        assert_eq!(sharpe(&[100.0, 100.0, 100.0], 365.0), 0.0);
    }
}
