use chanscan::config::ScanConfig;
use chanscan::model::bar::{Bar, Timeframe};
use chanscan::model::channel::ChannelParams;
use chanscan::model::signal::SignalAction;
use chanscan::regression::{channel_curve, classify, fit_channel};

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Bar {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::D1,
            open_time_ms: 1_600_000_000_000 + i as u64 * 86_400_000,
            open: *c,
            high: c * 1.01,
            low: c * 0.99,
            close: *c,
            volume: 10.0,
        })
        .collect()
}

/// Deterministic noise in [-1, 1] so test runs are reproducible.
fn noise(i: usize) -> f64 {
    ((i as f64 * 12.9898).sin() * 43_758.547) % 1.0
}

#[test]
fn bands_are_ordered_finite_positive_across_parameter_grid() {
    let closes: Vec<f64> = (0..400)
        .map(|i| 100.0 * (0.0008 * i as f64).exp() * (1.0 + 0.02 * noise(i)))
        .collect();
    let bars = bars_from_closes(&closes);
    let cfg = ScanConfig::default();

    for degree in [2usize, 3, 4, 5, 6] {
        for k in [1.5f64, 2.0, 3.0] {
            for lookback in [60usize, 150, 350] {
                let params = ChannelParams::new(degree, k, lookback);
                let channel = fit_channel(&bars, params, &cfg, 0).unwrap();
                assert!(channel.bands_valid(), "invalid bands for {params:?}");
                assert!(channel.lower_band > 0.0);
                assert!(channel.upper_band.is_finite());
            }
        }
    }
}

#[test]
fn potential_return_formulas_match_reference_values() {
    let bars = bars_from_closes(&vec![100.0; 80]);
    let cfg = ScanConfig::default();
    let mut channel = fit_channel(&bars, ChannelParams::new(2, 2.0, 80), &cfg, 0).unwrap();
    channel.lower_band = 100.0;
    channel.upper_band = 120.0;

    let mut below = bars.clone();
    below.last_mut().unwrap().close = 99.0;
    below.last_mut().unwrap().low = 98.0;
    let buy = classify(&channel, &below, &cfg);
    assert_eq!(buy.action, SignalAction::Buy);
    assert!((buy.potential_return_pct - 20.0).abs() < 1e-9);

    let mut above = bars.clone();
    above.last_mut().unwrap().close = 121.0;
    above.last_mut().unwrap().high = 122.0;
    let sell = classify(&channel, &above, &cfg);
    assert_eq!(sell.action, SignalAction::Sell);
    assert!((sell.potential_return_pct - 16.666_666_666_666_668).abs() < 1e-9);
}

#[test]
fn classify_is_deterministic() {
    let closes: Vec<f64> = (0..150)
        .map(|i| 50.0 * (0.001 * i as f64).exp() * (1.0 + 0.03 * noise(i)))
        .collect();
    let bars = bars_from_closes(&closes);
    let cfg = ScanConfig::default();
    let channel = fit_channel(&bars, ChannelParams::new(3, 2.0, 120), &cfg, 7).unwrap();

    let first = classify(&channel, &bars, &cfg);
    for _ in 0..10 {
        assert_eq!(classify(&channel, &bars, &cfg), first);
    }
}

#[test]
fn extreme_noise_never_propagates_non_finite_values() {
    // Degree-6 fit over 10 wildly oscillating points: either rejected or
    // finite bounded bands, never NaN/Inf reaching a signal.
    let closes: Vec<f64> = (0..10)
        .map(|i| if i % 2 == 0 { 0.001 } else { 900_000.0 })
        .collect();
    let bars = bars_from_closes(&closes);
    let cfg = ScanConfig::default();

    match fit_channel(&bars, ChannelParams::new(6, 2.0, 10), &cfg, 0) {
        Ok(channel) => {
            assert!(channel.bands_valid());
            let signal = classify(&channel, &bars, &cfg);
            assert!(signal.current_price.is_finite());
            assert!(signal.potential_return_pct.is_finite());
            assert!(signal.strength.is_finite());
        }
        Err(e) => assert_eq!(e.kind(), "numeric_instability"),
    }
}

#[test]
fn synthetic_growth_series_end_to_end() {
    // price = 100 * exp(0.0005 * t) + noise over 200 daily bars.
    let closes: Vec<f64> = (0..200)
        .map(|t| 100.0 * (0.0005 * t as f64).exp() + 0.4 * noise(t))
        .collect();
    let bars = bars_from_closes(&closes);
    let cfg = ScanConfig::default();
    let params = ChannelParams::new(4, 2.0, 200);

    // Bands must bracket at least 90% of historical closes.
    let curve = channel_curve(&bars, params, &cfg).unwrap();
    assert_eq!(curve.len(), 200);
    let inside = curve
        .iter()
        .zip(&closes)
        .filter(|(point, close)| **close >= point.lower && **close <= point.upper)
        .count();
    assert!(
        inside as f64 / closes.len() as f64 >= 0.9,
        "only {inside}/200 closes inside the bands"
    );

    // Push the last close above the upper band: SELL with positive
    // potential return.
    let channel = fit_channel(&bars, params, &cfg, 0).unwrap();
    let mut stretched = bars.clone();
    let spike = channel.upper_band * 1.02;
    stretched.last_mut().unwrap().close = spike;
    stretched.last_mut().unwrap().high = spike * 1.01;
    let signal = classify(&channel, &stretched, &cfg);
    assert_eq!(signal.action, SignalAction::Sell);
    assert!(signal.potential_return_pct > 0.0);
    assert!(signal.strength > 0.0);
}
