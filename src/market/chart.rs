use crate::market::types::{Asset, CHART_MAX_POINTS};
use rand::Rng;
use std::f64::consts::PI;

/// Samples are clamped to this floor so a synthesized series never crosses
/// zero.
pub const PRICE_FLOOR: f64 = 0.00001;

/// Noise amplitude at the midpoint of a synthesized series, as a fraction of
/// the locally expected price. The half-sine envelope zeroes it at both ends.
const MID_SERIES_NOISE: f64 = 0.2;

/// Synthesizes a plausible historical series ending exactly at
/// `current_price`, working backwards from the percentage change over the
/// window.
pub fn historical_series<R: Rng + ?Sized>(
    current_price: f64,
    change_percent: f64,
    num_points: usize,
    rng: &mut R,
) -> Vec<f64> {
    if num_points == 0 {
        return Vec::new();
    }
    if num_points == 1 {
        return vec![current_price];
    }

    let denominator = 1.0 + change_percent / 100.0;
    let starting_price = if denominator > f64::EPSILON {
        current_price / denominator
    } else {
        current_price
    };

    let mut samples = Vec::with_capacity(num_points);
    for index in 0..num_points {
        let progress = index as f64 / (num_points - 1) as f64;
        let expected_price = starting_price + progress * (current_price - starting_price);

        let envelope = MID_SERIES_NOISE * (progress * PI).sin();
        let noise = (rng.gen::<f64>() - 0.5) * envelope * expected_price;

        samples.push((expected_price + noise).max(PRICE_FLOOR));
    }

    // The series must land on the quoted price, noise-free.
    samples[num_points - 1] = current_price;
    samples
}

/// Appends one sample to a rolling window, evicting oldest-first once the
/// window exceeds `max_len`.
pub fn rolling_append(series: &[f64], sample: f64, max_len: usize) -> Vec<f64> {
    let mut updated = Vec::with_capacity(series.len() + 1);
    updated.extend_from_slice(series);
    updated.push(sample);

    if updated.len() > max_len {
        let overflow = updated.len() - max_len;
        updated.drain(0..overflow);
    }
    updated
}

/// Random-walk series used to seed assets before any real samples arrive.
pub fn seed_series<R: Rng + ?Sized>(days: usize, rng: &mut R) -> Vec<f64> {
    let mut samples = Vec::with_capacity(days);
    let mut base_value = rng.gen::<f64>() * 1_000.0 + 100.0;

    for _ in 0..days {
        base_value += (rng.gen::<f64>() - 0.5) * 100.0;
        samples.push(base_value);
    }
    samples
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartRange {
    H24,
    D7,
    D30,
    D90,
    Y1,
}

impl ChartRange {
    pub fn num_points(self) -> usize {
        match self {
            Self::H24 | Self::D7 => 24,
            Self::D30 => 30,
            Self::D90 => 90,
            Self::Y1 => 365,
        }
    }

    /// Percentage change attributed to the range. Ranges beyond 7 days have
    /// no backing field, so the weekly change is extrapolated.
    pub fn change_for(self, asset: &Asset) -> f64 {
        match self {
            Self::H24 => asset.change24h,
            Self::D7 => asset.change7d,
            Self::D30 => asset.change7d * 4.0,
            Self::D90 => asset.change7d * 12.0,
            Self::Y1 => asset.change7d * 52.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeSeries {
    pub data: Vec<f64>,
    pub change: f64,
}

/// Chart data for a detail view. The 7-day range reuses the live rolling
/// window for continuity; everything else is synthesized on demand.
pub fn series_for_range<R: Rng + ?Sized>(
    asset: &Asset,
    range: ChartRange,
    rng: &mut R,
) -> RangeSeries {
    if range == ChartRange::D7 && !asset.chart_data.is_empty() {
        return RangeSeries {
            data: asset.chart_data.clone(),
            change: asset.change7d,
        };
    }

    let change = range.change_for(asset);
    RangeSeries {
        data: historical_series(asset.price, change, range.num_points(), rng),
        change,
    }
}

/// Default rolling-window update applied when a new live price sample lands.
pub fn apply_price_sample(series: &[f64], price: f64) -> Vec<f64> {
    if series.is_empty() {
        return vec![price; CHART_MAX_POINTS];
    }
    rolling_append(series, price, CHART_MAX_POINTS)
}
