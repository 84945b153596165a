// src/hilbert.rs

//! Analytic-signal extension of real time series, used by the complex models.

use ndarray::{Array2, ArrayView2, Zip};
use ndarray_linalg::c64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Edge treatment before the Hilbert transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Transform the series as is.
    None,
    /// Extend the series on both sides with its linear trend plus an exponentially
    /// decaying copy of the edge anomaly, transform, then cut the original span back out.
    #[default]
    Exponential,
}

/// Analytic signal `x + i H(x)` of one series, computed with the FFT.
///
/// The spectrum is weighted by 1 at zero frequency (and at Nyquist for even lengths),
/// by 2 for positive frequencies and by 0 for negative ones.
pub fn analytic_signal(signal: &[f64], forward: &Arc<dyn Fft<f64>>, inverse: &Arc<dyn Fft<f64>>) -> Vec<c64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buffer: Vec<c64> = signal.iter().map(|&x| c64::new(x, 0.0)).collect();
    forward.process(&mut buffer);

    let positive_end = if n % 2 == 0 { n / 2 } else { (n + 1) / 2 };
    for value in buffer.iter_mut().take(positive_end).skip(1) {
        *value *= 2.0;
    }
    let negative_start = if n % 2 == 0 { n / 2 + 1 } else { (n + 1) / 2 };
    for value in buffer.iter_mut().skip(negative_start) {
        *value = c64::new(0.0, 0.0);
    }

    inverse.process(&mut buffer);
    let scale = 1.0 / n as f64;
    for value in buffer.iter_mut() {
        *value *= scale;
    }
    buffer
}

/// Pads a series of length `n` to `3n`: the least-squares line through the series is
/// evaluated on `-n..2n`, and the first/last anomaly from that line is continued
/// outwards with decay `exp(-k / (n * decay_factor))`.
pub fn exponential_padding(series: &[f64], decay_factor: f64) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = series.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &y) in series.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;
    let trend = |x: f64| intercept + slope * x;

    let amp_pre = series[0] - trend(0.0);
    let amp_post = series[n - 1] - trend(nf - 1.0);
    let decay = |k: usize| (-(k as f64) / nf / decay_factor).exp();

    let mut extended = Vec::with_capacity(3 * n);
    for i in 0..n {
        let x = i as f64 - nf;
        extended.push(amp_pre * decay(n - 1 - i) + trend(x));
    }
    extended.extend_from_slice(series);
    for i in 0..n {
        let x = nf + i as f64;
        extended.push(amp_post * decay(i) + trend(x));
    }
    extended
}

/// Replaces every column of a `(sample, feature)` matrix by its analytic signal along
/// the sample axis. Columns are processed in parallel.
pub fn hilbert_columns(data: ArrayView2<'_, f64>, padding: Padding, decay_factor: f64) -> Array2<c64> {
    let (n_samples, n_features) = data.dim();
    let mut output = Array2::<c64>::zeros((n_samples, n_features));
    if n_samples == 0 {
        return output;
    }
    let transform_len = match padding {
        Padding::None => n_samples,
        Padding::Exponential => 3 * n_samples,
    };
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(transform_len);
    let inverse = planner.plan_fft_inverse(transform_len);

    Zip::from(output.columns_mut())
        .and(data.columns())
        .par_for_each(|mut out_col, in_col| {
            let series = in_col.to_vec();
            let analytic = match padding {
                Padding::None => analytic_signal(&series, &forward, &inverse),
                Padding::Exponential => {
                    let padded = exponential_padding(&series, decay_factor);
                    let full = analytic_signal(&padded, &forward, &inverse);
                    full[n_samples..2 * n_samples].to_vec()
                }
            };
            for (dst, src) in out_col.iter_mut().zip(analytic) {
                *dst = src;
            }
        });
    output
}
