// src/diagnostics.rs

//! Correlation and orthogonality measures used to interpret and check decompositions.

use ndarray::{Array2, ArrayView1, ArrayView2, Zip};
use ndarray_linalg::Scalar;
use rayon::prelude::*;

/// Variance below which a series is treated as constant.
const CONSTANT_VARIANCE: f64 = 1e-12;

/// Pearson correlation of two equally long series, clamped to `[-1, 1]`.
///
/// Returns `None` for mismatched lengths or fewer than two observations. A constant
/// series has no linear relation with anything and yields `0.0`.
pub fn pearson_correlation(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> Option<f64> {
    let n = a.len();
    if n != b.len() || n < 2 {
        return None;
    }
    let mean_a = a.mean()?;
    let mean_b = b.mean()?;

    let (mut cov_ab, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    Zip::from(a).and(b).for_each(|&x, &y| {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov_ab += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    });

    if var_a < CONSTANT_VARIANCE || var_b < CONSTANT_VARIANCE {
        return Some(0.0);
    }
    Some((cov_ab / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Correlation of every column of `data` `(sample, feature)` with every column of
/// `scores` `(sample, mode)`, as a `(feature, mode)` matrix.
///
/// Returns `None` when the row counts differ or there are fewer than two samples.
pub fn correlation_matrix(data: &ArrayView2<f64>, scores: &ArrayView2<f64>) -> Option<Array2<f64>> {
    if data.nrows() != scores.nrows() || data.nrows() < 2 {
        return None;
    }
    let n_modes = scores.ncols();
    let rows = (0..data.ncols())
        .into_par_iter()
        .map(|i| {
            let feature = data.column(i);
            scores
                .columns()
                .into_iter()
                .map(|mode| pearson_correlation(&feature, &mode))
                .collect::<Option<Vec<f64>>>()
        })
        .collect::<Option<Vec<Vec<f64>>>>()?;
    Array2::from_shape_vec((rows.len(), n_modes), rows.concat()).ok()
}

/// `‖I - QᴴQ‖_F` for a matrix whose columns should be orthonormal.
pub fn orthogonality_error<A: Scalar<Real = f64>>(q: &ArrayView2<A>) -> f64 {
    let k = q.ncols();
    let mut sum = 0.0;
    for i in 0..k {
        for j in 0..k {
            let dot = q
                .column(i)
                .iter()
                .zip(q.column(j).iter())
                .fold(A::zero(), |acc, (a, b)| acc + a.conj() * *b);
            let target = if i == j { A::one() } else { A::zero() };
            sum += (dot - target).square();
        }
    }
    sum.sqrt()
}
