// src/rotation.rs

//! Varimax and Promax rotation of loading matrices (real or complex).

use crate::data_array::{conj_t, Element};
use crate::error::{EofError, Result};
use crate::linalg_backends::{BackendInverse, BackendSVD, LinAlgBackendProvider};
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Added to row norms before Kaiser normalization.
const KAISER_EPS: f64 = 1e-9;

/// Result of [`promax`].
#[derive(Clone, Debug)]
pub struct RotationOutput<A> {
    /// Rotated loadings, same shape as the input.
    pub loadings: Array2<A>,
    /// `modes x modes` matrix with `loadings = input · rotation_matrix`.
    pub rotation_matrix: Array2<A>,
    /// Correlation matrix of the rotated factors (identity for an orthogonal rotation).
    pub phi: Array2<A>,
    /// Varimax iterations performed.
    pub iterations: usize,
}

fn row_norms<A: Element>(matrix: &ArrayView2<'_, A>) -> Array1<f64> {
    matrix.map_axis(Axis(1), |row| row.iter().map(|v| v.square()).sum::<f64>().sqrt())
}

fn scale_rows<A: Element>(matrix: &mut Array2<A>, factors: &Array1<f64>) {
    for (mut row, &f) in matrix.axis_iter_mut(Axis(0)).zip(factors.iter()) {
        row.mapv_inplace(|v| v.mul_real(f));
    }
}

/// Kaiser-normalized Varimax rotation.
///
/// Each iteration solves the orthogonal Procrustes step with an SVD and stops once the
/// relative change of the criterion drops below `rtol`. Returns the rotated loadings,
/// the rotation matrix and the number of iterations run.
pub fn varimax<A: Element>(
    loadings: ArrayView2<'_, A>,
    gamma: f64,
    max_iter: usize,
    rtol: f64,
) -> Result<(Array2<A>, Array2<A>, usize)> {
    let (n_rows, n_modes) = loadings.dim();
    let backend = LinAlgBackendProvider::<A>::new();

    let h = row_norms(&loadings);
    let mut x = loadings.to_owned();
    scale_rows(&mut x, &h.mapv(|v| 1.0 / (v + KAISER_EPS)));

    let mut rotation = Array2::<A>::eye(n_modes);
    let mut criterion = 0.0;
    let mut iterations = 0;
    let mut converged = false;
    let x_h = conj_t(&x.view());
    let alpha = gamma / n_rows as f64;

    for _ in 0..max_iter {
        iterations += 1;
        let previous = criterion;
        let basis = x.dot(&rotation);
        let basis2 = basis.mapv(|v| A::from_real(v.square()));
        let basis3 = &basis2 * &basis;
        let column_weights = basis2.sum_axis(Axis(0));
        let mut target = basis3;
        for (mut col, (&w, b)) in target
            .axis_iter_mut(Axis(1))
            .zip(column_weights.iter().zip(basis.axis_iter(Axis(1))))
        {
            col.zip_mut_with(&b, |t, &bv| *t = *t - bv * w.mul_real(alpha));
        }
        let transformed = x_h.dot(&target);
        let out = backend.svd_into(transformed, true, true)?;
        let u = out
            .u
            .ok_or_else(|| EofError::InvalidValue("varimax SVD did not return U".to_string()))?;
        let vt = out
            .vt
            .ok_or_else(|| EofError::InvalidValue("varimax SVD did not return V^H".to_string()))?;
        rotation = u.dot(&vt);
        criterion = out.s.sum();
        if criterion == 0.0 || ((criterion - previous) / criterion).abs() < rtol {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!("Varimax rotation did not converge within {} iterations", max_iter);
    }
    debug!("Varimax finished after {} iterations", iterations);

    let mut rotated = x.dot(&rotation);
    scale_rows(&mut rotated, &h);
    Ok((rotated, rotation, iterations))
}

/// Promax rotation: Varimax, then (for `power > 1`) an oblique Procrustes fit towards
/// the Varimax solution raised elementwise to `power`.
///
/// # Errors
/// [`EofError::Configuration`] for fewer than two modes, plus LAPACK failures.
pub fn promax<A: Element>(loadings: ArrayView2<'_, A>, power: f64, max_iter: usize, rtol: f64) -> Result<RotationOutput<A>> {
    let n_modes = loadings.ncols();
    if n_modes < 2 {
        return Err(EofError::Configuration(format!(
            "rotation needs at least two modes, got {n_modes}"
        )));
    }
    let (varimax_loadings, varimax_rotation, iterations) = varimax(loadings, 1.0, max_iter, rtol)?;
    if power <= 1.0 {
        return Ok(RotationOutput {
            loadings: varimax_loadings,
            rotation_matrix: varimax_rotation,
            phi: Array2::eye(n_modes),
            iterations,
        });
    }

    let backend = LinAlgBackendProvider::<A>::new();
    let h = row_norms(&varimax_loadings.view());
    let mut x = varimax_loadings;
    scale_rows(&mut x, &h.mapv(|v| 1.0 / (v + KAISER_EPS)));

    let column_max = x.map_axis(Axis(0), |col| col.iter().fold(0.0f64, |m, v| m.max(v.abs())));
    let mut target = x.clone();
    for (mut col, &m) in target.axis_iter_mut(Axis(1)).zip(column_max.iter()) {
        let m = if m > 0.0 { m } else { 1.0 };
        col.mapv_inplace(|v| {
            let v = v.div_real(m);
            v.mul_real(v.abs().powf(power - 1.0))
        });
    }

    let x_h = conj_t(&x.view());
    let gram_inv = backend.inverse(&x_h.dot(&x))?;
    let mut procrustes = gram_inv.dot(&x_h.dot(&target));
    let normalizer = backend.inverse(&conj_t(&procrustes.view()).dot(&procrustes))?;
    for (j, mut col) in procrustes.axis_iter_mut(Axis(1)).enumerate() {
        let scale = normalizer[[j, j]].re().abs().sqrt();
        col.mapv_inplace(|v| v.mul_real(scale));
    }

    let mut rotated = x.dot(&procrustes);
    scale_rows(&mut rotated, &h);
    let rotation_matrix = varimax_rotation.dot(&procrustes);
    let procrustes_inv = backend.inverse(&procrustes)?;
    let phi = procrustes_inv.dot(&conj_t(&procrustes_inv.view()));

    Ok(RotationOutput {
        loadings: rotated,
        rotation_matrix,
        phi,
        iterations,
    })
}
