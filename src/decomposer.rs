// src/decomposer.rs

use crate::data_array::{conj_t, Element};
use crate::error::{EofError, Result};
use crate::linalg_backends::{BackendQR, BackendSVD, LinAlgBackendProvider};
use log::debug;
use ndarray::{s, Array1, Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Largest matrix dimension for which `Solver::Auto` always picks the exact SVD.
const AUTO_FULL_SVD_MAX_DIM: usize = 500;
/// `Solver::Auto` picks the exact SVD when more than this fraction of the rank is requested.
const AUTO_FULL_SVD_RANK_FRACTION: f64 = 0.8;

/// SVD algorithm used by [`Decomposer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    /// Exact SVD for small problems or when most of the spectrum is requested,
    /// randomized otherwise.
    #[default]
    Auto,
    /// Exact LAPACK SVD.
    Full,
    /// Halko-Martinsson-Tropp randomized SVD.
    Randomized,
}

/// Tuning knobs of the randomized solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverKwargs {
    /// Extra sketch columns beyond the requested modes.
    pub n_oversamples: usize,
    /// Subspace iterations, each re-orthonormalized with QR.
    pub n_power_iterations: usize,
}

impl Default for SolverKwargs {
    fn default() -> Self {
        Self {
            n_oversamples: 10,
            n_power_iterations: 4,
        }
    }
}

/// Rank-`k` singular value decomposition `X ≈ U diag(s) Vᴴ`.
///
/// `v` holds the right singular vectors as columns (features × modes).
#[derive(Clone, Debug)]
pub struct TruncatedSvd<A> {
    pub u: Array2<A>,
    pub s: Array1<f64>,
    pub v: Array2<A>,
}

/// Truncated SVD of a dense real or complex matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decomposer {
    pub n_modes: usize,
    pub solver: Solver,
    pub random_state: Option<u64>,
    pub kwargs: SolverKwargs,
}

impl Decomposer {
    pub fn new(n_modes: usize, solver: Solver, random_state: Option<u64>, kwargs: SolverKwargs) -> Self {
        Self {
            n_modes,
            solver,
            random_state,
            kwargs,
        }
    }

    /// Concrete solver used for a matrix of the given shape.
    pub fn resolve_solver(&self, n_rows: usize, n_cols: usize) -> Solver {
        match self.solver {
            Solver::Auto => {
                let rank = n_rows.min(n_cols);
                let rank_cutoff = (AUTO_FULL_SVD_RANK_FRACTION * rank as f64).floor() as usize;
                if n_rows.max(n_cols) <= AUTO_FULL_SVD_MAX_DIM || self.n_modes > rank_cutoff {
                    Solver::Full
                } else {
                    Solver::Randomized
                }
            }
            explicit => explicit,
        }
    }

    /// Validates `n_modes` against the shape of the matrix to be decomposed.
    pub fn check_rank(&self, n_rows: usize, n_cols: usize) -> Result<()> {
        let rank = n_rows.min(n_cols);
        if self.n_modes == 0 {
            return Err(EofError::Configuration("n_modes must be at least 1".to_string()));
        }
        if self.n_modes > rank {
            return Err(EofError::InvalidValue(format!(
                "n_modes = {} exceeds the rank bound min(n_samples, n_features) = {} of a {}x{} matrix",
                self.n_modes, rank, n_rows, n_cols
            )));
        }
        Ok(())
    }

    /// Computes the leading `n_modes` singular triplets of `matrix`, singular values in
    /// non-increasing order.
    ///
    /// # Errors
    /// [`EofError::Configuration`] when `n_modes` is zero, [`EofError::InvalidValue`] when it
    /// exceeds `min(n_rows, n_cols)`, and any LAPACK failure.
    pub fn fit<A: Element>(&self, matrix: ArrayView2<'_, A>) -> Result<TruncatedSvd<A>> {
        let (n_rows, n_cols) = matrix.dim();
        self.check_rank(n_rows, n_cols)?;
        let solver = self.resolve_solver(n_rows, n_cols);
        debug!(
            "Decomposing {}x{} matrix into {} modes with {:?} solver",
            n_rows, n_cols, self.n_modes, solver
        );
        let start = Instant::now();
        let result = match solver {
            Solver::Randomized => self.fit_randomized(matrix),
            _ => self.fit_full(matrix),
        }?;
        debug!("SVD finished in {:?}", start.elapsed());
        Ok(result)
    }

    fn fit_full<A: Element>(&self, matrix: ArrayView2<'_, A>) -> Result<TruncatedSvd<A>> {
        let k = self.n_modes;
        let backend = LinAlgBackendProvider::<A>::new();
        let out = backend.thin_svd_into(matrix.as_standard_layout().into_owned())?;
        let u = out
            .u
            .ok_or_else(|| EofError::InvalidValue("SVD did not return left singular vectors".to_string()))?;
        let vt = out
            .vt
            .ok_or_else(|| EofError::InvalidValue("SVD did not return right singular vectors".to_string()))?;
        Ok(TruncatedSvd {
            u: u.slice(s![.., ..k]).to_owned(),
            s: out.s.slice(s![..k]).to_owned(),
            v: conj_t(&vt.slice(s![..k, ..])),
        })
    }

    fn fit_randomized<A: Element>(&self, matrix: ArrayView2<'_, A>) -> Result<TruncatedSvd<A>> {
        let (n_rows, n_cols) = matrix.dim();
        let k = self.n_modes;
        let sketch_size = (k + self.kwargs.n_oversamples).min(n_rows.min(n_cols)).max(k);

        let mut rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(rand::thread_rng())
                .map_err(|e| EofError::InvalidValue(format!("failed to initialize RNG: {e}")))?,
        };
        let omega: Array2<f64> = Array2::random_using((n_cols, sketch_size), StandardNormal, &mut rng);
        let omega = omega.mapv(A::from_real);

        let backend = LinAlgBackendProvider::<A>::new();
        let matrix_h = conj_t(&matrix);
        let mut q_basis = backend.qr_q_factor(&matrix.dot(&omega))?;
        for _ in 0..self.kwargs.n_power_iterations {
            let w_basis = backend.qr_q_factor(&matrix_h.dot(&q_basis))?;
            q_basis = backend.qr_q_factor(&matrix.dot(&w_basis))?;
        }

        let projected = conj_t(&q_basis.view()).dot(&matrix);
        let out = backend.thin_svd_into(projected)?;
        let u_small = out
            .u
            .ok_or_else(|| EofError::InvalidValue("SVD of sketch did not return U".to_string()))?;
        let vt = out
            .vt
            .ok_or_else(|| EofError::InvalidValue("SVD of sketch did not return V^H".to_string()))?;

        Ok(TruncatedSvd {
            u: q_basis.dot(&u_small.slice(s![.., ..k])),
            s: out.s.slice(s![..k]).to_owned(),
            v: conj_t(&vt.slice(s![..k, ..])),
        })
    }
}
