// src/linalg_backends.rs

use crate::data_array::Element;
use crate::error::Result;
use ndarray::{Array1, Array2};
use ndarray_linalg::{
    Inverse as NdLinalgInverse, JobSvd, SVDDCInto as NdLinalgSVDDCInto, QR as NdLinalgQR,
    SVDInto as NdLinalgSVDInto,
};
use std::marker::PhantomData;

/// Dispatches to the linear algebra backend selected by the `backend_*` cargo features.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

/// Output of a Singular Value Decomposition. Singular values are real for
/// both real and complex inputs.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<F>>,
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>>;

    /// Economy SVD of an `m x n` matrix: `u` is `m x k` and `vt` is `k x n` with
    /// `k = min(m, n)`.
    fn thin_svd_into(&self, matrix: Array2<F>) -> Result<SVDOutput<F>>;
}

/// Trait for QR decomposition, focusing on retrieving the Q factor.
pub trait BackendQR<F: 'static + Copy + Send + Sync> {
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>>;
}

/// Trait for the inverse of a square matrix.
pub trait BackendInverse<F: 'static + Copy + Send + Sync> {
    fn inverse(&self, matrix: &Array2<F>) -> Result<Array2<F>>;
}

/// LAPACK through `ndarray-linalg` (OpenBLAS or MKL, depending on features).
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

impl<F: Element> BackendSVD<F> for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>> {
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v)?;
        Ok(SVDOutput { u, s, vt })
    }

    fn thin_svd_into(&self, matrix: Array2<F>) -> Result<SVDOutput<F>> {
        let (u, s, vt) = matrix.svddc_into(JobSvd::Some)?;
        Ok(SVDOutput { u, s, vt })
    }
}

impl<F: Element> BackendQR<F> for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>> {
        let (q_factor, _r) = matrix.qr()?;
        Ok(q_factor)
    }
}

impl<F: Element> BackendInverse<F> for NdarrayLinAlgBackend {
    fn inverse(&self, matrix: &Array2<F>) -> Result<Array2<F>> {
        Ok(matrix.inv()?)
    }
}

impl<F> BackendSVD<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendSVD<F>,
{
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>> {
        NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
    }

    fn thin_svd_into(&self, matrix: Array2<F>) -> Result<SVDOutput<F>> {
        NdarrayLinAlgBackend.thin_svd_into(matrix)
    }
}

impl<F> BackendQR<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendQR<F>,
{
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>> {
        NdarrayLinAlgBackend.qr_q_factor(matrix)
    }
}

impl<F> BackendInverse<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendInverse<F>,
{
    fn inverse(&self, matrix: &Array2<F>) -> Result<Array2<F>> {
        NdarrayLinAlgBackend.inverse(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_linalg::c64;

    #[test]
    fn svd_reconstructs_real_matrix() {
        let backend = LinAlgBackendProvider::<f64>::new();
        let a = array![[3.0, 1.0], [1.0, 3.0], [0.0, 2.0]];
        let out = backend.svd_into(a.clone(), true, true).unwrap();
        let u = out.u.unwrap();
        let vt = out.vt.unwrap();
        let k = out.s.len();
        let mut rebuilt = Array2::<f64>::zeros((3, 2));
        for i in 0..k {
            for r in 0..3 {
                for c in 0..2 {
                    rebuilt[[r, c]] += u[[r, i]] * out.s[i] * vt[[i, c]];
                }
            }
        }
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
        }
        assert!(out.s[0] >= out.s[1]);
    }

    #[test]
    fn thin_svd_of_tall_matrix_has_economy_shapes() {
        let backend = LinAlgBackendProvider::<f64>::new();
        let a = Array2::from_shape_fn((50, 3), |(r, c)| ((r * (c + 1)) as f64 * 0.37).sin() + c as f64);
        let out = backend.thin_svd_into(a.clone()).unwrap();
        let u = out.u.unwrap();
        let vt = out.vt.unwrap();
        assert_eq!(u.dim(), (50, 3));
        assert_eq!(vt.dim(), (3, 3));
        let mut scaled = u.clone();
        for (mut col, s) in scaled.columns_mut().into_iter().zip(out.s.iter()) {
            col *= *s;
        }
        for (x, y) in scaled.dot(&vt).iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn qr_factor_of_complex_matrix_is_orthonormal() {
        let backend = LinAlgBackendProvider::<c64>::new();
        let a = array![
            [c64::new(1.0, 1.0), c64::new(0.0, 2.0)],
            [c64::new(2.0, 0.0), c64::new(1.0, -1.0)],
            [c64::new(0.5, 0.0), c64::new(3.0, 0.0)]
        ];
        let q = backend.qr_q_factor(&a).unwrap();
        assert_eq!(q.dim(), (3, 2));
        let gram = q.t().mapv(|v| v.conj()).dot(&q);
        assert_abs_diff_eq!(gram[[0, 0]].re, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(gram[[1, 1]].re, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(gram[[0, 1]].norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn inverse_of_rotation_is_transpose() {
        let backend = LinAlgBackendProvider::<f64>::new();
        let (s, c) = (0.3f64.sin(), 0.3f64.cos());
        let r = array![[c, -s], [s, c]];
        let inv = backend.inverse(&r).unwrap();
        for (x, y) in inv.iter().zip(r.t().iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }
}
