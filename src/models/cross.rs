// src/models/cross.rs

use super::base::{divide_modes, mode_vector, project, reconstruct, reject_missing};
use super::{ModeSelector, ModelParams};
use crate::data_array::{conj_t, Coordinate, DataArray, DataObject, Element, MODE_DIM};
use crate::data_container::DataContainer;
use crate::decomposer::{Decomposer, TruncatedSvd};
use crate::error::{EofError, Result};
use crate::persistence::{ModelTree, Persist};
use crate::preprocessing::{Preprocessor, SampleContext};
use log::{debug, info};
use ndarray::{Array2, Axis};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

const ATTR_ALGORITHM: &str = "algorithm";

/// One of the two fields of a cross decomposition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    First,
    Second,
}

impl Field {
    /// Name of a per-field result entry, e.g. `scores1`.
    pub fn entry(self, base: &str) -> String {
        match self {
            Field::First => format!("{base}1"),
            Field::Second => format!("{base}2"),
        }
    }
}

/// The model-specific part of a two-field decomposition.
pub trait CrossDecompositionAlgorithm: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Elem: Element;

    const NAME: &'static str;

    /// Decomposes the cross-covariance of two preprocessed fields sharing their samples.
    fn fit_algorithm(
        &self,
        data1: DataArray<f64>,
        data2: DataArray<f64>,
        params: &ModelParams,
        container: &mut DataContainer,
    ) -> Result<()>;

    /// Un-normalized `(sample, mode)` projections of one preprocessed field.
    fn transform_algorithm(
        &self,
        data: &DataArray<f64>,
        field: Field,
        params: &ModelParams,
        container: &DataContainer,
    ) -> Result<DataArray<Self::Elem>>;

    /// Real reconstructions of both fields from the selected zero-based modes.
    fn inverse_transform_algorithm(
        &self,
        params: &ModelParams,
        container: &DataContainer,
        modes: &[usize],
    ) -> Result<(DataArray<f64>, DataArray<f64>)> {
        let first = reconstruct(
            container.get::<Self::Elem>("scores1")?,
            container.get::<Self::Elem>("components1")?,
            params,
            modes,
        )?;
        let second = reconstruct(
            container.get::<Self::Elem>("scores2")?,
            container.get::<Self::Elem>("components2")?,
            params,
            modes,
        )?;
        Ok((first, second))
    }
}

struct CrossSvd<A> {
    svd: TruncatedSvd<A>,
    total_squared_covariance: f64,
}

/// SVD of `t1ᴴ·t2 / (n - 1)`.
fn covariance_svd<A: Element>(t1: &Array2<A>, t2: &Array2<A>, decomposer: &Decomposer) -> Result<CrossSvd<A>> {
    let dof = (t1.nrows() - 1) as f64;
    let covariance = conj_t(&t1.view()).dot(t2).mapv(|c| c.div_real(dof));
    let total_squared_covariance = covariance.iter().map(|c| c.square()).sum();
    let svd = decomposer.fit(covariance.view())?;
    Ok(CrossSvd {
        svd,
        total_squared_covariance,
    })
}

/// Principal component scores `u · diag(s)`.
fn principal_scores<A: Element>(pca: &TruncatedSvd<A>) -> Array2<A> {
    let mut scores = pca.u.clone();
    for (mut col, &s) in scores.axis_iter_mut(Axis(1)).zip(pca.s.iter()) {
        col.mapv_inplace(|v| v.mul_real(s));
    }
    scores
}

/// The cross-covariance SVD of two matrices, computed at most once.
///
/// With a PCA step each field is first reduced to its leading principal components;
/// the singular vectors found there are mapped back through the PCA loadings.
struct LazyCrossSvd<A> {
    x1: Array2<A>,
    x2: Array2<A>,
    decomposer: Decomposer,
    pca: Option<Decomposer>,
    result: OnceCell<CrossSvd<A>>,
}

impl<A: Element> LazyCrossSvd<A> {
    fn get(&self) -> Result<&CrossSvd<A>> {
        self.result.get_or_try_init(|| {
            let Some(pca) = &self.pca else {
                return covariance_svd(&self.x1, &self.x2, &self.decomposer);
            };
            let reduced1 = pca.fit(self.x1.view())?;
            let reduced2 = pca.fit(self.x2.view())?;
            debug!(
                "Reduced fields to {} principal components before the cross-covariance SVD",
                pca.n_modes
            );
            let mut out = covariance_svd(&principal_scores(&reduced1), &principal_scores(&reduced2), &self.decomposer)?;
            out.svd.u = reduced1.v.dot(&out.svd.u);
            out.svd.v = reduced2.v.dot(&out.svd.v);
            Ok(out)
        })
    }
}

/// Runs the SVD of `X1ᴴ·X2 / (n - 1)` and stores the MCA entries.
pub(crate) fn cross_decompose<A: Element>(
    data1: DataArray<A>,
    data2: DataArray<A>,
    params: &ModelParams,
    container: &mut DataContainer,
) -> Result<()> {
    let sample = params.sample_name.clone();
    let feature = params.feature_name.clone();
    let x1 = data1.matrix_as(&sample, &feature)?;
    let x2 = data2.matrix_as(&sample, &feature)?;
    let n_samples = x1.nrows();
    if n_samples < 2 {
        return Err(EofError::InvalidValue(format!(
            "at least two valid samples are needed, got {n_samples}"
        )));
    }
    let decomposer = params.decomposer();
    let pca = params.pca_decomposer();
    match &pca {
        Some(pca) => {
            pca.check_rank(n_samples, x1.ncols())?;
            pca.check_rank(n_samples, x2.ncols())?;
            decomposer.check_rank(pca.n_modes, pca.n_modes)?;
        }
        None => decomposer.check_rank(n_samples, x1.ncols().min(x2.ncols()))?,
    }

    let samples = data1.coord(&sample).cloned().unwrap_or_default();
    let features1 = data1.coord(&feature).cloned().unwrap_or_default();
    let features2 = data2.coord(&feature).cloned().unwrap_or_default();
    let modes = Coordinate::modes(params.n_modes);
    let eager = params.compute;

    container.add("input_data1", data1, false);
    container.add("input_data2", data2, false);
    let job = Arc::new(LazyCrossSvd {
        x1,
        x2,
        decomposer,
        pca,
        result: OnceCell::new(),
    });

    for (field, features) in [(Field::First, features1), (Field::Second, features2)] {
        let (svd, f_name, m) = (Arc::clone(&job), feature.clone(), modes.clone());
        container.add_computed(&field.entry("components"), eager, move || {
            let out = &svd.get()?.svd;
            let vectors = match field {
                Field::First => out.u.clone(),
                Field::Second => out.v.clone(),
            };
            DataArray::from_matrix(vectors, [f_name.as_str(), MODE_DIM], [features.clone(), m.clone()])
        })?;

        let (svd, s_name, s_coord, m) = (Arc::clone(&job), sample.clone(), samples.clone(), modes.clone());
        container.add_computed(&field.entry("scores"), eager, move || {
            let out = &svd.get()?.svd;
            let scores = match field {
                Field::First => svd.x1.dot(&out.u),
                Field::Second => svd.x2.dot(&out.v),
            };
            DataArray::from_matrix(scores, [s_name.as_str(), MODE_DIM], [s_coord.clone(), m.clone()])
        })?;

        let (svd, m) = (Arc::clone(&job), modes.clone());
        container.add_computed(&field.entry("norm"), eager, move || {
            mode_vector(svd.get()?.svd.s.mapv(f64::sqrt), &m)
        })?;
    }

    let (svd, m) = (Arc::clone(&job), modes.clone());
    container.add_computed("singular_values", eager, move || mode_vector(svd.get()?.svd.s.clone(), &m))?;

    let (svd, m) = (Arc::clone(&job), modes.clone());
    container.add_computed("squared_covariance", eager, move || {
        mode_vector(svd.get()?.svd.s.mapv(|s| s * s), &m)
    })?;

    let svd = Arc::clone(&job);
    container.add_computed("total_squared_covariance", eager, move || {
        Ok(DataArray::scalar(svd.get()?.total_squared_covariance))
    })?;

    let (svd, m) = (job, modes);
    container.add_computed("squared_covariance_fraction", eager, move || {
        let out = svd.get()?;
        let total = out.total_squared_covariance;
        mode_vector(out.svd.s.mapv(|s| s * s / total), &m)
    })?;
    Ok(())
}

/// A two-field decomposition: two preprocessors, result storage and persistence
/// around a [`CrossDecompositionAlgorithm`].
#[derive(Debug)]
pub struct CrossDecompositionModel<C: CrossDecompositionAlgorithm> {
    params: ModelParams,
    algorithm: C,
    preprocessor1: Preprocessor,
    preprocessor2: Preprocessor,
    data: DataContainer,
    fitted: bool,
}

impl<C: CrossDecompositionAlgorithm + Default> CrossDecompositionModel<C> {
    pub fn new(params: ModelParams) -> Self {
        Self::with_algorithm(params, C::default())
    }
}

impl<C: CrossDecompositionAlgorithm> CrossDecompositionModel<C> {
    pub fn with_algorithm(params: ModelParams, algorithm: C) -> Self {
        Self {
            preprocessor1: Preprocessor::new(params.preprocessor_params()),
            preprocessor2: Preprocessor::new(params.preprocessor_params()),
            params,
            algorithm,
            data: DataContainer::new(),
            fitted: false,
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn algorithm(&self) -> &C {
        &self.algorithm
    }

    pub fn preprocessor(&self, field: Field) -> &Preprocessor {
        match field {
            Field::First => &self.preprocessor1,
            Field::Second => &self.preprocessor2,
        }
    }

    pub fn data(&self) -> &DataContainer {
        &self.data
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn n_modes(&self) -> usize {
        self.params.n_modes
    }

    pub(crate) fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(EofError::NotFitted(C::NAME))
        }
    }

    /// Fits both fields. `dim` names the sample dimensions shared by the two inputs.
    ///
    /// # Errors
    /// [`EofError::Shape`] for empty inputs, a sample dim missing from either field, or
    /// sample coordinates that differ between the fields after sanitizing; plus the
    /// errors of [`super::DecompositionModel::fit`].
    pub fn fit(
        &mut self,
        data1: &DataObject<f64>,
        data2: &DataObject<f64>,
        dim: &[&str],
        weights1: Option<&DataObject<f64>>,
        weights2: Option<&DataObject<f64>>,
    ) -> Result<()> {
        self.params.check()?;
        let start = Instant::now();
        let sample_dims: Vec<String> = dim.iter().map(|d| d.to_string()).collect();
        let mut preprocessor1 = Preprocessor::new(self.params.preprocessor_params());
        let mut preprocessor2 = Preprocessor::new(self.params.preprocessor_params());
        let x1 = preprocessor1.fit_transform(data1, &sample_dims, weights1)?.data;
        let x2 = preprocessor2.fit_transform(data2, &sample_dims, weights2)?.data;
        reject_missing(&x1)?;
        reject_missing(&x2)?;
        if x1.coord(&self.params.sample_name) != x2.coord(&self.params.sample_name) {
            return Err(EofError::Shape(
                "both fields must have the same valid samples after removing NaN-only samples".to_string(),
            ));
        }

        let mut container = DataContainer::new();
        self.algorithm.fit_algorithm(x1, x2, &self.params, &mut container)?;
        self.preprocessor1 = preprocessor1;
        self.preprocessor2 = preprocessor2;
        self.data = container;
        self.fitted = true;

        let message = format!(
            "Fitted {} with {} modes in {:?} (compute = {})",
            C::NAME,
            self.params.n_modes,
            start.elapsed(),
            self.params.compute
        );
        if self.params.verbose {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
        Ok(())
    }

    /// Un-normalized stacked projections of one field, with the context needed to unstack them.
    pub(crate) fn project_field(&self, field: Field, data: &DataObject<f64>) -> Result<(DataArray<C::Elem>, SampleContext)> {
        let transformed = self.preprocessor(field).transform(data)?;
        reject_missing(&transformed.data)?;
        let projections = self
            .algorithm
            .transform_algorithm(&transformed.data, field, &self.params, &self.data)?;
        Ok((projections, transformed.context))
    }

    /// Projects one or both fields onto the fitted singular vectors. Results have dims
    /// `(mode, *sample_dims)`.
    ///
    /// # Errors
    /// [`EofError::InvalidValue`] when neither field is given.
    pub fn transform(
        &self,
        data1: Option<&DataObject<f64>>,
        data2: Option<&DataObject<f64>>,
        normalized: bool,
    ) -> Result<(Option<DataArray<C::Elem>>, Option<DataArray<C::Elem>>)> {
        self.check_fitted()?;
        if data1.is_none() && data2.is_none() {
            return Err(EofError::InvalidValue("either data1 or data2 must be provided".to_string()));
        }
        let run = |field: Field, data: Option<&DataObject<f64>>| -> Result<Option<DataArray<C::Elem>>> {
            let Some(data) = data else {
                return Ok(None);
            };
            let (mut projections, context) = self.project_field(field, data)?;
            if normalized {
                projections = divide_modes(&projections, self.data.get::<f64>(&field.entry("norm"))?)?;
            }
            self.preprocessor(field)
                .inverse_transform_scores_unseen(&projections, &context)
                .map(Some)
        };
        Ok((run(Field::First, data1)?, run(Field::Second, data2)?))
    }

    /// Reconstructs both fields from the selected modes, in their input layout and units.
    pub fn inverse_transform(&self, modes: impl Into<ModeSelector>) -> Result<(DataObject<f64>, DataObject<f64>)> {
        self.check_fitted()?;
        let selection = modes.into().resolve(self.params.n_modes)?;
        let (x1, x2) = self
            .algorithm
            .inverse_transform_algorithm(&self.params, &self.data, &selection)?;
        Ok((
            self.preprocessor1.inverse_transform_data(&x1)?,
            self.preprocessor2.inverse_transform_data(&x2)?,
        ))
    }

    /// Singular vectors of both fields with dims `(mode, *feature_dims)`.
    pub fn components(&self) -> Result<(DataObject<C::Elem>, DataObject<C::Elem>)> {
        self.check_fitted()?;
        Ok((
            self.preprocessor1
                .inverse_transform_components(self.data.get::<C::Elem>("components1")?)?,
            self.preprocessor2
                .inverse_transform_components(self.data.get::<C::Elem>("components2")?)?,
        ))
    }

    /// Scores of both fields with dims `(mode, *sample_dims)`.
    pub fn scores(&self, normalized: bool) -> Result<(DataArray<C::Elem>, DataArray<C::Elem>)> {
        self.check_fitted()?;
        let field_scores = |field: Field| -> Result<DataArray<C::Elem>> {
            let scores = self.data.get::<C::Elem>(&field.entry("scores"))?;
            if normalized {
                let scaled = divide_modes(scores, self.data.get::<f64>(&field.entry("norm"))?)?;
                self.preprocessor(field).inverse_transform_scores(&scaled)
            } else {
                self.preprocessor(field).inverse_transform_scores(scores)
            }
        };
        Ok((field_scores(Field::First)?, field_scores(Field::Second)?))
    }

    fn entry(&self, name: &str) -> Result<DataArray<f64>> {
        self.check_fitted()?;
        Ok(self.data.get::<f64>(name)?.clone())
    }

    pub fn singular_values(&self) -> Result<DataArray<f64>> {
        self.entry("singular_values")
    }

    pub fn squared_covariance(&self) -> Result<DataArray<f64>> {
        self.entry("squared_covariance")
    }

    pub fn squared_covariance_fraction(&self) -> Result<DataArray<f64>> {
        self.entry("squared_covariance_fraction")
    }

    pub fn total_squared_covariance(&self) -> Result<f64> {
        self.entry("total_squared_covariance")?
            .item()
            .ok_or_else(|| EofError::InvalidValue("total_squared_covariance is not a scalar".to_string()))
    }

    /// Per-mode norms of the scores of one field.
    pub fn norms(&self, field: Field) -> Result<DataArray<f64>> {
        self.entry(&field.entry("norm"))
    }

    pub fn compute(&self, verbose: bool) -> Result<()> {
        self.check_fitted()?;
        self.data.compute(verbose)
    }

    pub fn get_params(&self) -> Result<serde_json::Value> {
        let mut params = serde_json::to_value(&self.params)?;
        if let (Some(map), serde_json::Value::Object(extra)) =
            (params.as_object_mut(), serde_json::to_value(&self.algorithm)?)
        {
            map.extend(extra);
        }
        Ok(params)
    }
}

/// Projects one preprocessed field onto its own singular vectors.
pub(crate) fn project_onto_field<A: Element>(
    data: &DataArray<A>,
    field: Field,
    params: &ModelParams,
    container: &DataContainer,
) -> Result<DataArray<A>> {
    project(data, container.get::<A>(&field.entry("components"))?, params)
}

impl<C: CrossDecompositionAlgorithm> Persist for CrossDecompositionModel<C> {
    fn serialize(&self, save_data: bool) -> Result<ModelTree> {
        self.check_fitted()?;
        let mut tree = ModelTree::new(C::NAME, &self.params)?;
        tree.set_attr(ATTR_ALGORITHM, &self.algorithm)?;
        tree.data_vars = self.data.snapshot(save_data)?;
        tree.preprocessors.push(self.preprocessor1.clone());
        tree.preprocessors.push(self.preprocessor2.clone());
        Ok(tree)
    }

    fn deserialize(mut tree: ModelTree) -> Result<Self> {
        tree.expect_model(C::NAME)?;
        let params: ModelParams = tree.params()?;
        let algorithm: C = tree.attr(ATTR_ALGORITHM)?;
        if tree.preprocessors.len() != 2 {
            return Err(EofError::Serialization(format!(
                "{} stores two preprocessors, found {}",
                C::NAME,
                tree.preprocessors.len()
            )));
        }
        let preprocessor2 = tree.preprocessors.remove(1);
        let preprocessor1 = tree.preprocessors.remove(0);
        let data = tree.restore_container();
        Ok(Self {
            params,
            algorithm,
            preprocessor1,
            preprocessor2,
            data,
            fitted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn field(values: Array2<f64>) -> DataArray<f64> {
        let (n, p) = values.dim();
        DataArray::from_matrix(values, ["sample", "feature"], [Coordinate::range(n), Coordinate::range(p)]).unwrap()
    }

    #[test]
    fn norms_multiply_to_singular_values() {
        let x1 = field(array![[1.0, 0.0, -1.0], [0.5, 1.0, 0.0], [-1.0, -0.5, 0.5], [-0.5, -0.5, 0.5]]);
        let x2 = field(array![[0.8, -0.2], [0.1, 0.9], [-0.6, -0.4], [-0.3, -0.3]]);
        let mut container = DataContainer::new();
        cross_decompose(x1, x2, &ModelParams::with_n_modes(2), &mut container).unwrap();
        let s = container.get::<f64>("singular_values").unwrap();
        let n1 = container.get::<f64>("norm1").unwrap();
        let n2 = container.get::<f64>("norm2").unwrap();
        for i in 0..2 {
            assert_abs_diff_eq!(n1.values()[[i]] * n2.values()[[i]], s.values()[[i]], epsilon = 1e-12);
        }
        let fraction = container.get::<f64>("squared_covariance_fraction").unwrap();
        assert!(fraction.values().sum() <= 1.0 + 1e-12);
    }

    #[test]
    fn too_many_modes_for_the_smaller_field() {
        let x1 = field(array![[1.0, 0.0, -1.0], [0.5, 1.0, 0.0], [-1.5, -1.0, 1.0]]);
        let x2 = field(array![[1.0], [0.0], [-1.0]]);
        let mut container = DataContainer::new();
        let err = cross_decompose(x1, x2, &ModelParams::with_n_modes(2), &mut container);
        assert!(matches!(err, Err(EofError::InvalidValue(_))));
    }

    #[test]
    fn modes_are_bounded_by_the_sample_count() {
        let x1 = field(Array2::from_shape_fn((3, 8), |(t, x)| ((t * 5 + x) as f64 * 0.7).sin()));
        let x2 = field(Array2::from_shape_fn((3, 6), |(t, y)| ((t * 3 + y) as f64 * 0.4).cos()));
        let mut container = DataContainer::new();
        let err = cross_decompose(x1, x2, &ModelParams::with_n_modes(4), &mut container);
        assert!(matches!(err, Err(EofError::InvalidValue(_))));
    }

    #[test]
    fn full_rank_pca_step_leaves_the_solution_unchanged() {
        let x1 = Array2::from_shape_fn((12, 3), |(t, x)| ((t * (x + 2)) as f64 * 0.29).sin() + 0.1 * x as f64);
        let x2 = Array2::from_shape_fn((12, 3), |(t, y)| ((t + 3 * y) as f64 * 0.41).cos());
        let fit = |n_pca_modes| {
            let params = ModelParams {
                n_pca_modes,
                solver: crate::decomposer::Solver::Full,
                ..ModelParams::with_n_modes(2)
            };
            let mut container = DataContainer::new();
            cross_decompose(field(x1.clone()), field(x2.clone()), &params, &mut container).unwrap();
            container
        };
        let direct = fit(None);
        let reduced = fit(Some(3));
        for name in ["singular_values", "total_squared_covariance"] {
            let a = direct.get::<f64>(name).unwrap().values();
            let b = reduced.get::<f64>(name).unwrap().values();
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
            }
        }
        for name in ["components1", "components2", "scores1", "scores2"] {
            let a = direct.get::<f64>(name).unwrap().values();
            let b = reduced.get::<f64>(name).unwrap().values();
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(x.abs(), y.abs(), epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn pca_modes_are_bounded_by_each_field() {
        let x1 = field(Array2::from_shape_fn((10, 5), |(t, x)| ((t * 7 + x) as f64 * 0.3).sin()));
        let x2 = field(Array2::from_shape_fn((10, 2), |(t, y)| ((t + y) as f64 * 0.5).cos()));
        let params = ModelParams {
            n_pca_modes: Some(3),
            ..ModelParams::with_n_modes(2)
        };
        let mut container = DataContainer::new();
        assert!(matches!(
            cross_decompose(x1, x2, &params, &mut container),
            Err(EofError::InvalidValue(_))
        ));
    }

    #[test]
    fn field_entry_names() {
        assert_eq!(Field::First.entry("scores"), "scores1");
        assert_eq!(Field::Second.entry("norm"), "norm2");
    }
}
