// src/models/base.rs

use super::{ModeSelector, ModelParams};
use crate::data_array::{conj_t, Coordinate, DataArray, DataObject, Element, MODE_DIM};
use crate::data_container::DataContainer;
use crate::decomposer::{Decomposer, TruncatedSvd};
use crate::error::{EofError, Result};
use crate::persistence::{ModelTree, Persist};
use crate::preprocessing::Preprocessor;
use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

const ATTR_ALGORITHM: &str = "algorithm";

/// The model-specific part of a single-field decomposition.
///
/// Implementations work on the sanitized `(sample, feature)` matrix produced by the
/// preprocessor; [`DecompositionModel`] handles everything around it.
pub trait DecompositionAlgorithm: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Element type of components and scores.
    type Elem: Element;

    /// Model name written to saved files.
    const NAME: &'static str;

    /// Decomposes `data` and fills `container` with the result entries.
    fn fit_algorithm(&self, data: DataArray<f64>, params: &ModelParams, container: &mut DataContainer) -> Result<()>;

    /// Un-normalized `(sample, mode)` projections of preprocessed data.
    fn transform_algorithm(
        &self,
        data: &DataArray<f64>,
        params: &ModelParams,
        container: &DataContainer,
    ) -> Result<DataArray<Self::Elem>>;

    /// Real `(sample, feature)` reconstruction from the selected zero-based modes.
    fn inverse_transform_algorithm(
        &self,
        params: &ModelParams,
        container: &DataContainer,
        modes: &[usize],
    ) -> Result<DataArray<f64>> {
        let scores = container.get::<Self::Elem>("scores")?;
        let components = container.get::<Self::Elem>("components")?;
        reconstruct(scores, components, params, modes)
    }
}

/// Fails if the sanitized matrix still holds NaNs.
pub(crate) fn reject_missing(data: &DataArray<f64>) -> Result<()> {
    let missing = data.values().iter().filter(|v| v.is_nan()).count();
    if missing > 0 {
        return Err(EofError::InvalidValue(format!(
            "input holds {missing} isolated NaN values; only features or samples that are NaN throughout can be handled"
        )));
    }
    Ok(())
}

pub(crate) fn mode_vector(values: Array1<f64>, modes: &Coordinate) -> Result<DataArray<f64>> {
    DataArray::from_vector(values, MODE_DIM, modes.clone())
}

/// Divides every mode of `scores` by the matching entry of `norms`.
pub(crate) fn divide_modes<A: Element>(scores: &DataArray<A>, norms: &DataArray<f64>) -> Result<DataArray<A>> {
    let axis = scores.require_axis(MODE_DIM)?;
    if norms.len() != scores.shape()[axis] {
        return Err(EofError::Shape(format!(
            "{} norms for {} modes",
            norms.len(),
            scores.shape()[axis]
        )));
    }
    let degenerate = norms.values().iter().enumerate().find(|(_, &n)| !(n > 0.0 && n.is_finite()));
    if let Some((k, norm)) = degenerate {
        return Err(EofError::InvalidValue(format!(
            "norm of mode {} is {norm}; scores cannot be normalized by it",
            k + 1
        )));
    }
    let mut values = scores.values().clone();
    for (mut lane, &norm) in values.axis_iter_mut(Axis(axis)).zip(norms.values().iter()) {
        lane.mapv_inplace(|v| v.div_real(norm));
    }
    scores.with_values(values)
}

/// `(sample, mode)` projections of `data` onto `(feature, mode)` components.
pub(crate) fn project<A: Element>(data: &DataArray<A>, components: &DataArray<A>, params: &ModelParams) -> Result<DataArray<A>> {
    let sample = params.sample_name.as_str();
    let feature = params.feature_name.as_str();
    let x = data.matrix_as(sample, feature)?;
    let v = components.matrix_as(feature, MODE_DIM)?;
    if x.ncols() != v.nrows() {
        return Err(EofError::Shape(format!(
            "data has {} features, components have {}",
            x.ncols(),
            v.nrows()
        )));
    }
    let samples = data.coord(sample).cloned().unwrap_or_default();
    let modes = components
        .coord(MODE_DIM)
        .cloned()
        .unwrap_or_else(|| Coordinate::modes(v.ncols()));
    DataArray::from_matrix(x.dot(&v), [sample, MODE_DIM], [samples, modes])
}

/// Real part of `scores[:, modes] · conj(components[:, modes])ᵀ`.
pub(crate) fn reconstruct<A: Element>(
    scores: &DataArray<A>,
    components: &DataArray<A>,
    params: &ModelParams,
    modes: &[usize],
) -> Result<DataArray<f64>> {
    let sample = params.sample_name.as_str();
    let feature = params.feature_name.as_str();
    let scores = scores.select(MODE_DIM, modes)?;
    let components = components.select(MODE_DIM, modes)?;
    let t = scores.matrix_as(sample, MODE_DIM)?;
    let v = components.matrix_as(feature, MODE_DIM)?;
    let rebuilt: Array2<f64> = t.dot(&conj_t(&v.view())).mapv(|z| z.re());
    DataArray::from_matrix(
        rebuilt,
        [sample, feature],
        [
            scores.coord(sample).cloned().unwrap_or_default(),
            components.coord(feature).cloned().unwrap_or_default(),
        ],
    )
}

/// The SVD of one matrix, run at most once and shared by every entry derived from it.
pub(crate) struct LazySvd<A> {
    matrix: Array2<A>,
    decomposer: Decomposer,
    result: OnceCell<TruncatedSvd<A>>,
}

impl<A: Element> LazySvd<A> {
    pub(crate) fn new(matrix: Array2<A>, decomposer: Decomposer) -> Self {
        Self {
            matrix,
            decomposer,
            result: OnceCell::new(),
        }
    }

    pub(crate) fn get(&self) -> Result<&TruncatedSvd<A>> {
        self.result.get_or_try_init(|| self.decomposer.fit(self.matrix.view()))
    }

    pub(crate) fn matrix(&self) -> &Array2<A> {
        &self.matrix
    }
}

/// Runs the truncated SVD of a `(sample, feature)` matrix and stores the EOF entries.
///
/// With `params.compute == false` every entry is a deferred plan; the SVD itself
/// runs once, when the first of them is needed.
pub(crate) fn decompose<A: Element>(data: DataArray<A>, params: &ModelParams, container: &mut DataContainer) -> Result<()> {
    let sample = params.sample_name.clone();
    let feature = params.feature_name.clone();
    let matrix = data.matrix_as(&sample, &feature)?;
    let (n_samples, n_features) = matrix.dim();
    if n_samples < 2 {
        return Err(EofError::InvalidValue(format!(
            "at least two valid samples are needed, got {n_samples}"
        )));
    }
    let decomposer = params.decomposer();
    decomposer.check_rank(n_samples, n_features)?;

    let samples = data.coord(&sample).cloned().unwrap_or_default();
    let features = data.coord(&feature).cloned().unwrap_or_default();
    let modes = Coordinate::modes(params.n_modes);
    let dof = (n_samples - 1) as f64;
    let eager = params.compute;

    container.add("input_data", data, false);
    let svd = Arc::new(LazySvd::new(matrix, decomposer));

    let (job, f_name, f_coord, m) = (Arc::clone(&svd), feature, features, modes.clone());
    container.add_computed("components", eager, move || {
        let svd = job.get()?;
        DataArray::from_matrix(svd.v.clone(), [f_name.as_str(), MODE_DIM], [f_coord.clone(), m.clone()])
    })?;

    let (job, s_name, s_coord, m) = (Arc::clone(&svd), sample, samples, modes.clone());
    container.add_computed("scores", eager, move || {
        let svd = job.get()?;
        let scores = &svd.u * &svd.s.mapv(A::from_real);
        DataArray::from_matrix(scores, [s_name.as_str(), MODE_DIM], [s_coord.clone(), m.clone()])
    })?;

    let (job, m) = (Arc::clone(&svd), modes.clone());
    container.add_computed("norms", eager, move || mode_vector(job.get()?.s.clone(), &m))?;

    let (job, m) = (Arc::clone(&svd), modes.clone());
    container.add_computed("singular_values", eager, move || mode_vector(job.get()?.s.clone(), &m))?;

    let (job, m) = (Arc::clone(&svd), modes.clone());
    container.add_computed("explained_variance", eager, move || {
        mode_vector(job.get()?.s.mapv(|s| s * s / dof), &m)
    })?;

    let job = Arc::clone(&svd);
    container.add_computed("total_variance", eager, move || {
        let total = job.matrix().iter().map(|v| v.square()).sum::<f64>() / dof;
        Ok(DataArray::scalar(total))
    })?;

    let (job, m) = (Arc::clone(&svd), modes);
    container.add_computed("explained_variance_ratio", eager, move || {
        let total = job.matrix().iter().map(|v| v.square()).sum::<f64>() / dof;
        mode_vector(job.get()?.s.mapv(|s| s * s / dof / total), &m)
    })?;
    Ok(())
}

/// A single-field decomposition: preprocessing, result storage and persistence
/// around a [`DecompositionAlgorithm`].
#[derive(Debug)]
pub struct DecompositionModel<D: DecompositionAlgorithm> {
    params: ModelParams,
    algorithm: D,
    preprocessor: Preprocessor,
    data: DataContainer,
    fitted: bool,
}

impl<D: DecompositionAlgorithm + Default> DecompositionModel<D> {
    pub fn new(params: ModelParams) -> Self {
        Self::with_algorithm(params, D::default())
    }
}

impl<D: DecompositionAlgorithm> DecompositionModel<D> {
    pub fn with_algorithm(params: ModelParams, algorithm: D) -> Self {
        Self {
            preprocessor: Preprocessor::new(params.preprocessor_params()),
            params,
            algorithm,
            data: DataContainer::new(),
            fitted: false,
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn algorithm(&self) -> &D {
        &self.algorithm
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// The raw result entries in stacked `(sample, feature, mode)` form.
    pub fn data(&self) -> &DataContainer {
        &self.data
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn n_modes(&self) -> usize {
        self.params.n_modes
    }

    fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(EofError::NotFitted(D::NAME))
        }
    }

    /// Fits the model. `dim` names the sample dimensions; all other axes are features.
    ///
    /// # Errors
    /// - [`EofError::Configuration`] for invalid parameters, such as coslat weighting
    ///   without a latitude axis.
    /// - [`EofError::Shape`] for empty input or a sample dim missing from the data.
    /// - [`EofError::InvalidValue`] when `n_modes` exceeds the rank bound or isolated
    ///   NaNs remain after sanitizing.
    pub fn fit(&mut self, data: &DataObject<f64>, dim: &[&str], weights: Option<&DataObject<f64>>) -> Result<()> {
        self.params.check()?;
        let start = Instant::now();
        let sample_dims: Vec<String> = dim.iter().map(|d| d.to_string()).collect();
        let mut preprocessor = Preprocessor::new(self.params.preprocessor_params());
        let transformed = preprocessor.fit_transform(data, &sample_dims, weights)?;
        reject_missing(&transformed.data)?;

        let mut container = DataContainer::new();
        self.algorithm.fit_algorithm(transformed.data, &self.params, &mut container)?;
        self.preprocessor = preprocessor;
        self.data = container;
        self.fitted = true;

        let message = format!(
            "Fitted {} with {} modes in {:?} (compute = {})",
            D::NAME,
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

    /// Fits the model and returns the scores of the training data.
    pub fn fit_transform(
        &mut self,
        data: &DataObject<f64>,
        dim: &[&str],
        weights: Option<&DataObject<f64>>,
        normalized: bool,
    ) -> Result<DataArray<D::Elem>> {
        self.fit(data, dim, weights)?;
        self.scores(normalized)
    }

    /// Projects new data onto the fitted components. Returns dims `(mode, *sample_dims)`.
    pub fn transform(&self, data: &DataObject<f64>, normalized: bool) -> Result<DataArray<D::Elem>> {
        self.check_fitted()?;
        let transformed = self.preprocessor.transform(data)?;
        reject_missing(&transformed.data)?;
        let mut projections = self
            .algorithm
            .transform_algorithm(&transformed.data, &self.params, &self.data)?;
        if normalized {
            projections = divide_modes(&projections, self.data.get::<f64>("norms")?)?;
        }
        self.preprocessor
            .inverse_transform_scores_unseen(&projections, &transformed.context)
    }

    /// Reconstructs the input from the selected modes, in the input layout and units.
    pub fn inverse_transform(&self, modes: impl Into<ModeSelector>) -> Result<DataObject<f64>> {
        self.check_fitted()?;
        let selection = modes.into().resolve(self.params.n_modes)?;
        let rebuilt = self
            .algorithm
            .inverse_transform_algorithm(&self.params, &self.data, &selection)?;
        self.preprocessor.inverse_transform_data(&rebuilt)
    }

    /// Components with dims `(mode, *feature_dims)`, in the input layout.
    pub fn components(&self) -> Result<DataObject<D::Elem>> {
        self.check_fitted()?;
        let components = self.data.get::<D::Elem>("components")?;
        self.preprocessor.inverse_transform_components(components)
    }

    /// Scores with dims `(mode, *sample_dims)`; divided by the mode norms when `normalized`.
    pub fn scores(&self, normalized: bool) -> Result<DataArray<D::Elem>> {
        self.check_fitted()?;
        let scores = self.data.get::<D::Elem>("scores")?;
        if normalized {
            let scaled = divide_modes(scores, self.data.get::<f64>("norms")?)?;
            self.preprocessor.inverse_transform_scores(&scaled)
        } else {
            self.preprocessor.inverse_transform_scores(scores)
        }
    }

    fn entry(&self, name: &str) -> Result<DataArray<f64>> {
        self.check_fitted()?;
        Ok(self.data.get::<f64>(name)?.clone())
    }

    pub fn singular_values(&self) -> Result<DataArray<f64>> {
        self.entry("singular_values")
    }

    pub fn explained_variance(&self) -> Result<DataArray<f64>> {
        self.entry("explained_variance")
    }

    pub fn explained_variance_ratio(&self) -> Result<DataArray<f64>> {
        self.entry("explained_variance_ratio")
    }

    pub fn total_variance(&self) -> Result<f64> {
        self.entry("total_variance")?
            .item()
            .ok_or_else(|| EofError::InvalidValue("total_variance is not a scalar".to_string()))
    }

    /// Materializes deferred results. A no-op for eagerly fitted models.
    pub fn compute(&self, verbose: bool) -> Result<()> {
        self.check_fitted()?;
        self.data.compute(verbose)
    }

    /// Constructor parameters, including the algorithm's own settings.
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

impl<D: DecompositionAlgorithm> Persist for DecompositionModel<D> {
    fn serialize(&self, save_data: bool) -> Result<ModelTree> {
        self.check_fitted()?;
        let mut tree = ModelTree::new(D::NAME, &self.params)?;
        tree.set_attr(ATTR_ALGORITHM, &self.algorithm)?;
        tree.data_vars = self.data.snapshot(save_data)?;
        tree.preprocessors.push(self.preprocessor.clone());
        Ok(tree)
    }

    fn deserialize(mut tree: ModelTree) -> Result<Self> {
        tree.expect_model(D::NAME)?;
        let params: ModelParams = tree.params()?;
        let algorithm: D = tree.attr(ATTR_ALGORITHM)?;
        if tree.preprocessors.len() != 1 {
            return Err(EofError::Serialization(format!(
                "{} stores one preprocessor, found {}",
                D::NAME,
                tree.preprocessors.len()
            )));
        }
        let preprocessor = tree.preprocessors.remove(0);
        let data = tree.restore_container();
        Ok(Self {
            params,
            algorithm,
            preprocessor,
            data,
            fitted: true,
        })
    }
}
