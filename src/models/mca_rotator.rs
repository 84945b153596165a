// src/models/mca_rotator.rs

use super::base::reconstruct;
use super::cross::{CrossDecompositionAlgorithm, CrossDecompositionModel, Field};
use super::mca::{ComplexMcaAlgorithm, McaAlgorithm};
use super::ModeSelector;
use crate::data_array::{conj_t, Coordinate, DataArray, DataObject, Element, MODE_DIM};
use crate::data_container::DataContainer;
use crate::error::{EofError, Result};
use crate::linalg_backends::{BackendInverse, LinAlgBackendProvider};
use crate::persistence::{ModelTree, Persist};
use crate::rotation::promax;
use log::{debug, info};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Second mode axis of the rotation matrix.
const ROTATION_DIM: &str = "mode1";

/// Settings of a Promax rotation of an MCA solution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotatorParams {
    /// Number of leading modes to rotate; at least two.
    pub n_modes: usize,
    /// Promax power. `1.0` gives an orthogonal Varimax rotation.
    pub power: f64,
    pub max_iter: usize,
    pub rtol: f64,
    /// Weight the combined loadings by the singular values instead of their square
    /// roots. Conserves squared covariance under rotation.
    pub squared_loadings: bool,
    pub compute: bool,
}

impl Default for RotatorParams {
    fn default() -> Self {
        Self {
            n_modes: 10,
            power: 1.0,
            max_iter: 1000,
            rtol: 1e-8,
            squared_loadings: false,
            compute: true,
        }
    }
}

impl RotatorParams {
    pub fn with_n_modes(n_modes: usize) -> Self {
        Self {
            n_modes,
            ..Self::default()
        }
    }
}

/// Everything the rotation of one fitted model produces, in stacked form.
struct Rotated<A> {
    components: [DataArray<A>; 2],
    scores: [DataArray<A>; 2],
    norms: [DataArray<f64>; 2],
    explained_variance: DataArray<f64>,
    squared_covariance_fraction: DataArray<f64>,
    rotation_matrix: DataArray<A>,
    mode_signs: DataArray<f64>,
    sort_order: DataArray<f64>,
    loading_scaling: DataArray<f64>,
}

/// Column L2 norms.
fn column_norms<A: Element>(matrix: &Array2<A>) -> Array1<f64> {
    matrix.map_axis(Axis(0), |col| col.iter().map(|v| v.square()).sum::<f64>().sqrt())
}

fn scale_columns<A: Element>(matrix: &mut Array2<A>, factors: &Array1<f64>) {
    for (mut col, &f) in matrix.axis_iter_mut(Axis(1)).zip(factors.iter()) {
        col.mapv_inplace(|v| v.mul_real(f));
    }
}

/// Moves column `order[k]` to position `k` and multiplies it by `signs[k]`.
fn sort_and_sign<A: Element>(matrix: &Array2<A>, order: &[usize], signs: &Array1<f64>) -> Array2<A> {
    let mut sorted = matrix.select(Axis(1), order);
    scale_columns(&mut sorted, signs);
    sorted
}

/// Leading `n` columns of a stacked `(row, mode)` entry.
fn leading_modes<A: Element>(entry: &DataArray<A>, row: &str, n: usize) -> Result<Array2<A>> {
    let matrix = entry.matrix_as(row, MODE_DIM)?;
    Ok(matrix.slice(s![.., ..n]).to_owned())
}

/// `R⁻ᴴ` of a rotation matrix.
fn inverse_conj_transpose<A: Element>(rotation: &Array2<A>) -> Result<Array2<A>> {
    let inverse = LinAlgBackendProvider::<A>::new().inverse(rotation)?;
    Ok(conj_t(&inverse.view()))
}

/// `1 / v` for every entry, failing on zero or non-finite values.
fn reciprocals(values: &Array1<f64>, what: &str) -> Result<Array1<f64>> {
    if let Some(k) = values.iter().position(|&v| !(v > 0.0 && v.is_finite())) {
        return Err(EofError::InvalidValue(format!(
            "{what} of mode {} is {}; the mode cannot be normalized",
            k + 1,
            values[k]
        )));
    }
    Ok(values.mapv(|v| 1.0 / v))
}

/// `+1` or `-1`: the sign of the real part of the largest-magnitude value. The first
/// of several equal maxima wins.
fn peak_sign<A: Element>(values: impl IntoIterator<Item = A>) -> f64 {
    let peak = values.into_iter().fold(None, |best: Option<A>, v| match best {
        Some(b) if b.abs() >= v.abs() => Some(b),
        _ => Some(v),
    });
    match peak {
        Some(p) if p.re() < 0.0 => -1.0,
        _ => 1.0,
    }
}

/// Scores carried into the rotated frame: multiply by `R⁻ᴴ`, then sort and fix signs.
fn rotate_scores<A: Element>(
    scores: &Array2<A>,
    rotation_inv_h: &Array2<A>,
    order: &[usize],
    signs: &Array1<f64>,
) -> Array2<A> {
    sort_and_sign(&scores.dot(rotation_inv_h), order, signs)
}

/// The rotation of one model, run at most once.
struct RotationJob<C: CrossDecompositionAlgorithm> {
    model: Arc<CrossDecompositionModel<C>>,
    params: RotatorParams,
    result: OnceCell<Rotated<C::Elem>>,
}

impl<C: CrossDecompositionAlgorithm> RotationJob<C> {
    fn get(&self) -> Result<&Rotated<C::Elem>> {
        self.result.get_or_try_init(|| self.run())
    }

    fn run(&self) -> Result<Rotated<C::Elem>> {
        let n = self.params.n_modes;
        let data = self.model.data();
        let model_params = self.model.params();
        let sample = model_params.sample_name.as_str();
        let feature = model_params.feature_name.as_str();
        let modes = Coordinate::modes(n);

        let singular_values = data.get::<f64>("singular_values")?.values().iter().take(n).copied();
        let singular_values = Array1::from_iter(singular_values);
        let scaling = if self.params.squared_loadings {
            singular_values
        } else {
            singular_values.mapv(f64::sqrt)
        };

        let components1 = data.get::<C::Elem>("components1")?;
        let components2 = data.get::<C::Elem>("components2")?;
        let v1 = leading_modes(components1, feature, n)?;
        let v2 = leading_modes(components2, feature, n)?;
        let n_features1 = v1.nrows();
        let mut loadings = concatenate![Axis(0), v1, v2];
        scale_columns(&mut loadings, &scaling);

        let rotation = promax(loadings.view(), self.params.power, self.params.max_iter, self.params.rtol)?;
        let rotated = &rotation.loadings;
        let mut rotated1 = rotated.slice(s![..n_features1, ..]).to_owned();
        let mut rotated2 = rotated.slice(s![n_features1.., ..]).to_owned();
        let raw_norm1 = column_norms(&rotated1);
        let raw_norm2 = column_norms(&rotated2);
        scale_columns(&mut rotated1, &reciprocals(&raw_norm1, "rotated loading norm of the first field")?);
        scale_columns(&mut rotated2, &reciprocals(&raw_norm2, "rotated loading norm of the second field")?);
        let (norm1, norm2) = if self.params.squared_loadings {
            (raw_norm1.mapv(f64::sqrt), raw_norm2.mapv(f64::sqrt))
        } else {
            (raw_norm1, raw_norm2)
        };
        let explained_variance = &norm1 * &norm2;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            explained_variance[b]
                .partial_cmp(&explained_variance[a])
                .unwrap_or(Ordering::Equal)
        });
        let signs = Array1::from_iter(order.iter().map(|&j| peak_sign(rotated.column(j).iter().copied())));

        let rotation_inv_h = inverse_conj_transpose(&rotation.rotation_matrix)?;
        let scores1 = leading_modes(data.get::<C::Elem>("scores1")?, sample, n)?;
        let scores2 = leading_modes(data.get::<C::Elem>("scores2")?, sample, n)?;
        let samples = data
            .get::<C::Elem>("scores1")?
            .coord(sample)
            .cloned()
            .unwrap_or_default();

        let total = data
            .get::<f64>("total_squared_covariance")?
            .item()
            .ok_or_else(|| EofError::InvalidValue("total_squared_covariance is not a scalar".to_string()))?;
        let sorted_variance = explained_variance.select(Axis(0), &order);
        let fraction = sorted_variance.mapv(|ev| ev * ev / total);
        let feature_coord = |entry: &DataArray<C::Elem>| entry.coord(feature).cloned().unwrap_or_default();
        let matrix = |values: Array2<C::Elem>, row: &str, coord: Coordinate| {
            DataArray::from_matrix(values, [row, MODE_DIM], [coord, modes.clone()])
        };
        let vector = |values: Array1<f64>| DataArray::from_vector(values, MODE_DIM, modes.clone());

        Ok(Rotated {
            components: [
                matrix(sort_and_sign(&rotated1, &order, &signs), feature, feature_coord(components1))?,
                matrix(sort_and_sign(&rotated2, &order, &signs), feature, feature_coord(components2))?,
            ],
            scores: [
                matrix(rotate_scores(&scores1, &rotation_inv_h, &order, &signs), sample, samples.clone())?,
                matrix(rotate_scores(&scores2, &rotation_inv_h, &order, &signs), sample, samples)?,
            ],
            norms: [vector(norm1.select(Axis(0), &order))?, vector(norm2.select(Axis(0), &order))?],
            explained_variance: vector(sorted_variance)?,
            squared_covariance_fraction: vector(fraction)?,
            rotation_matrix: DataArray::from_matrix(
                rotation.rotation_matrix,
                [MODE_DIM, ROTATION_DIM],
                [modes.clone(), modes.clone()],
            )?,
            mode_signs: vector(signs)?,
            sort_order: vector(order.iter().map(|&i| i as f64).collect())?,
            loading_scaling: vector(scaling)?,
        })
    }
}

/// Promax rotation of a fitted MCA or complex MCA model.
///
/// The rotator keeps a shared handle on the model it rotates and only reads from it;
/// all rotated results live in the rotator's own container.
#[derive(Debug)]
pub struct McaRotator<C: CrossDecompositionAlgorithm> {
    params: RotatorParams,
    model: Option<Arc<CrossDecompositionModel<C>>>,
    data: DataContainer,
}

pub type ComplexMcaRotator = McaRotator<ComplexMcaAlgorithm>;

impl<C: CrossDecompositionAlgorithm> McaRotator<C> {
    pub fn new(params: RotatorParams) -> Self {
        Self {
            params,
            model: None,
            data: DataContainer::new(),
        }
    }

    pub fn params(&self) -> &RotatorParams {
        &self.params
    }

    pub fn data(&self) -> &DataContainer {
        &self.data
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn fitted_model(&self) -> Result<&CrossDecompositionModel<C>> {
        self.model.as_deref().ok_or(EofError::NotFitted("McaRotator"))
    }

    /// The rotated model.
    pub fn model(&self) -> Option<&Arc<CrossDecompositionModel<C>>> {
        self.model.as_ref()
    }

    /// Rotates the leading `n_modes` modes of `model`.
    ///
    /// # Errors
    /// - [`EofError::Configuration`] when fewer than two modes are to be rotated.
    /// - [`EofError::NotFitted`] for an unfitted model.
    /// - [`EofError::InvalidValue`] when `n_modes` exceeds the modes of the model.
    pub fn fit(&mut self, model: Arc<CrossDecompositionModel<C>>) -> Result<()> {
        let n = self.params.n_modes;
        if n < 2 {
            return Err(EofError::Configuration(format!(
                "rotation needs at least two modes, got n_modes = {n}"
            )));
        }
        model.check_fitted()?;
        if n > model.n_modes() {
            return Err(EofError::InvalidValue(format!(
                "cannot rotate {n} modes of a model with {} modes",
                model.n_modes()
            )));
        }
        let start = Instant::now();
        let job = Arc::new(RotationJob {
            model: Arc::clone(&model),
            params: self.params.clone(),
            result: OnceCell::new(),
        });

        let eager = self.params.compute;
        let mut container = DataContainer::new();
        for (i, field) in [Field::First, Field::Second].into_iter().enumerate() {
            let rotated = Arc::clone(&job);
            container.add_computed(&field.entry("components"), eager, move || {
                Ok(rotated.get()?.components[i].clone())
            })?;
            let rotated = Arc::clone(&job);
            container.add_computed(&field.entry("scores"), eager, move || Ok(rotated.get()?.scores[i].clone()))?;
            let rotated = Arc::clone(&job);
            container.add_computed(&field.entry("norm"), eager, move || Ok(rotated.get()?.norms[i].clone()))?;
        }
        let rotated = Arc::clone(&job);
        container.add_computed("explained_variance", eager, move || {
            Ok(rotated.get()?.explained_variance.clone())
        })?;
        let rotated = Arc::clone(&job);
        container.add_computed("squared_covariance_fraction", eager, move || {
            Ok(rotated.get()?.squared_covariance_fraction.clone())
        })?;
        let rotated = Arc::clone(&job);
        container.add_computed("rotation_matrix", eager, move || Ok(rotated.get()?.rotation_matrix.clone()))?;
        let rotated = Arc::clone(&job);
        container.add_computed("mode_signs", eager, move || Ok(rotated.get()?.mode_signs.clone()))?;
        let rotated = Arc::clone(&job);
        container.add_computed("idx_modes_sorted", eager, move || Ok(rotated.get()?.sort_order.clone()))?;
        let rotated = job;
        container.add_computed("loading_scaling", eager, move || Ok(rotated.get()?.loading_scaling.clone()))?;

        self.data = container;
        self.model = Some(model);
        let message = format!(
            "Rotated {} modes of {} (power = {}) in {:?}",
            n,
            C::NAME,
            self.params.power,
            start.elapsed()
        );
        if self.params.compute {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
        Ok(())
    }

    fn modes_vector(&self, name: &str) -> Result<Array1<f64>> {
        let entry = self.data.get::<f64>(name)?;
        Ok(Array1::from_iter(entry.values().iter().copied()))
    }

    /// Projects new data onto the rotated modes. Results have dims `(mode, *sample_dims)`.
    ///
    /// The data is projected onto the unrotated singular vectors, divided by the square
    /// root of the unrotated singular values, multiplied by `R⁻ᴴ`, then sorted and signed
    /// like the fitted modes.
    ///
    /// # Errors
    /// [`EofError::InvalidValue`] when neither field is given, [`EofError::NotImplemented`]
    /// for complex models.
    pub fn transform(
        &self,
        data1: Option<&DataObject<f64>>,
        data2: Option<&DataObject<f64>>,
    ) -> Result<(Option<DataArray<C::Elem>>, Option<DataArray<C::Elem>>)> {
        let model = self.fitted_model()?;
        if data1.is_none() && data2.is_none() {
            return Err(EofError::InvalidValue("either data1 or data2 must be provided".to_string()));
        }
        let n = self.params.n_modes;
        let sample = model.params().sample_name.as_str();
        let singular_values = model.data().get::<f64>("singular_values")?;
        let singular_values = Array1::from_iter(singular_values.values().iter().take(n).copied());
        let inv_scaling = reciprocals(&singular_values.mapv(f64::sqrt), "square root of the singular value")?;
        let signs = self.modes_vector("mode_signs")?;
        let order: Vec<usize> = self
            .modes_vector("idx_modes_sorted")?
            .iter()
            .map(|&i| i as usize)
            .collect();
        let rotation = self.data.get::<C::Elem>("rotation_matrix")?.matrix_as(MODE_DIM, ROTATION_DIM)?;
        let rotation_inv_h = inverse_conj_transpose(&rotation)?;

        let run = |field: Field, data: Option<&DataObject<f64>>| -> Result<Option<DataArray<C::Elem>>> {
            let Some(data) = data else {
                return Ok(None);
            };
            let (projections, context) = model.project_field(field, data)?;
            let mut leading = leading_modes(&projections, sample, n)?;
            scale_columns(&mut leading, &inv_scaling);
            let rotated = rotate_scores(&leading, &rotation_inv_h, &order, &signs);
            let scores = DataArray::from_matrix(
                rotated,
                [sample, MODE_DIM],
                [
                    projections.coord(sample).cloned().unwrap_or_default(),
                    Coordinate::modes(n),
                ],
            )?;
            model
                .preprocessor(field)
                .inverse_transform_scores_unseen(&scores, &context)
                .map(Some)
        };
        Ok((run(Field::First, data1)?, run(Field::Second, data2)?))
    }

    /// Reconstructs both fields as `scores · conj(components)ᵀ` over the selected rotated
    /// modes, in their input layout and units.
    pub fn inverse_transform(&self, modes: impl Into<ModeSelector>) -> Result<(DataObject<f64>, DataObject<f64>)> {
        let model = self.fitted_model()?;
        let selection = modes.into().resolve(self.params.n_modes)?;
        let params = model.params();
        let rebuild = |field: Field| -> Result<DataObject<f64>> {
            let rebuilt = reconstruct(
                self.data.get::<C::Elem>(&field.entry("scores"))?,
                self.data.get::<C::Elem>(&field.entry("components"))?,
                params,
                &selection,
            )?;
            model.preprocessor(field).inverse_transform_data(&rebuilt)
        };
        Ok((rebuild(Field::First)?, rebuild(Field::Second)?))
    }

    /// Rotated singular vectors with dims `(mode, *feature_dims)`.
    pub fn components(&self) -> Result<(DataObject<C::Elem>, DataObject<C::Elem>)> {
        let model = self.fitted_model()?;
        Ok((
            model
                .preprocessor(Field::First)
                .inverse_transform_components(self.data.get::<C::Elem>("components1")?)?,
            model
                .preprocessor(Field::Second)
                .inverse_transform_components(self.data.get::<C::Elem>("components2")?)?,
        ))
    }

    /// Rotated scores `scores · R⁻ᴴ` of the leading model modes, with dims
    /// `(mode, *sample_dims)`.
    pub fn scores(&self) -> Result<(DataArray<C::Elem>, DataArray<C::Elem>)> {
        let model = self.fitted_model()?;
        Ok((
            model
                .preprocessor(Field::First)
                .inverse_transform_scores(self.data.get::<C::Elem>("scores1")?)?,
            model
                .preprocessor(Field::Second)
                .inverse_transform_scores(self.data.get::<C::Elem>("scores2")?)?,
        ))
    }

    fn entry(&self, name: &str) -> Result<DataArray<f64>> {
        self.fitted_model()?;
        Ok(self.data.get::<f64>(name)?.clone())
    }

    /// `norm1 · norm2` per rotated mode, sorted descending.
    pub fn explained_variance(&self) -> Result<DataArray<f64>> {
        self.entry("explained_variance")
    }

    pub fn squared_covariance_fraction(&self) -> Result<DataArray<f64>> {
        self.entry("squared_covariance_fraction")
    }

    /// Sign applied to each sorted mode.
    pub fn mode_signs(&self) -> Result<DataArray<f64>> {
        self.entry("mode_signs")
    }

    /// `(mode, mode1)` matrix mapping the scaled loadings onto the rotated ones.
    pub fn rotation_matrix(&self) -> Result<DataArray<C::Elem>> {
        self.fitted_model()?;
        Ok(self.data.get::<C::Elem>("rotation_matrix")?.clone())
    }

    /// Materializes the model's deferred results, then the rotated ones.
    pub fn compute(&self, verbose: bool) -> Result<()> {
        self.fitted_model()?.compute(verbose)?;
        self.data.compute(verbose)
    }

    pub fn get_params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.params)?)
    }

    fn tree_name() -> String {
        format!("{}Rotator", C::NAME)
    }
}

impl McaRotator<ComplexMcaAlgorithm> {
    pub fn components_amplitude(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        let (first, second) = self.components()?;
        Ok((
            first.try_map(|a| Ok(a.mapv(|z| z.norm())))?,
            second.try_map(|a| Ok(a.mapv(|z| z.norm())))?,
        ))
    }

    pub fn components_phase(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        let (first, second) = self.components()?;
        Ok((
            first.try_map(|a| Ok(a.mapv(|z| z.arg())))?,
            second.try_map(|a| Ok(a.mapv(|z| z.arg())))?,
        ))
    }

    pub fn scores_amplitude(&self) -> Result<(DataArray<f64>, DataArray<f64>)> {
        let (first, second) = self.scores()?;
        Ok((first.mapv(|z| z.norm()), second.mapv(|z| z.norm())))
    }

    pub fn scores_phase(&self) -> Result<(DataArray<f64>, DataArray<f64>)> {
        let (first, second) = self.scores()?;
        Ok((first.mapv(|z| z.arg()), second.mapv(|z| z.arg())))
    }
}

impl McaRotator<McaAlgorithm> {
    /// A rotator for real MCA solutions.
    pub fn for_mca(params: RotatorParams) -> Self {
        Self::new(params)
    }
}

impl<C: CrossDecompositionAlgorithm> Persist for McaRotator<C> {
    fn serialize(&self, save_data: bool) -> Result<ModelTree> {
        let model = self.fitted_model()?;
        let mut tree = ModelTree::new(&Self::tree_name(), &self.params)?;
        tree.data_vars = self.data.snapshot(save_data)?;
        tree.children.insert("model".to_string(), model.serialize(save_data)?);
        Ok(tree)
    }

    fn deserialize(mut tree: ModelTree) -> Result<Self> {
        tree.expect_model(&Self::tree_name())?;
        let params: RotatorParams = tree.params()?;
        let model = CrossDecompositionModel::<C>::deserialize(tree.take_child("model")?)?;
        let data = tree.restore_container();
        Ok(Self {
            params,
            model: Some(Arc::new(model)),
            data,
        })
    }
}
