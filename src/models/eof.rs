// src/models/eof.rs

use super::base::{decompose, project, DecompositionAlgorithm, DecompositionModel};
use super::ModelParams;
use crate::data_array::{DataArray, DataObject};
use crate::data_container::DataContainer;
use crate::error::{EofError, Result};
use crate::hilbert::{hilbert_columns, Padding};
use ndarray_linalg::c64;
use serde::{Deserialize, Serialize};

/// Default decay of the exponential padding, as a fraction of the series length.
pub const DEFAULT_DECAY_FACTOR: f64 = 0.2;

/// Classic EOF analysis (PCA over the feature axis).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EofAlgorithm;

impl DecompositionAlgorithm for EofAlgorithm {
    type Elem = f64;
    const NAME: &'static str = "Eof";

    fn fit_algorithm(&self, data: DataArray<f64>, params: &ModelParams, container: &mut DataContainer) -> Result<()> {
        decompose(data, params, container)
    }

    fn transform_algorithm(
        &self,
        data: &DataArray<f64>,
        params: &ModelParams,
        container: &DataContainer,
    ) -> Result<DataArray<f64>> {
        project(data, container.get::<f64>("components")?, params)
    }
}

pub type Eof = DecompositionModel<EofAlgorithm>;

/// EOF analysis of the analytic signal of every feature series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexEofAlgorithm {
    pub padding: Padding,
    pub decay_factor: f64,
}

impl Default for ComplexEofAlgorithm {
    fn default() -> Self {
        Self {
            padding: Padding::Exponential,
            decay_factor: DEFAULT_DECAY_FACTOR,
        }
    }
}

/// Replaces every column of a `(sample, feature)` matrix by its analytic signal.
pub(crate) fn hilbert_extend(
    data: &DataArray<f64>,
    params: &ModelParams,
    padding: Padding,
    decay_factor: f64,
) -> Result<DataArray<c64>> {
    if padding == Padding::Exponential && !(decay_factor > 0.0 && decay_factor.is_finite()) {
        return Err(EofError::Configuration(format!(
            "decay_factor must be a positive number, got {decay_factor}"
        )));
    }
    let sample = params.sample_name.as_str();
    let feature = params.feature_name.as_str();
    let matrix = data.matrix_as(sample, feature)?;
    let extended = hilbert_columns(matrix.view(), padding, decay_factor);
    DataArray::from_matrix(
        extended,
        [sample, feature],
        [
            data.coord(sample).cloned().unwrap_or_default(),
            data.coord(feature).cloned().unwrap_or_default(),
        ],
    )
}

impl DecompositionAlgorithm for ComplexEofAlgorithm {
    type Elem = c64;
    const NAME: &'static str = "ComplexEof";

    fn fit_algorithm(&self, data: DataArray<f64>, params: &ModelParams, container: &mut DataContainer) -> Result<()> {
        let extended = hilbert_extend(&data, params, self.padding, self.decay_factor)?;
        decompose(extended, params, container)
    }

    fn transform_algorithm(&self, _: &DataArray<f64>, _: &ModelParams, _: &DataContainer) -> Result<DataArray<c64>> {
        Err(EofError::NotImplemented(
            "ComplexEof cannot project unseen data: the analytic signal depends on the training series",
        ))
    }
}

pub type ComplexEof = DecompositionModel<ComplexEofAlgorithm>;

impl DecompositionModel<ComplexEofAlgorithm> {
    pub fn with_padding(params: ModelParams, padding: Padding, decay_factor: f64) -> Self {
        Self::with_algorithm(params, ComplexEofAlgorithm { padding, decay_factor })
    }

    /// `|components|`, in the input layout.
    pub fn components_amplitude(&self) -> Result<DataObject<f64>> {
        self.components()?.try_map(|a| Ok(a.mapv(|z| z.norm())))
    }

    /// Phase of the components in `[-pi, pi]`.
    pub fn components_phase(&self) -> Result<DataObject<f64>> {
        self.components()?.try_map(|a| Ok(a.mapv(|z| z.arg())))
    }

    pub fn scores_amplitude(&self, normalized: bool) -> Result<DataArray<f64>> {
        Ok(self.scores(normalized)?.mapv(|z| z.norm()))
    }

    pub fn scores_phase(&self, normalized: bool) -> Result<DataArray<f64>> {
        Ok(self.scores(normalized)?.mapv(|z| z.arg()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::Coordinate;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn wave() -> DataObject<f64> {
        let values = Array2::from_shape_fn((40, 4), |(t, x)| (t as f64 * 0.4 - x as f64 * 0.7).sin());
        DataArray::new(values, &["time", "x"], vec![Coordinate::range(40), Coordinate::range(4)])
            .unwrap()
            .into()
    }

    #[test]
    fn propagating_wave_is_captured_by_one_complex_mode() {
        let mut model = ComplexEof::new(ModelParams::with_n_modes(2));
        model.fit(&wave(), &["time"], None).unwrap();
        let ratio = model.explained_variance_ratio().unwrap();
        assert!(ratio.values()[[0]] > 0.8);
        let amplitude = model.components_amplitude().unwrap().into_array().unwrap();
        assert!(amplitude.values().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn complex_transform_is_not_implemented() {
        let mut model = ComplexEof::new(ModelParams::with_n_modes(1));
        model.fit(&wave(), &["time"], None).unwrap();
        assert!(matches!(model.transform(&wave(), true), Err(EofError::NotImplemented(_))));
    }

    #[test]
    fn real_transform_of_training_data_matches_scores() {
        let mut model = Eof::new(ModelParams::with_n_modes(2));
        model.fit(&wave(), &["time"], None).unwrap();
        let projected = model.transform(&wave(), false).unwrap();
        let scores = model.scores(false).unwrap();
        for (a, b) in projected.values().iter().zip(scores.values().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn non_positive_decay_factor_is_a_configuration_error() {
        let mut model = ComplexEof::with_padding(ModelParams::with_n_modes(1), Padding::Exponential, 0.0);
        assert!(matches!(model.fit(&wave(), &["time"], None), Err(EofError::Configuration(_))));
    }
}
