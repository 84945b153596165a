// src/models/mca.rs

use super::cross::{
    cross_decompose, project_onto_field, CrossDecompositionAlgorithm, CrossDecompositionModel, Field,
};
use super::eof::{hilbert_extend, DEFAULT_DECAY_FACTOR};
use super::ModelParams;
use crate::data_array::{Coordinate, DataArray, DataObject, MODE_DIM};
use crate::data_container::DataContainer;
use crate::diagnostics::correlation_matrix;
use crate::error::{EofError, Result};
use crate::hilbert::Padding;
use ndarray_linalg::c64;
use serde::{Deserialize, Serialize};

/// Maximum covariance analysis: SVD of the cross-covariance of two fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McaAlgorithm;

impl CrossDecompositionAlgorithm for McaAlgorithm {
    type Elem = f64;
    const NAME: &'static str = "Mca";

    fn fit_algorithm(
        &self,
        data1: DataArray<f64>,
        data2: DataArray<f64>,
        params: &ModelParams,
        container: &mut DataContainer,
    ) -> Result<()> {
        cross_decompose(data1, data2, params, container)
    }

    fn transform_algorithm(
        &self,
        data: &DataArray<f64>,
        field: Field,
        params: &ModelParams,
        container: &DataContainer,
    ) -> Result<DataArray<f64>> {
        project_onto_field(data, field, params, container)
    }
}

pub type Mca = CrossDecompositionModel<McaAlgorithm>;

impl CrossDecompositionModel<McaAlgorithm> {
    /// `(feature, mode)` correlations between the input of `data_field` and the scores of
    /// `score_field`, unstacked to the input layout of `data_field`.
    fn correlation_patterns(&self, data_field: Field, score_field: Field) -> Result<DataObject<f64>> {
        self.check_fitted()?;
        let params = self.params();
        let sample = params.sample_name.as_str();
        let feature = params.feature_name.as_str();
        let data = self.data().get::<f64>(&data_field.entry("input_data"))?;
        let scores = self.data().get::<f64>(&score_field.entry("scores"))?;
        let x = data.matrix_as(sample, feature)?;
        let t = scores.matrix_as(sample, MODE_DIM)?;
        let corr = correlation_matrix(&x.view(), &t.view())
            .ok_or_else(|| EofError::Shape("fields must share at least two samples".to_string()))?;
        let patterns = DataArray::from_matrix(
            corr,
            [feature, MODE_DIM],
            [
                data.coord(feature).cloned().unwrap_or_default(),
                scores
                    .coord(MODE_DIM)
                    .cloned()
                    .unwrap_or_else(|| Coordinate::modes(t.ncols())),
            ],
        )?;
        self.preprocessor(data_field).inverse_transform_components(&patterns)
    }

    /// Correlation of each field with its own scores.
    ///
    /// Needs the training data, so it fails on models loaded with `save_data = false`.
    pub fn homogeneous_patterns(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        Ok((
            self.correlation_patterns(Field::First, Field::First)?,
            self.correlation_patterns(Field::Second, Field::Second)?,
        ))
    }

    /// Correlation of each field with the scores of the other field.
    pub fn heterogeneous_patterns(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        Ok((
            self.correlation_patterns(Field::First, Field::Second)?,
            self.correlation_patterns(Field::Second, Field::First)?,
        ))
    }
}

/// MCA of the analytic signals of both fields.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexMcaAlgorithm {
    pub padding: Padding,
    pub decay_factor: f64,
}

impl Default for ComplexMcaAlgorithm {
    fn default() -> Self {
        Self {
            padding: Padding::Exponential,
            decay_factor: DEFAULT_DECAY_FACTOR,
        }
    }
}

impl CrossDecompositionAlgorithm for ComplexMcaAlgorithm {
    type Elem = c64;
    const NAME: &'static str = "ComplexMca";

    fn fit_algorithm(
        &self,
        data1: DataArray<f64>,
        data2: DataArray<f64>,
        params: &ModelParams,
        container: &mut DataContainer,
    ) -> Result<()> {
        let x1 = hilbert_extend(&data1, params, self.padding, self.decay_factor)?;
        let x2 = hilbert_extend(&data2, params, self.padding, self.decay_factor)?;
        cross_decompose(x1, x2, params, container)
    }

    fn transform_algorithm(
        &self,
        _: &DataArray<f64>,
        _: Field,
        _: &ModelParams,
        _: &DataContainer,
    ) -> Result<DataArray<c64>> {
        Err(EofError::NotImplemented(
            "ComplexMca cannot project unseen data: the analytic signal depends on the training series",
        ))
    }
}

pub type ComplexMca = CrossDecompositionModel<ComplexMcaAlgorithm>;

impl CrossDecompositionModel<ComplexMcaAlgorithm> {
    pub fn with_padding(params: ModelParams, padding: Padding, decay_factor: f64) -> Self {
        Self::with_algorithm(params, ComplexMcaAlgorithm { padding, decay_factor })
    }

    pub fn homogeneous_patterns(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        Err(EofError::NotImplemented("homogeneous patterns are only defined for real MCA"))
    }

    pub fn heterogeneous_patterns(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        Err(EofError::NotImplemented("heterogeneous patterns are only defined for real MCA"))
    }

    pub fn components_amplitude(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        let (first, second) = self.components()?;
        Ok((
            first.try_map(|a| Ok(a.mapv(|z| z.norm())))?,
            second.try_map(|a| Ok(a.mapv(|z| z.norm())))?,
        ))
    }

    /// Phase of the components in `[-pi, pi]`.
    pub fn components_phase(&self) -> Result<(DataObject<f64>, DataObject<f64>)> {
        let (first, second) = self.components()?;
        Ok((
            first.try_map(|a| Ok(a.mapv(|z| z.arg())))?,
            second.try_map(|a| Ok(a.mapv(|z| z.arg())))?,
        ))
    }

    pub fn scores_amplitude(&self, normalized: bool) -> Result<(DataArray<f64>, DataArray<f64>)> {
        let (first, second) = self.scores(normalized)?;
        Ok((first.mapv(|z| z.norm()), second.mapv(|z| z.norm())))
    }

    pub fn scores_phase(&self, normalized: bool) -> Result<(DataArray<f64>, DataArray<f64>)> {
        let (first, second) = self.scores(normalized)?;
        Ok((first.mapv(|z| z.arg()), second.mapv(|z| z.arg())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn fields() -> (DataObject<f64>, DataObject<f64>) {
        let left = Array2::from_shape_fn((30, 5), |(t, x)| ((t * (x + 1)) as f64 * 0.37).sin() + 0.1 * x as f64);
        let right = Array2::from_shape_fn((30, 3), |(t, y)| ((t + 2 * y) as f64 * 0.21).cos());
        let a = DataArray::new(left, &["time", "x"], vec![Coordinate::range(30), Coordinate::range(5)]).unwrap();
        let b = DataArray::new(right, &["time", "y"], vec![Coordinate::range(30), Coordinate::range(3)]).unwrap();
        (a.into(), b.into())
    }

    #[test]
    fn patterns_are_correlations() {
        let (a, b) = fields();
        let mut model = Mca::new(ModelParams::with_n_modes(2));
        model.fit(&a, &b, &["time"], None, None).unwrap();
        let (hom1, hom2) = model.homogeneous_patterns().unwrap();
        let (het1, het2) = model.heterogeneous_patterns().unwrap();
        for pattern in [hom1, hom2, het1, het2] {
            let array = pattern.into_array().unwrap();
            assert_eq!(array.dims()[0], MODE_DIM);
            assert!(array.values().iter().all(|r| (-1.0..=1.0).contains(r)));
        }
    }

    #[test]
    fn transform_needs_at_least_one_field() {
        let (a, b) = fields();
        let mut model = Mca::new(ModelParams::with_n_modes(2));
        model.fit(&a, &b, &["time"], None, None).unwrap();
        assert!(matches!(model.transform(None, None, true), Err(EofError::InvalidValue(_))));
        let (left, right) = model.transform(Some(&a), None, false).unwrap();
        assert!(left.is_some() && right.is_none());
    }

    #[test]
    fn complex_patterns_are_not_implemented() {
        let (a, b) = fields();
        let mut model = ComplexMca::new(ModelParams::with_n_modes(2));
        model.fit(&a, &b, &["time"], None, None).unwrap();
        assert!(matches!(model.homogeneous_patterns(), Err(EofError::NotImplemented(_))));
        let (phase1, _) = model.scores_phase(false).unwrap();
        let pi = std::f64::consts::PI;
        assert!(phase1.values().iter().all(|p| (-pi..=pi).contains(p)));
    }
}
