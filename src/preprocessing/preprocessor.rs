// src/preprocessing/preprocessor.rs

use super::sanitizer::Sanitizer;
use super::scaler::Scaler;
use super::stacker::Stacker;
use crate::data_array::{Coordinate, DataArray, DataObject, Element};
use crate::error::{EofError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Construction parameters of a [`Preprocessor`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorParams {
    pub sample_name: String,
    pub feature_name: String,
    pub with_center: bool,
    pub with_std: bool,
    pub with_coslat: bool,
}

impl Default for PreprocessorParams {
    fn default() -> Self {
        Self {
            sample_name: "sample".to_string(),
            feature_name: "feature".to_string(),
            with_center: true,
            with_std: false,
            with_coslat: false,
        }
    }
}

/// Sample coordinates of one transformed input, needed to map its projections back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleContext {
    /// One coordinate per sample dim, in stacking order.
    pub sample_coords: Vec<Coordinate>,
    /// The stacked sample coordinate before sanitizing.
    pub stacked_samples: Coordinate,
}

/// A sanitized `(sample, feature)` matrix and the context it came from.
#[derive(Clone, Debug)]
pub struct Transformed {
    pub data: DataArray<f64>,
    pub context: SampleContext,
}

/// Scaler, stacker and sanitizer applied in that order; inverses run backwards.
///
/// Fitted state only changes in [`Preprocessor::fit`] and
/// [`Preprocessor::fit_transform`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    params: PreprocessorParams,
    scaler: Scaler,
    stacker: Stacker,
    sanitizer: Sanitizer,
    fitted: bool,
}

impl Preprocessor {
    pub fn new(params: PreprocessorParams) -> Self {
        Self {
            scaler: Scaler::new(params.with_center, params.with_std, params.with_coslat),
            stacker: Stacker::new(&params.sample_name, &params.feature_name),
            sanitizer: Sanitizer::new(&params.sample_name, &params.feature_name),
            params,
            fitted: false,
        }
    }

    pub fn params(&self) -> &PreprocessorParams {
        &self.params
    }

    /// Sample dims passed to the last fit.
    pub fn sample_dims(&self) -> &[String] {
        self.stacker.sample_dims()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn check_input(data: &DataObject<f64>, sample_dims: &[String]) -> Result<()> {
        if data.is_empty() {
            return Err(EofError::Shape("input data is empty".to_string()));
        }
        if sample_dims.is_empty() {
            return Err(EofError::Shape("at least one sample dimension is required".to_string()));
        }
        Ok(())
    }

    fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(EofError::NotFitted("Preprocessor"))
        }
    }

    pub fn fit(&mut self, data: &DataObject<f64>, sample_dims: &[String], weights: Option<&DataObject<f64>>) -> Result<()> {
        self.fit_transform(data, sample_dims, weights).map(|_| ())
    }

    /// Fits every stage on `data` and returns the sanitized matrix.
    ///
    /// # Errors
    /// [`EofError::Shape`] for empty input or missing sample dims, and whatever the
    /// individual stages reject.
    pub fn fit_transform(
        &mut self,
        data: &DataObject<f64>,
        sample_dims: &[String],
        weights: Option<&DataObject<f64>>,
    ) -> Result<Transformed> {
        Self::check_input(data, sample_dims)?;
        self.scaler.fit(data, sample_dims, weights)?;
        let scaled = self.scaler.transform(data)?;
        self.stacker.fit(&scaled, sample_dims)?;
        let (stacked, sample_coords) = self.stacker.transform(&scaled)?;
        self.sanitizer.fit(&stacked)?;
        let (sanitized, stacked_samples) = self.sanitizer.transform(&stacked)?;
        self.fitted = true;
        debug!(
            "Preprocessed input into a {}x{} matrix ({} stacked features)",
            sanitized.shape()[0],
            sanitized.shape()[1],
            stacked.shape()[1]
        );
        Ok(Transformed {
            data: sanitized,
            context: SampleContext {
                sample_coords,
                stacked_samples,
            },
        })
    }

    /// Runs the fitted pipeline on new data.
    pub fn transform(&self, data: &DataObject<f64>) -> Result<Transformed> {
        self.check_fitted()?;
        Self::check_input(data, self.sample_dims())?;
        let scaled = self.scaler.transform(data)?;
        let (stacked, sample_coords) = self.stacker.transform(&scaled)?;
        let (sanitized, stacked_samples) = self.sanitizer.transform(&stacked)?;
        Ok(Transformed {
            data: sanitized,
            context: SampleContext {
                sample_coords,
                stacked_samples,
            },
        })
    }

    /// Maps a `(sample, feature)` matrix over the fitted samples back to the input
    /// layout, unscaled.
    pub fn inverse_transform_data(&self, data: &DataArray<f64>) -> Result<DataObject<f64>> {
        self.check_fitted()?;
        let unsanitized = self.sanitizer.inverse_transform_data(data)?;
        let unstacked = self.stacker.inverse_transform_data(&unsanitized)?;
        self.scaler.inverse_transform(&unstacked)
    }

    /// Maps `(feature, mode)` components to arrays with dims `(mode, *feature_dims)`.
    pub fn inverse_transform_components<A: Element>(&self, components: &DataArray<A>) -> Result<DataObject<A>> {
        self.check_fitted()?;
        let unsanitized = self.sanitizer.inverse_transform_components(components)?;
        self.stacker.inverse_transform_components(&unsanitized)
    }

    /// Maps `(sample, mode)` scores of the training samples to dims `(mode, *sample_dims)`.
    pub fn inverse_transform_scores<A: Element>(&self, scores: &DataArray<A>) -> Result<DataArray<A>> {
        self.check_fitted()?;
        let unsanitized = self.sanitizer.inverse_transform_scores(scores)?;
        self.stacker.inverse_transform_scores(&unsanitized)
    }

    /// Same as [`Preprocessor::inverse_transform_scores`] for scores of transformed data.
    pub fn inverse_transform_scores_unseen<A: Element>(
        &self,
        scores: &DataArray<A>,
        context: &SampleContext,
    ) -> Result<DataArray<A>> {
        self.check_fitted()?;
        let unsanitized = self
            .sanitizer
            .inverse_transform_scores_unseen(scores, &context.stacked_samples)?;
        self.stacker
            .inverse_transform_scores_unseen(&unsanitized, &context.sample_coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::MODE_DIM;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Array3};

    fn field() -> DataArray<f64> {
        let mut values = Array3::from_shape_fn((6, 2, 3), |(t, y, x)| (t as f64).sin() + (y * 3 + x) as f64);
        values[[0, 1, 1]] = f64::NAN;
        for t in 0..6 {
            values[[t, 0, 2]] = f64::NAN;
        }
        DataArray::new(
            values,
            &["time", "lat", "lon"],
            vec![Coordinate::range(6), Coordinate::from_floats([-30.0, 30.0]), Coordinate::from_ints([0, 10, 20])],
        )
        .unwrap()
    }

    fn time() -> Vec<String> {
        vec!["time".to_string()]
    }

    #[test]
    fn fit_transform_drops_all_nan_features() {
        let mut pre = Preprocessor::new(PreprocessorParams::default());
        let out = pre.fit_transform(&DataObject::from(field()), &time(), None).unwrap();
        assert_eq!(out.data.shape(), &[6, 5]);
        assert_eq!(out.context.sample_coords, vec![Coordinate::range(6)]);
        assert_eq!(pre.sample_dims(), &["time".to_string()]);
    }

    #[test]
    fn inverse_data_restores_input() {
        let params = PreprocessorParams {
            with_std: true,
            with_coslat: true,
            ..PreprocessorParams::default()
        };
        let mut pre = Preprocessor::new(params);
        let input = DataObject::from(field());
        let out = pre.fit_transform(&input, &time(), None).unwrap();
        let restored = pre.inverse_transform_data(&out.data).unwrap().into_array().unwrap();
        let original = field();
        assert_eq!(restored.dims(), original.dims());
        for (a, b) in restored.values().iter().zip(original.values().iter()) {
            if b.is_nan() {
                assert!(a.is_nan());
            } else {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn components_and_scores_return_to_labeled_layout() {
        let mut pre = Preprocessor::new(PreprocessorParams::default());
        let out = pre.fit_transform(&DataObject::from(field()), &time(), None).unwrap();
        let features = out.data.coord("feature").unwrap().clone();
        let components = DataArray::from_matrix(
            Array2::<f64>::ones((features.len(), 2)),
            ["feature", MODE_DIM],
            [features, Coordinate::modes(2)],
        )
        .unwrap();
        let unstacked = pre.inverse_transform_components(&components).unwrap().into_array().unwrap();
        assert_eq!(unstacked.shape(), &[2, 2, 3]);
        assert!(unstacked.values()[[0, 0, 2]].is_nan());
        assert_eq!(unstacked.values()[[1, 1, 1]], 1.0);

        let samples = out.data.coord("sample").unwrap().clone();
        let scores = DataArray::from_matrix(
            Array2::<f64>::zeros((samples.len(), 2)),
            ["sample", MODE_DIM],
            [samples, Coordinate::modes(2)],
        )
        .unwrap();
        let unseen = pre.inverse_transform_scores_unseen(&scores, &out.context).unwrap();
        assert_eq!(unseen.dims(), &[MODE_DIM.to_string(), "time".to_string()]);
        assert_eq!(unseen.shape(), &[2, 6]);
    }

    #[test]
    fn transform_before_fit_fails() {
        let pre = Preprocessor::new(PreprocessorParams::default());
        assert!(matches!(
            pre.transform(&DataObject::from(field())),
            Err(EofError::NotFitted(_))
        ));
    }

    #[test]
    fn missing_sample_dim_is_a_shape_error() {
        let mut pre = Preprocessor::new(PreprocessorParams::default());
        let err = pre.fit(&DataObject::from(field()), &["month".to_string()], None);
        assert!(matches!(err, Err(EofError::Shape(_))));
    }
}
