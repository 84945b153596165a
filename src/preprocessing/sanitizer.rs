// src/preprocessing/sanitizer.rs

use crate::data_array::{Coordinate, DataArray, Element};
use crate::error::{EofError, Result};
use ndarray::Axis;
use serde::{Deserialize, Serialize};

/// Drops all-NaN features and samples from a `(sample, feature)` matrix and restores
/// them (as NaN) on the way back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sanitizer {
    sample_name: String,
    feature_name: String,
    feature_coord: Coordinate,
    sample_coord: Coordinate,
    is_valid_feature: Vec<bool>,
    is_valid_sample: Vec<bool>,
    fitted: bool,
}

impl Sanitizer {
    pub fn new(sample_name: &str, feature_name: &str) -> Self {
        Self {
            sample_name: sample_name.to_string(),
            feature_name: feature_name.to_string(),
            feature_coord: Coordinate::default(),
            sample_coord: Coordinate::default(),
            is_valid_feature: Vec::new(),
            is_valid_sample: Vec::new(),
            fitted: false,
        }
    }

    fn check_matrix<A>(&self, data: &DataArray<A>) -> Result<()> {
        if data.ndim() != 2 || !data.has_dim(&self.sample_name) || !data.has_dim(&self.feature_name) {
            return Err(EofError::Shape(format!(
                "expected dimensions ({}, {}), got {:?}",
                self.sample_name,
                self.feature_name,
                data.dims()
            )));
        }
        Ok(())
    }

    fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(EofError::NotFitted("Sanitizer"))
        }
    }

    /// Number of features kept after sanitizing.
    pub fn n_valid_features(&self) -> usize {
        self.is_valid_feature.iter().filter(|v| **v).count()
    }

    /// Derives the feature and sample masks from the training matrix.
    pub fn fit(&mut self, data: &DataArray<f64>) -> Result<()> {
        self.check_matrix(data)?;
        let matrix = data.matrix_as(&self.sample_name, &self.feature_name)?;
        let is_valid_feature: Vec<bool> = matrix
            .axis_iter(Axis(1))
            .map(|col| col.iter().any(|v| !v.is_nan()))
            .collect();
        if !is_valid_feature.iter().any(|v| *v) {
            return Err(EofError::InvalidValue("every feature of the input is NaN".to_string()));
        }
        let is_valid_sample: Vec<bool> = matrix
            .axis_iter(Axis(0))
            .map(|row| row.iter().zip(&is_valid_feature).any(|(v, keep)| *keep && !v.is_nan()))
            .collect();

        self.feature_coord = data.coord(&self.feature_name).cloned().unwrap_or_default();
        self.sample_coord = data.coord(&self.sample_name).cloned().unwrap_or_default();
        self.is_valid_feature = is_valid_feature;
        self.is_valid_sample = is_valid_sample;
        self.fitted = true;
        Ok(())
    }

    /// Removes invalid features (fitted mask) and all-NaN samples (mask of `data`).
    /// Returns the sanitized matrix and the full sample coordinate of `data`.
    ///
    /// # Errors
    /// [`EofError::Shape`] if the feature coordinate of `data` is not identical to the one
    /// seen during fit.
    pub fn transform(&self, data: &DataArray<f64>) -> Result<(DataArray<f64>, Coordinate)> {
        self.check_fitted()?;
        self.check_matrix(data)?;
        if data.coord(&self.feature_name) != Some(&self.feature_coord) {
            return Err(EofError::Shape(
                "cannot transform data: feature coordinates differ from the ones seen during fit".to_string(),
            ));
        }
        let sample_coord = data.coord(&self.sample_name).cloned().unwrap_or_default();
        let features = data.select_mask(&self.feature_name, &self.is_valid_feature)?;
        let matrix = features.matrix_as(&self.sample_name, &self.feature_name)?;
        let is_valid_sample: Vec<bool> = matrix
            .axis_iter(Axis(0))
            .map(|row| row.iter().any(|v| !v.is_nan()))
            .collect();
        let sanitized = features.select_mask(&self.sample_name, &is_valid_sample)?;
        Ok((sanitized, sample_coord))
    }

    /// Reinserts dropped features and fitted samples as NaN.
    pub fn inverse_transform_data<A: Element>(&self, data: &DataArray<A>) -> Result<DataArray<A>> {
        self.check_fitted()?;
        data.reindex(&self.feature_name, &self.feature_coord)?
            .reindex(&self.sample_name, &self.sample_coord)
    }

    /// Reinserts dropped features as NaN rows of `(feature, mode)` components.
    pub fn inverse_transform_components<A: Element>(&self, data: &DataArray<A>) -> Result<DataArray<A>> {
        self.check_fitted()?;
        data.reindex(&self.feature_name, &self.feature_coord)
    }

    /// Reinserts dropped training samples as NaN rows of `(sample, mode)` scores.
    pub fn inverse_transform_scores<A: Element>(&self, data: &DataArray<A>) -> Result<DataArray<A>> {
        self.check_fitted()?;
        data.reindex(&self.sample_name, &self.sample_coord)
    }

    /// Reinserts dropped samples of a transformed input, given its full sample coordinate.
    pub fn inverse_transform_scores_unseen<A: Element>(
        &self,
        data: &DataArray<A>,
        sample_coord: &Coordinate,
    ) -> Result<DataArray<A>> {
        self.check_fitted()?;
        data.reindex(&self.sample_name, sample_coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> DataArray<f64> {
        let nan = f64::NAN;
        DataArray::from_matrix(
            array![[1.0, nan, 2.0], [nan, nan, nan], [3.0, nan, 4.0], [5.0, nan, 6.0]],
            ["sample", "feature"],
            [Coordinate::range(4), Coordinate::from_strs(["a", "b", "c"])],
        )
        .unwrap()
    }

    #[test]
    fn drops_all_nan_features_and_samples() {
        let mut sanitizer = Sanitizer::new("sample", "feature");
        sanitizer.fit(&matrix()).unwrap();
        let (clean, samples) = sanitizer.transform(&matrix()).unwrap();
        assert_eq!(clean.shape(), &[3, 2]);
        assert_eq!(samples.len(), 4);
        assert_eq!(clean.coord("feature"), Some(&Coordinate::from_strs(["a", "c"])));
        assert_eq!(clean.coord("sample"), Some(&Coordinate::from_ints([0, 2, 3])));
        assert_eq!(sanitizer.n_valid_features(), 2);
    }

    #[test]
    fn inverse_restores_nan_positions() {
        let mut sanitizer = Sanitizer::new("sample", "feature");
        sanitizer.fit(&matrix()).unwrap();
        let (clean, _) = sanitizer.transform(&matrix()).unwrap();
        let restored = sanitizer.inverse_transform_data(&clean).unwrap();
        assert_eq!(restored.shape(), &[4, 3]);
        assert_eq!(restored.values()[[2, 2]], 4.0);
        assert!(restored.values()[[1, 0]].is_nan());
        assert!(restored.values()[[0, 1]].is_nan());
    }

    #[test]
    fn transform_requires_identical_feature_coordinates() {
        let mut sanitizer = Sanitizer::new("sample", "feature");
        sanitizer.fit(&matrix()).unwrap();
        let other = DataArray::from_matrix(
            array![[1.0, 2.0, 3.0]],
            ["sample", "feature"],
            [Coordinate::range(1), Coordinate::from_strs(["a", "b", "d"])],
        )
        .unwrap();
        assert!(matches!(sanitizer.transform(&other), Err(EofError::Shape(_))));
    }

    #[test]
    fn rejects_non_matrix_input() {
        let mut sanitizer = Sanitizer::new("sample", "feature");
        let cube = DataArray::with_default_coords(ndarray::Array3::<f64>::zeros((2, 2, 2)), &["sample", "feature", "z"]).unwrap();
        assert!(matches!(sanitizer.fit(&cube), Err(EofError::Shape(_))));
    }
}
