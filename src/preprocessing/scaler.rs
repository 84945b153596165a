// src/preprocessing/scaler.rs

use crate::data_array::{Coordinate, DataArray, DataObject, Layout};
use crate::error::{EofError, Result};
use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// Scales below this threshold are replaced by 1 so constant features stay finite.
const SCALE_SANITIZATION_THRESHOLD: f64 = 1e-9;

/// Fitted statistics of one input array, flattened over its feature dims in array order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct ArrayStatistics {
    dims: Vec<String>,
    feature_dims: Vec<String>,
    feature_shape: Vec<usize>,
    center: Array1<f64>,
    scale: Array1<f64>,
    weights: Array1<f64>,
}

/// Centers, standardizes and weights every feature of every input array.
///
/// The transform is `(x - center) / scale * weight`, where the weight is the product of
/// the square-root cosine-latitude factor and any caller-supplied weights. Statistics are
/// reduced over all sample dims with NaNs skipped and frozen at fit time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    with_center: bool,
    with_std: bool,
    with_coslat: bool,
    sample_dims: Vec<String>,
    layout: Option<Layout>,
    statistics: Vec<ArrayStatistics>,
}

/// Position of the latitude axis among the feature dims.
fn latitude_axis(feature_dims: &[String]) -> Option<usize> {
    feature_dims.iter().position(|d| {
        let lower = d.to_ascii_lowercase();
        lower == "lat" || lower == "latitude"
    })
}

/// `(n_samples, n_features)` view of an array with sample dims first.
fn canonical_matrix(array: &DataArray<f64>, sample_dims: &[String], feature_dims: &[String]) -> Result<Array2<f64>> {
    let order: Vec<&String> = sample_dims.iter().chain(feature_dims).collect();
    let canonical = array.transpose_to(&order)?;
    let n_features: usize = feature_dims
        .iter()
        .map(|d| canonical.coord(d).map_or(0, Coordinate::len))
        .product();
    let n_samples = if n_features == 0 { 0 } else { canonical.len() / n_features };
    Ok(canonical
        .values()
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n_samples, n_features))?)
}

/// Restores a canonical matrix into the labels and axis order of `template`.
fn restore_array(
    matrix: Array2<f64>,
    template: &DataArray<f64>,
    sample_dims: &[String],
    feature_dims: &[String],
) -> Result<DataArray<f64>> {
    let order: Vec<&String> = sample_dims.iter().chain(feature_dims).collect();
    let canonical = template.transpose_to(&order)?;
    let values = matrix.into_shape_with_order(IxDyn(canonical.shape()))?;
    canonical.with_values(values)?.transpose_to(template.dims())
}

fn nan_mean(column: ndarray::ArrayView1<'_, f64>) -> f64 {
    let (sum, count) = column
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

fn nan_std(column: ndarray::ArrayView1<'_, f64>, mean: f64) -> f64 {
    let (sum_sq, count) = column
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + (v - mean).powi(2), c + 1));
    if count == 0 {
        f64::NAN
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

impl Scaler {
    pub fn new(with_center: bool, with_std: bool, with_coslat: bool) -> Self {
        Self {
            with_center,
            with_std,
            with_coslat,
            sample_dims: Vec::new(),
            layout: None,
            statistics: Vec::new(),
        }
    }

    /// Computes center, scale and weights for every array of `data`.
    ///
    /// # Errors
    /// - [`EofError::Configuration`] if cosine-latitude weighting is requested but an array
    ///   has no numeric `lat`/`latitude` feature dimension.
    /// - [`EofError::Shape`] if a sample dim is missing, an array has no feature dim, or the
    ///   weights do not match the feature dims and coordinates.
    pub fn fit(&mut self, data: &DataObject<f64>, sample_dims: &[String], weights: Option<&DataObject<f64>>) -> Result<()> {
        let arrays = data.arrays();
        let weight_arrays: Vec<Option<&DataArray<f64>>> = match weights {
            Some(w) => {
                let w = w.arrays();
                if w.len() != arrays.len() {
                    return Err(EofError::Shape(format!(
                        "got {} weight arrays for {} data arrays",
                        w.len(),
                        arrays.len()
                    )));
                }
                w.into_iter().map(Some).collect()
            }
            None => vec![None; arrays.len()],
        };

        let mut statistics = Vec::with_capacity(arrays.len());
        for (array, weight) in arrays.into_iter().zip(weight_arrays) {
            statistics.push(self.fit_array(array, sample_dims, weight)?);
        }
        self.sample_dims = sample_dims.to_vec();
        self.layout = Some(data.layout());
        self.statistics = statistics;
        Ok(())
    }

    fn fit_array(
        &self,
        array: &DataArray<f64>,
        sample_dims: &[String],
        weight: Option<&DataArray<f64>>,
    ) -> Result<ArrayStatistics> {
        for dim in sample_dims {
            array.require_axis(dim)?;
        }
        let feature_dims: Vec<String> = array.dims().iter().filter(|d| !sample_dims.contains(d)).cloned().collect();
        if feature_dims.is_empty() {
            return Err(EofError::Shape(format!(
                "array with dimensions {:?} has no feature dimension besides the sample dims {:?}",
                array.dims(),
                sample_dims
            )));
        }
        let feature_shape: Vec<usize> = feature_dims
            .iter()
            .map(|d| array.coord(d).map_or(0, Coordinate::len))
            .collect();
        let matrix = canonical_matrix(array, sample_dims, &feature_dims)?;
        let n_features = matrix.ncols();

        let center = if self.with_center {
            matrix.map_axis(Axis(0), nan_mean)
        } else {
            Array1::zeros(n_features)
        };
        let scale = if self.with_std {
            let mut scale = Array1::zeros(n_features);
            for (j, column) in matrix.axis_iter(Axis(1)).enumerate() {
                let std = nan_std(column, nan_mean(column));
                scale[j] = if std.is_finite() && std > SCALE_SANITIZATION_THRESHOLD { std } else { 1.0 };
            }
            scale
        } else {
            Array1::ones(n_features)
        };

        let mut weights = ArrayD::<f64>::ones(IxDyn(&feature_shape));
        if self.with_coslat {
            let lat_axis = latitude_axis(&feature_dims).ok_or_else(|| {
                EofError::Configuration(format!(
                    "cosine-latitude weighting needs a 'lat' or 'latitude' feature dimension, found {feature_dims:?}"
                ))
            })?;
            let latitudes = array
                .coord(&feature_dims[lat_axis])
                .and_then(Coordinate::as_f64)
                .ok_or_else(|| EofError::Configuration("latitude coordinate is not numeric".to_string()))?;
            let coslat: Vec<f64> = latitudes
                .iter()
                .map(|lat| lat.to_radians().cos().max(0.0).sqrt().min(1.0))
                .collect();
            weights.indexed_iter_mut().for_each(|(idx, w)| *w *= coslat[idx[lat_axis]]);
        }
        if let Some(weight) = weight {
            let aligned = weight.transpose_to(&feature_dims).map_err(|_| {
                EofError::Shape(format!(
                    "weights with dimensions {:?} do not span the feature dims {:?}",
                    weight.dims(),
                    feature_dims
                ))
            })?;
            for dim in &feature_dims {
                if aligned.coord(dim) != array.coord(dim) {
                    return Err(EofError::Shape(format!(
                        "weights coordinate along '{dim}' differs from the data coordinate"
                    )));
                }
            }
            weights = weights * aligned.values();
        }
        let weights = weights.as_standard_layout().into_owned().into_shape_with_order(n_features)?;

        Ok(ArrayStatistics {
            dims: array.dims().to_vec(),
            feature_dims,
            feature_shape,
            center,
            scale,
            weights,
        })
    }

    fn matching_statistics<'a>(&'a self, data: &DataObject<f64>) -> Result<Vec<(&'a ArrayStatistics, DataArray<f64>)>> {
        if self.layout.is_none() {
            return Err(EofError::NotFitted("Scaler"));
        }
        let arrays = data.arrays();
        if arrays.len() != self.statistics.len() {
            return Err(EofError::Shape(format!(
                "expected {} arrays, got {}",
                self.statistics.len(),
                arrays.len()
            )));
        }
        let mut pairs = Vec::with_capacity(arrays.len());
        for (stats, array) in self.statistics.iter().zip(arrays) {
            let mut expected = stats.dims.clone();
            expected.sort();
            let mut found = array.dims().to_vec();
            found.sort();
            if expected != found {
                return Err(EofError::Shape(format!(
                    "expected dimensions {:?}, got {:?}",
                    stats.dims,
                    array.dims()
                )));
            }
            let shape: Vec<usize> = stats
                .feature_dims
                .iter()
                .map(|d| array.coord(d).map_or(0, Coordinate::len))
                .collect();
            if shape != stats.feature_shape {
                return Err(EofError::Shape(format!(
                    "feature shape {:?} differs from the fitted shape {:?}",
                    shape, stats.feature_shape
                )));
            }
            pairs.push((stats, array.clone()));
        }
        Ok(pairs)
    }

    /// Applies the fitted scaling. Axis order and layout of the input are kept.
    pub fn transform(&self, data: &DataObject<f64>) -> Result<DataObject<f64>> {
        let mut scaled = Vec::new();
        for (stats, array) in self.matching_statistics(data)? {
            let mut matrix = canonical_matrix(&array, &self.sample_dims, &stats.feature_dims)?;
            matrix -= &stats.center;
            matrix /= &stats.scale;
            matrix *= &stats.weights;
            scaled.push(restore_array(matrix, &array, &self.sample_dims, &stats.feature_dims)?);
        }
        DataObject::from_layout(&data.layout(), scaled)
    }

    /// Undoes [`Scaler::transform`].
    pub fn inverse_transform(&self, data: &DataObject<f64>) -> Result<DataObject<f64>> {
        let mut restored = Vec::new();
        for (stats, array) in self.matching_statistics(data)? {
            let mut matrix = canonical_matrix(&array, &self.sample_dims, &stats.feature_dims)?;
            matrix /= &stats.weights;
            matrix *= &stats.scale;
            matrix += &stats.center;
            restored.push(restore_array(matrix, &array, &self.sample_dims, &stats.feature_dims)?);
        }
        DataObject::from_layout(&data.layout(), restored)
    }
}
