// src/preprocessing/stacker.rs

use crate::data_array::{Coordinate, DataArray, DataObject, Element, Label, Layout, MODE_DIM};
use crate::error::{EofError, Result};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// Stacking plan of one input array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct ArrayStacking {
    dims: Vec<String>,
    feature_dims: Vec<String>,
    feature_coords: Vec<Coordinate>,
    n_features: usize,
}

/// Flattens labeled arrays into a `(sample, feature)` matrix and back.
///
/// Sample dims are flattened in the order given by the caller, feature dims in the order
/// they appear in each array. Arrays of a dataset or list are concatenated along the
/// feature axis; the variable name (dataset) or list position (list) becomes the first
/// level of their feature labels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stacker {
    sample_name: String,
    feature_name: String,
    sample_dims: Vec<String>,
    sample_coords: Vec<Coordinate>,
    layout: Option<Layout>,
    arrays: Vec<ArrayStacking>,
    stacked_features: Coordinate,
}

fn sorted(dims: &[String]) -> Vec<String> {
    let mut dims = dims.to_vec();
    dims.sort();
    dims
}

impl Stacker {
    pub fn new(sample_name: &str, feature_name: &str) -> Self {
        Self {
            sample_name: sample_name.to_string(),
            feature_name: feature_name.to_string(),
            sample_dims: Vec::new(),
            sample_coords: Vec::new(),
            layout: None,
            arrays: Vec::new(),
            stacked_features: Coordinate::default(),
        }
    }

    pub fn sample_dims(&self) -> &[String] {
        &self.sample_dims
    }

    /// Records dims and coordinates of every input array.
    ///
    /// # Errors
    /// [`EofError::Shape`] if a sample dim is missing, an array has no feature dim, the
    /// arrays disagree on the sample coordinates, or a dim is named like the stacked axes.
    pub fn fit(&mut self, data: &DataObject<f64>, sample_dims: &[String]) -> Result<()> {
        let layout = data.layout();
        let arrays = data.arrays();
        let mut plans = Vec::with_capacity(arrays.len());
        let mut feature_blocks = Vec::with_capacity(arrays.len());
        let mut sample_coords: Option<Vec<Coordinate>> = None;

        for (position, array) in arrays.iter().enumerate() {
            for dim in array.dims() {
                if *dim == self.sample_name || *dim == self.feature_name {
                    return Err(EofError::Shape(format!(
                        "input dimension '{dim}' collides with the stacked dimension names"
                    )));
                }
            }
            let coords = sample_dims
                .iter()
                .map(|d| array.require_axis(d).map(|axis| array.coords()[axis].clone()))
                .collect::<Result<Vec<_>>>()?;
            match &sample_coords {
                None => sample_coords = Some(coords),
                Some(first) if *first != coords => {
                    return Err(EofError::Shape(
                        "all input arrays must share the same sample coordinates".to_string(),
                    ));
                }
                Some(_) => {}
            }

            let feature_dims: Vec<String> = array.dims().iter().filter(|d| !sample_dims.contains(d)).cloned().collect();
            if feature_dims.is_empty() {
                return Err(EofError::Shape(format!(
                    "array with dimensions {:?} has no feature dimension",
                    array.dims()
                )));
            }
            let feature_coords: Vec<Coordinate> = feature_dims
                .iter()
                .filter_map(|d| array.coord(d).cloned())
                .collect();
            let refs: Vec<&Coordinate> = feature_coords.iter().collect();
            let block = Coordinate::product(&refs);
            let block = match &layout {
                Layout::Array { .. } => block,
                Layout::Dataset(names) => block.prefixed(&Label::Str(names[position].clone())),
                Layout::List(_) => block.prefixed(&Label::Int(position as i64)),
            };
            plans.push(ArrayStacking {
                dims: array.dims().to_vec(),
                n_features: block.len(),
                feature_dims,
                feature_coords,
            });
            feature_blocks.push(block);
        }

        self.sample_dims = sample_dims.to_vec();
        self.sample_coords = sample_coords.unwrap_or_default();
        self.layout = Some(layout);
        self.arrays = plans;
        self.stacked_features = Coordinate::concat(&feature_blocks);
        Ok(())
    }

    fn layout(&self) -> Result<&Layout> {
        self.layout.as_ref().ok_or(EofError::NotFitted("Stacker"))
    }

    fn stacked_samples(coords: &[Coordinate]) -> Coordinate {
        let refs: Vec<&Coordinate> = coords.iter().collect();
        Coordinate::product(&refs)
    }

    /// Stacks `data` into a `(sample, feature)` matrix. Also returns the per-dim sample
    /// coordinates of `data`, needed to unstack projections of unseen samples.
    pub fn transform(&self, data: &DataObject<f64>) -> Result<(DataArray<f64>, Vec<Coordinate>)> {
        self.layout()?;
        let arrays = data.arrays();
        if arrays.len() != self.arrays.len() {
            return Err(EofError::Shape(format!(
                "expected {} arrays, got {}",
                self.arrays.len(),
                arrays.len()
            )));
        }
        let mut blocks = Vec::with_capacity(arrays.len());
        let mut sample_coords: Option<Vec<Coordinate>> = None;
        for (plan, array) in self.arrays.iter().zip(arrays) {
            if sorted(&plan.dims) != sorted(array.dims()) {
                return Err(EofError::Shape(format!(
                    "expected dimensions {:?}, got {:?}",
                    plan.dims,
                    array.dims()
                )));
            }
            for (dim, coord) in plan.feature_dims.iter().zip(&plan.feature_coords) {
                if array.coord(dim) != Some(coord) {
                    return Err(EofError::Shape(format!(
                        "coordinate of feature dimension '{dim}' differs from the one seen during fit"
                    )));
                }
            }
            let coords: Vec<Coordinate> = self
                .sample_dims
                .iter()
                .filter_map(|d| array.coord(d).cloned())
                .collect();
            match &sample_coords {
                None => sample_coords = Some(coords),
                Some(first) if *first != coords => {
                    return Err(EofError::Shape(
                        "all input arrays must share the same sample coordinates".to_string(),
                    ));
                }
                Some(_) => {}
            }
            let order: Vec<&String> = self.sample_dims.iter().chain(&plan.feature_dims).collect();
            let canonical = array.transpose_to(&order)?;
            let n_samples = if plan.n_features == 0 { 0 } else { canonical.len() / plan.n_features };
            blocks.push(
                canonical
                    .values()
                    .as_standard_layout()
                    .into_owned()
                    .into_shape_with_order((n_samples, plan.n_features))?,
            );
        }
        let sample_coords = sample_coords.unwrap_or_default();
        let views: Vec<ArrayView2<'_, f64>> = blocks.iter().map(|b| b.view()).collect();
        let matrix = concatenate(Axis(1), &views)?;
        let stacked = DataArray::from_matrix(
            matrix,
            [self.sample_name.as_str(), self.feature_name.as_str()],
            [Self::stacked_samples(&sample_coords), self.stacked_features.clone()],
        )?;
        Ok((stacked, sample_coords))
    }

    /// Unstacks a `(sample, feature)` matrix over the fitted samples into the fit layout.
    pub fn inverse_transform_data<A: Element>(&self, data: &DataArray<A>) -> Result<DataObject<A>> {
        let layout = self.layout()?;
        let matrix = data.matrix_as(&self.sample_name, &self.feature_name)?;
        let sample_shape: Vec<usize> = self.sample_coords.iter().map(Coordinate::len).collect();
        let n_samples: usize = sample_shape.iter().product();
        if matrix.nrows() != n_samples || matrix.ncols() != self.stacked_features.len() {
            return Err(EofError::Shape(format!(
                "cannot unstack a {}x{} matrix into {} samples and {} features",
                matrix.nrows(),
                matrix.ncols(),
                n_samples,
                self.stacked_features.len()
            )));
        }
        let mut offset = 0;
        let mut arrays = Vec::with_capacity(self.arrays.len());
        for plan in &self.arrays {
            let block = matrix
                .slice(s![.., offset..offset + plan.n_features])
                .as_standard_layout()
                .into_owned();
            offset += plan.n_features;
            let mut shape = sample_shape.clone();
            shape.extend(plan.feature_coords.iter().map(Coordinate::len));
            let values = block.into_shape_with_order(IxDyn(&shape))?;
            let dims: Vec<String> = self.sample_dims.iter().chain(&plan.feature_dims).cloned().collect();
            let coords: Vec<Coordinate> = self.sample_coords.iter().chain(&plan.feature_coords).cloned().collect();
            let canonical = DataArray::from_parts(None, dims, coords, values)?;
            arrays.push(canonical.transpose_to(&plan.dims)?);
        }
        DataObject::from_layout(layout, arrays)
    }

    /// Unstacks `(feature, mode)` components into arrays with dims `(mode, *feature_dims)`.
    pub fn inverse_transform_components<A: Element>(&self, components: &DataArray<A>) -> Result<DataObject<A>> {
        let layout = self.layout()?;
        let matrix = components.matrix_as(&self.feature_name, MODE_DIM)?;
        let modes = components
            .coord(MODE_DIM)
            .cloned()
            .unwrap_or_else(|| Coordinate::modes(matrix.ncols()));
        if matrix.nrows() != self.stacked_features.len() {
            return Err(EofError::Shape(format!(
                "components have {} features, the stacked layout has {}",
                matrix.nrows(),
                self.stacked_features.len()
            )));
        }
        let mut offset = 0;
        let mut arrays = Vec::with_capacity(self.arrays.len());
        for plan in &self.arrays {
            let block = matrix
                .slice(s![offset..offset + plan.n_features, ..])
                .t()
                .as_standard_layout()
                .into_owned();
            offset += plan.n_features;
            let mut shape = vec![modes.len()];
            shape.extend(plan.feature_coords.iter().map(Coordinate::len));
            let values = block.into_shape_with_order(IxDyn(&shape))?;
            let mut dims = vec![MODE_DIM.to_string()];
            dims.extend(plan.feature_dims.iter().cloned());
            let mut coords = vec![modes.clone()];
            coords.extend(plan.feature_coords.iter().cloned());
            arrays.push(DataArray::from_parts(None, dims, coords, values)?);
        }
        DataObject::from_layout(layout, arrays)
    }

    /// Unstacks `(sample, mode)` scores over the fitted samples into dims `(mode, *sample_dims)`.
    pub fn inverse_transform_scores<A: Element>(&self, scores: &DataArray<A>) -> Result<DataArray<A>> {
        self.unstack_scores(scores, &self.sample_coords)
    }

    /// Same as [`Stacker::inverse_transform_scores`] for samples seen at transform time.
    pub fn inverse_transform_scores_unseen<A: Element>(
        &self,
        scores: &DataArray<A>,
        sample_coords: &[Coordinate],
    ) -> Result<DataArray<A>> {
        self.unstack_scores(scores, sample_coords)
    }

    fn unstack_scores<A: Element>(&self, scores: &DataArray<A>, sample_coords: &[Coordinate]) -> Result<DataArray<A>> {
        self.layout()?;
        let matrix: Array2<A> = scores.matrix_as(&self.sample_name, MODE_DIM)?;
        let modes = scores
            .coord(MODE_DIM)
            .cloned()
            .unwrap_or_else(|| Coordinate::modes(matrix.ncols()));
        let n_samples: usize = sample_coords.iter().map(Coordinate::len).product();
        if matrix.nrows() != n_samples {
            return Err(EofError::Shape(format!(
                "scores have {} samples, expected {}",
                matrix.nrows(),
                n_samples
            )));
        }
        let mut shape = vec![modes.len()];
        shape.extend(sample_coords.iter().map(Coordinate::len));
        let values = matrix
            .t()
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&shape))?;
        let mut dims = vec![MODE_DIM.to_string()];
        dims.extend(self.sample_dims.iter().cloned());
        let mut coords = vec![modes];
        coords.extend(sample_coords.iter().cloned());
        DataArray::from_parts(None, dims, coords, values)
    }
}
