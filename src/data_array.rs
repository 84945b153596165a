// src/data_array.rs

//! Labeled N-dimensional arrays: named axes, one coordinate per axis and an
//! `ndarray` value buffer. Models accept a single array, a dataset of named
//! variables or a list of arrays through the [`DataObject`] tagged union.

use crate::data_container::Payload;
use crate::error::{EofError, Result};
use ndarray::{Array, Array1, Array2, ArrayD, ArrayView2, Axis, Dimension, Ix2, IxDyn, ScalarOperand};
use ndarray_linalg::{c64, Lapack, Scalar};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name of the mode axis of components and scores.
pub const MODE_DIM: &str = "mode";

/// A single coordinate value. Stacking several dimensions produces `Tuple` labels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Label {
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Label>),
}

// Floats compare bitwise so that labels can key hash maps.
impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Label::Int(a), Label::Int(b)) => a == b,
            (Label::Float(a), Label::Float(b)) => a.to_bits() == b.to_bits(),
            (Label::Str(a), Label::Str(b)) => a == b,
            (Label::Tuple(a), Label::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Label::Int(v) => v.hash(state),
            Label::Float(v) => v.to_bits().hash(state),
            Label::Str(v) => v.hash(state),
            Label::Tuple(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Int(v) => write!(f, "{v}"),
            Label::Float(v) => write!(f, "{v}"),
            Label::Str(v) => write!(f, "{v}"),
            Label::Tuple(levels) => {
                write!(f, "(")?;
                for (i, level) in levels.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{level}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Label {
    /// Numeric value of an `Int` or `Float` label.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Label::Int(v) => Some(*v as f64),
            Label::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The levels of a tuple label, or the label itself as a single level.
    pub fn levels(&self) -> Vec<Label> {
        match self {
            Label::Tuple(levels) => levels.clone(),
            other => vec![other.clone()],
        }
    }
}

impl From<i64> for Label {
    fn from(v: i64) -> Self {
        Label::Int(v)
    }
}

impl From<f64> for Label {
    fn from(v: f64) -> Self {
        Label::Float(v)
    }
}

impl From<&str> for Label {
    fn from(v: &str) -> Self {
        Label::Str(v.to_string())
    }
}

impl From<String> for Label {
    fn from(v: String) -> Self {
        Label::Str(v)
    }
}

/// Ordered labels of one axis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate(Vec<Label>);

impl Coordinate {
    pub fn new(labels: Vec<Label>) -> Self {
        Self(labels)
    }

    /// Integer labels `0..n`.
    pub fn range(n: usize) -> Self {
        Self((0..n as i64).map(Label::Int).collect())
    }

    /// The 1-based mode coordinate `1..=n`.
    pub fn modes(n: usize) -> Self {
        Self((1..=n as i64).map(Label::Int).collect())
    }

    pub fn from_ints<I: IntoIterator<Item = i64>>(values: I) -> Self {
        Self(values.into_iter().map(Label::Int).collect())
    }

    pub fn from_floats<I: IntoIterator<Item = f64>>(values: I) -> Self {
        Self(values.into_iter().map(Label::Float).collect())
    }

    pub fn from_strs<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(|s| Label::Str(s.into())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.0.get(index)
    }

    pub fn get_index(&self, label: &Label) -> Option<usize> {
        self.0.iter().position(|l| l == label)
    }

    pub fn index_map(&self) -> HashMap<&Label, usize> {
        self.0.iter().enumerate().map(|(i, l)| (l, i)).collect()
    }

    /// Numeric values of the coordinate, if every label is numeric.
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        self.0.iter().map(Label::as_f64).collect()
    }

    pub fn select(&self, indices: &[usize]) -> Coordinate {
        Coordinate(indices.iter().map(|&i| self.0[i].clone()).collect())
    }

    pub fn select_mask(&self, mask: &[bool]) -> Coordinate {
        Coordinate(
            self.0
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(l, _)| l.clone())
                .collect(),
        )
    }

    /// Row-major cartesian product of several coordinates. A single coordinate
    /// is returned unchanged, several produce `Tuple` labels.
    pub fn product(coords: &[&Coordinate]) -> Coordinate {
        match coords {
            [] => Coordinate(vec![Label::Tuple(Vec::new())]),
            [single] => (*single).clone(),
            _ => {
                let mut combined: Vec<Vec<Label>> = vec![Vec::new()];
                for coord in coords {
                    let mut next = Vec::with_capacity(combined.len() * coord.len());
                    for prefix in &combined {
                        for label in coord.iter() {
                            let mut levels = prefix.clone();
                            levels.push(label.clone());
                            next.push(levels);
                        }
                    }
                    combined = next;
                }
                Coordinate(combined.into_iter().map(Label::Tuple).collect())
            }
        }
    }

    /// Prepends `prefix` as a first level to every label.
    pub fn prefixed(&self, prefix: &Label) -> Coordinate {
        Coordinate(
            self.0
                .iter()
                .map(|label| {
                    let mut levels = vec![prefix.clone()];
                    levels.extend(label.levels());
                    Label::Tuple(levels)
                })
                .collect(),
        )
    }

    pub fn concat(coords: &[Coordinate]) -> Coordinate {
        Coordinate(coords.iter().flat_map(|c| c.0.iter().cloned()).collect())
    }
}

impl FromIterator<Label> for Coordinate {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        Coordinate(iter.into_iter().collect())
    }
}

/// A named-axis array with one coordinate per axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataArray<A> {
    name: Option<String>,
    dims: Vec<String>,
    coords: Vec<Coordinate>,
    values: ArrayD<A>,
}

impl<A> DataArray<A> {
    /// Builds a labeled array.
    ///
    /// # Errors
    /// Returns [`EofError::Shape`] when the number of dimension names or coordinates
    /// does not match the array rank, when a coordinate length differs from its axis
    /// length, or when a dimension name is repeated.
    pub fn new<D: Dimension>(values: Array<A, D>, dims: &[&str], coords: Vec<Coordinate>) -> Result<Self> {
        Self::from_parts(None, dims.iter().map(|d| d.to_string()).collect(), coords, values.into_dyn())
    }

    /// Builds a labeled array whose coordinates are the integer positions `0..len`.
    pub fn with_default_coords<D: Dimension>(values: Array<A, D>, dims: &[&str]) -> Result<Self> {
        let coords = values.shape().iter().map(|&n| Coordinate::range(n)).collect();
        Self::new(values, dims, coords)
    }

    pub(crate) fn from_parts(
        name: Option<String>,
        dims: Vec<String>,
        coords: Vec<Coordinate>,
        values: ArrayD<A>,
    ) -> Result<Self> {
        if dims.len() != values.ndim() || coords.len() != values.ndim() {
            return Err(EofError::Shape(format!(
                "array of rank {} needs {} dimension names and coordinates, got {} and {}",
                values.ndim(),
                values.ndim(),
                dims.len(),
                coords.len()
            )));
        }
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].contains(dim) {
                return Err(EofError::Shape(format!("dimension '{dim}' appears more than once")));
            }
            if coords[i].len() != values.shape()[i] {
                return Err(EofError::Shape(format!(
                    "coordinate of dimension '{dim}' has {} labels but the axis has length {}",
                    coords[i].len(),
                    values.shape()[i]
                )));
            }
        }
        Ok(Self { name, dims, coords, values })
    }

    /// Builds a two-axis array.
    pub fn from_matrix(values: Array2<A>, dims: [&str; 2], coords: [Coordinate; 2]) -> Result<Self> {
        let [rows, cols] = coords;
        Self::new(values, &dims, vec![rows, cols])
    }

    /// Builds a one-axis array.
    pub fn from_vector(values: Array1<A>, dim: &str, coord: Coordinate) -> Result<Self> {
        Self::new(values, &[dim], vec![coord])
    }

    /// A zero-dimensional array holding one value.
    pub fn scalar(value: A) -> Self
    where
        A: Clone,
    {
        Self {
            name: None,
            dims: Vec::new(),
            coords: Vec::new(),
            values: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn coords(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn coord(&self, dim: &str) -> Option<&Coordinate> {
        self.axis_of(dim).map(|axis| &self.coords[axis])
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis_of(dim).is_some()
    }

    pub(crate) fn require_axis(&self, dim: &str) -> Result<usize> {
        self.axis_of(dim).ok_or_else(|| {
            EofError::Shape(format!("dimension '{dim}' not found in array with dimensions {:?}", self.dims))
        })
    }

    pub fn values(&self) -> &ArrayD<A> {
        &self.values
    }

    pub fn into_values(self) -> ArrayD<A> {
        self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn ndim(&self) -> usize {
        self.values.ndim()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// View of a two-axis array in its stored axis order.
    pub fn matrix(&self) -> Result<ArrayView2<'_, A>> {
        Ok(self.values.view().into_dimensionality::<Ix2>()?)
    }
}

impl<A: Clone> DataArray<A> {
    /// Returns the array with its axes permuted into `order`.
    ///
    /// # Errors
    /// [`EofError::Shape`] if `order` is not a permutation of the array's dimensions.
    pub fn transpose_to<S: AsRef<str>>(&self, order: &[S]) -> Result<Self> {
        if order.len() != self.dims.len() {
            return Err(EofError::Shape(format!(
                "cannot reorder dimensions {:?} into {} axes",
                self.dims,
                order.len()
            )));
        }
        let permutation = order
            .iter()
            .map(|d| self.require_axis(d.as_ref()))
            .collect::<Result<Vec<usize>>>()?;
        if permutation.iter().enumerate().all(|(i, &p)| i == p) {
            return Ok(self.clone());
        }
        let values = self
            .values
            .view()
            .permuted_axes(permutation.as_slice())
            .as_standard_layout()
            .into_owned();
        Ok(Self {
            name: self.name.clone(),
            dims: permutation.iter().map(|&p| self.dims[p].clone()).collect(),
            coords: permutation.iter().map(|&p| self.coords[p].clone()).collect(),
            values,
        })
    }

    /// Keeps the given positions along `dim`.
    pub fn select(&self, dim: &str, indices: &[usize]) -> Result<Self> {
        let axis = self.require_axis(dim)?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.values.shape()[axis]) {
            return Err(EofError::InvalidValue(format!(
                "position {bad} is out of bounds for dimension '{dim}' of length {}",
                self.values.shape()[axis]
            )));
        }
        let mut coords = self.coords.clone();
        coords[axis] = self.coords[axis].select(indices);
        Ok(Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords,
            values: self.values.select(Axis(axis), indices),
        })
    }

    /// Keeps the positions along `dim` whose mask entry is `true`.
    pub fn select_mask(&self, dim: &str, mask: &[bool]) -> Result<Self> {
        let indices: Vec<usize> = mask.iter().enumerate().filter(|(_, &keep)| keep).map(|(i, _)| i).collect();
        self.select(dim, &indices)
    }

    pub fn mapv<B, F>(&self, f: F) -> DataArray<B>
    where
        F: FnMut(A) -> B,
    {
        DataArray {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            values: self.values.mapv(f),
        }
    }

    /// Replaces the value buffer, keeping labels. The new values must have the same shape.
    pub fn with_values<B>(&self, values: ArrayD<B>) -> Result<DataArray<B>> {
        if values.shape() != self.values.shape() {
            return Err(EofError::Shape(format!(
                "replacement values of shape {:?} do not match array shape {:?}",
                values.shape(),
                self.values.shape()
            )));
        }
        Ok(DataArray {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            values,
        })
    }

    /// Owned copy of a two-axis array with `row` as the first axis.
    pub fn matrix_as(&self, row: &str, col: &str) -> Result<Array2<A>> {
        if self.ndim() != 2 {
            return Err(EofError::Shape(format!(
                "expected a two-dimensional array, got dimensions {:?}",
                self.dims
            )));
        }
        let row_axis = self.require_axis(row)?;
        self.require_axis(col)?;
        let view = self.values.view().into_dimensionality::<Ix2>()?;
        let oriented = if row_axis == 0 { view } else { view.reversed_axes() };
        Ok(oriented.as_standard_layout().into_owned())
    }

    /// The single value of a zero-dimensional array.
    pub fn item(&self) -> Option<A> {
        if self.values.len() == 1 {
            self.values.iter().next().cloned()
        } else {
            None
        }
    }
}

impl<A: Element> DataArray<A> {
    /// Aligns `dim` onto `target`, filling labels absent from the array with NaN.
    pub fn reindex(&self, dim: &str, target: &Coordinate) -> Result<Self> {
        let axis = self.require_axis(dim)?;
        if &self.coords[axis] == target {
            return Ok(self.clone());
        }
        let lookup = self.coords[axis].index_map();
        let mut shape = self.values.shape().to_vec();
        shape[axis] = target.len();
        let mut values = ArrayD::from_elem(IxDyn(&shape), A::nan());
        for (new_index, label) in target.iter().enumerate() {
            if let Some(&old_index) = lookup.get(label) {
                values
                    .index_axis_mut(Axis(axis), new_index)
                    .assign(&self.values.index_axis(Axis(axis), old_index));
            }
        }
        let mut coords = self.coords.clone();
        coords[axis] = target.clone();
        Ok(Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords,
            values,
        })
    }
}

/// An ordered collection of named variables.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset<A> {
    variables: Vec<(String, DataArray<A>)>,
}

impl<A> Dataset<A> {
    pub fn new() -> Self {
        Self { variables: Vec::new() }
    }

    /// Adds a variable, replacing any variable of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, mut array: DataArray<A>) {
        let name = name.into();
        array.set_name(Some(name.clone()));
        match self.variables.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = array,
            None => self.variables.push((name, array)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DataArray<A>> {
        self.variables.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn names(&self) -> Vec<String> {
        self.variables.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataArray<A>)> {
        self.variables.iter().map(|(n, a)| (n.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl<A> FromIterator<(String, DataArray<A>)> for Dataset<A> {
    fn from_iter<I: IntoIterator<Item = (String, DataArray<A>)>>(iter: I) -> Self {
        let mut dataset = Dataset::new();
        for (name, array) in iter {
            dataset.insert(name, array);
        }
        dataset
    }
}

/// Which container variant a [`DataObject`] was, so results can be returned in the same shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    Array { name: Option<String> },
    Dataset(Vec<String>),
    List(usize),
}

/// Model input and output: a single array, a dataset of named variables, or a list of arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataObject<A> {
    Array(DataArray<A>),
    Dataset(Dataset<A>),
    List(Vec<DataArray<A>>),
}

impl<A> DataObject<A> {
    pub fn layout(&self) -> Layout {
        match self {
            DataObject::Array(a) => Layout::Array { name: a.name.clone() },
            DataObject::Dataset(ds) => Layout::Dataset(ds.names()),
            DataObject::List(items) => Layout::List(items.len()),
        }
    }

    /// The arrays in container order.
    pub fn arrays(&self) -> Vec<&DataArray<A>> {
        match self {
            DataObject::Array(a) => vec![a],
            DataObject::Dataset(ds) => ds.variables.iter().map(|(_, a)| a).collect(),
            DataObject::List(items) => items.iter().collect(),
        }
    }

    pub fn into_arrays(self) -> Vec<DataArray<A>> {
        match self {
            DataObject::Array(a) => vec![a],
            DataObject::Dataset(ds) => ds.variables.into_iter().map(|(_, a)| a).collect(),
            DataObject::List(items) => items,
        }
    }

    /// Rebuilds a container of the given layout from arrays in container order.
    pub fn from_layout(layout: &Layout, arrays: Vec<DataArray<A>>) -> Result<Self> {
        let expected = match layout {
            Layout::Array { .. } => 1,
            Layout::Dataset(names) => names.len(),
            Layout::List(n) => *n,
        };
        if arrays.len() != expected {
            return Err(EofError::Shape(format!(
                "layout {layout:?} needs {expected} arrays, got {}",
                arrays.len()
            )));
        }
        Ok(match layout {
            Layout::Array { name } => {
                let mut arrays = arrays;
                let mut array = arrays.remove(0);
                array.set_name(name.clone());
                DataObject::Array(array)
            }
            Layout::Dataset(names) => DataObject::Dataset(names.iter().cloned().zip(arrays).collect()),
            Layout::List(_) => DataObject::List(arrays),
        })
    }

    pub fn as_array(&self) -> Option<&DataArray<A>> {
        match self {
            DataObject::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<DataArray<A>> {
        match self {
            DataObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// True when the container holds no arrays or any array has no values.
    pub fn is_empty(&self) -> bool {
        let arrays = self.arrays();
        arrays.is_empty() || arrays.iter().any(|a| a.is_empty())
    }

    /// Applies `f` to every array, keeping the layout.
    pub fn try_map<B, F>(&self, mut f: F) -> Result<DataObject<B>>
    where
        F: FnMut(&DataArray<A>) -> Result<DataArray<B>>,
    {
        let mapped = self.arrays().into_iter().map(&mut f).collect::<Result<Vec<_>>>()?;
        DataObject::from_layout(&self.layout(), mapped)
    }
}

impl<A> From<DataArray<A>> for DataObject<A> {
    fn from(array: DataArray<A>) -> Self {
        DataObject::Array(array)
    }
}

impl<A> From<Dataset<A>> for DataObject<A> {
    fn from(dataset: Dataset<A>) -> Self {
        DataObject::Dataset(dataset)
    }
}

impl<A> From<Vec<DataArray<A>>> for DataObject<A> {
    fn from(items: Vec<DataArray<A>>) -> Self {
        DataObject::List(items)
    }
}

/// Numeric element of a decomposition: `f64` for the real models, `c64` for the
/// Hilbert-extended complex ones.
pub trait Element:
    Scalar<Real = f64> + Lapack + ScalarOperand + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn nan() -> Self;

    fn is_missing(&self) -> bool;

    /// Phase angle in `[-pi, pi]`.
    fn angle(&self) -> f64 {
        self.im().atan2(self.re())
    }

    fn into_payload(array: DataArray<Self>) -> Payload;

    fn from_payload(payload: &Payload) -> Option<&DataArray<Self>>;
}

impl Element for f64 {
    fn nan() -> Self {
        f64::NAN
    }

    fn is_missing(&self) -> bool {
        f64::is_nan(*self)
    }

    fn into_payload(array: DataArray<Self>) -> Payload {
        Payload::Real(array)
    }

    fn from_payload(payload: &Payload) -> Option<&DataArray<Self>> {
        match payload {
            Payload::Real(a) => Some(a),
            Payload::Complex(_) => None,
        }
    }
}

impl Element for c64 {
    fn nan() -> Self {
        c64::new(f64::NAN, f64::NAN)
    }

    fn is_missing(&self) -> bool {
        self.re.is_nan() || self.im.is_nan()
    }

    fn into_payload(array: DataArray<Self>) -> Payload {
        Payload::Complex(array)
    }

    fn from_payload(payload: &Payload) -> Option<&DataArray<Self>> {
        match payload {
            Payload::Complex(a) => Some(a),
            Payload::Real(_) => None,
        }
    }
}

/// Conjugate transpose of a matrix.
pub(crate) fn conj_t<A: Element>(matrix: &ArrayView2<'_, A>) -> Array2<A> {
    matrix.t().mapv(|v| v.conj())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grid() -> DataArray<f64> {
        DataArray::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            &["time", "x"],
            vec![Coordinate::from_ints([10, 20]), Coordinate::from_strs(["a", "b", "c"])],
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_mismatched_coordinates() {
        let result = DataArray::new(array![[1.0, 2.0]], &["time", "x"], vec![Coordinate::range(2), Coordinate::range(2)]);
        assert!(matches!(result, Err(EofError::Shape(_))));
        let repeated = DataArray::with_default_coords(array![[1.0, 2.0]], &["x", "x"]);
        assert!(matches!(repeated, Err(EofError::Shape(_))));
    }

    #[test]
    fn transpose_moves_labels_with_axes() {
        let t = grid().transpose_to(&["x", "time"]).unwrap();
        assert_eq!(t.dims(), &["x".to_string(), "time".to_string()]);
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.values()[[2, 1]], 6.0);
        assert_eq!(t.coord("x").unwrap().get(2), Some(&Label::from("c")));
    }

    #[test]
    fn reindex_fills_missing_labels_with_nan() {
        let target = Coordinate::from_strs(["c", "z", "a"]);
        let r = grid().reindex("x", &target).unwrap();
        assert_eq!(r.values()[[0, 0]], 3.0);
        assert!(r.values()[[0, 1]].is_nan());
        assert_eq!(r.values()[[1, 2]], 4.0);
    }

    #[test]
    fn product_builds_row_major_tuples() {
        let a = Coordinate::from_ints([0, 1]);
        let b = Coordinate::from_strs(["u", "v", "w"]);
        let p = Coordinate::product(&[&a, &b]);
        assert_eq!(p.len(), 6);
        assert_eq!(p.get(1), Some(&Label::Tuple(vec![Label::Int(0), Label::from("v")])));
        assert_eq!(p.get(3), Some(&Label::Tuple(vec![Label::Int(1), Label::from("u")])));
        assert_eq!(Coordinate::product(&[&a]), a);
    }

    #[test]
    fn float_labels_hash_bitwise() {
        let coord = Coordinate::from_floats([0.5, f64::NAN]);
        assert_eq!(coord.get_index(&Label::Float(f64::NAN)), Some(1));
        assert_eq!(coord.index_map().len(), 2);
    }

    #[test]
    fn layout_round_trips_datasets() {
        let mut ds = Dataset::new();
        ds.insert("sst", grid());
        ds.insert("slp", grid());
        let obj = DataObject::from(ds);
        let layout = obj.layout();
        let rebuilt = DataObject::from_layout(&layout, obj.clone().into_arrays()).unwrap();
        assert_eq!(rebuilt, obj);
        assert_eq!(layout, Layout::Dataset(vec!["sst".into(), "slp".into()]));
    }

    #[test]
    fn complex_angle_stays_in_range() {
        let z = c64::new(-1.0, -0.0);
        assert!(z.angle().abs() <= std::f64::consts::PI);
        assert_eq!((-2.0f64).angle(), std::f64::consts::PI);
        assert!(c64::nan().is_missing());
    }
}
