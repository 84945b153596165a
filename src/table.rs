// src/table.rs

//! Row/column tables as labeled arrays.

use crate::data_array::{Coordinate, DataArray};
use crate::error::{EofError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A two-dimensional table: one row per `index` label, one column per `columns` label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub index: Coordinate,
    pub columns: Coordinate,
    pub values: Array2<f64>,
}

impl Table {
    pub fn new(index: Coordinate, columns: Coordinate, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (index.len(), columns.len()) {
            return Err(EofError::Shape(format!(
                "table values of shape {:?} do not match {} rows and {} columns",
                values.dim(),
                index.len(),
                columns.len()
            )));
        }
        Ok(Self { index, columns, values })
    }
}

/// Converts tables to `(index, columns)` arrays and back, remembering the columns seen at fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableTransformer {
    index_name: String,
    columns_name: String,
    columns: Option<Coordinate>,
}

impl Default for TableTransformer {
    fn default() -> Self {
        Self::new("index", "columns")
    }
}

impl TableTransformer {
    pub fn new(index_name: &str, columns_name: &str) -> Self {
        Self {
            index_name: index_name.to_string(),
            columns_name: columns_name.to_string(),
            columns: None,
        }
    }

    pub fn fit(&mut self, table: &Table) -> &mut Self {
        self.columns = Some(table.columns.clone());
        self
    }

    /// # Errors
    /// [`EofError::NotFitted`] before `fit`, [`EofError::Shape`] when the columns differ
    /// from the fitted ones.
    pub fn transform(&self, table: &Table) -> Result<DataArray<f64>> {
        let fitted = self.columns.as_ref().ok_or(EofError::NotFitted("TableTransformer"))?;
        if fitted != &table.columns {
            return Err(EofError::Shape(format!(
                "table has columns {:?}, expected the fitted columns {:?}",
                table.columns.labels(),
                fitted.labels()
            )));
        }
        DataArray::from_matrix(
            table.values.clone(),
            [self.index_name.as_str(), self.columns_name.as_str()],
            [table.index.clone(), table.columns.clone()],
        )
    }

    pub fn fit_transform(&mut self, table: &Table) -> Result<DataArray<f64>> {
        self.fit(table).transform(table)
    }

    /// Turns an `(index, columns)` array back into a table.
    pub fn inverse_transform(&self, data: &DataArray<f64>) -> Result<Table> {
        let values = data.matrix_as(&self.index_name, &self.columns_name)?;
        let coord = |dim: &str| data.coord(dim).cloned().unwrap_or_default();
        Table::new(coord(&self.index_name), coord(&self.columns_name), values)
    }
}
