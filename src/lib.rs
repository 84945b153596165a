// Empirical orthogonal functions and maximum covariance analysis

#![doc = include_str!("../README.md")]

pub mod data_array;
pub mod data_container;
pub mod decomposer;
pub mod diagnostics;
pub mod error;
pub mod hilbert;
pub mod linalg_backends;
pub mod models;
pub mod persistence;
pub mod preprocessing;
pub mod rotation;
pub mod table;

pub use data_array::{Coordinate, DataArray, DataObject, Dataset, Element, Label, MODE_DIM};
pub use data_container::DataContainer;
pub use decomposer::{Decomposer, Solver, SolverKwargs};
pub use error::{EofError, Result};
pub use hilbert::Padding;
pub use models::cross::Field;
pub use models::{
    ComplexEof, ComplexMca, ComplexMcaRotator, CrossDecompositionModel, DecompositionModel, Eof, Mca, McaRotator,
    ModeSelector, ModelParams, RotatorParams,
};
pub use persistence::{ModelTree, Persist};
pub use preprocessing::{Preprocessor, PreprocessorParams};
pub use table::{Table, TableTransformer};
