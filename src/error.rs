// src/error.rs

use thiserror::Error;

/// Errors raised while fitting, transforming, rotating or persisting a model.
#[derive(Debug, Error)]
pub enum EofError {
    /// Invalid parameter combination, detected before any computation starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Dimension or coordinate mismatch between inputs, or between an input and the fitted state.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A parameter or an input value is outside the admissible range.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The operation is not defined for this model variant.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The model has not been fitted yet.
    #[error("{0} is not fitted yet; call `fit` first")]
    NotFitted(&'static str),

    /// The entry was stored as a placeholder when the model was saved.
    #[error("entry '{0}' was saved as a placeholder and holds no data")]
    Placeholder(String),

    #[error("linear algebra failure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("array shape error: {0}")]
    Ndarray(#[from] ndarray::ShapeError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, EofError>;

impl From<serde_json::Error> for EofError {
    fn from(e: serde_json::Error) -> Self {
        EofError::Serialization(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for EofError {
    fn from(e: bincode::error::EncodeError) -> Self {
        EofError::Serialization(format!("failed to encode model: {e}"))
    }
}

impl From<bincode::error::DecodeError> for EofError {
    fn from(e: bincode::error::DecodeError) -> Self {
        EofError::Serialization(format!("failed to decode model: {e}"))
    }
}
