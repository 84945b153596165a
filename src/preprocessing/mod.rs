// src/preprocessing/mod.rs

//! Turns labeled inputs into the `(sample, feature)` matrix the solvers work on,
//! and maps every result back.

pub mod preprocessor;
pub mod sanitizer;
pub mod scaler;
pub mod stacker;

pub use preprocessor::{Preprocessor, PreprocessorParams, SampleContext, Transformed};
pub use sanitizer::Sanitizer;
pub use scaler::Scaler;
pub use stacker::Stacker;
