// src/models/mod.rs

//! EOF, MCA and their complex and rotated variants.

pub mod base;
pub mod cross;
pub mod eof;
pub mod mca;
pub mod mca_rotator;

use crate::decomposer::{Decomposer, Solver, SolverKwargs};
use crate::error::{EofError, Result};
use crate::preprocessing::PreprocessorParams;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub use base::{DecompositionAlgorithm, DecompositionModel};
pub use cross::{CrossDecompositionAlgorithm, CrossDecompositionModel};
pub use eof::{ComplexEof, ComplexEofAlgorithm, Eof, EofAlgorithm};
pub use mca::{ComplexMca, ComplexMcaAlgorithm, Mca, McaAlgorithm};
pub use mca_rotator::{ComplexMcaRotator, McaRotator, RotatorParams};

/// Parameters shared by every decomposition model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Number of modes to keep.
    pub n_modes: usize,
    /// Remove the per-feature mean before decomposing.
    pub center: bool,
    /// Divide every feature by its standard deviation.
    pub standardize: bool,
    /// Weight features by the square root of the cosine of their latitude.
    pub use_coslat: bool,
    /// Reduce each field of a cross decomposition to this many principal components
    /// before forming the cross-covariance. Ignored by single-field models.
    #[serde(default)]
    pub n_pca_modes: Option<usize>,
    /// Run the decomposition during `fit`. When false, results are computed on
    /// [`DecompositionModel::compute`] or on first access.
    pub compute: bool,
    /// Log progress at `info` level instead of `debug`.
    pub verbose: bool,
    /// Name of the stacked sample dimension.
    pub sample_name: String,
    /// Name of the stacked feature dimension.
    pub feature_name: String,
    pub solver: Solver,
    /// Seed of the randomized solver.
    pub random_state: Option<u64>,
    pub solver_kwargs: SolverKwargs,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_modes: 10,
            center: true,
            standardize: false,
            use_coslat: false,
            n_pca_modes: None,
            compute: true,
            verbose: false,
            sample_name: "sample".to_string(),
            feature_name: "feature".to_string(),
            solver: Solver::Auto,
            random_state: None,
            solver_kwargs: SolverKwargs::default(),
        }
    }
}

impl ModelParams {
    pub fn with_n_modes(n_modes: usize) -> Self {
        Self {
            n_modes,
            ..Self::default()
        }
    }

    pub(crate) fn preprocessor_params(&self) -> PreprocessorParams {
        PreprocessorParams {
            sample_name: self.sample_name.clone(),
            feature_name: self.feature_name.clone(),
            with_center: self.center,
            with_std: self.standardize,
            with_coslat: self.use_coslat,
        }
    }

    pub(crate) fn decomposer(&self) -> Decomposer {
        Decomposer::new(self.n_modes, self.solver, self.random_state, self.solver_kwargs)
    }

    /// Decomposer of the per-field PCA step, when one is configured.
    pub(crate) fn pca_decomposer(&self) -> Option<Decomposer> {
        self.n_pca_modes
            .map(|k| Decomposer::new(k, self.solver, self.random_state, self.solver_kwargs))
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.n_modes == 0 {
            return Err(EofError::Configuration("n_modes must be at least 1".to_string()));
        }
        if self.sample_name == self.feature_name {
            return Err(EofError::Configuration(format!(
                "sample_name and feature_name must differ, both are '{}'",
                self.sample_name
            )));
        }
        if let Some(k) = self.n_pca_modes {
            if k < self.n_modes {
                return Err(EofError::Configuration(format!(
                    "n_pca_modes = {k} must be at least n_modes = {}",
                    self.n_modes
                )));
            }
        }
        Ok(())
    }
}

/// Which modes an operation uses. Mode numbers are 1-based.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ModeSelector {
    #[default]
    All,
    Mode(usize),
    Modes(Vec<usize>),
    Range(RangeInclusive<usize>),
}

impl ModeSelector {
    /// Zero-based positions of the selected modes among `n_modes`.
    ///
    /// # Errors
    /// [`EofError::InvalidValue`] for mode 0, modes above `n_modes` and empty selections.
    pub fn resolve(&self, n_modes: usize) -> Result<Vec<usize>> {
        let modes: Vec<usize> = match self {
            ModeSelector::All => (1..=n_modes).collect(),
            ModeSelector::Mode(m) => vec![*m],
            ModeSelector::Modes(ms) => ms.clone(),
            ModeSelector::Range(r) => r.clone().collect(),
        };
        if modes.is_empty() {
            return Err(EofError::InvalidValue("mode selection is empty".to_string()));
        }
        if let Some(bad) = modes.iter().find(|&&m| m == 0 || m > n_modes) {
            return Err(EofError::InvalidValue(format!(
                "mode {bad} is out of range, valid modes are 1..={n_modes}"
            )));
        }
        Ok(modes.into_iter().map(|m| m - 1).collect())
    }
}

impl From<usize> for ModeSelector {
    fn from(mode: usize) -> Self {
        ModeSelector::Mode(mode)
    }
}

impl From<Vec<usize>> for ModeSelector {
    fn from(modes: Vec<usize>) -> Self {
        ModeSelector::Modes(modes)
    }
}

impl From<RangeInclusive<usize>> for ModeSelector {
    fn from(range: RangeInclusive<usize>) -> Self {
        ModeSelector::Range(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_resolve_to_zero_based_positions() {
        assert_eq!(ModeSelector::All.resolve(3).unwrap(), vec![0, 1, 2]);
        assert_eq!(ModeSelector::from(2).resolve(3).unwrap(), vec![1]);
        assert_eq!(ModeSelector::from(vec![3, 1]).resolve(3).unwrap(), vec![2, 0]);
        assert_eq!(ModeSelector::from(2..=3).resolve(3).unwrap(), vec![1, 2]);
    }

    #[test]
    fn out_of_range_modes_are_rejected() {
        assert!(matches!(ModeSelector::from(0).resolve(3), Err(EofError::InvalidValue(_))));
        assert!(matches!(ModeSelector::from(4).resolve(3), Err(EofError::InvalidValue(_))));
        #[allow(clippy::reversed_empty_ranges)]
        let empty = ModeSelector::from(3..=2);
        assert!(matches!(empty.resolve(3), Err(EofError::InvalidValue(_))));
    }

    #[test]
    fn params_translate_to_preprocessor_settings() {
        let params = ModelParams {
            standardize: true,
            ..ModelParams::with_n_modes(4)
        };
        let pre = params.preprocessor_params();
        assert!(pre.with_center && pre.with_std && !pre.with_coslat);
        assert_eq!(params.decomposer().n_modes, 4);
        assert!(params.check().is_ok());
        assert!(ModelParams::with_n_modes(0).check().is_err());
    }

    #[test]
    fn pca_modes_must_cover_the_requested_modes() {
        let reduced = ModelParams {
            n_pca_modes: Some(6),
            ..ModelParams::with_n_modes(4)
        };
        assert!(reduced.check().is_ok());
        assert_eq!(reduced.pca_decomposer().map(|d| d.n_modes), Some(6));
        assert!(ModelParams::with_n_modes(4).pca_decomposer().is_none());
        let too_few = ModelParams {
            n_pca_modes: Some(3),
            ..ModelParams::with_n_modes(4)
        };
        assert!(matches!(too_few.check(), Err(EofError::Configuration(_))));
    }
}
