// tests/persistence_tests.rs

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use efficient_eof::models::McaAlgorithm;
use efficient_eof::{
    ComplexEof, Eof, EofError, Mca, McaRotator, ModeSelector, ModelParams, Padding, Persist, RotatorParams,
};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn eof_round_trip_without_input_data() {
    let mut model = Eof::new(ModelParams::with_n_modes(3));
    model.fit(&low_rank_field(2), &["time"], None).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("eof.bin");
    model.save(&path, false).unwrap();

    let loaded = Eof::load(&path).unwrap();
    assert_eq!(loaded.params(), model.params());
    assert_eq!(loaded.components().unwrap(), model.components().unwrap());
    assert_eq!(loaded.scores(true).unwrap(), model.scores(true).unwrap());
    assert!(loaded.data().is_placeholder("input_data"));
    assert!(matches!(
        loaded.data().get::<f64>("input_data"),
        Err(EofError::Placeholder(_))
    ));

    let a = values_of(loaded.inverse_transform(ModeSelector::All).unwrap());
    let b = values_of(model.inverse_transform(ModeSelector::All).unwrap());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
    }
    let projected = loaded.transform(&low_rank_field(2), true).unwrap();
    assert_eq!(projected.shape(), &[3, N_TIME]);
}

#[test]
fn saving_with_data_keeps_the_input() {
    let mut model = Eof::new(ModelParams::with_n_modes(2));
    model.fit(&low_rank_field(4), &["time"], None).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("eof_with_data.bin");
    model.save(&path, true).unwrap();
    let loaded = Eof::load(&path).unwrap();
    assert!(!loaded.data().is_placeholder("input_data"));
    assert_eq!(
        loaded.data().get::<f64>("input_data").unwrap(),
        model.data().get::<f64>("input_data").unwrap()
    );
}

#[test]
fn deferred_results_are_computed_before_saving() {
    let mut model = Eof::new(ModelParams {
        compute: false,
        ..ModelParams::with_n_modes(2)
    });
    model.fit(&low_rank_field(4), &["time"], None).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("deferred.bin");
    model.save(&path, false).unwrap();
    let loaded = Eof::load(&path).unwrap();
    assert!(loaded.data().is_computed("explained_variance_ratio"));
    assert_eq!(
        loaded.explained_variance_ratio().unwrap(),
        model.explained_variance_ratio().unwrap()
    );
}

#[test]
fn complex_eof_keeps_its_padding_settings() {
    let mut model = ComplexEof::with_padding(ModelParams::with_n_modes(2), Padding::None, 0.2);
    model.fit(&low_rank_field(6), &["time"], None).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("complex_eof.bin");
    model.save(&path, false).unwrap();
    let loaded = ComplexEof::load(&path).unwrap();
    assert_eq!(loaded.algorithm().padding, Padding::None);
    assert_eq!(loaded.get_params().unwrap(), model.get_params().unwrap());
    assert_eq!(loaded.components().unwrap(), model.components().unwrap());
}

#[test]
fn loading_a_different_model_type_fails() {
    let mut model = Eof::new(ModelParams::with_n_modes(2));
    model.fit(&low_rank_field(1), &["time"], None).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("eof.bin");
    model.save(&path, false).unwrap();
    assert!(matches!(Mca::load(&path), Err(EofError::Serialization(_))));
    assert!(matches!(
        Eof::load(dir.path().join("missing.bin")),
        Err(EofError::Io(_))
    ));
}

#[test]
fn mca_round_trip_needs_data_for_patterns() {
    let (left, right) = coupled_fields(40, 17);
    let mut model = Mca::new(ModelParams::with_n_modes(3));
    model.fit(&left, &right, &["time"], None, None).unwrap();
    let dir = tempdir().unwrap();

    let path = dir.path().join("mca.bin");
    model.save(&path, false).unwrap();
    let loaded = Mca::load(&path).unwrap();
    assert_eq!(loaded.singular_values().unwrap(), model.singular_values().unwrap());
    assert!(matches!(loaded.homogeneous_patterns(), Err(EofError::Placeholder(_))));

    let with_data = dir.path().join("mca_data.bin");
    model.save(&with_data, true).unwrap();
    let loaded = Mca::load(&with_data).unwrap();
    assert_eq!(loaded.homogeneous_patterns().unwrap(), model.homogeneous_patterns().unwrap());
}

#[test]
fn rotator_is_saved_together_with_its_model() {
    let (left, right) = coupled_fields(40, 19);
    let mut model = Mca::new(ModelParams::with_n_modes(3));
    model.fit(&left, &right, &["time"], None, None).unwrap();
    let mut rotator = McaRotator::for_mca(RotatorParams::with_n_modes(2));
    rotator.fit(Arc::new(model)).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("rotator.bin");
    rotator.save(&path, false).unwrap();
    let loaded = McaRotator::<McaAlgorithm>::load(&path).unwrap();
    assert_eq!(loaded.params(), rotator.params());
    assert_eq!(loaded.explained_variance().unwrap(), rotator.explained_variance().unwrap());
    assert_eq!(
        loaded.model().unwrap().singular_values().unwrap(),
        rotator.model().unwrap().singular_values().unwrap()
    );

    let (a, _) = loaded.transform(Some(&left), None).unwrap();
    let (b, _) = rotator.transform(Some(&left), None).unwrap();
    for (x, y) in a.unwrap().values().iter().zip(b.unwrap().values().iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
    }
    assert!(matches!(Mca::load(&path), Err(EofError::Serialization(_))));
}
