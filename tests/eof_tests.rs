// tests/eof_tests.rs

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use efficient_eof::diagnostics::orthogonality_error;
use efficient_eof::preprocessing::Sanitizer;
use efficient_eof::{
    ComplexEof, Coordinate, DataArray, DataObject, Dataset, Eof, EofError, ModeSelector, ModelParams, MODE_DIM,
};
use ndarray::Array2;

fn fitted(n_modes: usize) -> Eof {
    let mut model = Eof::new(ModelParams::with_n_modes(n_modes));
    model.fit(&low_rank_field(7), &["time"], None).unwrap();
    model
}

#[test]
fn two_modes_capture_the_low_rank_field() {
    let model = fitted(3);
    let ratio = model.explained_variance_ratio().unwrap().into_values();
    assert!(ratio[[0]] + ratio[[1]] > 0.95, "ratio = {ratio:?}");
    assert!(ratio[[2]] < 0.01);
}

#[test]
fn components_and_scores_share_the_mode_axis() {
    let model = fitted(3);
    let components = model.components().unwrap().into_array().unwrap();
    let scores = model.scores(true).unwrap();
    assert_eq!(components.dims(), [MODE_DIM, "x", "y"]);
    assert_eq!(components.shape(), &[3, NX, NY]);
    assert_eq!(scores.dims(), [MODE_DIM, "time"]);
    assert_eq!(scores.shape(), &[3, N_TIME]);
    assert_eq!(components.coord(MODE_DIM), Some(&Coordinate::modes(3)));
    assert_eq!(scores.coord(MODE_DIM), components.coord(MODE_DIM));
}

#[test]
fn spectrum_is_sorted_and_bounded() {
    let model = fitted(4);
    let singular_values = model.singular_values().unwrap().values().iter().copied().collect::<Vec<f64>>();
    assert!(singular_values.iter().all(|s| *s >= 0.0));
    assert_non_increasing(&singular_values);
    let ratio = model.explained_variance_ratio().unwrap().values().iter().copied().collect::<Vec<f64>>();
    assert_non_increasing(&ratio);
    assert!(ratio.iter().sum::<f64>() <= 1.0 + 1e-12);
    let variance: f64 = model.explained_variance().unwrap().into_values().sum();
    assert!(variance <= model.total_variance().unwrap() * (1.0 + 1e-12));
}

#[test]
fn stacked_components_are_orthonormal() {
    let model = fitted(3);
    let components = model.data().get::<f64>("components").unwrap();
    let v = components.matrix_as("feature", MODE_DIM).unwrap();
    assert!(orthogonality_error(&v.view()) < 1e-10);
}

#[test]
fn all_modes_reconstruct_the_input() {
    let data = low_rank_field(3);
    let mut model = Eof::new(ModelParams::with_n_modes(NX * NY));
    model.fit(&data, &["time"], None).unwrap();
    let rebuilt = values_of(model.inverse_transform(ModeSelector::All).unwrap());
    let original = values_of(data);
    let scale = original.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    for (a, b) in rebuilt.iter().zip(original.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-8 * scale);
    }
}

#[test]
fn deferred_fit_matches_eager_fit_and_compute_is_idempotent() {
    let eager = fitted(3);
    let mut lazy = Eof::new(ModelParams {
        compute: false,
        ..ModelParams::with_n_modes(3)
    });
    lazy.fit(&low_rank_field(7), &["time"], None).unwrap();
    assert!(!lazy.data().is_computed("singular_values"));
    lazy.compute(false).unwrap();
    assert!(lazy.data().is_computed("singular_values"));
    let first = lazy.singular_values().unwrap();
    lazy.compute(true).unwrap();
    assert_eq!(lazy.singular_values().unwrap(), first);
    for (a, b) in first.values().iter().zip(eager.singular_values().unwrap().values().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
    }
}

#[test]
fn randomized_solver_agrees_with_the_exact_one() {
    let exact = fitted(2);
    let mut randomized = Eof::new(ModelParams {
        solver: efficient_eof::Solver::Randomized,
        random_state: Some(42),
        ..ModelParams::with_n_modes(2)
    });
    randomized.fit(&low_rank_field(7), &["time"], None).unwrap();
    let a = exact.singular_values().unwrap();
    let b = randomized.singular_values().unwrap();
    for (x, y) in a.values().iter().zip(b.values().iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-6 * x.abs().max(1.0));
    }
}

#[test]
fn nan_only_grid_points_come_back_as_nan() {
    let mut values = low_rank_values(11);
    for t in 0..N_TIME {
        values[[t, 4, 0]] = f64::NAN;
    }
    let mut model = Eof::new(ModelParams::with_n_modes(2));
    model.fit(&labeled(values).into(), &["time"], None).unwrap();
    let components = model.components().unwrap().into_array().unwrap();
    for mode in 0..2 {
        assert!(components.values()[[mode, 4, 0]].is_nan());
        assert!(components.values()[[mode, 0, 0]].is_finite());
    }
}

#[test]
fn isolated_nans_are_rejected() {
    let mut values = low_rank_values(11);
    values[[3, 1, 1]] = f64::NAN;
    let mut model = Eof::new(ModelParams::with_n_modes(2));
    let err = model.fit(&labeled(values).into(), &["time"], None);
    assert!(matches!(err, Err(EofError::InvalidValue(_))));
}

#[test]
fn too_many_modes_and_unfitted_access_are_errors() {
    let mut model = Eof::new(ModelParams::with_n_modes(30));
    assert!(matches!(
        model.fit(&low_rank_field(1), &["time"], None),
        Err(EofError::InvalidValue(_))
    ));
    let unfitted = Eof::new(ModelParams::with_n_modes(2));
    assert!(matches!(unfitted.components(), Err(EofError::NotFitted(_))));
    assert!(matches!(fitted(2).inverse_transform(3), Err(EofError::InvalidValue(_))));
}

#[test]
fn datasets_keep_their_variable_names() {
    let mut dataset = Dataset::new();
    dataset.insert("temperature", labeled(low_rank_values(5)));
    dataset.insert("pressure", labeled(low_rank_values(6)));
    let mut model = Eof::new(ModelParams::with_n_modes(2));
    model.fit(&DataObject::from(dataset), &["time"], None).unwrap();
    match model.components().unwrap() {
        DataObject::Dataset(out) => {
            assert_eq!(out.names(), vec!["temperature".to_string(), "pressure".to_string()]);
            assert_eq!(out.get("pressure").unwrap().shape(), &[2, NX, NY]);
        }
        other => panic!("expected a dataset, got {:?}", other.layout()),
    }
}

#[test]
fn lists_of_arrays_come_back_as_lists() {
    let grid = labeled(low_rank_values(3));
    let stations = random_field(N_TIME, 4, "station", 9).into_array().unwrap();
    let input = DataObject::from(vec![grid, stations]);
    let n_features = NX * NY + 4;
    let mut model = Eof::new(ModelParams::with_n_modes(n_features));
    model.fit(&input, &["time"], None).unwrap();

    match model.components().unwrap() {
        DataObject::List(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].shape(), &[n_features, NX, NY]);
            assert_eq!(items[1].dims(), [MODE_DIM, "station"]);
        }
        other => panic!("expected a list, got {:?}", other.layout()),
    }
    let rebuilt = model.inverse_transform(ModeSelector::All).unwrap();
    assert_eq!(rebuilt.arrays().len(), 2);
    for (a, b) in values_of(rebuilt).iter().zip(values_of(input).iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
    }
}

#[test]
fn projecting_the_training_data_returns_the_scores() {
    let model = fitted(2);
    let projected = model.transform(&low_rank_field(7), true).unwrap();
    let scores = model.scores(true).unwrap();
    assert_eq!(projected.dims(), scores.dims());
    for (a, b) in projected.values().iter().zip(scores.values().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }
}

#[test]
fn complex_amplitudes_and_phases_are_in_range() {
    let mut model = ComplexEof::new(ModelParams::with_n_modes(2));
    model.fit(&low_rank_field(9), &["time"], None).unwrap();
    let pi = std::f64::consts::PI;
    let amplitude = values_of(model.components_amplitude().unwrap());
    let phase = values_of(model.components_phase().unwrap());
    assert!(amplitude.iter().all(|a| *a >= 0.0));
    assert!(phase.iter().all(|p| (-pi..=pi).contains(p)));
    let score_phase = model.scores_phase(false).unwrap();
    assert!(score_phase.values().iter().all(|p| (-pi..=pi).contains(p)));
    assert!(model.scores_amplitude(true).unwrap().values().iter().all(|a| *a >= 0.0));
}

#[test]
fn sanitizer_rejects_unseen_feature_coordinates() {
    let fitted_on = DataArray::from_matrix(
        Array2::<f64>::ones((4, 3)),
        ["sample", "feature"],
        [Coordinate::range(4), Coordinate::range(3)],
    )
    .unwrap();
    let shifted = DataArray::from_matrix(
        Array2::<f64>::ones((4, 3)),
        ["sample", "feature"],
        [Coordinate::range(4), Coordinate::from_ints([1, 2, 3])],
    )
    .unwrap();
    let mut sanitizer = Sanitizer::new("sample", "feature");
    sanitizer.fit(&fitted_on).unwrap();
    assert!(matches!(sanitizer.transform(&shifted), Err(EofError::Shape(_))));
}
