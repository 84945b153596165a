// tests/common/mod.rs

#![allow(dead_code)]

use efficient_eof::{Coordinate, DataArray, DataObject};
use ndarray::{Array2, Array3};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

pub const N_TIME: usize = 50;
pub const NX: usize = 5;
pub const NY: usize = 5;

/// `(time, x, y)` field made of two orthogonal spatial patterns, each driven by its own
/// time series, plus weak Gaussian noise.
pub fn low_rank_values(seed: u64) -> Array3<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Array3::<f64>::random_using((N_TIME, NX, NY), StandardNormal, &mut rng);
    Array3::from_shape_fn((N_TIME, NX, NY), |(t, x, y)| {
        let first = 3.0 * (0.3 * t as f64).sin() * (x as f64 - 2.0);
        let second = 2.0 * (0.7 * t as f64).cos() * (y as f64 - 2.0);
        first + second + 0.01 * noise[[t, x, y]]
    })
}

pub fn labeled(values: Array3<f64>) -> DataArray<f64> {
    let (nt, nx, ny) = values.dim();
    DataArray::new(
        values,
        &["time", "x", "y"],
        vec![
            Coordinate::range(nt),
            Coordinate::from_floats((0..nx).map(|i| i as f64 * 2.5)),
            Coordinate::from_floats((0..ny).map(|i| i as f64 * 2.5)),
        ],
    )
    .unwrap()
}

pub fn low_rank_field(seed: u64) -> DataObject<f64> {
    labeled(low_rank_values(seed)).into()
}

/// Standard normal `(time, feature)` field.
pub fn random_field(n_time: usize, n_features: usize, dim: &str, seed: u64) -> DataObject<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let values = Array2::<f64>::random_using((n_time, n_features), StandardNormal, &mut rng);
    DataArray::new(
        values,
        &["time", dim],
        vec![Coordinate::range(n_time), Coordinate::range(n_features)],
    )
    .unwrap()
    .into()
}

/// Two fields that share one driving time series.
pub fn coupled_fields(n_time: usize, seed: u64) -> (DataObject<f64>, DataObject<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let driver = ndarray::Array1::<f64>::random_using(n_time, StandardNormal, &mut rng);
    let noise1 = Array2::<f64>::random_using((n_time, 6), StandardNormal, &mut rng);
    let noise2 = Array2::<f64>::random_using((n_time, 4), StandardNormal, &mut rng);
    let left = Array2::from_shape_fn((n_time, 6), |(t, x)| driver[t] * (x as f64 + 1.0) + 0.2 * noise1[[t, x]]);
    let right = Array2::from_shape_fn((n_time, 4), |(t, y)| -driver[t] * (4.0 - y as f64) + 0.2 * noise2[[t, y]]);
    let a = DataArray::new(left, &["time", "x"], vec![Coordinate::range(n_time), Coordinate::range(6)]).unwrap();
    let b = DataArray::new(right, &["time", "y"], vec![Coordinate::range(n_time), Coordinate::range(4)]).unwrap();
    (a.into(), b.into())
}

pub fn values_of(object: DataObject<f64>) -> Vec<f64> {
    object
        .into_arrays()
        .into_iter()
        .flat_map(|a| a.into_values().into_iter().collect::<Vec<_>>())
        .collect()
}

pub fn assert_non_increasing(values: &[f64]) {
    for pair in values.windows(2) {
        assert!(pair[0] + 1e-12 >= pair[1], "{} < {}", pair[0], pair[1]);
    }
}
