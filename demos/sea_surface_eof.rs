use efficient_eof::models::McaAlgorithm;
use efficient_eof::{
    ComplexEof, Coordinate, DataArray, DataObject, Eof, Mca, McaRotator, ModelParams, Persist, Result, RotatorParams,
};
use ndarray::Array3;
use std::f64::consts::PI;
use std::sync::Arc;

const N_MONTHS: usize = 240;
const N_LAT: usize = 18;
const N_LON: usize = 36;

fn latitudes() -> Coordinate {
    Coordinate::from_floats((0..N_LAT).map(|i| -85.0 + 10.0 * i as f64))
}

fn longitudes() -> Coordinate {
    Coordinate::from_floats((0..N_LON).map(|i| 5.0 + 10.0 * i as f64))
}

/// Synthetic monthly sea surface temperature anomalies: a seasonal cycle, an
/// equatorial oscillation with a 4-year period and an eastward travelling wave.
fn sea_surface_temperature() -> Result<DataArray<f64>> {
    let values = Array3::from_shape_fn((N_MONTHS, N_LAT, N_LON), |(t, i, j)| {
        let lat = (-85.0 + 10.0 * i as f64).to_radians();
        let lon = (5.0 + 10.0 * j as f64).to_radians();
        let month = t as f64;
        let seasonal = 2.0 * lat.sin() * (2.0 * PI * month / 12.0).cos();
        let oscillation = 1.5 * (-(lat / 0.3).powi(2)).exp() * (lon - PI).cos() * (2.0 * PI * month / 48.0).sin();
        let wave = 0.5 * lat.cos() * (2.0 * lon - 2.0 * PI * month / 30.0).sin();
        seasonal + oscillation + wave
    });
    DataArray::new(values, &["time", "lat", "lon"], vec![Coordinate::range(N_MONTHS), latitudes(), longitudes()])
}

/// Sea level pressure responding to every SST signal with a lag of three months.
fn sea_level_pressure() -> Result<DataArray<f64>> {
    let values = Array3::from_shape_fn((N_MONTHS, N_LAT, N_LON), |(t, i, j)| {
        let lat = (-85.0 + 10.0 * i as f64).to_radians();
        let lon = (5.0 + 10.0 * j as f64).to_radians();
        let month = t as f64 - 3.0;
        let seasonal = -1.2 * (2.0 * lat).sin() * (2.0 * PI * month / 12.0).cos();
        let oscillation = (-(lat / 0.5).powi(2)).exp() * lon.sin() * (2.0 * PI * month / 48.0).sin();
        let wave = 0.4 * lat.cos() * (2.0 * lon + 0.5 - 2.0 * PI * month / 30.0).cos();
        seasonal + oscillation + wave + 0.3 * (lat * 3.0).cos()
    });
    DataArray::new(values, &["time", "lat", "lon"], vec![Coordinate::range(N_MONTHS), latitudes(), longitudes()])
}

fn main() -> Result<()> {
    let sst: DataObject<f64> = sea_surface_temperature()?.with_name("sst").into();
    let slp: DataObject<f64> = sea_level_pressure()?.with_name("slp").into();

    let params = ModelParams {
        n_modes: 4,
        use_coslat: true,
        ..ModelParams::default()
    };

    let mut eof = Eof::new(params.clone());
    eof.fit(&sst, &["time"], None)?;
    println!("EOF explained variance ratio: {:?}", eof.explained_variance_ratio()?.values());
    let components = eof.components()?;
    println!("EOF components: {:?}", components.arrays()[0].shape());

    let mut ceof = ComplexEof::new(params.clone());
    ceof.fit(&sst, &["time"], None)?;
    println!("Complex EOF explained variance ratio: {:?}", ceof.explained_variance_ratio()?.values());
    let phase = ceof.scores_phase(true)?;
    let leading_phase: Vec<f64> = phase.values().iter().take(6).copied().collect();
    println!("Phase of the leading complex mode, first six months: {:?}", leading_phase);

    let mut mca = Mca::new(params);
    mca.fit(&sst, &slp, &["time"], None, None)?;
    println!("MCA squared covariance fraction: {:?}", mca.squared_covariance_fraction()?.values());

    let mut rotator = McaRotator::for_mca(RotatorParams {
        power: 4.0,
        ..RotatorParams::with_n_modes(3)
    });
    rotator.fit(Arc::new(mca))?;
    println!("Rotated explained variance: {:?}", rotator.explained_variance()?.values());

    let path = std::env::temp_dir().join("sea_surface_mca_rotator.bin");
    rotator.save(&path, false)?;
    let restored = McaRotator::<McaAlgorithm>::load(&path)?;
    let (projected, _) = restored.transform(Some(&sst), None)?;
    if let Some(projected) = projected {
        println!("Projection of the SST field onto the rotated modes: {:?}", projected.shape());
    }
    std::fs::remove_file(&path)?;
    Ok(())
}
