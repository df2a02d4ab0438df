//! End-to-end scenarios through the full screening pipeline.

mod common;

use common::{aux_store, geocoding, SceneFixture};
use nimbus::geo::MEAN_EARTH_RADIUS;
use nimbus::{CancelToken, ClassFlags, ScreenError, ScreeningConfig, ScreeningPipeline};

#[test]
fn test_uniform_bright_land_scene_is_all_cloud() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (w, h) = (32, 32);
    let fixture = SceneFixture::new(w, h, 0.8);
    let gc = geocoding(w, h);
    let pipeline = ScreeningPipeline::new(aux_store(), ScreeningConfig::default());

    let out = pipeline
        .process_scene(&fixture.inputs(&gc), 16, &CancelToken::new())
        .unwrap();

    for &bits in out.flags.iter() {
        let flags = ClassFlags(bits);
        assert!(flags.contains(ClassFlags::CLOUD));
        assert!(flags.contains(ClassFlags::BRIGHT));
        assert!(!flags.contains(ClassFlags::CLOUD_SHADOW));
        // every pixel is cloud, so no pixel may stay buffer-flagged
        assert!(!flags.contains(ClassFlags::CLOUD_BUFFER));
    }
}

#[test]
fn test_single_cloud_casts_shadow_down_sun() {
    let (w, h) = (48, 48);
    let mut fixture = SceneFixture::new(w, h, 0.01);
    // one bright pixel becomes the only cloud
    for rho in fixture.rho.iter_mut() {
        rho[[8, 8]] = 0.8;
    }
    let gc = geocoding(w, h);
    let pipeline = ScreeningPipeline::new(aux_store(), ScreeningConfig::default());

    let out = pipeline
        .process_scene(&fixture.inputs(&gc), 48, &CancelToken::new())
        .unwrap();

    let clouds: Vec<(usize, usize)> = out
        .flags
        .indexed_iter()
        .filter(|(_, &bits)| ClassFlags(bits).contains(ClassFlags::CLOUD))
        .map(|(pos, _)| pos)
        .collect();
    assert_eq!(clouds, vec![(8, 8)]);

    let shadows: Vec<(usize, usize)> = out
        .flags
        .indexed_iter()
        .filter(|(_, &bits)| ClassFlags(bits).contains(ClassFlags::CLOUD_SHADOW))
        .map(|(pos, _)| pos)
        .collect();
    assert_eq!(shadows.len(), 1, "shadows at {:?}", shadows);

    // sun azimuth 0: the offset is purely along the meridian, at
    // tan(sza) * cloud height for the default 500 hPa cloud top
    let (row, col) = shadows[0];
    assert_eq!(col, 8);
    let height_m = -8000.0 * (500.0f64 / 1013.0).ln();
    let offset_deg = (height_m * 30f64.to_radians().tan() / MEAN_EARTH_RADIUS).to_degrees();
    let expected_rows = offset_deg / 1e-3;
    assert!(
        (row as f64 - 8.0 - expected_rows).abs() <= 1.5,
        "row = {}, expected offset {:.1}",
        row,
        expected_rows
    );
}

#[test]
fn test_cloud_buffer_surrounds_isolated_cloud() {
    let (w, h) = (48, 48);
    let mut fixture = SceneFixture::new(w, h, 0.01);
    for rho in fixture.rho.iter_mut() {
        rho[[20, 20]] = 0.8;
    }
    let gc = geocoding(w, h);
    let pipeline = ScreeningPipeline::new(aux_store(), ScreeningConfig::default());

    let out = pipeline
        .process_scene(&fixture.inputs(&gc), 48, &CancelToken::new())
        .unwrap();

    for r in 0..h as i32 {
        for c in 0..w as i32 {
            let bits = out.flags[[r as usize, c as usize]];
            let dist = (r - 20).abs().max((c - 20).abs());
            if dist == 0 {
                assert_ne!(bits & ClassFlags::CLOUD, 0);
                assert_eq!(bits & ClassFlags::CLOUD_BUFFER, 0);
            } else if dist <= 2 {
                assert_ne!(bits & ClassFlags::CLOUD_BUFFER, 0, "({}, {})", r, c);
            } else {
                assert_eq!(bits & ClassFlags::CLOUD_BUFFER, 0, "({}, {})", r, c);
            }
        }
    }
}

#[test]
fn test_tile_seams_are_invisible() {
    // the same scene processed with different tile sizes must agree
    let (w, h) = (40, 40);
    let mut fixture = SceneFixture::new(w, h, 0.01);
    for rho in fixture.rho.iter_mut() {
        rho[[13, 27]] = 0.8;
        rho[[28, 5]] = 0.8;
    }
    let gc = geocoding(w, h);
    let pipeline = ScreeningPipeline::new(aux_store(), ScreeningConfig::default());

    let whole = pipeline
        .process_scene(&fixture.inputs(&gc), 40, &CancelToken::new())
        .unwrap();
    let tiled = pipeline
        .process_scene(&fixture.inputs(&gc), 13, &CancelToken::new())
        .unwrap();

    assert_eq!(whole.flags, tiled.flags);
    assert_eq!(whole.pressure_baro, tiled.pressure_baro);
    assert_eq!(whole.pressure_fub, tiled.pressure_fub);
}

#[test]
fn test_cancellation_aborts_scene() {
    let (w, h) = (32, 32);
    let fixture = SceneFixture::new(w, h, 0.8);
    let gc = geocoding(w, h);
    let pipeline = ScreeningPipeline::new(aux_store(), ScreeningConfig::default());

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = pipeline.process_scene(&fixture.inputs(&gc), 16, &cancel);
    assert!(matches!(result, Err(ScreenError::Cancelled)));
}

#[test]
fn test_invalid_pixels_stay_clear() {
    let (w, h) = (32, 32);
    let mut fixture = SceneFixture::new(w, h, 0.8);
    fixture.invalid[[3, 3]] = true;
    let gc = geocoding(w, h);
    let pipeline = ScreeningPipeline::new(aux_store(), ScreeningConfig::default());

    let out = pipeline
        .process_scene(&fixture.inputs(&gc), 32, &CancelToken::new())
        .unwrap();
    assert_eq!(out.flags[[3, 3]] & ClassFlags::CLOUD, 0);
    assert_eq!(out.pressure_baro[[3, 3]], 0.0);
    assert_eq!(out.pressure_fub[[3, 3]], 0.0);
    assert_ne!(out.flags[[4, 4]] & ClassFlags::CLOUD, 0);
}
