//! Threshold-based per-pixel cloud classification.
//!
//! Purely combinational: for each pixel the six intermediate tests and the
//! land/water-branched cloud decision are evaluated once, and every output
//! channel (flags plus the diagnostic channels) is filled from that single
//! evaluation.

use crate::auxdata::tables::{ClassifAux, RayleighAux};
use crate::core::rayleigh::RayleighCorrection;
use crate::types::{
    correct_sea_level_pressure, CancelToken, Channel, ChannelView, ClassFlags, MaskView,
    PixelGeometry, ScreenError, ScreenResult, Window, B442, B753, B775, B865, B890, NUM_BANDS,
};
use ndarray::Array2;

/// Classification thresholds; every value is a recognized configuration
/// option with the documented default.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClassificationParams {
    /// Pressure difference below the barometric estimate that marks low
    /// pressure over land (hPa)
    pub p1_threshold: f64,
    /// Absolute pressure threshold of the scattering test over water (hPa)
    pub pscatt_threshold: f64,
    /// Base reflectance threshold of the second bright test
    pub rho442_threshold: f64,
    /// Angle-dependent increment of the second bright test
    pub delta_rho442_threshold: f64,
    /// Reflectance floor of the low-pressure test over land
    pub rho753_threshold: f64,
    /// Band-ratio threshold of the low-pressure test over water
    pub ratio753_775_threshold: f64,
    /// Snow/ice index threshold
    pub mdsi_threshold: f64,
}

impl Default for ClassificationParams {
    fn default() -> Self {
        Self {
            p1_threshold: 125.0,
            pscatt_threshold: 700.0,
            rho442_threshold: 0.03,
            delta_rho442_threshold: 0.03,
            rho753_threshold: 0.1,
            ratio753_775_threshold: 0.15,
            mdsi_threshold: 0.01,
        }
    }
}

/// Source channels for one classification tile
pub struct ClassificationInputs<'a> {
    pub window: Window,
    /// Top-of-atmosphere reflectance, one view per spectral channel
    pub rho_toa: Vec<ChannelView<'a>>,
    /// Radiances of the bright and slope test channels, for the
    /// saturation escape hatches
    pub radiance_bright: ChannelView<'a>,
    pub radiance_slope_1: ChannelView<'a>,
    pub radiance_slope_2: ChannelView<'a>,
    pub sza: ChannelView<'a>,
    pub vza: ChannelView<'a>,
    pub saa: ChannelView<'a>,
    pub vaa: ChannelView<'a>,
    pub altitude: ChannelView<'a>,
    /// Mean sea-level pressure (hPa)
    pub sea_level_pressure: ChannelView<'a>,
    /// Cloud-top pressure estimate (hPa)
    pub ctp: ChannelView<'a>,
    /// Barometric surface pressure (hPa)
    pub pressure_baro: ChannelView<'a>,
    /// Apparent pressure from the O2 band ratio (hPa)
    pub pressure_p1: ChannelView<'a>,
    /// Fully corrected scattering pressure from the O2 band ratio (hPa)
    pub pressure_pscatt: ChannelView<'a>,
    pub is_land: MaskView<'a>,
    pub is_invalid: MaskView<'a>,
}

/// Output channels of one classification tile. Invalid pixels stay zero.
pub struct ClassificationOutputs {
    pub flags: Array2<u16>,
    pub cloud_top_pressure: Channel,
    /// Altitude-corrected surface pressure used by the decision logic
    pub surface_pressure: Channel,
    pub scattering_angle: Channel,
    /// Angle-dependent threshold term of the second bright test
    pub rho442_threshold_term: Channel,
    pub mdsi: Channel,
}

/// Per-pixel cloud classifier
pub struct PixelClassifier<'a> {
    engine: RayleighCorrection<'a>,
    rayleigh_aux: &'a RayleighAux,
    aux: &'a ClassifAux,
    params: ClassificationParams,
}

impl<'a> PixelClassifier<'a> {
    pub fn new(
        rayleigh_aux: &'a RayleighAux,
        aux: &'a ClassifAux,
        params: ClassificationParams,
    ) -> Self {
        Self {
            engine: RayleighCorrection::new(rayleigh_aux),
            rayleigh_aux,
            aux,
            params,
        }
    }

    /// Classify one tile.
    pub fn process(
        &self,
        inputs: &ClassificationInputs<'_>,
        cancel: &CancelToken,
    ) -> ScreenResult<ClassificationOutputs> {
        let (height, width) = (inputs.window.height, inputs.window.width);
        if inputs.rho_toa.len() != NUM_BANDS {
            return Err(ScreenError::Processing(format!(
                "expected {} reflectance channels, got {}",
                NUM_BANDS,
                inputs.rho_toa.len()
            )));
        }
        log::debug!("Pixel classification for tile {}", inputs.window);

        let mut out = ClassificationOutputs {
            flags: Array2::zeros((height, width)),
            cloud_top_pressure: Array2::zeros((height, width)),
            surface_pressure: Array2::zeros((height, width)),
            scattering_angle: Array2::zeros((height, width)),
            rho442_threshold_term: Array2::zeros((height, width)),
            mdsi: Array2::zeros((height, width)),
        };

        let mut tau = [0.0; NUM_BANDS];
        let mut refl = [0.0; NUM_BANDS];
        let mut rho_ag = [0.0; NUM_BANDS];

        for row in 0..height {
            if cancel.is_cancelled() {
                return Err(ScreenError::Cancelled);
            }
            for col in 0..width {
                if inputs.is_invalid[[row, col]] {
                    continue;
                }
                let geom = PixelGeometry::from_angles(
                    inputs.sza[[row, col]] as f64,
                    inputs.vza[[row, col]] as f64,
                    inputs.saa[[row, col]] as f64,
                    inputs.vaa[[row, col]] as f64,
                );
                let air_mass = geom.air_mass();
                let is_land = inputs.is_land[[row, col]];

                // sea-level pressure is corrected to the surface over land
                let slp = inputs.sea_level_pressure[[row, col]] as f64;
                let press = if is_land {
                    correct_sea_level_pressure(
                        slp,
                        inputs.altitude[[row, col]] as f64,
                        self.rayleigh_aux.press_scale_height,
                    )
                } else {
                    slp
                };

                // Rayleigh-corrected reflectance for this pixel
                let phase =
                    self.engine.phase_fourier(geom.cos_s, geom.cos_v, geom.sin_s, geom.sin_v);
                self.engine.optical_thickness(press, &mut tau);
                self.engine.reflectance(&geom, air_mass, &phase, &tau, &mut refl);
                for band in 0..NUM_BANDS {
                    rho_ag[band] = inputs.rho_toa[band][[row, col]] as f64 - refl[band];
                }

                let tests = self.spectral_tests(inputs, &geom, &rho_ag, is_land, row, col);

                let mut flags = ClassFlags::default();
                flags.set(ClassFlags::BRIGHT, tests.bright);
                flags.set(ClassFlags::BRIGHT_RC, tests.bright_rc);
                flags.set(ClassFlags::BRIGHT_TOA, tests.bright_toa);
                flags.set(ClassFlags::SLOPE_1, tests.slope_1);
                flags.set(ClassFlags::SLOPE_2, tests.slope_2);
                flags.set(ClassFlags::HIGH_MDSI, tests.high_mdsi);

                let is_cloud = if is_land {
                    let low_p_p1 = (inputs.pressure_p1[[row, col]] as f64)
                        < (inputs.pressure_baro[[row, col]] as f64 - self.params.p1_threshold)
                        && inputs.rho_toa[B753][[row, col]] as f64 > self.params.rho753_threshold;
                    flags.set(ClassFlags::LOW_P_P1, low_p_p1);
                    (tests.bright || low_p_p1) && !tests.high_mdsi
                } else {
                    let ratio = inputs.rho_toa[B753][[row, col]] as f64
                        / inputs.rho_toa[B775][[row, col]] as f64;
                    let low_p_pscatt = (inputs.pressure_pscatt[[row, col]] as f64)
                        < self.params.pscatt_threshold
                        && ratio > self.params.ratio753_775_threshold;
                    flags.set(ClassFlags::LOW_P_PSCATT, low_p_pscatt);
                    (tests.bright || low_p_pscatt) && !(tests.high_mdsi && tests.bright)
                };
                flags.set(ClassFlags::CLOUD, is_cloud);
                flags.set(ClassFlags::SNOW_ICE, tests.high_mdsi && tests.bright);

                out.flags[[row, col]] = flags.0;
                out.cloud_top_pressure[[row, col]] = inputs.ctp[[row, col]];
                out.surface_pressure[[row, col]] = press.max(0.0) as f32;
                out.scattering_angle[[row, col]] = geom.scattering_angle() as f32;
                out.rho442_threshold_term[[row, col]] =
                    self.rho442_threshold_term(&geom) as f32;
                out.mdsi[[row, col]] = tests.mdsi as f32;
            }
        }
        Ok(out)
    }

    /// The six boolean intermediate tests for one pixel
    fn spectral_tests(
        &self,
        inputs: &ClassificationInputs<'_>,
        geom: &PixelGeometry,
        rho_ag: &[f64; NUM_BANDS],
        is_land: bool,
        row: usize,
        col: usize,
    ) -> SpectralTests {
        let aux = self.aux;

        // brightness threshold on the Rayleigh-corrected reflectance,
        // interpolated over the viewing geometry
        let table = if is_land { &aux.bright_thr_land } else { &aux.bright_thr_water };
        let coords = [
            table.coord(0, geom.sza),
            table.coord(1, geom.vza),
            table.coord(2, geom.delta_azimuth),
        ];
        let rhorc_442_thr = table.interpolate(&[], &coords);

        let bright_rc = rho_ag[aux.band_bright_n] > rhorc_442_thr
            || self.is_saturated(inputs.radiance_bright[[row, col]], aux.band_bright_n);

        let slope_1 = self.slope_flag(
            rho_ag,
            aux.band_slope_n_1,
            aux.band_slope_d_1,
            aux.slope_1_low_thr,
            aux.slope_1_high_thr,
            inputs.radiance_slope_1[[row, col]],
        );
        let slope_2 = self.slope_flag(
            rho_ag,
            aux.band_slope_n_2,
            aux.band_slope_d_2,
            aux.slope_2_low_thr,
            aux.slope_2_high_thr,
            inputs.radiance_slope_2[[row, col]],
        );

        let (bright, bright_toa) = if is_land {
            (bright_rc && slope_1 && slope_2, false)
        } else {
            let bright_toa = inputs.rho_toa[B442][[row, col]] as f64
                > self.rho442_threshold_term(geom);
            (bright_rc || bright_toa, bright_toa)
        };

        let mdsi = compute_mdsi(
            inputs.rho_toa[B865][[row, col]] as f64,
            inputs.rho_toa[B890][[row, col]] as f64,
        );
        let high_mdsi = mdsi > self.params.mdsi_threshold;

        SpectralTests { bright, bright_rc, bright_toa, slope_1, slope_2, high_mdsi, mdsi }
    }

    /// Spectral-slope test against a companion channel; non-positive
    /// denominators fail the test outright.
    fn slope_flag(
        &self,
        rho_ag: &[f64; NUM_BANDS],
        band_n: usize,
        band_d: usize,
        low: f64,
        high: f64,
        radiance_n: f32,
    ) -> bool {
        if rho_ag[band_d] <= 0.0 {
            return false;
        }
        let slope = rho_ag[band_n] / rho_ag[band_d];
        (slope >= low && slope <= high) || self.is_saturated(radiance_n, band_n)
    }

    fn is_saturated(&self, radiance: f32, band: usize) -> bool {
        radiance as f64 > self.aux.saturation[band]
    }

    /// Angle-dependent threshold of the second bright test
    fn rho442_threshold_term(&self, geom: &PixelGeometry) -> f64 {
        let theta_scatt = geom.scattering_angle().to_radians();
        let cos_theta = theta_scatt.cos();
        self.params.rho442_threshold + self.params.delta_rho442_threshold * cos_theta * cos_theta
    }
}

struct SpectralTests {
    bright: bool,
    bright_rc: bool,
    bright_toa: bool,
    slope_1: bool,
    slope_2: bool,
    high_mdsi: bool,
    mdsi: f64,
}

/// Normalized-difference snow index between the two near-infrared channels
pub fn compute_mdsi(rho865: f64, rho890: f64) -> f64 {
    (rho865 - rho890) / (rho865 + rho890)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auxdata::LookupTable;
    use crate::core::rayleigh::tests::synthetic_aux as rayleigh_aux;
    use crate::types::{B412, B490};
    use ndarray::Array2;

    pub(crate) fn classif_aux() -> ClassifAux {
        let constant_table = |value: f64| {
            LookupTable::new(vec![2, 2, 2], vec![value; 8])
                .unwrap()
                .with_axis(0, vec![0.0, 90.0])
                .unwrap()
                .with_axis(1, vec![0.0, 90.0])
                .unwrap()
                .with_axis(2, vec![0.0, 180.0])
                .unwrap()
        };
        ClassifAux {
            band_bright_n: B442,
            band_slope_n_1: B490,
            band_slope_d_1: B412,
            band_slope_n_2: B775,
            band_slope_d_2: B865,
            slope_1_low_thr: 0.0,
            slope_1_high_thr: 10.0,
            slope_2_low_thr: 0.0,
            slope_2_high_thr: 10.0,
            saturation: [1000.0; NUM_BANDS],
            bright_thr_land: constant_table(0.3),
            bright_thr_water: constant_table(0.2),
        }
    }

    struct Fixture {
        rho: Vec<Array2<f32>>,
        radiance: Array2<f32>,
        zeros: Array2<f32>,
        slp: Array2<f32>,
        ctp: Array2<f32>,
        baro: Array2<f32>,
        p1: Array2<f32>,
        pscatt: Array2<f32>,
        land: Array2<bool>,
        invalid: Array2<bool>,
    }

    impl Fixture {
        fn new(reflectance: f32) -> Self {
            let (h, w) = (4, 4);
            Self {
                rho: vec![Array2::from_elem((h, w), reflectance); NUM_BANDS],
                radiance: Array2::zeros((h, w)),
                zeros: Array2::zeros((h, w)),
                slp: Array2::from_elem((h, w), 1013.25),
                ctp: Array2::from_elem((h, w), 500.0),
                baro: Array2::from_elem((h, w), 1013.0),
                p1: Array2::from_elem((h, w), 1000.0),
                pscatt: Array2::from_elem((h, w), 1000.0),
                land: Array2::from_elem((h, w), false),
                invalid: Array2::from_elem((h, w), false),
            }
        }

        fn inputs(&self) -> ClassificationInputs<'_> {
            ClassificationInputs {
                window: Window::new(0, 0, 4, 4),
                rho_toa: self.rho.iter().map(|a| a.view()).collect(),
                radiance_bright: self.radiance.view(),
                radiance_slope_1: self.radiance.view(),
                radiance_slope_2: self.radiance.view(),
                sza: self.zeros.view(),
                vza: self.zeros.view(),
                saa: self.zeros.view(),
                vaa: self.zeros.view(),
                altitude: self.zeros.view(),
                sea_level_pressure: self.slp.view(),
                ctp: self.ctp.view(),
                pressure_baro: self.baro.view(),
                pressure_p1: self.p1.view(),
                pressure_pscatt: self.pscatt.view(),
                is_land: self.land.view(),
                is_invalid: self.invalid.view(),
            }
        }
    }

    fn classify(fixture: &Fixture) -> ClassificationOutputs {
        let raux = rayleigh_aux();
        let caux = classif_aux();
        let classifier = PixelClassifier::new(&raux, &caux, ClassificationParams::default());
        classifier.process(&fixture.inputs(), &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_bright_land_scene_is_cloud() {
        let mut fixture = Fixture::new(0.8);
        fixture.land.fill(true);
        let out = classify(&fixture);
        for &bits in out.flags.iter() {
            let flags = ClassFlags(bits);
            assert!(flags.contains(ClassFlags::BRIGHT));
            assert!(flags.contains(ClassFlags::CLOUD));
            assert!(!flags.contains(ClassFlags::SNOW_ICE));
        }
    }

    #[test]
    fn test_dark_water_scene_is_clear() {
        let fixture = Fixture::new(0.01);
        let out = classify(&fixture);
        for &bits in out.flags.iter() {
            let flags = ClassFlags(bits);
            assert!(!flags.contains(ClassFlags::CLOUD));
            assert!(!flags.contains(ClassFlags::BRIGHT));
        }
    }

    #[test]
    fn test_snow_ice_implies_high_mdsi_and_bright() {
        // strong 865/890 contrast drives the snow index up
        let mut fixture = Fixture::new(0.8);
        fixture.land.fill(true);
        fixture.rho[B890].fill(0.4);
        let out = classify(&fixture);
        for &bits in out.flags.iter() {
            let flags = ClassFlags(bits);
            if flags.contains(ClassFlags::SNOW_ICE) {
                assert!(flags.contains(ClassFlags::HIGH_MDSI));
                assert!(flags.contains(ClassFlags::BRIGHT));
            }
        }
        // at least one pixel must have triggered
        assert!(out
            .flags
            .iter()
            .any(|&bits| ClassFlags(bits).contains(ClassFlags::SNOW_ICE)));
    }

    #[test]
    fn test_water_cloud_excludes_snow_ice() {
        // every pixel bright with high snow index, over water: the cloud
        // rule must reject all snow/ice pixels
        let mut fixture = Fixture::new(0.8);
        fixture.rho[B890].fill(0.4);
        let out = classify(&fixture);
        for &bits in out.flags.iter() {
            let flags = ClassFlags(bits);
            if flags.contains(ClassFlags::CLOUD) {
                assert!(!flags.contains(ClassFlags::SNOW_ICE));
            }
            if flags.contains(ClassFlags::SNOW_ICE) {
                assert!(!flags.contains(ClassFlags::CLOUD));
            }
        }
    }

    #[test]
    fn test_low_pressure_land_rule() {
        // dark land scene: cloud must come from the pressure test alone
        let mut fixture = Fixture::new(0.2);
        fixture.land.fill(true);
        // keep slopes/brightness low but 753 nm reflectance above floor
        fixture.p1.fill(500.0);
        fixture.baro.fill(1013.0);
        let out = classify(&fixture);
        for &bits in out.flags.iter() {
            let flags = ClassFlags(bits);
            assert!(flags.contains(ClassFlags::LOW_P_P1));
            assert!(flags.contains(ClassFlags::CLOUD));
        }
    }

    #[test]
    fn test_invalid_pixels_untouched() {
        let mut fixture = Fixture::new(0.8);
        fixture.invalid[[1, 1]] = true;
        let out = classify(&fixture);
        assert_eq!(out.flags[[1, 1]], 0);
        assert_eq!(out.mdsi[[1, 1]], 0.0);
        assert_ne!(out.flags[[0, 0]], 0);
    }
}
