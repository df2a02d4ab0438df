//! Aerosol apparent pressure from the O2 absorption-band ratio.
//!
//! The ratio of the reflectance inside the narrow O2 absorption window to a
//! reference continuum reflectance is inverted against precomputed
//! transmittance-vs-pressure-level tables. Four products build on each
//! other: the apparent pressure, the surface pressure (ratio corrected by
//! tabulated C coefficients), the Rayleigh-corrected pressure, and the
//! fully corrected pressure including the aerosol-Fresnel coupling.

use crate::auxdata::lut::linear_interp;
use crate::auxdata::tables::{
    LiseAux, StraylightTables, FILTER_WAVELENGTHS, GAUSSIAN_ANGLES, NUM_FILTERS, NUM_GAUSS,
    NUM_LAYERS,
};
use crate::auxdata::LookupTable;
use crate::core::rayleigh::RayleighCorrection;
use crate::types::{
    CancelToken, Channel, ChannelView, DetectorView, MaskView, PixelGeometry, ScreenError,
    ScreenResult, Window,
};
use ndarray::Array2;

/// Standard sea-surface pressure for the closed-form Rayleigh fallback
const STANDARD_SEA_SURFACE_PRESSURE: f64 = 1013.25;

/// The four pressure products, each adding one correction to the previous
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PressureProduct {
    /// Apparent pressure straight from the band ratio
    Apparent,
    /// Surface pressure, ratio corrected by the C coefficients
    Surface,
    /// Bottom pressure with Rayleigh scattering removed
    RayleighCorrected,
    /// Bottom pressure with Rayleigh and aerosol-Fresnel coupling removed
    FullyCorrected,
}

/// O2 absorption-band pressure estimator
pub struct O2PressureEstimator<'a> {
    aux: &'a LiseAux,
    /// Full multiple-scattering engine for the 761 nm Rayleigh reflectance;
    /// falls back to the closed-form single-scattering expression when absent
    rayleigh: Option<RayleighCorrection<'a>>,
    rayleigh_tau_761: f64,
}

impl<'a> O2PressureEstimator<'a> {
    pub fn new(aux: &'a LiseAux) -> Self {
        Self { aux, rayleigh: None, rayleigh_tau_761: 0.0 }
    }

    /// Attach the Rayleigh engine; `tau_761` is the Rayleigh optical
    /// thickness of the absorption channel at standard pressure.
    pub fn with_rayleigh(mut self, engine: RayleighCorrection<'a>, tau_761: f64) -> Self {
        self.rayleigh = Some(engine);
        self.rayleigh_tau_761 = tau_761;
        self
    }

    /// Compute one pressure product for one pixel.
    ///
    /// `rho753`/`rho761`/`rho778` are the reflectances of the reference,
    /// absorption and continuum channels; `w0` is the detector's O2-channel
    /// center wavelength.
    pub fn compute(
        &self,
        product: PressureProduct,
        geom: &PixelGeometry,
        rho753: f64,
        rho761: f64,
        rho778: f64,
        w0: f64,
        air_mass: f64,
    ) -> f64 {
        let filter = nearest_filter_index(w0);
        let gauss_s = nearest_gauss_index(geom.sza);
        let gauss_v = nearest_gauss_index(geom.vza);

        let cosphi = geom.delta_azimuth.to_radians().cos();
        // scattering angle, and the angle of the scattering-Fresnel coupling
        let theta = (-geom.cos_s * geom.cos_v - geom.sin_s * geom.sin_v * cosphi)
            .acos()
            .to_degrees();
        let xsi = (geom.cos_s * geom.cos_v - geom.sin_s * geom.sin_v * cosphi)
            .acos()
            .to_degrees();

        // reference reflectance interpolated to 761 nm
        let rho_ref = linear_interp(761.0, 753.0, 778.0, rho753, rho778);
        let to2_ratio = rho761 / rho_ref;

        if product == PressureProduct::Apparent {
            return self.pressure_interpolated(w0, geom.sza, geom.vza, filter, gauss_s, gauss_v, to2_ratio);
        }

        if product == PressureProduct::Surface {
            let table = &self.aux.c_coefficients;
            let coords = [table.coord(1, air_mass), table.coord(2, rho753)];
            let c = table.interpolate(&[filter], &coords);
            let eta = rho761 / rho753 * c;
            return self.pressure_interpolated(w0, geom.sza, geom.vza, filter, gauss_s, gauss_v, eta);
        }

        // Rayleigh reflectance at 761 nm
        let ray761 = match &self.rayleigh {
            Some(engine) => {
                let phase = engine.phase_fourier(geom.cos_s, geom.cos_v, geom.sin_s, geom.sin_v);
                engine.reflectance_single(self.rayleigh_tau_761, geom, air_mass, &phase)
            }
            None => closed_form_rayleigh(geom, theta, STANDARD_SEA_SURFACE_PRESSURE),
        };

        let tr_o2 = self.o2_transmittance(&self.aux.to2_ray, w0, geom.sza, geom.vza, filter, gauss_s, gauss_v);
        let to2_r_corrected = (rho761 - ray761 * tr_o2) / (rho_ref - ray761);

        if product == PressureProduct::RayleighCorrected {
            return self.pressure_interpolated(
                w0, geom.sza, geom.vza, filter, gauss_s, gauss_v, to2_r_corrected,
            );
        }

        // aerosol and Fresnel transmittances for the coupling correction
        let tr_aerosol =
            self.o2_transmittance(&self.aux.to2_aerosol, w0, geom.sza, geom.vza, filter, gauss_s, gauss_v);
        let tr_fresnel =
            self.o2_transmittance(&self.aux.to2_fresnel, w0, geom.sza, geom.vza, filter, gauss_s, gauss_v);

        let ind_sza = clamp_index(geom.sza, self.aux.fresnel_coefficients.len());
        let ind_vza = clamp_index(geom.vza, self.aux.fresnel_coefficients.len());
        let ind_theta = clamp_index(theta, self.aux.aerosol_phase.len());
        let ind_xsi = clamp_index(xsi, self.aux.aerosol_phase.len());

        // forward/backward scattering ratio of the aerosol phase function
        let pfb = self.aux.aerosol_phase[ind_xsi] / self.aux.aerosol_phase[ind_theta];
        let fresnel_s = self.aux.fresnel_coefficients[ind_sza];
        let fresnel_v = self.aux.fresnel_coefficients[ind_vza];

        let caf = 1.0 + pfb * (fresnel_s + fresnel_v);
        let coupled = (tr_aerosol + pfb * tr_fresnel * (fresnel_v + fresnel_s)) / caf;
        let to2_rf = to2_r_corrected * tr_aerosol / coupled;

        self.pressure_interpolated(w0, geom.sza, geom.vza, filter, gauss_s, gauss_v, to2_rf)
    }

    /// Invert the layer transmittance table for one filter and one angle
    /// pair: search from the lowest pressure layer down until the log ratio
    /// is crossed, interpolate between the bracketing layers, extrapolate
    /// from the two deepest layers when no crossing occurs.
    fn invert_layers(&self, filter: usize, gauss_s: usize, gauss_v: usize, ratio: f64) -> f64 {
        let atm = &self.aux.to2_atm;
        let levels = &self.aux.pressure_levels;
        let t = ratio.ln();

        let mut t1 = atm.value(&[0, filter, gauss_s, gauss_v]).ln();
        let mut p1 = levels[0];
        for layer in 1..NUM_LAYERS {
            let p2 = levels[layer];
            let t2 = atm.value(&[layer, filter, gauss_s, gauss_v]).ln();
            if t >= t2 {
                let slope = (p2 - p1) / (t2 - t1);
                return p2 + slope * (t - t2);
            }
            t1 = t2;
            p1 = p2;
        }

        let p1 = levels[NUM_LAYERS - 2];
        let p2 = levels[NUM_LAYERS - 1];
        let t1 = atm.value(&[NUM_LAYERS - 2, filter, gauss_s, gauss_v]).ln();
        let t2 = atm.value(&[NUM_LAYERS - 1, filter, gauss_s, gauss_v]).ln();
        let slope = (p2 - p1) / (t2 - t1);
        p2 + slope * (t - t2)
    }

    /// Pressure for the exact geometry: the inversion is evaluated at the
    /// four neighbouring Gaussian angle pairs of two adjacent filters and
    /// linearly interpolated in view angle, sun angle and wavelength.
    #[allow(clippy::too_many_arguments)]
    fn pressure_interpolated(
        &self,
        w0: f64,
        sza: f64,
        vza: f64,
        filter: usize,
        gauss_s: usize,
        gauss_v: usize,
        ratio: f64,
    ) -> f64 {
        let mut per_filter = [0.0; 2];
        for (k, value) in per_filter.iter_mut().enumerate() {
            let f = filter + k;
            let y1 = self.invert_layers(f, gauss_s, gauss_v, ratio);
            let y2 = self.invert_layers(f, gauss_s, gauss_v + 1, ratio);
            let z1 = interp_gauss(vza, gauss_v, y1, y2);
            let y1 = self.invert_layers(f, gauss_s + 1, gauss_v, ratio);
            let y2 = self.invert_layers(f, gauss_s + 1, gauss_v + 1, ratio);
            let z2 = interp_gauss(vza, gauss_v, y1, y2);
            *value = interp_gauss(sza, gauss_s, z1, z2);
        }
        linear_interp(
            w0,
            FILTER_WAVELENGTHS[filter],
            FILTER_WAVELENGTHS[filter + 1],
            per_filter[0],
            per_filter[1],
        )
    }

    /// Same angle/wavelength interpolation for a filter x angle x angle
    /// transmittance grid
    #[allow(clippy::too_many_arguments)]
    fn o2_transmittance(
        &self,
        table: &LookupTable,
        w0: f64,
        sza: f64,
        vza: f64,
        filter: usize,
        gauss_s: usize,
        gauss_v: usize,
    ) -> f64 {
        let mut per_filter = [0.0; 2];
        for (k, value) in per_filter.iter_mut().enumerate() {
            let f = filter + k;
            let z1 = interp_gauss(
                vza,
                gauss_v,
                table.value(&[f, gauss_s, gauss_v]),
                table.value(&[f, gauss_s, gauss_v + 1]),
            );
            let z2 = interp_gauss(
                vza,
                gauss_v,
                table.value(&[f, gauss_s + 1, gauss_v]),
                table.value(&[f, gauss_s + 1, gauss_v + 1]),
            );
            *value = interp_gauss(sza, gauss_s, z1, z2);
        }
        linear_interp(
            w0,
            FILTER_WAVELENGTHS[filter],
            FILTER_WAVELENGTHS[filter + 1],
            per_filter[0],
            per_filter[1],
        )
    }
}

/// Apply the straylight perturbation to the absorption-channel reflectance
pub fn straylight_correction(
    tables: &StraylightTables,
    detector: usize,
    rho753: f64,
    rho761: f64,
) -> f64 {
    let idx = detector.min(tables.coefficients.len() - 1);
    rho761 + tables.coefficients[idx] * rho753
}

/// Closed-form single-scattering Rayleigh reflectance at 761 nm
fn closed_form_rayleigh(geom: &PixelGeometry, theta: f64, pressure: f64) -> f64 {
    let xx = 4.0 * geom.cos_s * geom.cos_v;
    let n_pressure = pressure / STANDARD_SEA_SURFACE_PRESSURE;
    let cos_theta = theta.to_radians().cos();
    let l1 = 0.0246 * 0.75 * (1.0 + cos_theta * cos_theta);
    n_pressure * l1 / xx
}

/// Linear interpolation between two adjacent Gaussian angle grid points
fn interp_gauss(angle: f64, lower: usize, y1: f64, y2: f64) -> f64 {
    linear_interp(angle, GAUSSIAN_ANGLES[lower], GAUSSIAN_ANGLES[lower + 1], y1, y2)
}

/// Index of the filter whose wavelength interval brackets `w0`, clamped to
/// the first/last valid interval
pub fn nearest_filter_index(w0: f64) -> usize {
    if w0 <= FILTER_WAVELENGTHS[0] {
        return 0;
    }
    if w0 >= FILTER_WAVELENGTHS[NUM_FILTERS - 1] {
        return NUM_FILTERS - 2;
    }
    for i in 1..NUM_FILTERS {
        if FILTER_WAVELENGTHS[i] >= w0 {
            return i - 1;
        }
    }
    NUM_FILTERS - 2
}

/// Index of the nearest Gaussian angle, clamped so an upper neighbour
/// always exists
pub fn nearest_gauss_index(angle: f64) -> usize {
    if angle <= GAUSSIAN_ANGLES[0] {
        return 0;
    }
    if angle >= GAUSSIAN_ANGLES[NUM_GAUSS - 2] {
        return NUM_GAUSS - 2;
    }
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &g) in GAUSSIAN_ANGLES.iter().enumerate() {
        let d = (angle - g).abs();
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best.min(NUM_GAUSS - 2)
}

fn clamp_index(angle: f64, len: usize) -> usize {
    (angle.round().max(0.0) as usize).min(len - 1)
}

/// Source channels for one O2 pressure tile
pub struct LiseInputs<'a> {
    pub window: Window,
    pub detector: DetectorView<'a>,
    pub sza: ChannelView<'a>,
    pub vza: ChannelView<'a>,
    pub saa: ChannelView<'a>,
    pub vaa: ChannelView<'a>,
    pub rho753: ChannelView<'a>,
    pub rho761: ChannelView<'a>,
    pub rho778: ChannelView<'a>,
    pub is_invalid: MaskView<'a>,
}

/// Tile processor for the O2 absorption-band estimator
pub struct LiseProcessor<'a> {
    estimator: O2PressureEstimator<'a>,
    aux: &'a LiseAux,
    straylight: Option<&'a StraylightTables>,
}

impl<'a> LiseProcessor<'a> {
    pub fn new(
        estimator: O2PressureEstimator<'a>,
        aux: &'a LiseAux,
        straylight: Option<&'a StraylightTables>,
    ) -> Self {
        Self { estimator, aux, straylight }
    }

    /// Compute one pressure product for one tile. Invalid pixels produce 0.
    pub fn process(
        &self,
        product: PressureProduct,
        inputs: &LiseInputs<'_>,
        cancel: &CancelToken,
    ) -> ScreenResult<Channel> {
        let (height, width) = (inputs.window.height, inputs.window.width);
        log::debug!("O2 pressure product {:?} for tile {}", product, inputs.window);

        let mut pressure = Array2::<f32>::zeros((height, width));
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
                let detector = inputs.detector[[row, col]].max(0) as usize;
                let detector = detector.min(self.aux.detector_wavelengths.len() - 1);
                let w0 = self.aux.detector_wavelengths[detector];

                let rho753 = inputs.rho753[[row, col]] as f64;
                let rho778 = inputs.rho778[[row, col]] as f64;
                let mut rho761 = inputs.rho761[[row, col]] as f64;
                if let Some(tables) = self.straylight {
                    rho761 = straylight_correction(tables, detector, rho753, rho761);
                }

                let value = self.estimator.compute(
                    product,
                    &geom,
                    rho753,
                    rho761,
                    rho778,
                    w0,
                    geom.air_mass(),
                );
                pressure[[row, col]] = value as f32;
            }
        }
        Ok(pressure)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Synthetic tables: transmittance depends only on the layer, so the
    /// angle and wavelength interpolation is exact everywhere.
    pub(crate) fn synthetic_aux() -> LiseAux {
        let pressure_levels: Vec<f64> =
            (0..NUM_LAYERS).map(|i| 100.0 + i as f64 * 50.0).collect();

        // transmittance falls exponentially with pressure
        let layer_trans: Vec<f64> =
            pressure_levels.iter().map(|p| (-p / 1300.0).exp()).collect();

        let mut atm = Vec::with_capacity(NUM_LAYERS * NUM_FILTERS * NUM_GAUSS * NUM_GAUSS);
        for layer in 0..NUM_LAYERS {
            for _ in 0..NUM_FILTERS * NUM_GAUSS * NUM_GAUSS {
                atm.push(layer_trans[layer]);
            }
        }
        let to2_atm =
            LookupTable::new(vec![NUM_LAYERS, NUM_FILTERS, NUM_GAUSS, NUM_GAUSS], atm).unwrap();

        let flat = |value: f64| {
            LookupTable::new(
                vec![NUM_FILTERS, NUM_GAUSS, NUM_GAUSS],
                vec![value; NUM_FILTERS * NUM_GAUSS * NUM_GAUSS],
            )
            .unwrap()
        };

        let c_values = vec![1.0; NUM_FILTERS * 6 * 6];
        let c_coefficients = LookupTable::new(vec![NUM_FILTERS, 6, 6], c_values)
            .unwrap()
            .with_axis(1, vec![2.0, 2.5, 3.0, 3.5, 4.0, 4.5])
            .unwrap()
            .with_axis(2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5])
            .unwrap();

        LiseAux {
            pressure_levels,
            to2_ray: flat(0.9),
            to2_atm,
            to2_fresnel: flat(0.85),
            to2_aerosol: flat(0.88),
            fresnel_coefficients: vec![0.02; 91],
            aerosol_phase: vec![1.0; 181],
            c_coefficients,
            detector_wavelengths: vec![761.5; 925],
        }
    }

    #[test]
    fn test_nearest_filter_index_clamps() {
        assert_eq!(nearest_filter_index(700.0), 0);
        assert_eq!(nearest_filter_index(800.0), NUM_FILTERS - 2);
        assert_eq!(nearest_filter_index(761.0), 2);
    }

    #[test]
    fn test_nearest_gauss_index_clamps() {
        assert_eq!(nearest_gauss_index(0.0), 0);
        assert_eq!(nearest_gauss_index(89.9), NUM_GAUSS - 2);
        // 17.64 is grid point 4
        assert_eq!(nearest_gauss_index(17.7), 4);
    }

    #[test]
    fn test_inversion_recovers_tabulated_layer() {
        let aux = synthetic_aux();
        let estimator = O2PressureEstimator::new(&aux);

        // exact grid geometry: interpolation weights collapse to the
        // tabulated points
        let sza = GAUSSIAN_ANGLES[5];
        let vza = GAUSSIAN_ANGLES[7];
        let geom = PixelGeometry::from_angles(sza, vza, 0.0, 90.0);

        for layer in [0, 5, 10, 20] {
            let tabulated = aux.to2_atm.value(&[layer, 3, 5, 7]);
            // rho_ref of 0.2/0.2/0.2 is 0.2; pick rho761 so the ratio is
            // exactly the tabulated transmittance
            let rho761 = tabulated * 0.2;
            let p = estimator.compute(
                PressureProduct::Apparent,
                &geom,
                0.2,
                rho761,
                0.2,
                761.5,
                geom.air_mass(),
            );
            assert_relative_eq!(p, aux.pressure_levels[layer], epsilon = 0.5);
        }
    }

    #[test]
    fn test_inversion_extrapolates_below_deepest_layer() {
        let aux = synthetic_aux();
        let estimator = O2PressureEstimator::new(&aux);
        let geom = PixelGeometry::from_angles(GAUSSIAN_ANGLES[5], GAUSSIAN_ANGLES[5], 0.0, 90.0);

        // a ratio below every tabulated transmittance never crosses and
        // must extrapolate beyond the deepest level
        let deepest = *aux.pressure_levels.last().unwrap();
        let p = estimator.compute(
            PressureProduct::Apparent,
            &geom,
            0.2,
            0.2 * 0.40,
            0.2,
            761.5,
            geom.air_mass(),
        );
        assert!(p > deepest, "p = {}", p);
        assert!(p.is_finite());
    }

    #[test]
    fn test_products_are_finite() {
        let aux = synthetic_aux();
        let estimator = O2PressureEstimator::new(&aux);
        let geom = PixelGeometry::from_angles(35.0, 20.0, 100.0, 60.0);
        for product in [
            PressureProduct::Apparent,
            PressureProduct::Surface,
            PressureProduct::RayleighCorrected,
            PressureProduct::FullyCorrected,
        ] {
            let p = estimator.compute(product, &geom, 0.25, 0.18, 0.24, 761.3, geom.air_mass());
            assert!(p.is_finite(), "{:?} produced {}", product, p);
        }
    }

    #[test]
    fn test_straylight_perturbs_absorption_channel() {
        let tables = StraylightTables {
            coefficients: vec![0.1; 10],
            wavelengths: vec![761.0; 10],
        };
        let corrected = straylight_correction(&tables, 3, 0.2, 0.15);
        assert_relative_eq!(corrected, 0.17, epsilon = 1e-12);
    }
}
