//! Rayleigh scattering correction.
//!
//! [`RayleighCorrection`] is the pure engine: optical thickness, phase
//! function Fourier components, reflectance, transmittance and spherical
//! albedo for a given geometry and pressure, plus the final correction that
//! turns gas-corrected reflectance into Rayleigh-corrected ("BRR")
//! reflectance. [`BrrProcessor`] drives the engine over a tile in 4x4
//! sub-blocks: geometry and pressure vary slowly, so the expensive part is
//! evaluated once per block from the corner pixel and only the per-pixel
//! combination runs at full resolution.

use crate::auxdata::{FractIndex, RayleighAux};
use crate::types::{
    correct_sea_level_pressure, ChannelView, MaskView, PixelGeometry, ScreenError, ScreenResult,
    Window, B412, B760, B900, BAD_VALUE, CancelToken, Channel, NUM_BANDS,
};
use crate::auxdata::tables::{RAYSCATT_NUM_ORD, RAYSCATT_NUM_SER};
use ndarray::Array2;

/// Spectral channels the Rayleigh correction applies to; the O2 absorption
/// channel and the water-vapour channel pass through uncorrected.
pub const BANDS_TO_CORRECT: [usize; 13] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11, 12, 13];

/// Sub-block edge length for the block-wise engine evaluation
pub const SUBWIN: usize = 4;

/// Rayleigh correction engine over the static scattering tables
pub struct RayleighCorrection<'a> {
    aux: &'a RayleighAux,
}

impl<'a> RayleighCorrection<'a> {
    pub fn new(aux: &'a RayleighAux) -> Self {
        Self { aux }
    }

    /// Fourier components of the Rayleigh phase function
    pub fn phase_fourier(&self, mus: f64, muv: f64, sins: f64, sinv: f64) -> [f64; 3] {
        let ab = &self.aux.ab;
        let sins2 = sins * sins;
        let sinv2 = sinv * sinv;
        [
            0.75 * ab[0] * (1.0 + mus * mus * muv * muv + 0.5 * sins2 * sinv2) + ab[1],
            -0.75 * ab[0] * mus * muv * sins * sinv,
            0.1875 * ab[0] * sins2 * sinv2,
        ]
    }

    /// Rayleigh optical thickness per channel, scaled from standard
    /// pressure to `press`
    pub fn optical_thickness(&self, press: f64, tau: &mut [f64; NUM_BANDS]) {
        let ratio = press / self.aux.p_std;
        for &band in &BANDS_TO_CORRECT {
            tau[band] = self.aux.tau_r[band] * ratio;
        }
        tau[B760] = 0.0;
        tau[B900] = 0.0;
    }

    /// Rayleigh reflectance per channel for one geometry.
    ///
    /// Primary scattering from the phase Fourier components, multiple
    /// scattering from the tabulated polynomial coefficients evaluated by
    /// Horner's rule in the optical thickness.
    #[allow(clippy::too_many_arguments)]
    pub fn reflectance(
        &self,
        geom: &PixelGeometry,
        air_mass: f64,
        phase: &[f64; 3],
        tau: &[f64; NUM_BANDS],
        refl: &mut [f64; NUM_BANDS],
    ) {
        let abcd = self.scatter_polynomials(geom.sza, geom.vza);
        let mud = geom.delta_azimuth.to_radians().cos();
        let mu2d = 2.0 * mud * mud - 1.0;

        for &band in &BANDS_TO_CORRECT {
            refl[band] =
                self.reflectance_for_tau(tau[band], geom, air_mass, phase, &abcd, mud, mu2d);
        }
        refl[B760] = 0.0;
        refl[B900] = 0.0;
    }

    /// Rayleigh reflectance of a single channel with explicit optical
    /// thickness; used by the O2 pressure retrieval at 761 nm.
    pub fn reflectance_single(
        &self,
        tau: f64,
        geom: &PixelGeometry,
        air_mass: f64,
        phase: &[f64; 3],
    ) -> f64 {
        let abcd = self.scatter_polynomials(geom.sza, geom.vza);
        let mud = geom.delta_azimuth.to_radians().cos();
        let mu2d = 2.0 * mud * mud - 1.0;
        self.reflectance_for_tau(tau, geom, air_mass, phase, &abcd, mud, mu2d)
    }

    /// Interpolate the multiple-scattering polynomial coefficients at the
    /// sun/view angles
    fn scatter_polynomials(
        &self,
        sza: f64,
        vza: f64,
    ) -> [[f64; RAYSCATT_NUM_ORD]; RAYSCATT_NUM_SER] {
        let table = &self.aux.scatter_coeff;
        let coords: [FractIndex; 2] = [table.coord(2, sza), table.coord(3, vza)];
        let mut abcd = [[0.0; RAYSCATT_NUM_ORD]; RAYSCATT_NUM_SER];
        for (is, series) in abcd.iter_mut().enumerate() {
            for (ik, coeff) in series.iter_mut().enumerate() {
                *coeff = table.interpolate(&[ik, is], &coords);
            }
        }
        abcd
    }

    #[allow(clippy::too_many_arguments)]
    fn reflectance_for_tau(
        &self,
        tau: f64,
        geom: &PixelGeometry,
        air_mass: f64,
        phase: &[f64; 3],
        abcd: &[[f64; RAYSCATT_NUM_ORD]; RAYSCATT_NUM_SER],
        mud: f64,
        mu2d: f64,
    ) -> f64 {
        let const_term = (1.0 - (-tau * air_mass).exp()) / (4.0 * (geom.cos_s + geom.cos_v));
        let mut rho = [0.0; RAYSCATT_NUM_SER];
        for is in 0..RAYSCATT_NUM_SER {
            // primary scattering reflectance
            let mut value = phase[is] * const_term;

            // multiple scattering correction, Horner in tau
            let mut multi = 0.0;
            for ik in (0..RAYSCATT_NUM_ORD).rev() {
                multi = tau * multi + abcd[is][ik];
            }
            value *= multi;
            rho[is] = value;
        }
        rho[0] + 2.0 * mud * rho[1] + 2.0 * mu2d * rho[2]
    }

    /// Two-stream Rayleigh transmittance along the path with cosine `mu`
    pub fn transmittance(&self, mu: f64, tau: &[f64; NUM_BANDS], trans: &mut [f64; NUM_BANDS]) {
        let rt = &self.aux.ray_trans;
        let two_third = 2.0 / 3.0;
        let four_third = 4.0 / 3.0;
        for &band in &BANDS_TO_CORRECT {
            let tr = (two_third + mu + (two_third - mu) * (-tau[band] / mu).exp())
                / (four_third + tau[band]);
            trans[band] = rt[0] + rt[1] * tr + rt[2] * tr * tr;
        }
        trans[B760] = 1.0;
        trans[B900] = 1.0;
    }

    /// Rayleigh spherical albedo per channel from the albedo lookup table
    pub fn spherical_albedo(&self, tau: &[f64; NUM_BANDS], sph: &mut [f64; NUM_BANDS]) {
        let table = &self.aux.spherical_albedo;
        for &band in &BANDS_TO_CORRECT {
            let c = table.coord(0, tau[band]);
            sph[band] = table.interpolate(&[], &[c]);
        }
        sph[B760] = 0.0;
        sph[B900] = 0.0;
    }

    /// Combine gas-corrected reflectance with the Rayleigh terms into the
    /// Rayleigh-corrected reflectance. Uncorrected channels pass through.
    #[allow(clippy::too_many_arguments)]
    pub fn correct(
        &self,
        refl: &[f64; NUM_BANDS],
        sph: &[f64; NUM_BANDS],
        trans_s: &[f64; NUM_BANDS],
        trans_v: &[f64; NUM_BANDS],
        rho_ng: &[f64; NUM_BANDS],
        brr: &mut [f64; NUM_BANDS],
    ) {
        for &band in &BANDS_TO_CORRECT {
            let dum = (rho_ng[band] - refl[band]) / (trans_s[band] * trans_v[band]);
            brr[band] = dum / (1.0 + sph[band] * dum);
        }
        brr[B760] = rho_ng[B760];
        brr[B900] = rho_ng[B900];
    }
}

/// Parameters for the block-wise BRR tile processor
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BrrParams {
    /// Correct water pixels as well (land-only by default)
    pub correct_water: bool,
    /// Also emit the per-channel Rayleigh reflectance
    pub export_rayleigh_refl: bool,
}

impl Default for BrrParams {
    fn default() -> Self {
        Self {
            correct_water: false,
            export_rayleigh_refl: false,
        }
    }
}

/// Source channels for one BRR tile
pub struct BrrInputs<'a> {
    pub window: Window,
    /// Gas-corrected reflectance, one view per spectral channel
    pub rho_ng: Vec<ChannelView<'a>>,
    pub sza: ChannelView<'a>,
    pub vza: ChannelView<'a>,
    pub saa: ChannelView<'a>,
    pub vaa: ChannelView<'a>,
    pub altitude: ChannelView<'a>,
    pub sea_level_pressure: ChannelView<'a>,
    pub is_land: MaskView<'a>,
}

/// Output channels of one BRR tile
pub struct BrrOutputs {
    /// Rayleigh-corrected reflectance per spectral channel; skipped pixels
    /// carry the bad-sample sentinel
    pub brr: Vec<Channel>,
    /// One bit per corrected channel flagging a non-positive result,
    /// in [`BANDS_TO_CORRECT`] order
    pub negative_flags: Array2<u16>,
    /// Rayleigh reflectance per channel when requested
    pub rayleigh_refl: Option<Vec<Channel>>,
}

/// Tile processor producing Rayleigh-corrected reflectance
pub struct BrrProcessor<'a> {
    engine: RayleighCorrection<'a>,
    aux: &'a RayleighAux,
    params: BrrParams,
}

impl<'a> BrrProcessor<'a> {
    pub fn new(aux: &'a RayleighAux, params: BrrParams) -> Self {
        Self {
            engine: RayleighCorrection::new(aux),
            aux,
            params,
        }
    }

    /// Process one tile.
    ///
    /// Sub-blocks whose reference reflectance is the bad-sample sentinel
    /// are skipped entirely; their output stays at the sentinel.
    pub fn process(&self, inputs: &BrrInputs<'_>, cancel: &CancelToken) -> ScreenResult<BrrOutputs> {
        let (height, width) = (inputs.window.height, inputs.window.width);
        if inputs.rho_ng.len() != NUM_BANDS {
            return Err(ScreenError::Processing(format!(
                "expected {} reflectance channels, got {}",
                NUM_BANDS,
                inputs.rho_ng.len()
            )));
        }
        log::debug!("Rayleigh correction for tile {}", inputs.window);

        let mut brr: Vec<Channel> =
            (0..NUM_BANDS).map(|_| Array2::from_elem((height, width), BAD_VALUE)).collect();
        let mut negative_flags = Array2::<u16>::zeros((height, width));
        let mut rayleigh_refl: Option<Vec<Channel>> = self
            .params
            .export_rayleigh_refl
            .then(|| (0..NUM_BANDS).map(|_| Array2::zeros((height, width))).collect());

        let mut tau = [0.0; NUM_BANDS];
        let mut refl = [0.0; NUM_BANDS];
        let mut trans_s = [0.0; NUM_BANDS];
        let mut trans_v = [0.0; NUM_BANDS];
        let mut sph = [0.0; NUM_BANDS];
        let mut rho_pixel = [0.0; NUM_BANDS];
        let mut brr_pixel = [0.0; NUM_BANDS];
        let mut do_corr = [[false; SUBWIN]; SUBWIN];

        for row0 in (0..height).step_by(SUBWIN) {
            if cancel.is_cancelled() {
                return Err(ScreenError::Cancelled);
            }
            let row_end = (row0 + SUBWIN).min(height);
            for col0 in (0..width).step_by(SUBWIN) {
                let col_end = (col0 + SUBWIN).min(width);

                let mut correct_block = false;
                for row in row0..row_end {
                    for col in col0..col_end {
                        let usable = inputs.rho_ng[B412][[row, col]] != BAD_VALUE
                            && (self.params.correct_water || inputs.is_land[[row, col]]);
                        do_corr[row - row0][col - col0] = usable;
                        correct_block |= usable;
                    }
                }
                if !correct_block {
                    continue;
                }

                // block corner geometry stands in for the whole block
                let geom = PixelGeometry::from_angles(
                    inputs.sza[[row0, col0]] as f64,
                    inputs.vza[[row0, col0]] as f64,
                    inputs.saa[[row0, col0]] as f64,
                    inputs.vaa[[row0, col0]] as f64,
                );
                let air_mass = geom.air_mass();
                let press = correct_sea_level_pressure(
                    inputs.sea_level_pressure[[row0, col0]] as f64,
                    inputs.altitude[[row0, col0]] as f64,
                    self.aux.press_scale_height,
                );

                let phase = self.engine.phase_fourier(geom.cos_s, geom.cos_v, geom.sin_s, geom.sin_v);
                self.engine.optical_thickness(press, &mut tau);
                self.engine.reflectance(&geom, air_mass, &phase, &tau, &mut refl);
                self.engine.transmittance(geom.cos_s, &tau, &mut trans_s);
                self.engine.transmittance(geom.cos_v, &tau, &mut trans_v);
                self.engine.spherical_albedo(&tau, &mut sph);

                for row in row0..row_end {
                    for col in col0..col_end {
                        if !do_corr[row - row0][col - col0] {
                            continue;
                        }
                        for band in 0..NUM_BANDS {
                            rho_pixel[band] = inputs.rho_ng[band][[row, col]] as f64;
                        }
                        self.engine
                            .correct(&refl, &sph, &trans_s, &trans_v, &rho_pixel, &mut brr_pixel);

                        for (bit, &band) in BANDS_TO_CORRECT.iter().enumerate() {
                            brr[band][[row, col]] = brr_pixel[band] as f32;
                            if brr_pixel[band] <= 0.0 {
                                negative_flags[[row, col]] |= 1 << bit;
                            }
                        }
                        brr[B760][[row, col]] = brr_pixel[B760] as f32;
                        brr[B900][[row, col]] = brr_pixel[B900] as f32;
                        if let Some(rr) = rayleigh_refl.as_mut() {
                            for band in 0..NUM_BANDS {
                                rr[band][[row, col]] = refl[band] as f32;
                            }
                        }
                    }
                }
            }
        }

        Ok(BrrOutputs { brr, negative_flags, rayleigh_refl })
    }
}
