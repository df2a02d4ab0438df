//! Surface pressure from the pretrained regression model.
//!
//! Seven scalar inputs per pixel: the reference-channel reflectance, the
//! ratio of the absorption channel to a reference interpolated across the
//! absorption window, a fixed aerosol-optical-depth prior, the sun and view
//! zenith cosines, a relative-azimuth term, and the detector's O2-channel
//! center wavelength. The optional straylight correction perturbs the ratio
//! and swaps the wavelength for the detector's calibrated one.

use crate::auxdata::net::{NetScratch, RegressionNet};
use crate::auxdata::tables::{LiseAux, StraylightTables};
use crate::types::{
    CancelToken, Channel, ChannelView, DetectorView, MaskView, ScreenError, ScreenResult, Window,
};
use ndarray::Array2;

/// Fixed aerosol optical depth prior fed to the model
const AOT_PRIOR: f64 = 0.15;

/// Interpolation anchors of the absorption window (nm)
const LAMBDA_LOWER: f64 = 753.75;
const LAMBDA_UPPER: f64 = 778.0;

/// Regression-net surface pressure estimator
pub struct NetPressureEstimator<'a> {
    net: &'a RegressionNet,
    aux: &'a LiseAux,
    straylight: Option<&'a StraylightTables>,
}

impl<'a> NetPressureEstimator<'a> {
    pub fn new(
        net: &'a RegressionNet,
        aux: &'a LiseAux,
        straylight: Option<&'a StraylightTables>,
    ) -> Self {
        Self { net, aux, straylight }
    }

    /// Allocate the evaluation buffers one worker needs
    pub fn scratch(&self) -> NetScratch {
        self.net.scratch()
    }

    /// Surface pressure (hPa) for one pixel.
    ///
    /// `rho753`/`rho761`/`rho778` are solar-flux normalized reflectances.
    #[allow(clippy::too_many_arguments)]
    pub fn surface_pressure(
        &self,
        detector: usize,
        sza_deg: f64,
        vza_deg: f64,
        saa_deg: f64,
        vaa_deg: f64,
        rho753: f64,
        rho761: f64,
        rho778: f64,
        scratch: &mut NetScratch,
    ) -> f64 {
        let detector = detector.min(self.aux.detector_wavelengths.len() - 1);
        let mut lambda = self.aux.detector_wavelengths[detector];

        let fraction = (lambda - LAMBDA_LOWER) / (LAMBDA_UPPER - LAMBDA_LOWER);
        let rho761_reference = (1.0 - fraction) * rho753 + fraction * rho778;

        let mut stray = 0.0;
        if let Some(tables) = self.straylight {
            stray = tables.coefficients[detector.min(tables.coefficients.len() - 1)] * rho753;
            lambda = tables.wavelengths[detector.min(tables.wavelengths.len() - 1)];
        }
        let rho761_corrected = rho761 + stray;

        let szar = sza_deg.to_radians();
        let vzar = vza_deg.to_radians();
        let input = [
            rho753,
            rho761_corrected / rho761_reference,
            AOT_PRIOR,
            szar.cos(),
            vzar.cos(),
            vzar.sin() * (vaa_deg - saa_deg).to_radians().cos(),
            lambda,
        ];
        self.net.evaluate(&input, scratch)
    }
}

/// Source channels for one regression-net pressure tile
pub struct NetPressureInputs<'a> {
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

/// Tile processor for the regression-net estimator.
///
/// The caller owns the [`NetScratch`]; one scratch must never be shared
/// between concurrently processed tiles.
pub struct NetPressureProcessor<'a> {
    estimator: NetPressureEstimator<'a>,
}

impl<'a> NetPressureProcessor<'a> {
    pub fn new(estimator: NetPressureEstimator<'a>) -> Self {
        Self { estimator }
    }

    pub fn scratch(&self) -> NetScratch {
        self.estimator.scratch()
    }

    /// Compute the surface pressure channel for one tile. Invalid pixels
    /// produce 0.
    pub fn process(
        &self,
        inputs: &NetPressureInputs<'_>,
        scratch: &mut NetScratch,
        cancel: &CancelToken,
    ) -> ScreenResult<Channel> {
        let (height, width) = (inputs.window.height, inputs.window.width);
        log::debug!("Regression-net surface pressure for tile {}", inputs.window);

        let mut pressure = Array2::<f32>::zeros((height, width));
        for row in 0..height {
            if cancel.is_cancelled() {
                return Err(ScreenError::Cancelled);
            }
            for col in 0..width {
                if inputs.is_invalid[[row, col]] {
                    continue;
                }
                let value = self.estimator.surface_pressure(
                    inputs.detector[[row, col]].max(0) as usize,
                    inputs.sza[[row, col]] as f64,
                    inputs.vza[[row, col]] as f64,
                    inputs.saa[[row, col]] as f64,
                    inputs.vaa[[row, col]] as f64,
                    inputs.rho753[[row, col]] as f64,
                    inputs.rho761[[row, col]] as f64,
                    inputs.rho778[[row, col]] as f64,
                    scratch,
                );
                pressure[[row, col]] = value as f32;
            }
        }
        Ok(pressure)
    }
}
