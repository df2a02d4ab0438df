//! Barometric surface pressure from the US-standard atmosphere.

use crate::auxdata::WaterVapourTable;
use crate::types::{
    CancelToken, Channel, ChannelView, MaskView, ScreenError, ScreenResult, Window,
};
use ndarray::Array2;

/// Acceleration of gravity (m/s^2)
const G: f64 = 9.80665;
/// Temperature lapse rate (K/gpm)
const GAMMA: f64 = 0.0065;
/// Gas constant (J/kg/K)
const R: f64 = 287.05;
/// Humidity coefficient (K/hPa), assumed constant
const C: f64 = 0.11;
/// Mean sea-level temperature (K)
const SEA_LEVEL_TEMP: f64 = 288.15;

/// Parameters for the barometric pressure processor
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BarometricParams {
    /// Take altitudes from the precise elevation channel instead of the
    /// tie-point elevation grid
    pub use_advanced_dem: bool,
}

/// Closed-form barometric surface pressure estimator
pub struct BarometricPressure<'a> {
    water_vapour: &'a WaterVapourTable,
}

impl<'a> BarometricPressure<'a> {
    pub fn new(water_vapour: &'a WaterVapourTable) -> Self {
        Self { water_vapour }
    }

    /// Surface pressure (hPa) at `altitude` metres for the given sea-level
    /// pressure:
    ///
    /// `p_surf = p_sea / exp(g*h / (R*(t + C*e + gamma*h/2)))`
    ///
    /// with the surface temperature from the US-standard lapse rate and
    /// the water-vapour partial pressure interpolated from the table.
    pub fn surface_pressure(&self, sea_level_pressure: f64, altitude: f64) -> f64 {
        let surface_temp = SEA_LEVEL_TEMP - GAMMA * altitude;
        let e = self.water_vapour.partial_pressure(surface_temp - 273.15);
        sea_level_pressure / (G * altitude / (R * (surface_temp + C * e + GAMMA * altitude / 2.0))).exp()
    }
}

/// Source channels for one barometric pressure tile
pub struct BarometricInputs<'a> {
    pub window: Window,
    /// Mean sea-level pressure channel (hPa)
    pub sea_level_pressure: ChannelView<'a>,
    /// Tie-point surface elevation (m)
    pub altitude: ChannelView<'a>,
    /// Precise surface elevation (m), consulted when `use_advanced_dem`
    pub advanced_altitude: Option<ChannelView<'a>>,
    pub is_invalid: MaskView<'a>,
}

/// Tile processor for the barometric estimator
pub struct BarometricProcessor<'a> {
    estimator: BarometricPressure<'a>,
    params: BarometricParams,
}

impl<'a> BarometricProcessor<'a> {
    pub fn new(water_vapour: &'a WaterVapourTable, params: BarometricParams) -> Self {
        Self {
            estimator: BarometricPressure::new(water_vapour),
            params,
        }
    }

    /// Compute the barometric pressure channel for one tile. Invalid
    /// pixels produce 0.
    pub fn process(
        &self,
        inputs: &BarometricInputs<'_>,
        cancel: &CancelToken,
    ) -> ScreenResult<Channel> {
        let (height, width) = (inputs.window.height, inputs.window.width);
        log::debug!("Barometric pressure for tile {}", inputs.window);

        if self.params.use_advanced_dem && inputs.advanced_altitude.is_none() {
            return Err(ScreenError::Config(
                "advanced DEM requested but no precise elevation channel supplied".to_string(),
            ));
        }

        let mut pressure = Array2::<f32>::zeros((height, width));
        for row in 0..height {
            if cancel.is_cancelled() {
                return Err(ScreenError::Cancelled);
            }
            for col in 0..width {
                if inputs.is_invalid[[row, col]] {
                    continue;
                }
                let altitude = match (self.params.use_advanced_dem, &inputs.advanced_altitude) {
                    (true, Some(adv)) => adv[[row, col]] as f64,
                    _ => inputs.altitude[[row, col]] as f64,
                };
                let slp = inputs.sea_level_pressure[[row, col]] as f64;
                pressure[[row, col]] = self.estimator.surface_pressure(slp, altitude) as f32;
            }
        }
        Ok(pressure)
    }
}
