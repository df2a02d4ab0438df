//! Geometric cloud-shadow detection.
//!
//! For every cloud pixel the cloud-top height is derived from the cloud-top
//! pressure, the apparent cloud position is parallax-corrected with the
//! view geometry, and the shadow position is refined iteratively: each
//! round re-samples the surface altitude at the candidate position and
//! projects the sun direction with the remaining height difference. A
//! candidate that fails to converge, walks off the delivered window, or
//! climbs above the cloud is rejected; no shadow is recorded for it.

use crate::geo::{GeoCoding, MEAN_EARTH_RADIUS};
use crate::types::{
    CancelToken, ChannelView, ClassFlags, ScreenError, ScreenResult, Window,
};
use ndarray::{Array2, ArrayView2};

/// Maximum refinement rounds before a candidate is rejected
const MAX_ITER: usize = 5;
/// Angular convergence threshold (degrees)
const DIST_THRESHOLD_DEG: f64 = 1.0 / 740.0;

/// Parameters for the cloud-shadow processor
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShadowParams {
    /// Margin (pixels) by which the source window must exceed the target
    pub shadow_width: usize,
    /// Cloud-top pressure (hPa) used when no pressure channel is supplied
    pub ctp_constant_value: f32,
    /// Also cast shadows from cloud-buffer pixels
    pub shadow_for_cloud_buffer: bool,
}

impl Default for ShadowParams {
    fn default() -> Self {
        Self {
            shadow_width: 64,
            ctp_constant_value: 500.0,
            shadow_for_cloud_buffer: false,
        }
    }
}

impl ShadowParams {
    /// Defaults for fine-resolution products, which need a smaller search
    /// margin
    pub fn fine_resolution() -> Self {
        Self { shadow_width: 16, ..Self::default() }
    }
}

/// Source channels for one cloud-shadow tile; all views cover the source
/// window, which must contain the target window extended by the shadow
/// margin.
pub struct ShadowInputs<'a> {
    pub source_window: Window,
    pub target_window: Window,
    /// Classification flags over the source window
    pub flags: ArrayView2<'a, u16>,
    pub sza: ChannelView<'a>,
    pub saa: ChannelView<'a>,
    pub vza: ChannelView<'a>,
    pub vaa: ChannelView<'a>,
    pub altitude: ChannelView<'a>,
    /// Cloud-top pressure channel; the constant value applies when absent
    pub ctp: Option<ChannelView<'a>>,
}

/// Cloud-shadow tile processor
pub struct CloudShadowCaster<'a> {
    geocoding: &'a dyn GeoCoding,
    params: ShadowParams,
}

impl<'a> CloudShadowCaster<'a> {
    pub fn new(geocoding: &'a dyn GeoCoding, params: ShadowParams) -> Self {
        Self { geocoding, params }
    }

    /// Compute the flag channel for the target window: the source flags
    /// with `CLOUD_SHADOW` added, and cleared again wherever `CLOUD` is
    /// set so a pixel is never both.
    pub fn process(
        &self,
        inputs: &ShadowInputs<'_>,
        cancel: &CancelToken,
    ) -> ScreenResult<Array2<u16>> {
        let source = inputs.source_window;
        let target = inputs.target_window;
        if !source.contains_window(&target) {
            return Err(ScreenError::Processing(format!(
                "source window {} does not contain target window {}",
                source, target
            )));
        }
        log::debug!("Cloud shadow for tile {} (source {})", target, source);

        // carry the incoming flags through to the target tile
        let mut out = Array2::<u16>::zeros((target.height, target.width));
        for row in 0..target.height {
            for col in 0..target.width {
                let (srow, scol) =
                    source.local(target.x + col as i32, target.y + row as i32);
                out[[row, col]] = inputs.flags[[srow, scol]];
            }
        }

        let cast_mask = if self.params.shadow_for_cloud_buffer {
            ClassFlags::CLOUD | ClassFlags::CLOUD_BUFFER
        } else {
            ClassFlags::CLOUD
        };

        for y in source.y..source.y + source.height as i32 {
            if cancel.is_cancelled() {
                return Err(ScreenError::Cancelled);
            }
            for x in source.x..source.x + source.width as i32 {
                let (srow, scol) = source.local(x, y);
                if ClassFlags(inputs.flags[[srow, scol]]).0 & cast_mask == 0 {
                    continue;
                }

                let ctp = match &inputs.ctp {
                    Some(channel) => channel[[srow, scol]],
                    None => self.params.ctp_constant_value,
                };
                if ctp <= 0.0 {
                    continue;
                }
                let cloud_alt = height_from_pressure(ctp as f64);

                let sza = (inputs.sza[[srow, scol]] as f64).to_radians();
                let saa = (inputs.saa[[srow, scol]] as f64).to_radians();
                let vza = (inputs.vza[[srow, scol]] as f64).to_radians();
                let vaa = (inputs.vaa[[srow, scol]] as f64).to_radians();

                let apparent = self.geocoding.geo_pos(x as f64, y as f64);
                let Some((lat, lon)) =
                    self.solve_shadow(inputs, sza, saa, vza, vaa, cloud_alt, apparent)
                else {
                    continue;
                };

                if let Some((px, py)) = self.geocoding.pixel_pos(lat, lon) {
                    let (tx, ty) = (px.floor() as i32, py.floor() as i32);
                    if target.contains(tx, ty) {
                        let (row, col) = target.local(tx, ty);
                        out[[row, col]] |= ClassFlags::CLOUD_SHADOW;
                    }
                }
            }
        }

        // a cloudy pixel never reports as somebody else's shadow
        for bits in out.iter_mut() {
            if *bits & ClassFlags::CLOUD != 0 {
                *bits &= !ClassFlags::CLOUD_SHADOW;
            }
        }
        Ok(out)
    }

    /// Iterative shadow-position solve for one cloud pixel. Returns the
    /// converged geographic position, or `None` when the candidate is
    /// rejected.
    #[allow(clippy::too_many_arguments)]
    fn solve_shadow(
        &self,
        inputs: &ShadowInputs<'_>,
        sza: f64,
        saa: f64,
        vza: f64,
        vaa: f64,
        cloud_alt: f64,
        apparent: (f64, f64),
    ) -> Option<(f64, f64)> {
        let (app_lat, app_lon) = apparent;
        let surface_alt = self.sample_altitude(inputs, app_lat, app_lon, true)?;

        // parallax: true cloud position from the apparent one
        let delta_x = -(cloud_alt - surface_alt) * vza.tan() * vaa.sin();
        let delta_y = -(cloud_alt - surface_alt) * vza.tan() * vaa.cos();
        let lat_cloud = app_lat - (delta_y / MEAN_EARTH_RADIUS).to_degrees();
        let lon_cloud =
            app_lon - (delta_x / (MEAN_EARTH_RADIUS * app_lat.to_radians().cos())).to_degrees();

        let mut iter = 0;
        let mut dist = 2.0 * DIST_THRESHOLD_DEG;
        let mut surface_alt = 0.0;
        let mut lat = lat_cloud;
        let mut lon = lon_cloud;

        while iter < MAX_ITER && dist > DIST_THRESHOLD_DEG && surface_alt < cloud_alt {
            let lat0 = lat;
            let lon0 = lon;
            surface_alt = self.sample_altitude(inputs, lat, lon, false)?;

            let proj_x = (cloud_alt - surface_alt) * sza.tan() * saa.sin();
            let proj_y = (cloud_alt - surface_alt) * sza.tan() * saa.cos();

            lat = lat_cloud - (proj_y / MEAN_EARTH_RADIUS).to_degrees();
            lon = lon_cloud
                - (proj_x / (MEAN_EARTH_RADIUS * lat.to_radians().cos())).to_degrees();

            dist = (lat - lat0).abs().max((lon - lon0).abs());
            iter += 1;
        }

        // conservative rejection: only a converged candidate below the
        // cloud top counts
        if surface_alt < cloud_alt && iter < MAX_ITER && dist < DIST_THRESHOLD_DEG {
            Some((lat, lon))
        } else {
            None
        }
    }

    /// Surface altitude at a geographic position. `None` when the position
    /// cannot be mapped into the scene, or, unless `clamp` is set, when it
    /// falls outside the delivered source window; with `clamp` the access
    /// is clipped to the window edge instead.
    fn sample_altitude(
        &self,
        inputs: &ShadowInputs<'_>,
        lat: f64,
        lon: f64,
        clamp: bool,
    ) -> Option<f64> {
        let (px, py) = self.geocoding.pixel_pos(lat, lon)?;
        let source = inputs.source_window;
        let mut x = px.round() as i32;
        let mut y = py.round() as i32;
        if !source.contains(x, y) {
            if !clamp {
                return None;
            }
            x = x.clamp(source.x, source.x + source.width as i32 - 1);
            y = y.clamp(source.y, source.y + source.height as i32 - 1);
        }
        let (row, col) = source.local(x, y);
        Some(inputs.altitude[[row, col]] as f64)
    }
}

/// Cloud-top height (m) from cloud-top pressure (hPa)
pub fn height_from_pressure(pressure: f64) -> f64 {
    -8000.0 * (pressure / 1013.0).ln()
}
