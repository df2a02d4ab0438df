//! Geographic coordinate access supplied by the host framework.
//!
//! Coordinate-reference-system plumbing is out of scope for this crate; the
//! shadow processor only needs a pixel <-> latitude/longitude mapping, which
//! the host provides through the [`GeoCoding`] trait.

/// Mean Earth radius in metres used for small-offset geodesy
pub const MEAN_EARTH_RADIUS: f64 = 6_372_000.0;

/// Pixel <-> geographic coordinate mapping for one scene.
///
/// Pixel coordinates are continuous; the center of pixel (x, y) is at
/// (x + 0.5, y + 0.5). Implementations must be cheap to call, the shadow
/// solver queries them several times per cloud pixel.
pub trait GeoCoding: Sync {
    /// Geographic position (lat, lon) in degrees of a pixel coordinate
    fn geo_pos(&self, x: f64, y: f64) -> (f64, f64);

    /// Pixel coordinate of a geographic position, or `None` when the
    /// position falls outside the scene
    fn pixel_pos(&self, lat: f64, lon: f64) -> Option<(f64, f64)>;
}

/// Affine north-up geocoding: pixel steps map linearly onto lat/lon.
///
/// Adequate for regularly gridded scenes and for tests; real products with
/// tie-point geolocation bring their own implementation.
#[derive(Debug, Clone)]
pub struct AffineGeoCoding {
    /// Latitude of the center of pixel (0, 0)
    pub origin_lat: f64,
    /// Longitude of the center of pixel (0, 0)
    pub origin_lon: f64,
    /// Latitude step per pixel row (usually negative, north-up)
    pub lat_step: f64,
    /// Longitude step per pixel column
    pub lon_step: f64,
    pub scene_width: usize,
    pub scene_height: usize,
}

impl GeoCoding for AffineGeoCoding {
    fn geo_pos(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.origin_lat + (y - 0.5) * self.lat_step,
            self.origin_lon + (x - 0.5) * self.lon_step,
        )
    }

    fn pixel_pos(&self, lat: f64, lon: f64) -> Option<(f64, f64)> {
        let y = (lat - self.origin_lat) / self.lat_step + 0.5;
        let x = (lon - self.origin_lon) / self.lon_step + 0.5;
        if x < 0.0 || y < 0.0 || x >= self.scene_width as f64 || y >= self.scene_height as f64 {
            return None;
        }
        Some((x, y))
    }
}
