use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Real-valued raster channel data (rows x columns)
pub type Channel = Array2<f32>;

/// Read-only view of a raster channel
pub type ChannelView<'a> = ArrayView2<'a, f32>;

/// Mutable view of a raster channel
pub type ChannelViewMut<'a> = ArrayViewMut2<'a, f32>;

/// Detector index channel (one detector id per pixel column)
pub type DetectorView<'a> = ArrayView2<'a, i16>;

/// Boolean mask channel (land/water, invalid)
pub type MaskView<'a> = ArrayView2<'a, bool>;

/// Number of spectral channels
pub const NUM_BANDS: usize = 15;

/// Spectral channel indices, named by nominal center wavelength (nm)
pub const B412: usize = 0;
pub const B442: usize = 1;
pub const B490: usize = 2;
pub const B510: usize = 3;
pub const B560: usize = 4;
pub const B620: usize = 5;
pub const B665: usize = 6;
pub const B681: usize = 7;
pub const B708: usize = 8;
pub const B753: usize = 9;
pub const B760: usize = 10;
pub const B775: usize = 11;
pub const B865: usize = 12;
pub const B890: usize = 13;
pub const B900: usize = 14;

/// Sentinel value marking an unusable sample in reflectance channels
pub const BAD_VALUE: f32 = -1.0;

/// Rectangular pixel window in scene coordinates.
///
/// Raster arrays handed to the processors are indexed `[row, col]` relative
/// to the window origin `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(x: i32, y: i32, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the scene coordinate (x, y) lies inside this window
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && x < self.x + self.width as i32
            && y < self.y + self.height as i32
    }

    /// Whether `other` lies completely inside this window
    pub fn contains_window(&self, other: &Window) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width as i32 <= self.x + self.width as i32
            && other.y + other.height as i32 <= self.y + self.height as i32
    }

    /// Translate a scene coordinate into local (row, col) array indices.
    ///
    /// The coordinate must lie inside the window.
    pub fn local(&self, x: i32, y: i32) -> (usize, usize) {
        debug_assert!(self.contains(x, y));
        ((y - self.y) as usize, (x - self.x) as usize)
    }

    /// Grow the window by `margin` pixels on every side, clipped to `bounds`
    pub fn extend(&self, margin: usize, bounds: &Window) -> Window {
        let x0 = (self.x - margin as i32).max(bounds.x);
        let y0 = (self.y - margin as i32).max(bounds.y);
        let x1 = (self.x + self.width as i32 + margin as i32).min(bounds.x + bounds.width as i32);
        let y1 = (self.y + self.height as i32 + margin as i32).min(bounds.y + bounds.height as i32);
        Window::new(x0, y0, (x1 - x0) as usize, (y1 - y0) as usize)
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[x={}, y={}, {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Per-pixel classification flags, one bit per test.
///
/// All bits are cleared at tile start and set at most once per pixel per
/// pass. The only mid-pass clearing is the cloud/shadow mutual exclusion
/// applied by the shadow processor and the cloud/buffer consolidation
/// applied by the buffer processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassFlags(pub u16);

impl ClassFlags {
    pub const CLOUD: u16 = 1 << 0;
    pub const BRIGHT: u16 = 1 << 1;
    pub const BRIGHT_RC: u16 = 1 << 2;
    pub const LOW_P_PSCATT: u16 = 1 << 3;
    pub const LOW_P_P1: u16 = 1 << 4;
    pub const SLOPE_1: u16 = 1 << 5;
    pub const SLOPE_2: u16 = 1 << 6;
    pub const BRIGHT_TOA: u16 = 1 << 7;
    pub const HIGH_MDSI: u16 = 1 << 8;
    pub const SNOW_ICE: u16 = 1 << 9;
    pub const CLOUD_BUFFER: u16 = 1 << 10;
    pub const CLOUD_SHADOW: u16 = 1 << 11;

    pub fn set(&mut self, bit: u16, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }
}

/// Per-pixel sun/view geometry with derived trigonometric terms.
///
/// Angles are stored in degrees; the azimuth difference is normalized to
/// the principal range [0, 180] before any scattering-angle formula uses it.
#[derive(Debug, Clone, Copy)]
pub struct PixelGeometry {
    pub sza: f64,
    pub vza: f64,
    pub saa: f64,
    pub vaa: f64,
    pub sin_s: f64,
    pub sin_v: f64,
    pub cos_s: f64,
    pub cos_v: f64,
    pub delta_azimuth: f64,
}

impl PixelGeometry {
    pub fn from_angles(sza: f64, vza: f64, saa: f64, vaa: f64) -> Self {
        let szar = sza.to_radians();
        let vzar = vza.to_radians();
        Self {
            sza,
            vza,
            saa,
            vaa,
            sin_s: szar.sin(),
            sin_v: vzar.sin(),
            cos_s: szar.cos(),
            cos_v: vzar.cos(),
            delta_azimuth: azimuth_difference(vaa, saa),
        }
    }

    /// Two-path air mass, 1/cos(vza) + 1/cos(sza)
    pub fn air_mass(&self) -> f64 {
        1.0 / self.cos_v + 1.0 / self.cos_s
    }

    /// Sun-view scattering angle in degrees
    pub fn scattering_angle(&self) -> f64 {
        let cosphi = self.delta_azimuth.to_radians().cos();
        (-self.cos_s * self.cos_v - self.sin_s * self.sin_v * cosphi)
            .acos()
            .to_degrees()
    }
}

/// Normalize the sun-view azimuth difference to [0, 180] degrees
pub fn azimuth_difference(vaa: f64, saa: f64) -> f64 {
    (vaa - saa).to_radians().cos().acos().to_degrees()
}

/// Correct a sea-level pressure to the surface at `altitude` metres using
/// the atmospheric scale height. Only meaningful for positive altitudes;
/// negative altitudes leave the pressure unchanged.
pub fn correct_sea_level_pressure(pressure: f64, altitude: f64, scale_height: f64) -> f64 {
    pressure * (-altitude.max(0.0) / scale_height).exp()
}

/// Cooperative cancellation token, checked once per scan line by the
/// tile processors.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Error types for cloud screening
#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Auxiliary data error: {0}")]
    AuxData(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Processing of channel '{channel}' failed for tile {window}: {message}")]
    Tile {
        channel: String,
        window: Window,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for cloud screening operations
pub type ScreenResult<T> = Result<T, ScreenError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_extend_clips_to_bounds() {
        let bounds = Window::new(0, 0, 100, 100);
        let tile = Window::new(0, 0, 10, 10);
        let extended = tile.extend(5, &bounds);
        assert_eq!(extended, Window::new(0, 0, 15, 15));

        let inner = Window::new(50, 50, 10, 10);
        let extended = inner.extend(5, &bounds);
        assert_eq!(extended, Window::new(45, 45, 20, 20));
    }

    #[test]
    fn test_flags_set_and_clear() {
        let mut flags = ClassFlags::default();
        flags.set(ClassFlags::CLOUD, true);
        flags.set(ClassFlags::BRIGHT, true);
        assert!(flags.contains(ClassFlags::CLOUD));
        assert!(flags.contains(ClassFlags::BRIGHT));
        flags.set(ClassFlags::CLOUD, false);
        assert!(!flags.contains(ClassFlags::CLOUD));
        assert!(flags.contains(ClassFlags::BRIGHT));
    }

    #[test]
    fn test_azimuth_difference_principal_range() {
        assert_relative_eq!(azimuth_difference(10.0, 350.0), 20.0, epsilon = 1e-9);
        assert_relative_eq!(azimuth_difference(180.0, 0.0), 180.0, epsilon = 1e-9);
        assert_relative_eq!(azimuth_difference(90.0, 90.0), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_air_mass_at_nadir() {
        let geom = PixelGeometry::from_angles(0.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(geom.air_mass(), 2.0, epsilon = 1e-12);
    }
}
