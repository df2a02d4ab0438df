//! Cloud-buffer dilation.
//!
//! Every cloud pixel of the extended source window marks its Chebyshev
//! neighbourhood as `CLOUD_BUFFER`, clipped to the target window. A final
//! consolidation pass resolves precedence: a pixel that is both cloud and
//! buffer reports only the cloud.

use crate::types::{
    CancelToken, ClassFlags, MaskView, ScreenError, ScreenResult, Window,
};
use ndarray::{Array2, ArrayView2};

/// Parameters for the cloud-buffer processor
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BufferParams {
    /// Buffer radius in pixels (Chebyshev distance)
    pub cloud_buffer_width: usize,
    /// Widen the buffer by one pixel around clouds sitting on land
    pub use_land_cover_buffer: bool,
}

impl Default for BufferParams {
    fn default() -> Self {
        Self {
            cloud_buffer_width: 2,
            use_land_cover_buffer: false,
        }
    }
}

/// Source channels for one cloud-buffer tile; the views cover the source
/// window, which must contain the target window extended by the buffer
/// radius.
pub struct BufferInputs<'a> {
    pub source_window: Window,
    pub target_window: Window,
    /// Classification flags over the source window
    pub flags: ArrayView2<'a, u16>,
    /// Land mask over the source window; only consulted in land-cover mode
    pub is_land: Option<MaskView<'a>>,
}

/// Cloud-buffer tile processor
pub struct CloudBufferDilator {
    params: BufferParams,
}

impl CloudBufferDilator {
    pub fn new(params: BufferParams) -> Self {
        Self { params }
    }

    /// Compute the flag channel for the target window with `CLOUD_BUFFER`
    /// grown around every cloud pixel.
    pub fn process(
        &self,
        inputs: &BufferInputs<'_>,
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
        if self.params.use_land_cover_buffer && inputs.is_land.is_none() {
            return Err(ScreenError::Config(
                "land-cover buffer requested but no land mask supplied".to_string(),
            ));
        }
        log::debug!(
            "Cloud buffer (width {}) for tile {}",
            self.params.cloud_buffer_width,
            target
        );

        let mut out = Array2::<u16>::zeros((target.height, target.width));
        for row in 0..target.height {
            for col in 0..target.width {
                let (srow, scol) = source.local(target.x + col as i32, target.y + row as i32);
                out[[row, col]] = inputs.flags[[srow, scol]];
            }
        }

        for y in source.y..source.y + source.height as i32 {
            if cancel.is_cancelled() {
                return Err(ScreenError::Cancelled);
            }
            for x in source.x..source.x + source.width as i32 {
                let (srow, scol) = source.local(x, y);
                if ClassFlags(inputs.flags[[srow, scol]]).contains(ClassFlags::CLOUD) {
                    let mut width = self.params.cloud_buffer_width;
                    if self.params.use_land_cover_buffer {
                        if let Some(land) = &inputs.is_land {
                            if land[[srow, scol]] {
                                width += 1;
                            }
                        }
                    }
                    self.mark_neighbourhood(inputs, &mut out, x, y, width);
                }
            }
        }

        // precedence: cloud wins over its own buffer
        for bits in out.iter_mut() {
            if *bits & ClassFlags::CLOUD != 0 {
                *bits &= !ClassFlags::CLOUD_BUFFER;
            }
        }
        Ok(out)
    }

    fn mark_neighbourhood(
        &self,
        inputs: &BufferInputs<'_>,
        out: &mut Array2<u16>,
        x: i32,
        y: i32,
        width: usize,
    ) {
        let target = inputs.target_window;
        let source = inputs.source_window;
        let w = width as i32;
        for ny in y - w..=y + w {
            for nx in x - w..=x + w {
                if !target.contains(nx, ny) {
                    continue;
                }
                let (srow, scol) = source.local(nx, ny);
                if ClassFlags(inputs.flags[[srow, scol]]).contains(ClassFlags::CLOUD) {
                    continue;
                }
                let (row, col) = target.local(nx, ny);
                out[[row, col]] |= ClassFlags::CLOUD_BUFFER;
            }
        }
    }
}
