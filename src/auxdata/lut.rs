//! Fractional-index interpolation over gridded lookup tables.
//!
//! Tables carry a fixed, ascending axis grid per interpolated dimension.
//! Coordinates outside the grid clamp to the first/last interpolation
//! interval instead of extrapolating.

use crate::types::{ScreenError, ScreenResult};

/// Fractional coordinate into a tabulated axis: the lower bracketing index
/// and the weight of the upper neighbour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractIndex {
    pub index: usize,
    pub fraction: f64,
}

/// Locate `x` on an ascending axis grid.
///
/// Below the first grid point this returns index 0 with fraction 0, above
/// the last it returns the deepest valid interval with fraction 1, so any
/// subsequent interpolation is edge-clamped.
pub fn interp_coord(x: f64, axis: &[f64]) -> FractIndex {
    if axis.len() < 2 || x <= axis[0] {
        return FractIndex { index: 0, fraction: 0.0 };
    }
    let last = axis.len() - 1;
    if x >= axis[last] {
        return FractIndex { index: last - 1, fraction: 1.0 };
    }
    let mut index = 0;
    for i in 0..last {
        if x >= axis[i] && x < axis[i + 1] {
            index = i;
            break;
        }
    }
    let fraction = (x - axis[index]) / (axis[index + 1] - axis[index]);
    FractIndex { index, fraction }
}

/// Simple linear interpolation between two samples; degenerate intervals
/// return the left value.
pub fn linear_interp<T: num_traits::Float>(x: T, x1: T, x2: T, y1: T, y2: T) -> T {
    if x1 == x2 {
        y1
    } else {
        y1 + (y2 - y1) / (x2 - x1) * (x - x1)
    }
}

/// N-dimensional lookup table with optional per-dimension axis grids.
///
/// Data is stored row-major; leading dimensions may be fixed by integer
/// index while the trailing dimensions are interpolated multilinearly.
#[derive(Debug, Clone)]
pub struct LookupTable {
    dims: Vec<usize>,
    axes: Vec<Option<Vec<f64>>>,
    data: Vec<f64>,
}

impl LookupTable {
    pub fn new(dims: Vec<usize>, data: Vec<f64>) -> ScreenResult<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(ScreenError::AuxData(format!(
                "lookup table size mismatch: dims {:?} require {} values, got {}",
                dims,
                expected,
                data.len()
            )));
        }
        let axes = vec![None; dims.len()];
        Ok(Self { dims, axes, data })
    }

    /// Attach the axis grid for one dimension; the grid must be ascending
    /// and match the dimension length.
    pub fn with_axis(mut self, dim: usize, axis: Vec<f64>) -> ScreenResult<Self> {
        if axis.len() != self.dims[dim] {
            return Err(ScreenError::AuxData(format!(
                "axis length {} does not match dimension {} of size {}",
                axis.len(),
                dim,
                self.dims[dim]
            )));
        }
        if axis.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ScreenError::AuxData(format!(
                "axis for dimension {} is not strictly ascending",
                dim
            )));
        }
        self.axes[dim] = Some(axis);
        Ok(self)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn axis(&self, dim: usize) -> &[f64] {
        self.axes[dim]
            .as_deref()
            .expect("lookup table dimension has no axis grid")
    }

    /// Fractional coordinate of `x` on the axis of `dim`
    pub fn coord(&self, dim: usize, x: f64) -> FractIndex {
        interp_coord(x, self.axis(dim))
    }

    /// Raw table value at integer indices
    pub fn value(&self, indices: &[usize]) -> f64 {
        debug_assert_eq!(indices.len(), self.dims.len());
        let mut offset = 0;
        for (i, &idx) in indices.iter().enumerate() {
            offset = offset * self.dims[i] + idx;
        }
        self.data[offset]
    }

    /// Multilinear interpolation with the leading dimensions fixed.
    ///
    /// `lead` holds integer indices for the first `lead.len()` dimensions;
    /// `coords` holds fractional coordinates for the remaining ones.
    pub fn interpolate(&self, lead: &[usize], coords: &[FractIndex]) -> f64 {
        debug_assert_eq!(lead.len() + coords.len(), self.dims.len());

        let mut base = 0usize;
        for (i, &idx) in lead.iter().enumerate() {
            base = base * self.dims[i] + idx;
        }

        // strides of the interpolated dimensions
        let n = coords.len();
        let mut strides = vec![1usize; n];
        for i in (0..n).rev() {
            if i + 1 < n {
                strides[i] = strides[i + 1] * self.dims[lead.len() + i + 1];
            }
        }
        let trailing: usize = self.dims[lead.len()..].iter().product();
        let base = base * trailing;

        let mut result = 0.0;
        for corner in 0..(1usize << n) {
            let mut weight = 1.0;
            let mut offset = base;
            for (d, c) in coords.iter().enumerate() {
                let dim_len = self.dims[lead.len() + d];
                let upper = corner >> d & 1 == 1;
                let idx = if upper {
                    (c.index + 1).min(dim_len - 1)
                } else {
                    c.index
                };
                weight *= if upper { c.fraction } else { 1.0 - c.fraction };
                offset += idx * strides[d];
            }
            if weight != 0.0 {
                result += weight * self.data[offset];
            }
        }
        result
    }
}
