//! Hilbert curve utilities.
//!
//! The Hilbert curve is a continuous space-filling curve that maps 2D
//! coordinates to a 1D index while preserving spatial locality. The Hilbert
//! R-tree orders its leaves by this index.
//!
//! ## Spatial Locality
//! Points that are close in 2D space remain relatively close along the Hilbert
//! curve, so sorting by the index clusters related entries into the same
//! leaves.

use crate::rectangle::Rectangle;

/// Maximum order of the curve; order 32 uses all 64 bits of the index.
pub const MAX_HILBERT_ORDER: u32 = 32;

/// Encodes 2D coordinates normalised to `[0, 1]` to a Hilbert curve index.
///
/// Coordinates outside the unit square are clamped onto it.
///
/// # Example
/// ```
/// use pagetree_spatial::hilbert::hilbert_index;
///
/// let index = hilbert_index(0.5, 0.5, 16);
/// assert!(index < (1u64 << 32)); // At order 16, max index is 2^32-1
/// ```
pub fn hilbert_index(x: f64, y: f64, order: u32) -> u64 {
    debug_assert!(order > 0 && order <= MAX_HILBERT_ORDER, "order must be 1-32");
    let order = order.clamp(1, MAX_HILBERT_ORDER);

    // order 32 spans the full u64 range, 1 << 32 fits in u64 but n * n does not
    let n = 1u64 << order;
    let cell = |v: f64| -> u64 {
        let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        ((v * (n as f64 - 0.5)) as u64).min(n - 1)
    };

    xy2d(n, cell(x), cell(y))
}

/// Encodes the first two coordinates of `point`, taken relative to the first
/// two axes of `universe`.
///
/// A degenerate universe axis maps every coordinate to its middle.
pub fn hilbert_index_in(point: &[f64], universe: &Rectangle, order: u32) -> u64 {
    let normalize = |axis: usize| -> f64 {
        let value = point.get(axis).copied().unwrap_or(0.0);
        if axis >= universe.dims() {
            return 0.5;
        }
        let extent = universe.extent(axis);
        if extent > 0.0 {
            (value - universe.lower(axis)) / extent
        } else {
            0.5
        }
    };
    hilbert_index(normalize(0), normalize(1), order)
}

/// Converts grid cell `(x, y)` of an `n`×`n` grid to its distance along the
/// curve.
fn xy2d(n: u64, mut x: u64, mut y: u64) -> u64 {
    let mut d = 0u64;
    let mut s = n / 2;

    while s > 0 {
        let rx = u64::from((x & s) > 0);
        let ry = u64::from((y & s) > 0);
        d = d.wrapping_add(s.wrapping_mul(s).wrapping_mul((3 * rx) ^ ry));
        rotate(n, &mut x, &mut y, rx, ry);
        s /= 2;
    }

    d
}

/// Rotates/flips a quadrant appropriately.
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n.wrapping_sub(1).wrapping_sub(*x);
            *y = n.wrapping_sub(1).wrapping_sub(*y);
        }
        std::mem::swap(x, y);
    }
}
