use crate::buffer::PixelBuffer;

/// Bounds for the scaled output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTarget {
    pub max_width: u32,
    pub max_height: u32,
    /// When false only `max_height` (via the aspect ratio) bounds the width.
    pub auto_scale: bool,
    /// Optional cap as a fraction of the source width.
    pub explicit_ratio: Option<f64>,
    /// Lossy encode quality in [0,1]; carried along for the encoder.
    pub quality: f64,
}

impl Default for ScaleTarget {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            auto_scale: true,
            explicit_ratio: None,
            quality: 1.0,
        }
    }
}

/// Effective target width for a `width`x`height` source. Never below 1.
pub fn desired_width(width: u32, height: u32, target: &ScaleTarget) -> f64 {
    let ratio = width as f64 / height as f64;
    let by_height = ratio * target.max_height as f64;
    let mut desired = if target.auto_scale {
        (target.max_width as f64).min(by_height)
    } else {
        by_height
    };
    // A zero ratio means "unset".
    if let Some(r) = target.explicit_ratio.filter(|r| *r != 0.0 && !r.is_nan()) {
        desired = desired.min((r * width as f64).floor());
    }
    // f64::max maps NaN to 1 as well.
    desired.max(1.0)
}

/// Downscale `buffer` so its width does not exceed the effective target width.
/// Buffers already within bounds are returned unchanged.
pub fn scale(buffer: PixelBuffer, target: &ScaleTarget) -> PixelBuffer {
    if buffer.is_empty() {
        tracing::warn!(
            width = buffer.width(),
            height = buffer.height(),
            "skipping scale of zero-area buffer"
        );
        return buffer;
    }
    let desired = desired_width(buffer.width(), buffer.height(), target);
    let mut current = buffer;

    let mut halvings = 0u32;
    while current.width() as f64 >= 2.0 * desired {
        current = halve(&current);
        halvings += 1;
    }
    if halvings > 0 {
        tracing::debug!(
            halvings,
            width = current.width(),
            height = current.height(),
            desired,
            "halving phase done"
        );
    }

    if current.width() as f64 > desired {
        let scale = desired / current.width() as f64;
        current = bilinear_resample(&current, scale);
        tracing::debug!(
            width = current.width(),
            height = current.height(),
            scale,
            "bilinear phase done"
        );
    }
    current
}

/// Half width and half height, nearest-pixel sampling on the halved grid.
fn halve(src: &PixelBuffer) -> PixelBuffer {
    let dst_w = (src.width() / 2).max(1);
    let dst_h = (src.height() / 2).max(1);
    let mut out = Vec::with_capacity(dst_w as usize * dst_h as usize * 4);
    for y in 0..dst_h {
        let sy = (y * 2).min(src.height() - 1);
        for x in 0..dst_w {
            let sx = (x * 2).min(src.width() - 1);
            out.extend_from_slice(&src.pixel(sx, sy));
        }
    }
    PixelBuffer::from_raw(dst_w, dst_h, out).unwrap_or_else(|| src.clone())
}

/// Resample by `scale` (< 1) with bilinear interpolation per channel.
fn bilinear_resample(src: &PixelBuffer, scale: f64) -> PixelBuffer {
    // Truncate, not round: may land one pixel under the target, never over it.
    let dst_w = ((src.width() as f64 * scale) as u32).max(1);
    let dst_h = ((src.height() as f64 * scale) as u32).max(1);
    let max_x = src.width() - 1;
    let max_y = src.height() - 1;
    let raw = src.as_raw();
    let mut out = vec![0u8; dst_w as usize * dst_h as usize * 4];

    for i in 0..dst_h {
        let iyv = i as f64 / scale;
        let iy0 = (iyv.floor() as u32).min(max_y);
        // ceil can land one past the last row
        let iy1 = (iyv.ceil() as u32).min(max_y);
        let dy = iyv - iy0 as f64;
        for j in 0..dst_w {
            let ixv = j as f64 / scale;
            let ix0 = (ixv.floor() as u32).min(max_x);
            let ix1 = (ixv.ceil() as u32).min(max_x);
            let dx = ixv - ix0 as f64;

            let s00 = src.index(ix0, iy0);
            let s10 = src.index(ix1, iy0);
            let s01 = src.index(ix0, iy1);
            let s11 = src.index(ix1, iy1);
            let d = (i as usize * dst_w as usize + j as usize) * 4;
            for c in 0..4 {
                let v = bilinear(
                    raw[s00 + c] as f64,
                    raw[s10 + c] as f64,
                    raw[s01 + c] as f64,
                    raw[s11 + c] as f64,
                    dx,
                    dy,
                );
                out[d + c] = to_channel(v);
            }
        }
    }
    PixelBuffer::from_raw(dst_w, dst_h, out).unwrap_or_else(|| src.clone())
}

pub(crate) fn bilinear(f00: f64, f10: f64, f01: f64, f11: f64, dx: f64, dy: f64) -> f64 {
    let ux = 1.0 - dx;
    let uy = 1.0 - dy;
    f00 * ux * uy + f10 * dx * uy + f01 * ux * dy + f11 * dx * dy
}

/// Clamped, round-half-to-even conversion (canvas ImageData semantics).
fn to_channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0).round_ties_even() as u8
}
