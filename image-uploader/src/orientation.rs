use image::imageops;

use crate::buffer::PixelBuffer;

/// EXIF orientation codes 1-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    MirrorHorizontal,
    Rotate180,
    MirrorVertical,
    /// Rotate 90° clockwise, then mirror horizontally (transpose).
    Rotate90MirrorHorizontal,
    Rotate90,
    /// Rotate 90° counter-clockwise, then mirror horizontally (transverse).
    Rotate270MirrorHorizontal,
    Rotate270,
}

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::Normal,
        Orientation::MirrorHorizontal,
        Orientation::Rotate180,
        Orientation::MirrorVertical,
        Orientation::Rotate90MirrorHorizontal,
        Orientation::Rotate90,
        Orientation::Rotate270MirrorHorizontal,
        Orientation::Rotate270,
    ];

    /// Map a raw tag value. Anything outside 1-8 is treated as `Normal`.
    pub fn from_exif(code: u32) -> Self {
        match code {
            2 => Orientation::MirrorHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::MirrorVertical,
            5 => Orientation::Rotate90MirrorHorizontal,
            6 => Orientation::Rotate90,
            7 => Orientation::Rotate270MirrorHorizontal,
            8 => Orientation::Rotate270,
            1 => Orientation::Normal,
            other => {
                tracing::debug!(code = other, "ignoring out-of-range orientation tag");
                Orientation::Normal
            }
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Orientation::Normal => 1,
            Orientation::MirrorHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::MirrorVertical => 4,
            Orientation::Rotate90MirrorHorizontal => 5,
            Orientation::Rotate90 => 6,
            Orientation::Rotate270MirrorHorizontal => 7,
            Orientation::Rotate270 => 8,
        }
    }

    /// 90°-family codes (5-8) swap width and height.
    pub fn swaps_dimensions(self) -> bool {
        self.code() > 4
    }

    /// Orientation whose operation undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Orientation::Rotate90 => Orientation::Rotate270,
            Orientation::Rotate270 => Orientation::Rotate90,
            other => other,
        }
    }
}

/// Apply the orientation transform, producing a canonically oriented buffer.
/// `None` and `Normal` return the input untouched.
pub fn normalize(buffer: PixelBuffer, orientation: Option<Orientation>) -> PixelBuffer {
    let orientation = orientation.unwrap_or_default();
    if orientation == Orientation::Normal || buffer.is_empty() {
        return buffer;
    }
    let src = buffer.to_image();
    let out = match orientation {
        Orientation::Normal => return buffer,
        Orientation::MirrorHorizontal => imageops::flip_horizontal(&src),
        Orientation::Rotate180 => imageops::rotate180(&src),
        Orientation::MirrorVertical => imageops::flip_vertical(&src),
        Orientation::Rotate90MirrorHorizontal => {
            imageops::flip_horizontal(&imageops::rotate90(&src))
        }
        Orientation::Rotate90 => imageops::rotate90(&src),
        Orientation::Rotate270MirrorHorizontal => {
            imageops::flip_horizontal(&imageops::rotate270(&src))
        }
        Orientation::Rotate270 => imageops::rotate270(&src),
    };
    tracing::trace!(
        code = orientation.code(),
        src_w = buffer.width(),
        src_h = buffer.height(),
        dst_w = out.width(),
        dst_h = out.height(),
        "applied orientation"
    );
    PixelBuffer::from(out)
}
