use std::io::Cursor;

use thiserror::Error;

use crate::buffer::PixelBuffer;
use crate::orientation::Orientation;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("decode task failed: {0}")]
    Task(String),
}

/// Output of the decode collaborator: stored pixels plus the camera orientation, if any.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub buffer: PixelBuffer,
    pub orientation: Option<Orientation>,
}

/// Decode file bytes to RGBA8. The EXIF orientation is only read when `read_orientation` is set.
pub fn decode(bytes: &[u8], read_orientation: bool) -> Result<Decoded, DecodeError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::Empty { width, height });
    }
    let orientation = if read_orientation {
        extract_exif_orientation(bytes).map(Orientation::from_exif)
    } else {
        None
    };
    Ok(Decoded {
        buffer: PixelBuffer::from(img),
        orientation,
    })
}

/// Decode on the blocking pool so large files don't stall the runtime.
pub async fn decode_async(bytes: Vec<u8>, read_orientation: bool) -> Result<Decoded, DecodeError> {
    tokio::task::spawn_blocking(move || decode(&bytes, read_orientation))
        .await
        .map_err(|e| DecodeError::Task(e.to_string()))?
}

/// Raw EXIF orientation tag from the primary IFD. Missing or malformed metadata yields `None`.
fn extract_exif_orientation(bytes: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(e) => {
            tracing::trace!(error = %e, "no readable exif data");
            return None;
        }
    };
    let field = reader.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    if let Some(val) = field.value.get_uint(0) {
        return Some(val);
    }
    // Some writers store the tag with an odd type; fall back to the display string.
    let disp = field.display_value().to_string();
    match disp.trim().parse::<u32>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::debug!(value = %disp, "unparsable orientation tag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use super::test_support::jpeg_with_orientation;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn decodes_png_without_orientation() {
        let decoded = decode(&png_bytes(5, 3), true).unwrap();
        assert_eq!(decoded.buffer.dimensions(), (5, 3));
        assert_eq!(decoded.buffer.pixel(4, 2), [1, 2, 3, 255]);
        assert_eq!(decoded.orientation, None);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode(b"definitely not an image", true).unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn exif_orientation_is_read_from_jpeg() {
        let jpeg = jpeg_with_orientation(6);
        assert_eq!(extract_exif_orientation(&jpeg), Some(6));
        let decoded = decode(&jpeg, true).unwrap();
        assert_eq!(decoded.orientation, Some(Orientation::Rotate90));
        let ignored = decode(&jpeg, false).unwrap();
        assert_eq!(ignored.orientation, None);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use image::ImageFormat;

    /// Tiny JPEG with an APP1 EXIF segment spliced in after SOI.
    pub(crate) fn jpeg_with_orientation(code: u16) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([9, 9, 9]));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let field = exif::Field {
            tag: exif::Tag::Orientation,
            ifd_num: exif::In::PRIMARY,
            value: exif::Value::Short(vec![code]),
        };
        let mut writer = exif::experimental::Writer::new();
        writer.push_field(&field);
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, false).unwrap();
        let tiff = tiff.into_inner();

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);
        let len = (app1.len() + 2) as u16;
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }
}
