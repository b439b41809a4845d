use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use mime::Mime;
use thiserror::Error;

use crate::buffer::PixelBuffer;
use crate::config::ResultType;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode zero-area buffer ({width}x{height})")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("{format} encoding failed: {source}")]
    EncodingFailed {
        format: &'static str,
        source: image::ImageError,
    },
    #[error("malformed data url")]
    InvalidDataUrl,
}

/// Encoded image bytes with the MIME type actually produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub mime: Mime,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Encode to `mime_type`. JPEG honours `quality` (0..=1); anything that is not JPEG
/// is written as lossless PNG and reported as `image/png`.
pub fn encode(buffer: &PixelBuffer, mime_type: &str, quality: f64) -> Result<Encoded, EncodeError> {
    let (width, height) = buffer.dimensions();
    if buffer.is_empty() {
        return Err(EncodeError::InvalidDimensions { width, height });
    }
    let mut out = Cursor::new(Vec::new());
    let mime = if is_jpeg(mime_type) {
        let q = jpeg_quality(quality);
        let rgb = flatten_over_black(buffer.as_raw());
        JpegEncoder::new_with_quality(&mut out, q)
            .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|source| EncodeError::EncodingFailed {
                format: "jpeg",
                source,
            })?;
        mime::IMAGE_JPEG
    } else {
        PngEncoder::new(&mut out)
            .write_image(buffer.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|source| EncodeError::EncodingFailed {
                format: "png",
                source,
            })?;
        mime::IMAGE_PNG
    };
    let bytes = out.into_inner();
    tracing::debug!(mime = %mime, bytes = bytes.len(), width, height, "encoded image");
    Ok(Encoded {
        mime,
        bytes,
        width,
        height,
    })
}

/// True for `image/jpeg`, ignoring parameters.
pub(crate) fn is_jpeg(mime_type: &str) -> bool {
    mime_type
        .trim()
        .parse::<Mime>()
        .map(|m| m.essence_str() == mime::IMAGE_JPEG.essence_str())
        .unwrap_or(false)
}

/// Map [0,1] to the JPEG encoder's 1..=100 scale.
fn jpeg_quality(quality: f64) -> u8 {
    let q = if quality.is_nan() { 1.0 } else { quality };
    ((q.clamp(0.0, 1.0) * 100.0).round() as u8).clamp(1, 100)
}

/// JPEG has no alpha; composite onto black like a canvas export does.
fn flatten_over_black(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        let a = px[3] as u32;
        for &c in &px[..3] {
            rgb.push(((c as u32 * a + 127) / 255) as u8);
        }
    }
    rgb
}

/// Caller-facing representation of the encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedResult {
    /// `data:<mime>;base64,<payload>`
    DataUrl(String),
    Binary { mime: Mime, bytes: Vec<u8> },
}

impl EncodedResult {
    /// The exact encoded bytes, whichever representation holds them.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            EncodedResult::DataUrl(url) => parse_data_url(url).map(|(_, bytes)| bytes),
            EncodedResult::Binary { bytes, .. } => Ok(bytes.clone()),
        }
    }

    pub fn mime(&self) -> Result<Mime, EncodeError> {
        match self {
            EncodedResult::DataUrl(url) => parse_data_url(url).map(|(mime, _)| mime),
            EncodedResult::Binary { mime, .. } => Ok(mime.clone()),
        }
    }
}

/// Change representation only; the encoded content is untouched.
pub fn reformat(encoded: &Encoded, result_type: ResultType) -> EncodedResult {
    match result_type {
        ResultType::Base64 => EncodedResult::DataUrl(format!(
            "data:{};base64,{}",
            encoded.mime,
            STANDARD.encode(&encoded.bytes)
        )),
        ResultType::Binary => EncodedResult::Binary {
            mime: encoded.mime.clone(),
            bytes: encoded.bytes.clone(),
        },
    }
}

fn parse_data_url(url: &str) -> Result<(Mime, Vec<u8>), EncodeError> {
    let rest = url.strip_prefix("data:").ok_or(EncodeError::InvalidDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(EncodeError::InvalidDataUrl)?;
    let mime_str = header
        .strip_suffix(";base64")
        .ok_or(EncodeError::InvalidDataUrl)?;
    let mime = mime_str
        .parse::<Mime>()
        .map_err(|_| EncodeError::InvalidDataUrl)?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| EncodeError::InvalidDataUrl)?;
    Ok((mime, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PixelBuffer {
        let mut raw = Vec::new();
        for i in 0..64u32 {
            raw.extend_from_slice(&[(i * 4) as u8, 100, 200, 255]);
        }
        PixelBuffer::from_raw(8, 8, raw).unwrap()
    }

    fn noisy(w: u32, h: u32) -> PixelBuffer {
        let mut raw = Vec::new();
        for i in 0..w * h {
            let v = (i.wrapping_mul(2654435761) >> 13) as u8;
            raw.extend_from_slice(&[v, v.wrapping_mul(3), v ^ 0x5a, 255]);
        }
        PixelBuffer::from_raw(w, h, raw).unwrap()
    }

    #[test]
    fn jpeg_uses_quality() {
        let buf = noisy(64, 64);
        let low = encode(&buf, "image/jpeg", 0.1).unwrap();
        let high = encode(&buf, "image/jpeg", 1.0).unwrap();
        assert_eq!(low.mime, mime::IMAGE_JPEG);
        assert_eq!(&low.bytes[..2], &[0xFF, 0xD8]);
        assert!(low.bytes.len() < high.bytes.len());
    }

    #[test]
    fn png_is_lossless_and_ignores_quality() {
        let buf = sample();
        let a = encode(&buf, "image/png", 0.1).unwrap();
        let b = encode(&buf, "image/png", 1.0).unwrap();
        assert_eq!(a, b);
        let back = image::load_from_memory(&a.bytes).unwrap().to_rgba8();
        assert_eq!(back.into_raw(), buf.as_raw());
    }

    #[test]
    fn unknown_mime_falls_back_to_png() {
        let enc = encode(&sample(), "image/webp", 0.5).unwrap();
        assert_eq!(enc.mime, mime::IMAGE_PNG);
        let enc = encode(&sample(), "", 0.5).unwrap();
        assert_eq!(enc.mime, mime::IMAGE_PNG);
    }

    #[test]
    fn jpeg_detection_ignores_parameters() {
        assert!(is_jpeg("image/jpeg"));
        assert!(is_jpeg("image/jpeg; q=0.9"));
        assert!(!is_jpeg("image/png"));
        assert!(!is_jpeg(""));
    }

    #[test]
    fn quality_mapping() {
        assert_eq!(jpeg_quality(1.0), 100);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(0.92), 92);
        assert_eq!(jpeg_quality(7.0), 100);
    }

    #[test]
    fn alpha_composites_over_black() {
        assert_eq!(flatten_over_black(&[255, 128, 0, 0]), vec![0, 0, 0]);
        assert_eq!(flatten_over_black(&[255, 128, 2, 255]), vec![255, 128, 2]);
    }

    #[test]
    fn reformat_keeps_content() {
        let enc = encode(&sample(), "image/png", 1.0).unwrap();
        let url = reformat(&enc, ResultType::Base64);
        match &url {
            EncodedResult::DataUrl(s) => assert!(s.starts_with("data:image/png;base64,")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(url.to_bytes().unwrap(), enc.bytes);
        assert_eq!(url.mime().unwrap(), mime::IMAGE_PNG);

        let bin = reformat(&enc, ResultType::Binary);
        assert_eq!(bin.to_bytes().unwrap(), enc.bytes);
    }

    #[test]
    fn zero_area_rejected() {
        let empty = PixelBuffer::from_raw(0, 0, Vec::new()).unwrap();
        assert!(matches!(
            encode(&empty, "image/png", 1.0),
            Err(EncodeError::InvalidDimensions { .. })
        ));
    }
}
