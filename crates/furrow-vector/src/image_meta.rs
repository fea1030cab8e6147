//! Image header and EXIF metadata.
//!
//! Runs independently of embedding generation so a photo keeps its
//! dimensions and capture data even when no vector can be produced.

use std::io::{BufReader, Cursor};

use chrono::NaiveDateTime;
use exif::{In, Reader, Tag, Value};
use serde::Serialize;
use tracing::debug;

use furrow_core::error::FurrowError;

/// Metadata read from an encoded image.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub exif_lat: Option<f64>,
    pub exif_lon: Option<f64>,
    /// Capture time, epoch milliseconds.
    pub exif_timestamp: Option<i64>,
}

/// Probe dimensions and format, then read GPS and capture time from EXIF.
///
/// Fails only when the bytes are not a recognisable image. Missing or
/// unreadable EXIF leaves the EXIF fields `None`.
pub fn extract_image_metadata(bytes: &[u8]) -> Result<ImageMetadata, FurrowError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FurrowError::Image(format!("format detection: {}", e)))?;
    let format = reader
        .format()
        .map(|f| format!("{:?}", f).to_lowercase());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| FurrowError::Image(format!("dimensions: {}", e)))?;

    let mut metadata = ImageMetadata {
        width: Some(width),
        height: Some(height),
        format,
        ..Default::default()
    };

    match Reader::new().read_from_container(&mut BufReader::new(Cursor::new(bytes))) {
        Ok(exif) => {
            metadata.exif_lat = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S');
            metadata.exif_lon =
                gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W');
            metadata.exif_timestamp = capture_time(&exif);
        }
        Err(e) => debug!(error = %e, "No EXIF data"),
    }

    Ok(metadata)
}

/// Degrees/minutes/seconds to signed decimal degrees, 6 places.
fn gps_coordinate(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative: char) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let dms = match &field.value {
        Value::Rational(parts) if parts.len() >= 3 => parts,
        _ => return None,
    };
    let decimal = dms_to_decimal(dms[0].to_f64(), dms[1].to_f64(), dms[2].to_f64());

    let sign = match exif.get_field(ref_tag, In::PRIMARY).map(|f| &f.value) {
        Some(Value::Ascii(refs)) => match refs.first().and_then(|r| r.first()) {
            Some(&c) if (c as char).eq_ignore_ascii_case(&negative) => -1.0,
            _ => 1.0,
        },
        _ => 1.0,
    };
    Some(round6(sign * decimal))
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

/// `DateTimeOriginal`, read as UTC.
fn capture_time(exif: &exif::Exif) -> Option<i64> {
    let field = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)?;
    let raw = match &field.value {
        Value::Ascii(values) => values.first()?,
        _ => return None,
    };
    let text = std::str::from_utf8(raw).ok()?;
    parse_exif_datetime(text)
}

fn parse_exif_datetime(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

    fn encoded(w: u32, h: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(w, h, |x, _| Rgb([x as u8, 120u8, 40u8]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_png_dimensions_without_exif() {
        let meta = extract_image_metadata(&encoded(64, 48, ImageFormat::Png)).unwrap();
        assert_eq!(meta.width, Some(64));
        assert_eq!(meta.height, Some(48));
        assert_eq!(meta.format.as_deref(), Some("png"));
        assert_eq!(meta.exif_lat, None);
        assert_eq!(meta.exif_lon, None);
        assert_eq!(meta.exif_timestamp, None);
    }

    #[test]
    fn test_jpeg_format_detected() {
        let meta = extract_image_metadata(&encoded(10, 20, ImageFormat::Jpeg)).unwrap();
        assert_eq!(meta.format.as_deref(), Some("jpeg"));
        assert_eq!((meta.width, meta.height), (Some(10), Some(20)));
    }

    #[test]
    fn test_garbage_is_image_error() {
        assert!(matches!(
            extract_image_metadata(b"definitely not an image"),
            Err(FurrowError::Image(_))
        ));
    }

    #[test]
    fn test_dms_conversion_and_rounding() {
        // 41 deg 52' 30.1234" -> 41.875034...
        let v = round6(dms_to_decimal(41.0, 52.0, 30.1234));
        assert_eq!(v, 41.875034);
        assert_eq!(round6(-dms_to_decimal(87.0, 37.0, 0.0)), -87.616667);
    }

    #[test]
    fn test_exif_datetime_is_utc_millis() {
        assert_eq!(
            parse_exif_datetime("2024:06:01 12:30:00"),
            Some(1_717_245_000_000)
        );
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime("yesterday"), None);
    }
}
