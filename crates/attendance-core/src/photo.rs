//! Submitted photos: base64/data-URL decoding and brightness checks.

use base64::Engine;
use image::RgbImage;

/// A decoded photo, always held as 8-bit RGB.
#[derive(Clone)]
pub struct Photo {
    pub rgb: RgbImage,
}

impl Photo {
    pub fn from_rgb(rgb: RgbImage) -> Self {
        Self { rgb }
    }

    /// Decode a base64 photo, optionally wrapped as a data URL
    /// (`data:image/jpeg;base64,...`). Format is sniffed from the bytes.
    pub fn decode_base64(data: &str) -> Result<Self, PhotoError> {
        let payload = match data.split_once(',') {
            Some((_, rest)) => rest,
            None => data,
        };
        let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| PhotoError::InvalidBase64(e.to_string()))?;

        let decoded =
            image::load_from_memory(&bytes).map_err(|e| PhotoError::Undecodable(e.to_string()))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(PhotoError::Empty);
        }

        Ok(Self {
            rgb: decoded.to_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    fn pixel_count(&self) -> usize {
        self.rgb.width() as usize * self.rgb.height() as usize
    }

    /// Rec. 601 luma per pixel.
    fn luma(&self) -> impl Iterator<Item = u8> + '_ {
        self.rgb.pixels().map(|p| {
            let [r, g, b] = p.0;
            ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
        })
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let count = self.pixel_count();
        if count == 0 {
            return 0.0;
        }
        self.luma().map(|l| l as f32).sum::<f32>() / count as f32
    }

    /// True when more than `threshold_pct` of pixels fall in the darkest
    /// histogram bucket (luma 0–31).
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        let count = self.pixel_count();
        if count == 0 {
            return true;
        }
        let dark = self.luma().filter(|&l| l < 32).count();
        (dark as f32 / count as f32) > threshold_pct
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error("invalid base64: {0}")]
    InvalidBase64(String),
    #[error("could not decode image: {0}")]
    Undecodable(String),
    #[error("image has no pixels")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(img: &RgbImage) -> String {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_plain_base64() {
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 200, 30]));
        let photo = Photo::decode_base64(&encode_png(&img)).unwrap();
        assert_eq!((photo.width(), photo.height()), (4, 3));
        assert_eq!(photo.rgb.get_pixel(0, 0).0, [10, 200, 30]);
    }

    #[test]
    fn test_decode_data_url() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let url = format!("data:image/png;base64,{}", encode_png(&img));
        let photo = Photo::decode_base64(&url).unwrap();
        assert_eq!(photo.width(), 2);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(matches!(
            Photo::decode_base64("data:image/png;base64,@@@"),
            Err(PhotoError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"definitely not a picture");
        assert!(matches!(
            Photo::decode_base64(&payload),
            Err(PhotoError::Undecodable(_))
        ));
    }

    #[test]
    fn test_brightness() {
        let photo = Photo::from_rgb(RgbImage::from_pixel(8, 8, Rgb([128, 128, 128])));
        assert!((photo.avg_brightness() - 128.0).abs() < 1.0);
        assert!(!photo.is_dark(0.95));
    }

    #[test]
    fn test_dark_photo() {
        let photo = Photo::from_rgb(RgbImage::from_pixel(8, 8, Rgb([5, 5, 5])));
        assert!(photo.is_dark(0.95));
    }

    #[test]
    fn test_mostly_dark_photo() {
        // 60 of 64 pixels dark (93.75%) is under a 95% cutoff
        let mut img = RgbImage::from_pixel(8, 8, Rgb([5, 5, 5]));
        for x in 0..4 {
            img.put_pixel(x, 0, Rgb([200, 200, 200]));
        }
        let photo = Photo::from_rgb(img);
        assert!(!photo.is_dark(0.95));
        assert!(photo.is_dark(0.90));
    }
}
