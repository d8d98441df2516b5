use image::ImageReader;
use image::imageops::FilterType;
use std::path::Path;

use super::InferenceError;

/// RGB pixels scaled to `[0, 1]`, channel-major (3 × size × size).
#[derive(Debug, Clone)]
pub struct FrameTensor {
    pub data: Vec<f32>,
    pub size: u32,
}

impl FrameTensor {
    pub fn shape(&self) -> [usize; 3] {
        [3, self.size as usize, self.size as usize]
    }
}

pub fn load_frame(path: &Path, size: u32) -> Result<FrameTensor, InferenceError> {
    let image = ImageReader::open(path)
        .map_err(|e| InferenceError::Preprocessing(format!("cannot open {}: {}", path.display(), e)))?
        .with_guessed_format()
        .map_err(|e| InferenceError::Preprocessing(format!("cannot read {}: {}", path.display(), e)))?
        .decode()
        .map_err(|e| {
            InferenceError::Preprocessing(format!("cannot decode {}: {}", path.display(), e))
        })?;

    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        for channel in 0..3 {
            data[channel * plane + i] = pixel[channel] as f32 / 255.0;
        }
    }
    Ok(FrameTensor { data, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn frames_are_resized_normalized_and_channel_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(10, 6, Rgb([255, 0, 51])).save(&path).unwrap();

        let frame = load_frame(&path, 4).unwrap();
        assert_eq!(frame.shape(), [3, 4, 4]);
        assert_eq!(frame.data.len(), 48);
        assert!(frame.data[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(frame.data[16..32].iter().all(|v| v.abs() < 1e-6));
        assert!(frame.data[32..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn undecodable_file_is_a_preprocessing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(load_frame(&path, 4), Err(InferenceError::Preprocessing(_))));
    }
}
