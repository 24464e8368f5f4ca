use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Resize to `size`x`size` and pack as a `[1, size, size, 3]` RGB tensor
/// scaled to 0.0-1.0.
pub fn to_input_tensor(image: &RgbImage, size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, size, size, FilterType::Triangle);
    let s = size as usize;
    Array4::from_shape_fn((1, s, s, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_tensor_shape() {
        let image = RgbImage::new(64, 48);
        let tensor = to_input_tensor(&image, 32);
        assert_eq!(tensor.shape(), &[1, 32, 32, 3]);
    }

    #[test]
    fn test_tensor_values_scaled() {
        let image = RgbImage::from_pixel(40, 30, Rgb([255, 0, 51]));
        let tensor = to_input_tensor(&image, 16);
        assert!((tensor[[0, 5, 7, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 5, 7, 1]].abs() < 1e-6);
        assert!((tensor[[0, 15, 15, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_tensor_keeps_channel_order() {
        // left half red, right half blue
        let image = RgbImage::from_fn(64, 64, |x, _| if x < 32 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
        let tensor = to_input_tensor(&image, 8);
        assert!(tensor[[0, 4, 0, 0]] > 0.9);
        assert!(tensor[[0, 4, 7, 2]] > 0.9);
    }
}
