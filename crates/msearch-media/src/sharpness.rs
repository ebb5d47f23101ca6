//! Laplacian-variance sharpness scoring, used to pick the best representative
//! frame within a scene once its anchor is known to be a keeper.

/// Variance of the 3x3 Laplacian response over a grayscale image. Higher
/// means more high-frequency detail (in focus, not motion-blurred).
pub fn laplacian_variance(gray: &[u8], width: u32, height: u32) -> f64 {
    let w = width as i64;
    let h = height as i64;
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: i64, y: i64| -> f64 { gray[(y * w + x) as usize] as f64 };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let value = -4.0 * at(x, y) + at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1);
            sum += value;
            sum_sq += value * value;
            count += 1.0;
        }
    }
    if count == 0.0 {
        return 0.0;
    }
    let mean = sum / count;
    (sum_sq / count) - (mean * mean)
}

/// Convert a packed RGB24 buffer to grayscale using the standard luma weights.
pub fn rgb24_to_gray(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut gray = Vec::with_capacity(pixel_count);
    for chunk in rgb.chunks_exact(3).take(pixel_count) {
        let (r, g, b) = (chunk[0] as f64, chunk[1] as f64, chunk[2] as f64);
        gray.push((0.299 * r + 0.587 * g + 0.114 * b).round() as u8);
    }
    gray
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_has_zero_variance() {
        let gray = vec![128u8; 16 * 16];
        assert_eq!(laplacian_variance(&gray, 16, 16), 0.0);
    }

    #[test]
    fn checkerboard_has_positive_variance() {
        let mut gray = vec![0u8; 8 * 8];
        for y in 0..8 {
            for x in 0..8 {
                if (x + y) % 2 == 0 {
                    gray[y * 8 + x] = 255;
                }
            }
        }
        assert!(laplacian_variance(&gray, 8, 8) > 0.0);
    }

    #[test]
    fn rgb_to_gray_has_expected_length() {
        let rgb = vec![255u8; 4 * 3];
        let gray = rgb24_to_gray(&rgb, 2, 2);
        assert_eq!(gray.len(), 4);
        assert_eq!(gray[0], 255);
    }
}
