use std::f64::consts::PI;

use image::imageops::FilterType;
use image::DynamicImage;

const SAMPLE_EDGE: usize = 32;
const HASH_EDGE: usize = 8;
const HASH_BITS: f64 = (HASH_EDGE * HASH_EDGE) as f64;

/// 64-bit perceptual hash: low-frequency DCT block thresholded at its median.
pub fn phash(image: &DynamicImage) -> u64 {
    let gray = image::imageops::resize(
        &image.to_luma8(),
        SAMPLE_EDGE as u32,
        SAMPLE_EDGE as u32,
        FilterType::Lanczos3,
    );
    let pixels: Vec<f64> = gray.pixels().map(|pixel| f64::from(pixel.0[0])).collect();
    let coefficients = dct_2d(&pixels, SAMPLE_EDGE);

    let mut low = Vec::with_capacity(HASH_EDGE * HASH_EDGE);
    for row in 0..HASH_EDGE {
        for col in 0..HASH_EDGE {
            low.push(coefficients[row * SAMPLE_EDGE + col]);
        }
    }
    let threshold = median(&low);
    low.iter()
        .enumerate()
        .filter(|(_, value)| **value > threshold)
        .fold(0u64, |hash, (bit, _)| hash | (1u64 << bit))
}

/// Hamming distance between the two hashes over the bit length.
pub fn drift(candidate: &DynamicImage, reference: &DynamicImage) -> f64 {
    f64::from((phash(candidate) ^ phash(reference)).count_ones()) / HASH_BITS
}

/// Unnormalized DCT-II over rows, then columns, of an `n`x`n` block.
fn dct_2d(pixels: &[f64], n: usize) -> Vec<f64> {
    let table: Vec<f64> = (0..n * n)
        .map(|idx| {
            let (k, i) = (idx / n, idx % n);
            (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos()
        })
        .collect();

    let mut rows = vec![0.0; n * n];
    for y in 0..n {
        for k in 0..n {
            rows[y * n + k] = (0..n)
                .map(|x| pixels[y * n + x] * table[k * n + x])
                .sum::<f64>()
                * 2.0;
        }
    }

    let mut out = vec![0.0; n * n];
    for x in 0..n {
        for k in 0..n {
            out[k * n + x] = (0..n).map(|y| rows[y * n + x] * table[k * n + y]).sum::<f64>() * 2.0;
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use image::{DynamicImage, GrayImage, Luma};

    use super::{dct_2d, drift, median, phash};

    fn pattern(width: u32, height: u32, invert: bool) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            let u = x as f64 / width as f64;
            let v = y as f64 / height as f64;
            let wave = (3.0 * PI * u).sin() * (2.0 * PI * v).cos();
            let value = 128.0 + 70.0 * wave + 50.0 * (u - v);
            let value = if invert { 255.0 - value } else { value };
            Luma([value.clamp(0.0, 255.0) as u8])
        }))
    }

    #[test]
    fn dct_of_constant_block_is_dc_only() {
        let out = dct_2d(&[3.0; 16], 4);
        assert!((out[0] - 3.0 * 16.0 * 4.0).abs() < 1e-9);
        assert!(out[1..].iter().all(|value| value.abs() < 1e-9));
    }

    #[test]
    fn median_handles_even_lengths() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn identical_images_have_zero_drift() {
        let image = pattern(120, 90, false);
        assert_eq!(phash(&image), phash(&image.clone()));
        assert_eq!(drift(&image, &image), 0.0);
    }

    #[test]
    fn hash_survives_rescaling_but_not_inversion() {
        let small = pattern(64, 64, false);
        let large = pattern(256, 256, false);
        let inverted = pattern(64, 64, true);
        let near = drift(&small, &large);
        let far = drift(&small, &inverted);
        assert!(near < far, "near={near} far={far}");
        assert!((0.0..=1.0).contains(&far));
    }
}
