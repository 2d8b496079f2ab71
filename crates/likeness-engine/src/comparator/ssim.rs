use image::imageops::FilterType;
use image::DynamicImage;
use likeness_contracts::drift::DriftMethod;

use crate::error::ComparatorError;

const SSIM_EDGE: u32 = 512;
const WINDOW: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// `1 - mean SSIM` over grayscale copies resized to a common square.
pub fn drift(candidate: &DynamicImage, reference: &DynamicImage) -> Result<f64, ComparatorError> {
    let a = grayscale_plane(candidate);
    let b = grayscale_plane(reference);
    let edge = SSIM_EDGE as usize;
    let data_range = data_range(&a);
    let ssim = mean_ssim(&a, &b, edge, edge, data_range);
    if !ssim.is_finite() {
        return Err(ComparatorError::Numeric {
            method: DriftMethod::Ssim,
        });
    }
    Ok(1.0 - ssim)
}

fn grayscale_plane(image: &DynamicImage) -> Vec<f64> {
    image::imageops::resize(
        &image.to_luma8(),
        SSIM_EDGE,
        SSIM_EDGE,
        FilterType::CatmullRom,
    )
    .pixels()
    .map(|pixel| f64::from(pixel.0[0]))
    .collect()
}

/// Dynamic range of the candidate, never below 1.
fn data_range(plane: &[f64]) -> f64 {
    let (min, max) = plane
        .iter()
        .fold((f64::MAX, f64::MIN), |(min, max), value| {
            (min.min(*value), max.max(*value))
        });
    (max - min).max(1.0)
}

/// Mean SSIM over every fully contained `WINDOW`x`WINDOW` window, using
/// sample (N-1) covariance.
fn mean_ssim(a: &[f64], b: &[f64], width: usize, height: usize, data_range: f64) -> f64 {
    if width < WINDOW || height < WINDOW {
        return f64::NAN;
    }
    let c1 = (K1 * data_range).powi(2);
    let c2 = (K2 * data_range).powi(2);
    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);

    let sum_a = SummedArea::new(width, height, |idx| a[idx]);
    let sum_b = SummedArea::new(width, height, |idx| b[idx]);
    let sum_aa = SummedArea::new(width, height, |idx| a[idx] * a[idx]);
    let sum_bb = SummedArea::new(width, height, |idx| b[idx] * b[idx]);
    let sum_ab = SummedArea::new(width, height, |idx| a[idx] * b[idx]);

    let mut total = 0.0;
    let mut windows = 0usize;
    for y in 0..=height - WINDOW {
        for x in 0..=width - WINDOW {
            let ux = sum_a.window(x, y) / n;
            let uy = sum_b.window(x, y) / n;
            let vx = cov_norm * (sum_aa.window(x, y) / n - ux * ux);
            let vy = cov_norm * (sum_bb.window(x, y) / n - uy * uy);
            let vxy = cov_norm * (sum_ab.window(x, y) / n - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            windows += 1;
        }
    }
    total / windows as f64
}

struct SummedArea {
    width: usize,
    table: Vec<f64>,
}

impl SummedArea {
    fn new(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut table = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += value(y * width + x);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { width, table }
    }

    fn window(&self, x: usize, y: usize) -> f64 {
        let stride = self.width + 1;
        let (x1, y1) = (x + WINDOW, y + WINDOW);
        self.table[y1 * stride + x1] - self.table[y * stride + x1] - self.table[y1 * stride + x]
            + self.table[y * stride + x]
    }
}
