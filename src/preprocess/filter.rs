//! Spatial filters selectable at runtime.
//!
//! All filters are correlations with border-replicate edges; results are
//! rounded and clamped to the 8-bit range.

use image::RgbImage;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

pub const BLUR_SMALL_SIZE: usize = 5;
pub const BLUR_LARGE_SIZE: usize = 9;
pub const GAUSSIAN_SIZE: usize = 5;
pub const GAUSSIAN_SIGMA: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Normal,
    /// 5x5 mean
    BlurSmall,
    /// 9x9 mean
    BlurLarge,
    GaussianBlur,
    Sharpen,
}

impl FilterMode {
    pub const ALL: [FilterMode; 5] = [
        FilterMode::Normal,
        FilterMode::BlurSmall,
        FilterMode::BlurLarge,
        FilterMode::GaussianBlur,
        FilterMode::Sharpen,
    ];

    /// '0'..='4' in declaration order
    pub fn from_digit(code: char) -> Option<Self> {
        let index = code.to_digit(10)? as usize;
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            FilterMode::Normal => "Normal",
            FilterMode::BlurSmall => "Average Blur 5x5",
            FilterMode::BlurLarge => "Average Blur 9x9",
            FilterMode::GaussianBlur => "Gaussian Blur",
            FilterMode::Sharpen => "Sharpening",
        }
    }

    /// Filter a whole image. `Normal` returns an exact copy.
    pub fn apply(self, image: &RgbImage) -> RgbImage {
        match self {
            FilterMode::Normal => image.clone(),
            FilterMode::BlurSmall => convolve_separable(image, &box_kernel_1d(BLUR_SMALL_SIZE)),
            FilterMode::BlurLarge => convolve_separable(image, &box_kernel_1d(BLUR_LARGE_SIZE)),
            FilterMode::GaussianBlur => {
                convolve_separable(image, &gaussian_kernel_1d(GAUSSIAN_SIZE, GAUSSIAN_SIGMA))
            }
            FilterMode::Sharpen => convolve(image, sharpen_kernel().view()),
        }
    }
}

pub fn box_kernel_1d(size: usize) -> Array1<f32> {
    Array1::from_elem(size, 1.0 / size as f32)
}

/// Sampled Gaussian normalized to sum 1. Its outer product with itself is the
/// 2-D Gaussian kernel.
pub fn gaussian_kernel_1d(size: usize, sigma: f32) -> Array1<f32> {
    let center = (size as f32 - 1.0) / 2.0;
    let kernel = Array1::from_shape_fn(size, |i| {
        let d = i as f32 - center;
        (-(d * d) / (2.0 * sigma * sigma)).exp()
    });
    let sum = kernel.sum();
    kernel / sum
}

pub fn sharpen_kernel() -> Array2<f32> {
    ndarray::arr2(&[[0.0, -1.0, 0.0], [-1.0, 5.0, -1.0], [0.0, -1.0, 0.0]])
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Source column (already multiplied by 3) for every output column at
/// kernel offset `offset`, with replicated borders
fn replicate_columns(width: usize, offset: isize) -> Vec<usize> {
    let last = width as isize - 1;
    (0..width as isize).map(|x| (x + offset).clamp(0, last) as usize * 3).collect()
}

fn replicate_row(y: usize, offset: isize, height: usize) -> usize {
    (y as isize + offset).clamp(0, height as isize - 1) as usize
}

/// Full 2-D correlation, kernel anchored at its center. Zero taps are skipped.
pub fn convolve(image: &RgbImage, kernel: ArrayView2<f32>) -> RgbImage {
    let (w, h) = image.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let mut out = RgbImage::new(w, h);
    if wu == 0 || hu == 0 {
        return out;
    }
    let (kh, kw) = kernel.dim();
    let (ry, rx) = ((kh / 2) as isize, (kw / 2) as isize);
    let stride = wu * 3;

    let taps: Vec<(isize, Vec<usize>, f32)> = kernel
        .indexed_iter()
        .filter(|(_, weight)| **weight != 0.0)
        .map(|((ky, kx), &weight)| (ky as isize - ry, replicate_columns(wu, kx as isize - rx), weight))
        .collect();

    let src = image.as_raw();
    let dst: &mut [u8] = &mut out;
    let mut acc = vec![0f32; stride];
    for y in 0..hu {
        acc.fill(0.0);
        for (dy, columns, weight) in &taps {
            let sy = replicate_row(y, *dy, hu);
            let row = &src[sy * stride..(sy + 1) * stride];
            for (px, &sx) in acc.chunks_exact_mut(3).zip(columns) {
                px[0] += weight * row[sx] as f32;
                px[1] += weight * row[sx + 1] as f32;
                px[2] += weight * row[sx + 2] as f32;
            }
        }
        for (d, &a) in dst[y * stride..(y + 1) * stride].iter_mut().zip(&acc) {
            *d = to_u8(a);
        }
    }
    out
}

/// Same kernel applied horizontally then vertically
pub fn convolve_separable(image: &RgbImage, kernel: &Array1<f32>) -> RgbImage {
    let (w, h) = image.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let mut out = RgbImage::new(w, h);
    if wu == 0 || hu == 0 {
        return out;
    }
    let r = (kernel.len() / 2) as isize;
    let stride = wu * 3;
    let taps: Vec<(isize, f32)> = kernel
        .iter()
        .enumerate()
        .map(|(k, &weight)| (k as isize - r, weight))
        .collect();
    let columns: Vec<Vec<usize>> = taps.iter().map(|&(d, _)| replicate_columns(wu, d)).collect();

    let src = image.as_raw();
    let mut rows = vec![0f32; stride * hu];
    for (row_out, row_in) in rows.chunks_exact_mut(stride).zip(src.chunks_exact(stride)) {
        for (&(_, weight), cols) in taps.iter().zip(&columns) {
            for (px, &sx) in row_out.chunks_exact_mut(3).zip(cols) {
                px[0] += weight * row_in[sx] as f32;
                px[1] += weight * row_in[sx + 1] as f32;
                px[2] += weight * row_in[sx + 2] as f32;
            }
        }
    }

    let dst: &mut [u8] = &mut out;
    let mut acc = vec![0f32; stride];
    for y in 0..hu {
        acc.fill(0.0);
        for &(dy, weight) in &taps {
            let sy = replicate_row(y, dy, hu);
            for (a, &v) in acc.iter_mut().zip(&rows[sy * stride..(sy + 1) * stride]) {
                *a += weight * v;
            }
        }
        for (d, &a) in dst[y * stride..(y + 1) * stride].iter_mut().zip(&acc) {
            *d = to_u8(a);
        }
    }
    out
}
