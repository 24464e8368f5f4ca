//! HSV color-object trigger.
//!
//! The palette is scanned in declared order and the first color that owns a
//! sufficiently large region wins, even when a later color is larger.

use image::RgbImage;
use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::config::ColorConfig;

/// Label reported when no palette entry matches
pub const NO_COLOR: &str = "none";

/// Inclusive HSV bounds, OpenCV 8-bit convention (H 0..180, S/V 0..255)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub name: String,
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl ColorRange {
    pub fn new(name: impl Into<String>, lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }
}

pub fn default_palette() -> Vec<ColorRange> {
    vec![
        ColorRange::new("blue", [100, 150, 50], [140, 255, 255]),
        ColorRange::new("red", [0, 150, 50], [10, 255, 255]),
        ColorRange::new("green", [40, 70, 50], [80, 255, 255]),
        ColorRange::new("yellow", [20, 100, 100], [35, 255, 255]),
    ]
}

/// Pixel-space box, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorDetection {
    pub label: String,
    pub bbox: Option<BoundingBox>,
    /// Region area in pixels (0 when nothing matched)
    pub area: u32,
}

impl ColorDetection {
    pub fn none() -> Self {
        Self {
            label: NO_COLOR.to_string(),
            bbox: None,
            area: 0,
        }
    }

    pub fn is_none(&self) -> bool {
        self.bbox.is_none()
    }
}

pub struct ColorTrigger {
    palette: Vec<ColorRange>,
    min_area: u32,
    kernel_size: usize,
}

impl ColorTrigger {
    pub fn new(palette: Vec<ColorRange>, min_area: u32, kernel_size: usize) -> Self {
        Self {
            palette,
            min_area,
            kernel_size: kernel_size.max(1),
        }
    }

    pub fn from_config(config: &ColorConfig) -> Self {
        Self::new(config.palette.clone(), config.min_area, config.kernel_size)
    }

    /// One HSV conversion per frame; the mask and its scratch buffer are
    /// reused for every palette entry.
    pub fn detect(&self, image: &RgbImage) -> ColorDetection {
        let hsv = to_hsv(image);
        let mut mask = Array2::from_elem(hsv.dim(), false);
        let mut scratch = Array2::from_elem(hsv.dim(), false);
        for range in &self.palette {
            Zip::from(&mut mask).and(&hsv).for_each(|m, &p| *m = range.contains(p));
            if !mask.iter().any(|&m| m) {
                continue;
            }
            open(&mut mask, &mut scratch, self.kernel_size);
            close(&mut mask, &mut scratch, self.kernel_size);
            if let Some(region) = first_region_above(&mask, self.min_area) {
                return ColorDetection {
                    label: range.name.clone(),
                    bbox: Some(region.bbox),
                    area: region.area,
                };
            }
        }
        ColorDetection::none()
    }
}

/// RGB -> HSV with hue halved to fit a byte
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h = (h / 2.0).round() as u32 % 180;
    [h as u8, s.round() as u8, v as u8]
}

fn to_hsv(image: &RgbImage) -> Array2<[u8; 3]> {
    let (w, h) = image.dimensions();
    let (w, h) = (w as usize, h as usize);
    let raw = image.as_raw();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let i = (y * w + x) * 3;
        rgb_to_hsv([raw[i], raw[i + 1], raw[i + 2]])
    })
}

/// Min/max over a sliding window of `2 * radius + 1` along one line.
/// Out-of-bounds neighbors are skipped, so borders neither erode nor grow.
fn morph_line(src: ArrayView1<bool>, mut dst: ArrayViewMut1<bool>, radius: usize, erode: bool) {
    let n = src.len();
    let mut set = src.iter().take(radius + 1).filter(|&&v| v).count();
    for x in 0..n {
        if x > 0 {
            if x + radius < n && src[x + radius] {
                set += 1;
            }
            if x > radius && src[x - radius - 1] {
                set -= 1;
            }
        }
        let lo = x.saturating_sub(radius);
        let hi = (x + radius).min(n - 1);
        dst[x] = if erode { set == hi - lo + 1 } else { set > 0 };
    }
}

/// Square structuring element as a row pass into `scratch` then a column
/// pass back into `mask`
fn morph(mask: &mut Array2<bool>, scratch: &mut Array2<bool>, size: usize, erode: bool) {
    let radius = size / 2;
    Zip::from(mask.lanes(Axis(1)))
        .and(scratch.lanes_mut(Axis(1)))
        .for_each(|src, dst| morph_line(src, dst, radius, erode));
    Zip::from(scratch.lanes(Axis(0)))
        .and(mask.lanes_mut(Axis(0)))
        .for_each(|src, dst| morph_line(src, dst, radius, erode));
}

/// Removes specks smaller than the structuring element
fn open(mask: &mut Array2<bool>, scratch: &mut Array2<bool>, size: usize) {
    morph(mask, scratch, size, true);
    morph(mask, scratch, size, false);
}

/// Fills pinholes smaller than the structuring element
fn close(mask: &mut Array2<bool>, scratch: &mut Array2<bool>, size: usize) {
    morph(mask, scratch, size, false);
    morph(mask, scratch, size, true);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    area: u32,
    bbox: BoundingBox,
}

/// First 8-connected region, in raster order of its top-left-most pixel,
/// whose area is strictly greater than `min_area`
fn first_region_above(mask: &Array2<bool>, min_area: u32) -> Option<Region> {
    let (rows, cols) = mask.dim();
    let mut visited = Array2::from_elem((rows, cols), false);
    let mut stack = Vec::new();

    for y in 0..rows {
        for x in 0..cols {
            if !mask[[y, x]] || visited[[y, x]] {
                continue;
            }
            visited[[y, x]] = true;
            stack.push((y, x));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let mut area = 0u32;

            while let Some((cy, cx)) = stack.pop() {
                area += 1;
                min_x = min_x.min(cx);
                max_x = max_x.max(cx);
                min_y = min_y.min(cy);
                max_y = max_y.max(cy);

                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        if dy == 0 && dx == 0 {
                            continue;
                        }
                        let (ny, nx) = (cy as isize + dy, cx as isize + dx);
                        if ny < 0 || nx < 0 || ny >= rows as isize || nx >= cols as isize {
                            continue;
                        }
                        let (ny, nx) = (ny as usize, nx as usize);
                        if mask[[ny, nx]] && !visited[[ny, nx]] {
                            visited[[ny, nx]] = true;
                            stack.push((ny, nx));
                        }
                    }
                }
            }

            if area > min_area {
                return Some(Region {
                    area,
                    bbox: BoundingBox {
                        x: min_x as u32,
                        y: min_y as u32,
                        width: (max_x - min_x + 1) as u32,
                        height: (max_y - min_y + 1) as u32,
                    },
                });
            }
        }
    }
    None
}
