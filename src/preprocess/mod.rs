//! Per-frame preprocessing: spatial filtering and color triggering, run as
//! a configurable list of stages.

pub mod color;
pub mod filter;

use serde::{Deserialize, Serialize};

use crate::camera::Frame;
use crate::config::{ColorConfig, PipelineConfig};

pub use color::{ColorDetection, ColorRange, ColorTrigger, NO_COLOR};
pub use filter::FilterMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Filter,
    Color,
}

/// Result of running the stage list on one frame
#[derive(Debug)]
pub struct Preprocessed {
    /// Frame handed to pose estimation
    pub analysis: Frame,
    /// `analysis` holds the filter stage output
    pub filtered: bool,
    /// Color stage output, when that stage is active
    pub color: Option<ColorDetection>,
}

pub struct Preprocessor {
    stages: Vec<StageKind>,
    color: ColorTrigger,
    analyze_filtered: bool,
}

impl Preprocessor {
    pub fn new(stages: Vec<StageKind>, color: ColorTrigger, analyze_filtered: bool) -> Self {
        Self {
            stages,
            color,
            analyze_filtered,
        }
    }

    pub fn from_config(pipeline: &PipelineConfig, color: &ColorConfig) -> Self {
        if pipeline.stages.contains(&StageKind::Filter) && !pipeline.analyze_filtered {
            tracing::info!("filter stage skipped: analyze_filtered=false leaves it without a consumer");
        }
        Self::new(
            pipeline.stages.clone(),
            ColorTrigger::from_config(color),
            pipeline.analyze_filtered,
        )
    }

    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    /// Run every active stage with a single `mode` for the whole frame.
    /// The filter is only computed when `analyze_filtered` hands its output
    /// downstream.
    pub fn run(&self, frame: Frame, mode: FilterMode) -> Preprocessed {
        let mut analysis = frame;
        let mut filtered = false;
        let mut color = None;

        for stage in &self.stages {
            match stage {
                StageKind::Filter if self.analyze_filtered && !filtered => {
                    analysis.image = mode.apply(&analysis.image);
                    filtered = true;
                }
                StageKind::Filter => {}
                StageKind::Color => color = Some(self.color.detect(&analysis.image)),
            }
        }

        Preprocessed {
            analysis,
            filtered,
            color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::color::default_palette;
    use image::{Rgb, RgbImage};

    fn frame_with_blue_patch() -> Frame {
        let mut image = RgbImage::new(120, 90);
        for y in 10..50 {
            for x in 10..50 {
                image.put_pixel(x, y, Rgb([0, 0, 255]));
            }
        }
        Frame::new(image, 42.0)
    }

    fn preprocessor(stages: Vec<StageKind>, analyze_filtered: bool) -> Preprocessor {
        Preprocessor::new(stages, ColorTrigger::new(default_palette(), 1000, 5), analyze_filtered)
    }

    #[test]
    fn test_all_stages() {
        let frame = frame_with_blue_patch();
        let raw = frame.image.clone();
        let out = preprocessor(vec![StageKind::Filter, StageKind::Color], false)
            .run(frame, FilterMode::Sharpen);
        assert_eq!(out.color.unwrap().label, "blue");
        // nothing consumes the filter output, so it is never computed
        assert!(!out.filtered);
        assert_eq!(out.analysis.image, raw);
        assert_eq!(out.analysis.timestamp, 42.0);
    }

    #[test]
    fn test_color_only() {
        let frame = frame_with_blue_patch();
        let raw = frame.image.clone();
        let out = preprocessor(vec![StageKind::Color], true).run(frame, FilterMode::BlurLarge);
        assert!(!out.filtered);
        assert_eq!(out.analysis.image, raw);
        assert_eq!(out.color.unwrap().label, "blue");
    }

    #[test]
    fn test_no_stages_passes_frame_through() {
        let frame = frame_with_blue_patch();
        let raw = frame.image.clone();
        let out = preprocessor(vec![], true).run(frame, FilterMode::BlurSmall);
        assert!(!out.filtered);
        assert!(out.color.is_none());
        assert_eq!(out.analysis.image, raw);
    }

    #[test]
    fn test_analyze_filtered_feeds_filtered_frame() {
        let frame = frame_with_blue_patch();
        let raw = frame.image.clone();
        let out = preprocessor(vec![StageKind::Filter, StageKind::Color], true)
            .run(frame, FilterMode::BlurLarge);
        assert!(out.filtered);
        assert_eq!(out.analysis.image, FilterMode::BlurLarge.apply(&raw));
        assert_eq!(out.analysis.timestamp, 42.0);
    }

    #[test]
    fn test_stage_order_decides_what_color_sees() {
        // 2 px blue stripes: opening erases them raw, a 5x5 mean makes them solid
        let striped = || {
            let mut image = RgbImage::new(120, 90);
            for y in 10..60 {
                for x in 10..60 {
                    if (x / 2) % 2 == 0 {
                        image.put_pixel(x, y, Rgb([0, 0, 255]));
                    }
                }
            }
            Frame::new(image, 1.0)
        };
        let color_first = preprocessor(vec![StageKind::Color, StageKind::Filter], true)
            .run(striped(), FilterMode::BlurSmall);
        assert!(color_first.filtered);
        assert!(color_first.color.unwrap().is_none());

        let filter_first = preprocessor(vec![StageKind::Filter, StageKind::Color], true)
            .run(striped(), FilterMode::BlurSmall);
        assert_eq!(filter_first.color.unwrap().label, "blue");
    }

    #[test]
    fn test_filter_mode_change_between_frames() {
        let p = preprocessor(vec![StageKind::Filter], true);
        let raw = frame_with_blue_patch().image;
        let a = p.run(frame_with_blue_patch(), FilterMode::Normal);
        let b = p.run(frame_with_blue_patch(), FilterMode::GaussianBlur);
        assert_eq!(a.analysis.image, raw);
        assert_eq!(b.analysis.image, FilterMode::GaussianBlur.apply(&raw));
        assert_eq!(p.stages(), &[StageKind::Filter]);
    }
}
