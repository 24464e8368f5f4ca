use anyhow::{bail, Result};

use super::keypoint::{Landmark, LandmarkIndex, LandmarkSet};
use crate::camera::Frame;

/// Values per landmark in the model output: x, y, z, visibility, presence
pub const LANDMARK_STRIDE: usize = 5;

/// Pose model seam: one frame in, a full landmark set or nothing out.
///
/// `Ok(None)` is an ordinary miss. Implementations carry no history that the
/// caller depends on.
pub trait PoseEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>>;
}

impl<T: PoseEstimator + ?Sized> PoseEstimator for Box<T> {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
        (**self).estimate(frame)
    }
}

pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Decode a flat landmark tensor whose coordinates are in input-image pixels.
///
/// Extra trailing landmarks (auxiliary ROI points) are ignored.
pub fn decode_landmarks(raw: &[f32], stride: usize, input_size: f32) -> Result<LandmarkSet> {
    if stride < 4 {
        bail!("landmark stride {} too small", stride);
    }
    if raw.len() < LandmarkIndex::COUNT * stride {
        bail!(
            "landmark tensor has {} values, expected at least {}",
            raw.len(),
            LandmarkIndex::COUNT * stride
        );
    }

    let mut set = LandmarkSet::default();
    for (index, values) in LandmarkIndex::ALL.into_iter().zip(raw.chunks_exact(stride)) {
        set.set(index, Landmark::new_3d(
            values[0] / input_size,
            values[1] / input_size,
            values[2] / input_size,
            sigmoid(values[3]),
        ));
    }
    Ok(set)
}

#[cfg(feature = "desktop")]
pub use self::onnx::OnnxPoseDetector;

#[cfg(feature = "desktop")]
mod onnx {
    use anyhow::{Context, Result};
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;

    use super::{decode_landmarks, PoseEstimator, LANDMARK_STRIDE};
    use crate::camera::Frame;
    use crate::config::ModelConfig;
    use crate::pose::keypoint::LandmarkSet;
    use crate::pose::preprocess::to_input_tensor;

    fn build_session(model_path: &str) -> Result<Session> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;

        #[cfg(feature = "cuda")]
        let builder = {
            tracing::info!("attempting CUDA execution provider");
            builder.with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default().build()])?
        };

        builder
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ONNX model {model_path}"))
    }

    /// Full-body landmark model run through ONNX Runtime
    pub struct OnnxPoseDetector {
        session: Session,
        input_size: u32,
        input_name: String,
        landmarks_output: String,
        presence_output: String,
        min_detection_confidence: f32,
    }

    impl OnnxPoseDetector {
        pub fn new(config: &ModelConfig) -> Result<Self> {
            let session = build_session(&config.path)?;
            tracing::info!(model = %config.path, input_size = config.input_size, "pose model loaded");
            Ok(Self {
                session,
                input_size: config.input_size,
                input_name: config.input_name.clone(),
                landmarks_output: config.landmarks_output.clone(),
                presence_output: config.presence_output.clone(),
                min_detection_confidence: config.min_detection_confidence,
            })
        }
    }

    impl PoseEstimator for OnnxPoseDetector {
        fn estimate(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
            let input = to_input_tensor(&frame.image, self.input_size);
            let input_tensor = Tensor::from_array(input)?;
            let outputs = self
                .session
                .run(ort::inputs![self.input_name.as_str() => input_tensor])
                .context("Inference failed")?;

            let presence: ndarray::ArrayViewD<f32> = outputs[self.presence_output.as_str()]
                .try_extract_array()
                .context("Failed to extract presence tensor")?;
            let score = presence.iter().next().copied().unwrap_or(0.0);
            if score < self.min_detection_confidence {
                return Ok(None);
            }

            let landmarks: ndarray::ArrayViewD<f32> = outputs[self.landmarks_output.as_str()]
                .try_extract_array()
                .context("Failed to extract landmark tensor")?;
            let raw: Vec<f32> = landmarks.iter().copied().collect();
            decode_landmarks(&raw, LANDMARK_STRIDE, self.input_size as f32).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_tensor(count: usize) -> Vec<f32> {
        (0..count)
            .flat_map(|i| [i as f32 * 4.0, 128.0, -16.0, 0.0, 0.0])
            .collect()
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_decode_landmarks_normalizes() {
        let raw = raw_tensor(39);
        let set = decode_landmarks(&raw, LANDMARK_STRIDE, 256.0).unwrap();
        let nose = set.get(LandmarkIndex::Nose);
        assert_eq!(nose.x, 0.0);
        assert_eq!(nose.y, 0.5);
        assert_eq!(nose.z, -0.0625);
        assert!((nose.confidence - 0.5).abs() < 1e-6);
        let right_hip = set.get(LandmarkIndex::RightHip);
        assert_eq!(right_hip.x, 24.0 * 4.0 / 256.0);
    }

    #[test]
    fn test_decode_landmarks_rejects_short_tensor() {
        let raw = raw_tensor(20);
        assert!(decode_landmarks(&raw, LANDMARK_STRIDE, 256.0).is_err());
    }

    #[test]
    fn test_decode_landmarks_rejects_bad_stride() {
        let raw = vec![0.0; 200];
        assert!(decode_landmarks(&raw, 3, 256.0).is_err());
    }

    struct Scripted(Vec<Option<LandmarkSet>>);

    impl PoseEstimator for Scripted {
        fn estimate(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
            Ok(self.0.pop().flatten())
        }
    }

    #[test]
    fn test_boxed_estimator_delegates() {
        let mut boxed: Box<dyn PoseEstimator> = Box::new(Scripted(vec![None, Some(LandmarkSet::default())]));
        let frame = Frame::new(image::RgbImage::new(4, 4), 0.0);
        assert!(boxed.estimate(&frame).unwrap().is_some());
        assert!(boxed.estimate(&frame).unwrap().is_none());
        assert!(boxed.estimate(&frame).unwrap().is_none());
    }
}
