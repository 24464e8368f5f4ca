pub mod detector;
pub mod keypoint;
pub mod preprocess;

#[cfg(feature = "desktop")]
pub use detector::OnnxPoseDetector;
pub use detector::{decode_landmarks, PoseEstimator};
pub use keypoint::{Landmark, LandmarkIndex, LandmarkSet};
pub use preprocess::to_input_tensor;
