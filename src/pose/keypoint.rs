/// 33-point full-body landmark topology (BlazePose ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LandmarkIndex {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIndex {
    pub const COUNT: usize = 33;

    pub const ALL: [LandmarkIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
    ];
}

/// Single landmark
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// Normalized X (0.0..1.0 inside the frame)
    pub x: f32,
    /// Normalized Y (0.0..1.0 inside the frame, downward)
    pub y: f32,
    /// Relative depth, same scale as x
    pub z: f32,
    /// Visibility score (0.0..1.0)
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self::new_3d(x, y, 0.0, confidence)
    }

    pub fn new_3d(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }

    /// Pixel coordinates for a frame of the given size
    pub fn to_pixel(&self, width: u32, height: u32) -> (f64, f64) {
        (self.x as f64 * width as f64, self.y as f64 * height as f64)
    }

    pub fn normalized(&self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}

impl Default for Landmark {
    fn default() -> Self {
        Self::new_3d(0.0, 0.0, 0.0, 0.0)
    }
}

/// Complete landmark set for one tracked person
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    pub landmarks: [Landmark; LandmarkIndex::COUNT],
}

impl LandmarkSet {
    pub fn new(landmarks: [Landmark; LandmarkIndex::COUNT]) -> Self {
        Self { landmarks }
    }

    pub fn get(&self, index: LandmarkIndex) -> &Landmark {
        &self.landmarks[index as usize]
    }

    pub fn set(&mut self, index: LandmarkIndex, landmark: Landmark) {
        self.landmarks[index as usize] = landmark;
    }

    pub fn average_confidence(&self) -> f32 {
        let sum: f32 = self.landmarks.iter().map(|k| k.confidence).sum();
        sum / LandmarkIndex::COUNT as f32
    }
}

impl Default for LandmarkSet {
    fn default() -> Self {
        Self {
            landmarks: [Landmark::default(); LandmarkIndex::COUNT],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_index_count() {
        assert_eq!(LandmarkIndex::COUNT, 33);
        assert_eq!(LandmarkIndex::ALL.len(), 33);
    }

    #[test]
    fn test_all_matches_discriminants() {
        for (i, idx) in LandmarkIndex::ALL.iter().enumerate() {
            assert_eq!(*idx as usize, i);
        }
    }

    #[test]
    fn test_landmark_to_pixel() {
        let lm = Landmark::new(0.5, 0.25, 1.0);
        assert_eq!(lm.to_pixel(640, 480), (320.0, 120.0));
    }

    #[test]
    fn test_landmark_set_get_set() {
        let mut set = LandmarkSet::default();
        set.set(LandmarkIndex::Nose, Landmark::new_3d(0.5, 0.3, -0.1, 0.9));
        let nose = set.get(LandmarkIndex::Nose);
        assert_eq!(nose.x, 0.5);
        assert_eq!(nose.y, 0.3);
        assert_eq!(nose.z, -0.1);
        assert_eq!(nose.confidence, 0.9);
    }

    #[test]
    fn test_average_confidence() {
        let set = LandmarkSet::new([Landmark::new(0.0, 0.0, 0.5); LandmarkIndex::COUNT]);
        assert!((set.average_confidence() - 0.5).abs() < 0.001);
        assert_eq!(LandmarkSet::default().average_confidence(), 0.0);
    }
}
