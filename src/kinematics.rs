//! Skeletal kinematics: landmark set -> segment angles, limb lengths and
//! joint positions.

use std::collections::BTreeMap;

use crate::pose::{LandmarkIndex, LandmarkSet};
use crate::protocol::{JointFeature, Point2, PoseTelemetry, Segment};

/// Joints whose normalized positions are published as `<key>_pos`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedJoint {
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftIndex,
    RightIndex,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    Nose,
}

impl TrackedJoint {
    pub const ALL: [TrackedJoint; 15] = [
        TrackedJoint::LeftShoulder,
        TrackedJoint::RightShoulder,
        TrackedJoint::LeftElbow,
        TrackedJoint::RightElbow,
        TrackedJoint::LeftWrist,
        TrackedJoint::RightWrist,
        TrackedJoint::LeftIndex,
        TrackedJoint::RightIndex,
        TrackedJoint::LeftHip,
        TrackedJoint::RightHip,
        TrackedJoint::LeftKnee,
        TrackedJoint::RightKnee,
        TrackedJoint::LeftAnkle,
        TrackedJoint::RightAnkle,
        TrackedJoint::Nose,
    ];

    pub fn key(self) -> &'static str {
        match self {
            TrackedJoint::LeftShoulder => "left_sh",
            TrackedJoint::RightShoulder => "right_sh",
            TrackedJoint::LeftElbow => "left_el",
            TrackedJoint::RightElbow => "right_el",
            TrackedJoint::LeftWrist => "left_wr",
            TrackedJoint::RightWrist => "right_wr",
            TrackedJoint::LeftIndex => "left_index",
            TrackedJoint::RightIndex => "right_index",
            TrackedJoint::LeftHip => "left_hip",
            TrackedJoint::RightHip => "right_hip",
            TrackedJoint::LeftKnee => "left_knee",
            TrackedJoint::RightKnee => "right_knee",
            TrackedJoint::LeftAnkle => "left_ank",
            TrackedJoint::RightAnkle => "right_ank",
            TrackedJoint::Nose => "nose",
        }
    }

    pub fn landmark(self) -> LandmarkIndex {
        match self {
            TrackedJoint::LeftShoulder => LandmarkIndex::LeftShoulder,
            TrackedJoint::RightShoulder => LandmarkIndex::RightShoulder,
            TrackedJoint::LeftElbow => LandmarkIndex::LeftElbow,
            TrackedJoint::RightElbow => LandmarkIndex::RightElbow,
            TrackedJoint::LeftWrist => LandmarkIndex::LeftWrist,
            TrackedJoint::RightWrist => LandmarkIndex::RightWrist,
            TrackedJoint::LeftIndex => LandmarkIndex::LeftIndex,
            TrackedJoint::RightIndex => LandmarkIndex::RightIndex,
            TrackedJoint::LeftHip => LandmarkIndex::LeftHip,
            TrackedJoint::RightHip => LandmarkIndex::RightHip,
            TrackedJoint::LeftKnee => LandmarkIndex::LeftKnee,
            TrackedJoint::RightKnee => LandmarkIndex::RightKnee,
            TrackedJoint::LeftAnkle => LandmarkIndex::LeftAnkle,
            TrackedJoint::RightAnkle => LandmarkIndex::RightAnkle,
            TrackedJoint::Nose => LandmarkIndex::Nose,
        }
    }
}

/// (segment, proximal, distal)
const LIMBS: [(Segment, LandmarkIndex, LandmarkIndex); 8] = [
    (Segment::LeftUpperArm, LandmarkIndex::LeftShoulder, LandmarkIndex::LeftElbow),
    (Segment::LeftLowerArm, LandmarkIndex::LeftElbow, LandmarkIndex::LeftWrist),
    (Segment::RightUpperArm, LandmarkIndex::RightShoulder, LandmarkIndex::RightElbow),
    (Segment::RightLowerArm, LandmarkIndex::RightElbow, LandmarkIndex::RightWrist),
    (Segment::LeftUpperLeg, LandmarkIndex::LeftHip, LandmarkIndex::LeftKnee),
    (Segment::LeftLowerLeg, LandmarkIndex::LeftKnee, LandmarkIndex::LeftAnkle),
    (Segment::RightUpperLeg, LandmarkIndex::RightHip, LandmarkIndex::RightKnee),
    (Segment::RightLowerLeg, LandmarkIndex::RightKnee, LandmarkIndex::RightAnkle),
];

/// Direction of p1 -> p2 in degrees, image coordinates (y down).
///
/// Result is in (-180, 180]. NaN when the points coincide.
pub fn angle_between(p1: Point2, p2: Point2) -> f64 {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    if dx == 0.0 && dy == 0.0 {
        return f64::NAN;
    }
    let deg = dy.atan2(dx).to_degrees();
    if deg <= -180.0 {
        deg + 360.0
    } else {
        deg.min(180.0)
    }
}

pub fn distance(p1: Point2, p2: Point2) -> f64 {
    (p2.x - p1.x).hypot(p2.y - p1.y)
}

/// Build one frame's telemetry. Never fails; degenerate geometry yields NaN
/// angles.
pub fn extract(
    landmarks: &LandmarkSet,
    width: u32,
    height: u32,
    timestamp: f64,
    detected_color: Option<&str>,
) -> PoseTelemetry {
    let pixel = |idx: LandmarkIndex| {
        let (x, y) = landmarks.get(idx).to_pixel(width, height);
        Point2::new(x, y)
    };
    let norm = |idx: LandmarkIndex| {
        let [x, y] = landmarks.get(idx).normalized();
        Point2::new(x, y)
    };

    let left_sh = pixel(LandmarkIndex::LeftShoulder);
    let right_sh = pixel(LandmarkIndex::RightShoulder);
    let mid_sh = left_sh.midpoint(right_sh);
    let mid_hip = pixel(LandmarkIndex::LeftHip).midpoint(pixel(LandmarkIndex::RightHip));
    let nose = pixel(LandmarkIndex::Nose);
    let nose_norm = norm(LandmarkIndex::Nose);

    let mut segments = BTreeMap::new();
    segments.insert(Segment::Hip, JointFeature::angle(angle_between(mid_hip, mid_sh)));
    segments.insert(Segment::LeftShoulder, JointFeature::angle(angle_between(mid_sh, left_sh)));
    segments.insert(Segment::RightShoulder, JointFeature::angle(angle_between(mid_sh, right_sh)));
    segments.insert(
        Segment::LeftHand,
        JointFeature::angle(angle_between(pixel(LandmarkIndex::LeftWrist), pixel(LandmarkIndex::LeftIndex))),
    );
    segments.insert(
        Segment::RightHand,
        JointFeature::angle(angle_between(pixel(LandmarkIndex::RightWrist), pixel(LandmarkIndex::RightIndex))),
    );
    segments.insert(
        Segment::Head,
        JointFeature {
            angle: angle_between(left_sh, right_sh),
            length: None,
            pos: Some([nose.x, nose.y]),
            pos_norm: Some([nose_norm.x, nose_norm.y]),
        },
    );
    for (segment, from, to) in LIMBS {
        let (a, b) = (pixel(from), pixel(to));
        segments.insert(segment, JointFeature::limb(angle_between(a, b), distance(a, b)));
    }

    let joint_positions = TrackedJoint::ALL
        .iter()
        .map(|j| (j.key().to_string(), landmarks.get(j.landmark()).normalized()))
        .collect();

    PoseTelemetry {
        timestamp,
        detected_color: detected_color.map(str::to_string),
        root_position: norm(LandmarkIndex::LeftHip).midpoint(norm(LandmarkIndex::RightHip)),
        segments,
        joint_positions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Landmark;
    use crate::protocol::{decode_message, encode_message, ServerMessage};

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    #[test]
    fn test_angle_cardinal_directions() {
        assert_eq!(angle_between(p(0.0, 0.0), p(1.0, 0.0)), 0.0);
        assert_eq!(angle_between(p(0.0, 0.0), p(0.0, 1.0)), 90.0);
        assert_eq!(angle_between(p(0.0, 0.0), p(0.0, -1.0)), -90.0);
        assert_eq!(angle_between(p(0.0, 0.0), p(-1.0, 0.0)), 180.0);
    }

    #[test]
    fn test_angle_negative_zero_dy_maps_to_180() {
        // atan2(-0.0, -1.0) is -180
        assert_eq!(angle_between(p(5.0, 0.0), p(4.0, -0.0)), 180.0);
    }

    #[test]
    fn test_angle_range() {
        for i in -10..=10 {
            for j in -10..=10 {
                if i == 0 && j == 0 {
                    continue;
                }
                let a = angle_between(p(3.0, -2.0), p(3.0 + i as f64 * 0.7, -2.0 + j as f64 * 1.3));
                assert!(a > -180.0 && a <= 180.0, "angle {a} out of range for ({i}, {j})");
            }
        }
    }

    #[test]
    fn test_angle_degenerate_is_nan() {
        assert!(angle_between(p(7.0, 7.0), p(7.0, 7.0)).is_nan());
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(p(0.0, 0.0), p(3.0, 4.0)), 5.0);
        assert_eq!(distance(p(1.0, 1.0), p(1.0, 1.0)), 0.0);
    }

    fn landmarks(points: &[(LandmarkIndex, f32, f32)]) -> LandmarkSet {
        let mut set = LandmarkSet::default();
        for &(idx, x, y) in points {
            set.set(idx, Landmark::new(x, y, 1.0));
        }
        set
    }

    #[test]
    fn test_shoulder_elbow_example() {
        let set = landmarks(&[
            (LandmarkIndex::LeftShoulder, 0.1, 0.1),
            (LandmarkIndex::RightShoulder, 0.2, 0.1),
            (LandmarkIndex::LeftElbow, 0.09, 0.15),
        ]);
        let t = extract(&set, 1000, 1000, 1.0, None);

        let head = t.segment(Segment::Head).unwrap();
        assert!(head.angle.abs() < 1e-9);
        assert!(t.segment(Segment::RightShoulder).unwrap().angle.abs() < 1e-9);
        assert!((t.segment(Segment::LeftShoulder).unwrap().angle - 180.0).abs() < 1e-9);

        let upper = t.segment(Segment::LeftUpperArm).unwrap();
        assert!((upper.angle - 101.3099).abs() < 1e-3, "got {}", upper.angle);
        assert!((upper.length.unwrap() - 50.990195).abs() < 1e-4);
    }

    #[test]
    fn test_root_and_joint_positions() {
        let set = landmarks(&[
            (LandmarkIndex::LeftHip, 0.4, 0.6),
            (LandmarkIndex::RightHip, 0.6, 0.7),
            (LandmarkIndex::Nose, 0.5, 0.25),
        ]);
        let t = extract(&set, 640, 480, 3.5, Some("red"));
        assert!((t.root_position.x - 0.5).abs() < 1e-6);
        assert!((t.root_position.y - 0.65).abs() < 1e-6);
        assert_eq!(t.detected_color.as_deref(), Some("red"));
        assert_eq!(t.timestamp, 3.5);
        assert_eq!(t.joint_positions.len(), 15);
        assert_eq!(t.joint("nose"), Some([0.5, 0.25]));

        let head = t.segment(Segment::Head).unwrap();
        assert_eq!(head.pos, Some([320.0, 120.0]));
        assert_eq!(head.pos_norm, Some([0.5, 0.25]));
    }

    #[test]
    fn test_hip_points_up_for_upright_body() {
        let set = landmarks(&[
            (LandmarkIndex::LeftShoulder, 0.45, 0.3),
            (LandmarkIndex::RightShoulder, 0.55, 0.3),
            (LandmarkIndex::LeftHip, 0.45, 0.6),
            (LandmarkIndex::RightHip, 0.55, 0.6),
        ]);
        let t = extract(&set, 100, 100, 0.0, None);
        assert!((t.segment(Segment::Hip).unwrap().angle + 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_segments_present() {
        let t = extract(&LandmarkSet::default(), 640, 480, 0.0, None);
        for segment in Segment::ALL {
            assert!(t.segment(segment).is_some(), "missing {}", segment.name());
        }
        for segment in LIMBS.iter().map(|l| l.0) {
            assert!(t.segment(segment).unwrap().length.is_some());
        }
    }

    #[test]
    fn test_collapsed_landmarks_serialize() {
        let t = extract(&LandmarkSet::default(), 640, 480, 9.0, Some("none"));
        assert!(t.segment(Segment::Hip).unwrap().angle.is_nan());
        let text = encode_message(&ServerMessage::Pose(t)).unwrap();
        let ServerMessage::Pose(back) = decode_message(&text).unwrap();
        assert!(back.segment(Segment::LeftLowerLeg).unwrap().angle.is_nan());
        assert_eq!(back.segment(Segment::LeftLowerLeg).unwrap().length, Some(0.0));
    }
}
