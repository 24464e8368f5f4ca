//! WebSocket wire format: `{"type":"pose","payload":{...}}` JSON text frames.
//!
//! Self-contained: no imports from other posecast modules.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point2) -> Point2 {
        Point2::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Named body segment carried in the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Hip,
    LeftShoulder,
    RightShoulder,
    LeftHand,
    RightHand,
    Head,
    LeftUpperArm,
    LeftLowerArm,
    RightUpperArm,
    RightLowerArm,
    LeftUpperLeg,
    LeftLowerLeg,
    RightUpperLeg,
    RightLowerLeg,
}

impl Segment {
    pub const ALL: [Segment; 14] = [
        Segment::Hip,
        Segment::LeftShoulder,
        Segment::RightShoulder,
        Segment::LeftHand,
        Segment::RightHand,
        Segment::Head,
        Segment::LeftUpperArm,
        Segment::LeftLowerArm,
        Segment::RightUpperArm,
        Segment::RightLowerArm,
        Segment::LeftUpperLeg,
        Segment::LeftLowerLeg,
        Segment::RightUpperLeg,
        Segment::RightLowerLeg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Segment::Hip => "hip",
            Segment::LeftShoulder => "left_shoulder",
            Segment::RightShoulder => "right_shoulder",
            Segment::LeftHand => "left_hand",
            Segment::RightHand => "right_hand",
            Segment::Head => "head",
            Segment::LeftUpperArm => "left_upper_arm",
            Segment::LeftLowerArm => "left_lower_arm",
            Segment::RightUpperArm => "right_upper_arm",
            Segment::RightLowerArm => "right_lower_arm",
            Segment::LeftUpperLeg => "left_upper_leg",
            Segment::LeftLowerLeg => "left_lower_leg",
            Segment::RightUpperLeg => "right_upper_leg",
            Segment::RightLowerLeg => "right_lower_leg",
        }
    }

    pub fn from_name(name: &str) -> Option<Segment> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// Per-segment record. Only `angle` is always present.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointFeature {
    /// Degrees in (-180, 180], NaN when undefined
    pub angle: f64,
    /// Pixels
    pub length: Option<f64>,
    /// Pixel position
    pub pos: Option<[f64; 2]>,
    /// Normalized position
    pub pos_norm: Option<[f64; 2]>,
}

impl JointFeature {
    pub fn angle(angle: f64) -> Self {
        Self {
            angle,
            ..Default::default()
        }
    }

    pub fn limb(angle: f64, length: f64) -> Self {
        Self {
            angle,
            length: Some(length),
            ..Default::default()
        }
    }
}

/// One tracked frame's kinematics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct PoseTelemetry {
    /// Seconds since epoch
    pub timestamp: f64,
    /// Omitted from the wire when the color stage is inactive
    pub detected_color: Option<String>,
    /// Normalized hip midpoint
    pub root_position: Point2,
    pub segments: BTreeMap<Segment, JointFeature>,
    /// Normalized joint positions keyed by joint name (`left_sh`, `nose`, ...).
    /// Sent as `<name>_pos`.
    pub joint_positions: BTreeMap<String, [f64; 2]>,
}

impl PoseTelemetry {
    pub fn segment(&self, segment: Segment) -> Option<&JointFeature> {
        self.segments.get(&segment)
    }

    pub fn joint(&self, name: &str) -> Option<[f64; 2]> {
        self.joint_positions.get(name).copied()
    }
}

const POS_SUFFIX: &str = "_pos";

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn pair_value(p: [f64; 2]) -> Value {
    Value::Array(vec![float_value(p[0]), float_value(p[1])])
}

fn value_float(v: &Value, what: &str) -> Result<f64> {
    match v {
        Value::Null => Ok(f64::NAN),
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("{what}: not representable as f64")),
        other => bail!("{what}: expected number, got {other}"),
    }
}

fn value_pair(v: &Value, what: &str) -> Result<[f64; 2]> {
    match v.as_array().map(Vec::as_slice) {
        Some([x, y]) => Ok([value_float(x, what)?, value_float(y, what)?]),
        _ => bail!("{what}: expected [x, y]"),
    }
}

impl From<JointFeature> for Value {
    fn from(feature: JointFeature) -> Value {
        let mut obj = Map::new();
        if let Some(pos) = feature.pos {
            obj.insert("pos".into(), pair_value(pos));
        }
        if let Some(pos_norm) = feature.pos_norm {
            obj.insert("pos_norm".into(), pair_value(pos_norm));
        }
        obj.insert("angle".into(), float_value(feature.angle));
        if let Some(length) = feature.length {
            obj.insert("length".into(), float_value(length));
        }
        Value::Object(obj)
    }
}

fn parse_feature(v: &Value, name: &str) -> Result<JointFeature> {
    let obj = v.as_object().ok_or_else(|| anyhow!("{name}: expected object"))?;
    let angle = obj
        .get("angle")
        .map(|a| value_float(a, name))
        .transpose()?
        .unwrap_or(f64::NAN);
    Ok(JointFeature {
        angle,
        length: obj.get("length").map(|l| value_float(l, name)).transpose()?,
        pos: obj.get("pos").map(|p| value_pair(p, name)).transpose()?,
        pos_norm: obj.get("pos_norm").map(|p| value_pair(p, name)).transpose()?,
    })
}

impl From<PoseTelemetry> for Map<String, Value> {
    fn from(t: PoseTelemetry) -> Self {
        let mut map = Map::new();
        map.insert("timestamp".into(), float_value(t.timestamp));
        if let Some(color) = t.detected_color {
            map.insert("detected_color".into(), Value::String(color));
        }
        let mut root = Map::new();
        root.insert("x".into(), float_value(t.root_position.x));
        root.insert("y".into(), float_value(t.root_position.y));
        map.insert("root_position".into(), Value::Object(root));

        for (segment, feature) in t.segments {
            map.insert(segment.name().into(), feature.into());
        }
        for (joint, pos) in t.joint_positions {
            map.insert(format!("{joint}{POS_SUFFIX}"), pair_value(pos));
        }
        map
    }
}

impl TryFrom<Map<String, Value>> for PoseTelemetry {
    type Error = anyhow::Error;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        let timestamp = map
            .get("timestamp")
            .context("missing timestamp")
            .and_then(|v| value_float(v, "timestamp"))?;

        let detected_color = match map.get("detected_color") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => bail!("detected_color: expected string, got {other}"),
        };

        let root = map
            .get("root_position")
            .and_then(Value::as_object)
            .context("missing root_position")?;
        let root_position = Point2::new(
            root.get("x").map(|v| value_float(v, "root_position.x")).transpose()?.unwrap_or(f64::NAN),
            root.get("y").map(|v| value_float(v, "root_position.y")).transpose()?.unwrap_or(f64::NAN),
        );

        let mut segments = BTreeMap::new();
        let mut joint_positions = BTreeMap::new();
        for (key, value) in &map {
            if let Some(segment) = Segment::from_name(key) {
                segments.insert(segment, parse_feature(value, key)?);
            } else if let Some(joint) = key.strip_suffix(POS_SUFFIX) {
                // unknown keys are tolerated, so only well-formed pairs count
                if let Ok(pos) = value_pair(value, key) {
                    joint_positions.insert(joint.to_string(), pos);
                }
            }
        }

        Ok(Self {
            timestamp,
            detected_color,
            root_position,
            segments,
            joint_positions,
        })
    }
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Pose(PoseTelemetry),
}

pub fn encode_message(msg: &ServerMessage) -> Result<String> {
    serde_json::to_string(msg).context("Failed to serialize message")
}

pub fn decode_message(text: &str) -> Result<ServerMessage> {
    serde_json::from_str(text).context("Failed to deserialize message")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoseTelemetry {
        let mut segments = BTreeMap::new();
        segments.insert(Segment::Hip, JointFeature::angle(-90.0));
        segments.insert(
            Segment::Head,
            JointFeature {
                angle: 0.0,
                length: None,
                pos: Some([150.0, 60.0]),
                pos_norm: Some([0.15, 0.06]),
            },
        );
        segments.insert(Segment::LeftUpperArm, JointFeature::limb(101.3, 50.99));
        segments.insert(Segment::RightHand, JointFeature::angle(f64::NAN));

        let mut joint_positions = BTreeMap::new();
        joint_positions.insert("nose".to_string(), [0.15, 0.06]);
        joint_positions.insert("left_sh".to_string(), [0.1, 0.1]);

        PoseTelemetry {
            timestamp: 1_700_000_000.25,
            detected_color: Some("blue".to_string()),
            root_position: Point2::new(0.5, 0.6),
            segments,
            joint_positions,
        }
    }

    #[test]
    fn test_pose_roundtrip() {
        let msg = ServerMessage::Pose(sample());
        let text = encode_message(&msg).unwrap();
        let ServerMessage::Pose(decoded) = decode_message(&text).unwrap();
        let original = sample();

        assert_eq!(decoded.timestamp, original.timestamp);
        assert_eq!(decoded.detected_color, original.detected_color);
        assert_eq!(decoded.root_position, original.root_position);
        assert_eq!(decoded.joint_positions, original.joint_positions);
        assert_eq!(decoded.segment(Segment::Head), original.segment(Segment::Head));
        assert_eq!(decoded.segment(Segment::LeftUpperArm), original.segment(Segment::LeftUpperArm));
        assert!(decoded.segment(Segment::RightHand).unwrap().angle.is_nan());
    }

    #[test]
    fn test_envelope_shape() {
        let text = encode_message(&ServerMessage::Pose(sample())).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "pose");
        let payload = &v["payload"];
        assert_eq!(payload["detected_color"], "blue");
        assert_eq!(payload["root_position"]["x"], 0.5);
        assert_eq!(payload["head"]["pos"][0], 150.0);
        assert_eq!(payload["head"]["pos_norm"][1], 0.06);
        assert_eq!(payload["left_upper_arm"]["length"], 50.99);
        assert_eq!(payload["nose_pos"][0], 0.15);
        assert!(payload.get("left_hand").is_none());
    }

    #[test]
    fn test_nan_encodes_as_null() {
        let text = encode_message(&ServerMessage::Pose(sample())).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert!(v["payload"]["right_hand"]["angle"].is_null());
    }

    #[test]
    fn test_color_omitted_when_absent() {
        let mut t = sample();
        t.detected_color = None;
        let text = encode_message(&ServerMessage::Pose(t)).unwrap();
        assert!(!text.contains("detected_color"));
        let ServerMessage::Pose(decoded) = decode_message(&text).unwrap();
        assert_eq!(decoded.detected_color, None);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let text = r#"{"type":"pose","payload":{
            "timestamp": 12.5,
            "root_position": {"x": 0.4, "y": 0.7},
            "hip": {"angle": -88.0},
            "extra_field": {"anything": true},
            "odd_pos": "not a pair",
            "left_knee_pos": [0.3, 0.8]
        }}"#;
        let ServerMessage::Pose(t) = decode_message(text).unwrap();
        assert_eq!(t.timestamp, 12.5);
        assert_eq!(t.segment(Segment::Hip).unwrap().angle, -88.0);
        assert_eq!(t.joint("left_knee"), Some([0.3, 0.8]));
        assert_eq!(t.joint("odd"), None);
        assert_eq!(t.segments.len(), 1);
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let text = r#"{"type":"pose","payload":{"root_position":{"x":0,"y":0}}}"#;
        assert!(decode_message(text).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(decode_message(r#"{"type":"heartbeat","payload":{}}"#).is_err());
    }

    #[test]
    fn test_segment_names_roundtrip() {
        for segment in Segment::ALL {
            assert_eq!(Segment::from_name(segment.name()), Some(segment));
        }
        assert_eq!(Segment::from_name("tail"), None);
    }
}
