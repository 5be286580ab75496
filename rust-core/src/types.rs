//! Core data types for the fall sensing engine.
//!
//! This module defines the values that flow between the pose source, the
//! decision stages and the alert countdown. Every concept that crosses a
//! component boundary gets a type here; raw landmark slices and bare floats
//! stay inside the components that interpret them.
//!
//! Coordinates are normalized to the camera frame: `x` grows to the right,
//! `y` grows downward, both in [0, 1]. A larger `y` therefore means "closer
//! to the floor".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of landmarks a full pose-estimation result carries.
pub const POSE_LANDMARK_COUNT: usize = 33;

/// The body points the decision logic reads, by pose-model index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keypoint {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Keypoint {
    /// Index of this keypoint in a pose-model landmark list.
    pub fn index(self) -> usize {
        match self {
            Keypoint::Nose => 0,
            Keypoint::LeftShoulder => 11,
            Keypoint::RightShoulder => 12,
            Keypoint::LeftHip => 23,
            Keypoint::RightHip => 24,
            Keypoint::LeftKnee => 25,
            Keypoint::RightKnee => 26,
            Keypoint::LeftAnkle => 27,
            Keypoint::RightAnkle => 28,
        }
    }
}

/// Keypoints that must be visible before a frame is trusted for calibration
/// or for a decision.
pub const REQUIRED_KEYPOINTS: [Keypoint; 5] = [
    Keypoint::Nose,
    Keypoint::LeftHip,
    Keypoint::RightHip,
    Keypoint::LeftAnkle,
    Keypoint::RightAnkle,
];

/// A single tracked body point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal position, normalized to frame width.
    pub x: f32,
    /// Vertical position, normalized to frame height (downward positive).
    pub y: f32,
    /// Depth-like value relative to the hips. Preserved, never interpreted.
    pub z: f32,
    /// Detection confidence in [0, 1]. Absent means "not trusted".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: Some(visibility),
        }
    }

    /// Visibility with a missing score treated as zero.
    pub fn confidence(&self) -> f32 {
        self.visibility.unwrap_or(0.0)
    }

    /// Planar Euclidean distance to another landmark. Depth is ignored.
    pub fn planar_distance(&self, other: &Landmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One pose-estimation result with its capture time.
///
/// Assumptions:
/// - `timestamp_ms` is monotonic within a monitoring session
/// - `landmarks` follows pose-model ordering and may be shorter than 33
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    /// Monotonic capture timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Landmarks in pose-model index order.
    pub landmarks: Vec<Landmark>,
}

impl PoseFrame {
    pub fn new(timestamp_ms: u64, landmarks: Vec<Landmark>) -> Self {
        Self {
            timestamp_ms,
            landmarks,
        }
    }

    /// Landmark for a keypoint, if the frame carries that index.
    pub fn landmark(&self, keypoint: Keypoint) -> Option<&Landmark> {
        self.landmarks.get(keypoint.index())
    }

    /// True when every required keypoint is present with confidence strictly
    /// above `min_confidence`.
    pub fn has_confident_keypoints(&self, min_confidence: f32) -> bool {
        REQUIRED_KEYPOINTS.iter().all(|&kp| {
            self.landmark(kp)
                .map_or(false, |lm| lm.confidence() > min_confidence)
        })
    }

    /// Standing height: |nose.y - mean(ankle.y)|.
    ///
    /// Returns 0.0 when the nose or either ankle is missing.
    pub fn body_height(&self) -> f32 {
        match (
            self.landmark(Keypoint::Nose),
            self.landmark(Keypoint::LeftAnkle),
            self.landmark(Keypoint::RightAnkle),
        ) {
            (Some(nose), Some(left), Some(right)) => {
                let ankle_y = (left.y + right.y) / 2.0;
                (nose.y - ankle_y).abs()
            }
            _ => 0.0,
        }
    }

    /// Mean vertical position of the two hips, if both are present.
    pub fn hip_y(&self) -> Option<f32> {
        let left = self.landmark(Keypoint::LeftHip)?;
        let right = self.landmark(Keypoint::RightHip)?;
        Some((left.y + right.y) / 2.0)
    }
}

/// The subject's standing height, established once per monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    /// Standing height in normalized units.
    pub height: f32,
    /// Timestamp of the frame that established the baseline.
    pub established_at_ms: u64,
}

/// Per-keypoint motion speeds between the two most recent frames.
///
/// Units are normalized distance per second; all values are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocitySample {
    pub nose_velocity: f32,
    /// Mean of left and right hip speeds.
    pub hip_velocity: f32,
    /// Mean of left and right ankle speeds.
    pub ankle_velocity: f32,
    pub timestamp_ms: u64,
}

/// Lifecycle status of a recorded fall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallStatus {
    Detected,
    Cancelled,
    AlertSent,
}

/// What produced a fall record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallSource {
    /// The decision engine confirmed a fall from the pose stream.
    Detected,
    /// A demonstration fall injected by the owning application.
    Simulated,
    /// A manually triggered emergency.
    Manual,
}

/// Unique identifier for a fall record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FallEventId(Uuid);

impl FallEventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FallEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FallEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic position supplied by an external location collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// A recorded fall, kept for audit and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallEvent {
    pub id: FallEventId,
    pub timestamp_ms: u64,
    /// Confidence in [0, 100].
    pub confidence: f32,
    pub status: FallStatus,
    pub source: FallSource,
    /// The frame that triggered detection, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skeleton: Option<PoseFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Geolocation>,
}

impl FallEvent {
    /// Creates a record in `Detected` status. Confidence is clamped to [0, 100].
    pub fn new(
        timestamp_ms: u64,
        confidence: f32,
        source: FallSource,
        skeleton: Option<PoseFrame>,
    ) -> Self {
        Self {
            id: FallEventId::new(),
            timestamp_ms,
            confidence: clamp_confidence(confidence),
            status: FallStatus::Detected,
            source,
            skeleton,
            location: None,
        }
    }

    /// Attach a location fix from an external collaborator.
    pub fn with_location(mut self, location: Geolocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Clamp a confidence score into [0, 100]. NaN maps to 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic frames shared by the unit, integration and stress tests.

    use super::*;

    /// A frame with every landmark at `visibility`, the nose at `nose_y`,
    /// the hips at `hip_y` and both ankles at `ankle_y`. `x` is shared by
    /// every landmark so horizontal motion can be injected.
    pub fn frame(
        timestamp_ms: u64,
        nose_y: f32,
        hip_y: f32,
        ankle_y: f32,
        x: f32,
        visibility: f32,
    ) -> PoseFrame {
        let mut landmarks = vec![Landmark::new(x, 0.5, 0.0, visibility); POSE_LANDMARK_COUNT];
        landmarks[Keypoint::Nose.index()].y = nose_y;
        landmarks[Keypoint::LeftHip.index()].y = hip_y;
        landmarks[Keypoint::RightHip.index()].y = hip_y;
        landmarks[Keypoint::LeftAnkle.index()].y = ankle_y;
        landmarks[Keypoint::RightAnkle.index()].y = ankle_y;
        PoseFrame::new(timestamp_ms, landmarks)
    }

    /// Upright subject with a standing height of 0.7.
    pub fn standing(timestamp_ms: u64) -> PoseFrame {
        frame(timestamp_ms, 0.2, 0.5, 0.9, 0.5, 0.95)
    }

    /// Mid-fall: on the ground with hips 0.25 below [`standing`].
    pub fn falling(timestamp_ms: u64) -> PoseFrame {
        frame(timestamp_ms, 0.8, 0.75, 0.9, 0.5, 0.95)
    }

    /// Subject lying down: height 0.1, hips low in the frame.
    pub fn lying(timestamp_ms: u64) -> PoseFrame {
        frame(timestamp_ms, 0.8, 0.85, 0.9, 0.5, 0.95)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_keypoint_indices_follow_pose_model() {
        assert_eq!(Keypoint::Nose.index(), 0);
        assert_eq!(Keypoint::LeftHip.index(), 23);
        assert_eq!(Keypoint::RightAnkle.index(), 28);
    }

    #[test]
    fn test_body_height_uses_mean_ankle() {
        let mut frame = standing(0);
        frame.landmarks[Keypoint::LeftAnkle.index()].y = 0.8;
        frame.landmarks[Keypoint::RightAnkle.index()].y = 1.0;
        assert!((frame.body_height() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_truncated_frame_fails_confidence_gate() {
        let mut frame = standing(0);
        frame.landmarks.truncate(25);
        assert!(!frame.has_confident_keypoints(0.5));
        assert_eq!(frame.body_height(), 0.0);
        assert!(frame.hip_y().is_none());
    }

    #[test]
    fn test_missing_visibility_is_untrusted() {
        let mut frame = standing(0);
        frame.landmarks[Keypoint::Nose.index()].visibility = None;
        assert!(!frame.has_confident_keypoints(0.5));
    }

    #[test]
    fn test_confidence_gate_is_strict() {
        let frame = frame(0, 0.2, 0.5, 0.9, 0.5, 0.5);
        assert!(!frame.has_confident_keypoints(0.5));
    }

    #[test]
    fn test_fall_event_clamps_confidence() {
        let event = FallEvent::new(10, 140.0, FallSource::Manual, None);
        assert_eq!(event.confidence, 100.0);
        assert_eq!(event.status, FallStatus::Detected);
        assert_eq!(clamp_confidence(-3.0), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
    }

    #[test]
    fn test_fall_status_serializes_snake_case() {
        let json = serde_json::to_string(&FallStatus::AlertSent).unwrap();
        assert_eq!(json, "\"alert_sent\"");
    }
}
