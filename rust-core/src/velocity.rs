//! Keypoint velocity estimation.
//!
//! Keeps the nose, hip and ankle positions of the most recent frames in a
//! fixed ring buffer and derives planar speeds from the two newest entries.
//! Only those five keypoints are copied out of each frame, so buffering a
//! frame allocates nothing. Each computed sample is also retained in a
//! second ring buffer of the same capacity.

use serde::{Deserialize, Serialize};

use crate::ring_buffer::RingBuffer;
use crate::types::{Keypoint, Landmark, PoseFrame, VelocitySample, REQUIRED_KEYPOINTS};

/// Parameters for velocity estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Capacity of the frame and velocity histories.
    pub history_window_frames: usize,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            history_window_frames: 30, // ~1s at 30fps
        }
    }
}

/// Speed between two positions: planar distance / `dt_secs`.
///
/// Returns 0.0 when `dt_secs` is not positive.
pub fn velocity(a: &Landmark, b: &Landmark, dt_secs: f32) -> f32 {
    if dt_secs <= 0.0 {
        return 0.0;
    }
    a.planar_distance(b) / dt_secs
}

/// The keypoints velocity is computed from, copied out of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeypointSnapshot {
    pub timestamp_ms: u64,
    /// Indexed like `REQUIRED_KEYPOINTS`. None when the frame lacked it.
    points: [Option<Landmark>; REQUIRED_KEYPOINTS.len()],
}

impl KeypointSnapshot {
    pub fn from_frame(frame: &PoseFrame) -> Self {
        Self {
            timestamp_ms: frame.timestamp_ms,
            points: REQUIRED_KEYPOINTS.map(|kp| frame.landmark(kp).copied()),
        }
    }

    pub fn landmark(&self, keypoint: Keypoint) -> Option<&Landmark> {
        let slot = REQUIRED_KEYPOINTS.iter().position(|&kp| kp == keypoint)?;
        self.points[slot].as_ref()
    }
}

/// Sliding-window velocity estimator.
#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    frames: RingBuffer<KeypointSnapshot>,
    samples: RingBuffer<VelocitySample>,
}

impl VelocityEstimator {
    pub fn new(config: VelocityConfig) -> Self {
        Self {
            frames: RingBuffer::with_capacity(config.history_window_frames),
            samples: RingBuffer::with_capacity(config.history_window_frames),
        }
    }

    /// Buffer a frame and compute a sample against the previous one.
    ///
    /// Returns None while fewer than two frames are buffered.
    pub fn push(&mut self, frame: &PoseFrame) -> Option<VelocitySample> {
        self.frames.push(KeypointSnapshot::from_frame(frame));
        let sample = self.compute_latest()?;
        self.samples.push(sample);
        Some(sample)
    }

    /// Sample from the two newest buffered frames, without storing it.
    pub fn compute_latest(&self) -> Option<VelocitySample> {
        let current = self.frames.recent(0)?;
        let previous = self.frames.recent(1)?;
        Some(Self::between(previous, current))
    }

    /// Speeds from `previous` to `current`. Missing keypoints contribute 0.
    pub fn between(previous: &KeypointSnapshot, current: &KeypointSnapshot) -> VelocitySample {
        let dt_secs = current.timestamp_ms.saturating_sub(previous.timestamp_ms) as f32 / 1000.0;

        let speed = |kp: Keypoint| match (current.landmark(kp), previous.landmark(kp)) {
            (Some(now), Some(before)) => velocity(now, before, dt_secs),
            _ => 0.0,
        };

        VelocitySample {
            nose_velocity: speed(Keypoint::Nose),
            hip_velocity: (speed(Keypoint::LeftHip) + speed(Keypoint::RightHip)) / 2.0,
            ankle_velocity: (speed(Keypoint::LeftAnkle) + speed(Keypoint::RightAnkle)) / 2.0,
            timestamp_ms: current.timestamp_ms,
        }
    }

    pub fn latest_sample(&self) -> Option<&VelocitySample> {
        self.samples.latest()
    }

    /// Velocity history, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &VelocitySample> + '_ {
        self.samples.iter()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    /// Drop both histories.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.samples.clear();
    }
}

impl Default for VelocityEstimator {
    fn default() -> Self {
        Self::new(VelocityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{frame, standing};

    #[test]
    fn test_velocity_is_distance_over_time() {
        let a = Landmark::new(0.0, 0.0, 0.0, 1.0);
        let b = Landmark::new(0.3, 0.4, 0.9, 1.0);
        assert!((velocity(&a, &b, 0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_dt_gives_zero_velocity() {
        let a = Landmark::new(0.0, 0.0, 0.0, 1.0);
        let b = Landmark::new(1.0, 1.0, 0.0, 1.0);
        assert_eq!(velocity(&a, &b, 0.0), 0.0);
    }

    #[test]
    fn test_single_frame_is_insufficient() {
        let mut estimator = VelocityEstimator::default();
        assert!(estimator.push(&standing(0)).is_none());
        assert!(estimator.latest_sample().is_none());
        assert_eq!(estimator.frame_count(), 1);
    }

    #[test]
    fn test_hip_drop_speed() {
        let mut estimator = VelocityEstimator::default();
        estimator.push(&frame(0, 0.2, 0.5, 0.9, 0.5, 1.0));
        // hips move 0.25 down in 500ms -> 0.5/s
        let sample = estimator.push(&frame(500, 0.2, 0.75, 0.9, 0.5, 1.0)).unwrap();
        assert!((sample.hip_velocity - 0.5).abs() < 1e-5);
        assert_eq!(sample.nose_velocity, 0.0);
        assert_eq!(sample.ankle_velocity, 0.0);
        assert_eq!(sample.timestamp_ms, 500);
    }

    #[test]
    fn test_duplicate_timestamp_gives_zero() {
        let mut estimator = VelocityEstimator::default();
        estimator.push(&frame(100, 0.2, 0.5, 0.9, 0.5, 1.0));
        let sample = estimator.push(&frame(100, 0.8, 0.9, 0.9, 0.1, 1.0)).unwrap();
        assert_eq!(sample.nose_velocity, 0.0);
        assert_eq!(sample.hip_velocity, 0.0);
    }

    #[test]
    fn test_histories_are_bounded() {
        let mut estimator = VelocityEstimator::default();
        for i in 0..100 {
            estimator.push(&standing(i * 33));
        }
        assert_eq!(estimator.frame_count(), 30);
        assert_eq!(estimator.sample_count(), 30);
        assert_eq!(estimator.samples().count(), 30);
    }

    #[test]
    fn test_snapshot_keeps_only_tracked_keypoints() {
        let f = frame(250, 0.2, 0.5, 0.9, 0.4, 1.0);
        let snapshot = KeypointSnapshot::from_frame(&f);
        assert_eq!(snapshot.timestamp_ms, 250);
        assert_eq!(snapshot.landmark(Keypoint::Nose), f.landmark(Keypoint::Nose));
        assert_eq!(snapshot.landmark(Keypoint::RightAnkle).map(|l| l.y), Some(0.9));
        assert!(snapshot.landmark(Keypoint::LeftShoulder).is_none());

        let truncated = KeypointSnapshot::from_frame(&PoseFrame::new(0, Vec::new()));
        assert!(truncated.landmark(Keypoint::Nose).is_none());
    }

    #[test]
    fn test_reset_clears_histories() {
        let mut estimator = VelocityEstimator::default();
        estimator.push(&standing(0));
        estimator.push(&standing(33));
        estimator.reset();
        assert_eq!(estimator.frame_count(), 0);
        assert_eq!(estimator.sample_count(), 0);
        assert!(estimator.push(&standing(66)).is_none());
    }
}
