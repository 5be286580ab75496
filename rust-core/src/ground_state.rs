//! Ground-state classification.
//!
//! Decides from a single frame whether the subject is on the floor. Two
//! conditions must hold together:
//! - the nose-to-ankle height has collapsed relative to the standing baseline
//! - the hips sit low in the camera frame
//!
//! Requiring both keeps bending over (height drops, hips stay high) and
//! sitting close to the camera (hips low, height intact) from registering.
//! The classifier holds no state.

use serde::{Deserialize, Serialize};

use crate::types::{CalibrationBaseline, PoseFrame};

/// Thresholds for ground classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundStateConfig {
    /// Current height / baseline height must be below this.
    pub height_drop_threshold: f32,
    /// Mean hip y (normalized, downward positive) must be above this.
    pub hip_height_threshold: f32,
}

impl Default for GroundStateConfig {
    fn default() -> Self {
        Self {
            height_drop_threshold: 0.5,
            hip_height_threshold: 0.6,
        }
    }
}

/// Geometry behind a ground decision, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundMeasurement {
    pub height_ratio: f32,
    pub hip_y: f32,
}

/// Stateless on-ground classifier.
#[derive(Debug, Clone, Default)]
pub struct GroundStateClassifier {
    config: GroundStateConfig,
}

impl GroundStateClassifier {
    pub fn new(config: GroundStateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GroundStateConfig {
        &self.config
    }

    /// Measure height ratio and hip height. None if the hips are missing or
    /// the baseline height is not positive.
    pub fn measure(
        &self,
        frame: &PoseFrame,
        baseline: &CalibrationBaseline,
    ) -> Option<GroundMeasurement> {
        if baseline.height <= 0.0 {
            return None;
        }
        let hip_y = frame.hip_y()?;
        Some(GroundMeasurement {
            height_ratio: frame.body_height() / baseline.height,
            hip_y,
        })
    }

    /// True iff height ratio < threshold AND hip y > threshold.
    pub fn is_on_ground(&self, frame: &PoseFrame, baseline: &CalibrationBaseline) -> bool {
        self.measure(frame, baseline)
            .map_or(false, |m| self.classify(m.height_ratio, m.hip_y))
    }

    /// The decision rule on raw measurements.
    pub fn classify(&self, height_ratio: f32, hip_y: f32) -> bool {
        height_ratio < self.config.height_drop_threshold
            && hip_y > self.config.hip_height_threshold
    }
}
