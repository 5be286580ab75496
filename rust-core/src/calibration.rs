//! Standing-height calibration.
//!
//! The ground classifier works on height ratios, so every monitoring session
//! starts by measuring how tall the subject appears when upright. The first
//! frame that passes the confidence gate and shows a plausible height becomes
//! the baseline. Rejected frames change nothing and the next frame is tried;
//! there is no retry cap.

use serde::{Deserialize, Serialize};

use crate::types::{CalibrationBaseline, PoseFrame};

/// Parameters for calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Required keypoints must have visibility strictly above this.
    pub min_keypoint_confidence: f32,
    /// Heights at or below this (normalized) are rejected. A subject this
    /// short in frame is too far away or already crouched.
    pub minimum_calibration_height: f32,
    /// Emit a diagnostic every N consecutive rejected frames. 0 disables.
    pub diagnostic_every: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_keypoint_confidence: 0.5,
            minimum_calibration_height: 0.3,
            diagnostic_every: 90, // ~3s at 30fps
        }
    }
}

/// Why a frame did not produce a baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationRejection {
    LowConfidence,
    TooShort { height: f32 },
}

/// Establishes and holds the standing-height baseline.
#[derive(Debug, Clone)]
pub struct CalibrationTracker {
    config: CalibrationConfig,
    baseline: Option<CalibrationBaseline>,
    /// Consecutive rejected frames since the last reset.
    failed_attempts: u64,
}

impl CalibrationTracker {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            baseline: None,
            failed_attempts: 0,
        }
    }

    /// Try to establish the baseline from `frame`.
    ///
    /// Returns true once calibrated. An existing baseline is never replaced;
    /// call [`CalibrationTracker::reset`] to recalibrate.
    pub fn calibrate(&mut self, frame: &PoseFrame) -> bool {
        if self.baseline.is_some() {
            return true;
        }

        match self.evaluate(frame) {
            Ok(height) => {
                self.baseline = Some(CalibrationBaseline {
                    height,
                    established_at_ms: frame.timestamp_ms,
                });
                tracing::info!(
                    height,
                    timestamp_ms = frame.timestamp_ms,
                    attempts = self.failed_attempts + 1,
                    "calibration baseline established"
                );
                self.failed_attempts = 0;
                true
            }
            Err(rejection) => {
                self.failed_attempts += 1;
                let every = self.config.diagnostic_every;
                if every > 0 && self.failed_attempts % every == 0 {
                    tracing::debug!(
                        attempts = self.failed_attempts,
                        ?rejection,
                        "still waiting for a calibration frame"
                    );
                }
                false
            }
        }
    }

    /// Check a frame against the calibration criteria without storing anything.
    pub fn evaluate(&self, frame: &PoseFrame) -> Result<f32, CalibrationRejection> {
        if !frame.has_confident_keypoints(self.config.min_keypoint_confidence) {
            return Err(CalibrationRejection::LowConfidence);
        }
        let height = frame.body_height();
        if height > self.config.minimum_calibration_height {
            Ok(height)
        } else {
            Err(CalibrationRejection::TooShort { height })
        }
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.baseline.as_ref()
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    /// Forget the baseline so the next qualifying frame recalibrates.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.failed_attempts = 0;
    }
}

impl Default for CalibrationTracker {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::frame;
    use crate::types::Keypoint;

    #[test]
    fn test_calibrates_on_tall_confident_frame() {
        let mut tracker = CalibrationTracker::default();
        // nose at 0.3, ankles at 0.7 -> height 0.4
        let f = frame(1_000, 0.3, 0.5, 0.7, 0.5, 1.0);
        assert!(tracker.calibrate(&f));
        let baseline = tracker.baseline().unwrap();
        assert!((baseline.height - 0.4).abs() < 1e-6);
        assert_eq!(baseline.established_at_ms, 1_000);
    }

    #[test]
    fn test_rejects_when_any_required_keypoint_is_weak() {
        let mut tracker = CalibrationTracker::default();
        let mut f = frame(0, 0.3, 0.5, 0.7, 0.5, 1.0);
        f.landmarks[Keypoint::RightAnkle.index()].visibility = Some(0.5);
        assert!(!tracker.calibrate(&f));
        assert!(!tracker.is_calibrated());
        assert_eq!(tracker.evaluate(&f), Err(CalibrationRejection::LowConfidence));
    }

    #[test]
    fn test_rejects_short_subject_and_retries() {
        let mut tracker = CalibrationTracker::default();
        let short = frame(0, 0.5, 0.6, 0.75, 0.5, 1.0);
        assert!(!tracker.calibrate(&short));
        assert!(!tracker.calibrate(&short));
        assert_eq!(tracker.failed_attempts(), 2);

        let tall = frame(66, 0.2, 0.5, 0.9, 0.5, 1.0);
        assert!(tracker.calibrate(&tall));
        assert_eq!(tracker.failed_attempts(), 0);
    }

    #[test]
    fn test_baseline_is_not_overwritten() {
        let mut tracker = CalibrationTracker::default();
        assert!(tracker.calibrate(&frame(0, 0.3, 0.5, 0.7, 0.5, 1.0)));
        assert!(tracker.calibrate(&frame(33, 0.1, 0.5, 0.9, 0.5, 1.0)));
        assert!((tracker.baseline().unwrap().height - 0.4).abs() < 1e-6);

        tracker.reset();
        assert!(!tracker.is_calibrated());
        assert!(tracker.calibrate(&frame(66, 0.1, 0.5, 0.9, 0.5, 1.0)));
        assert!((tracker.baseline().unwrap().height - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_height_at_minimum_is_rejected() {
        let tracker = CalibrationTracker::default();
        let f = frame(0, 0.4, 0.5, 0.7, 0.5, 1.0);
        assert!(matches!(
            tracker.evaluate(&f),
            Err(CalibrationRejection::TooShort { .. })
        ));
    }
}
