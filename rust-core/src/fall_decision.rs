//! Fall decision engine.
//!
//! Combines calibration, ground classification and keypoint velocities over
//! time into a confidence score and an edge-triggered detection signal.
//!
//! # Episode lifecycle
//!
//! 1. **Onset**: the subject goes from upright to on-ground on a frame whose
//!    nose or hip speed exceeds the velocity threshold. The episode clock
//!    starts.
//! 2. **Ramp**: while on the ground, confidence rises linearly toward the
//!    ramp ceiling over the confirmation window.
//! 3. **Confirmation**: once the subject has been down for the full window,
//!    the fall is detected. `detected` is true on that one frame only.
//! 4. **Suppression**: getting up before the false-positive window elapses
//!    discards the episode without an event.
//! 5. **Stale reset**: an episode left over while the subject has been
//!    upright for a while is dropped.
//!
//! The confidence curve (onset cap, ramp to 80, jump to 95+) is a tunable
//! heuristic, not a validated clinical threshold. Treat it as a monotonic
//! indicator of sustained ground contact and nothing stronger.
//!
//! All timing uses frame timestamps, so the engine is deterministic for a
//! given frame sequence and configuration.

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationConfig, CalibrationTracker};
use crate::ground_state::{GroundStateClassifier, GroundStateConfig};
use crate::types::{clamp_confidence, CalibrationBaseline, PoseFrame, VelocitySample};
use crate::velocity::{VelocityConfig, VelocityEstimator};

/// Timing windows and confidence shaping for fall decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Nose or hip speed above this (normalized units/s) marks a rapid descent.
    pub velocity_threshold: f32,
    /// Continuous on-ground time required to confirm a fall (ms).
    pub confirmation_window_ms: u64,
    /// Recovering within this long after onset discards the episode (ms).
    pub false_positive_window_ms: u64,
    /// Upright time after which a leftover episode is cleared (ms).
    pub stale_episode_ms: u64,
    /// Required keypoints must have visibility strictly above this.
    pub min_keypoint_confidence: f32,
    /// Upper bound of the onset confidence (hip speed x 100).
    pub onset_confidence_cap: f32,
    /// Confidence reached just before confirmation.
    pub ramp_ceiling: f32,
    /// Confidence floor once confirmed.
    pub confirmed_base: f32,
    /// Confidence added per second on the ground once confirmed.
    pub confirmed_per_second: f32,
    /// Upper bound of confirmed confidence.
    pub confirmed_cap: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            velocity_threshold: 0.3,
            confirmation_window_ms: 2000,
            false_positive_window_ms: 5000,
            stale_episode_ms: 3000,
            min_keypoint_confidence: 0.5,
            onset_confidence_cap: 90.0,
            ramp_ceiling: 80.0,
            confirmed_base: 95.0,
            confirmed_per_second: 2.0,
            confirmed_cap: 99.0,
        }
    }
}

/// Whether the engine has a baseline to decide against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallDecisionState {
    Uncalibrated,
    Monitoring,
}

/// Per-frame output.
///
/// `detected` is true only on the single frame that confirms an episode.
/// Do not infer an ongoing fall from `confidence` alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallDecision {
    pub detected: bool,
    /// In [0, 100].
    pub confidence: f32,
    pub on_ground: bool,
    pub velocities: Option<VelocitySample>,
}

impl FallDecision {
    fn idle(on_ground: bool) -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            on_ground,
            velocities: None,
        }
    }
}

/// Snapshot of engine internals for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub calibrated: bool,
    pub baseline_height: Option<f32>,
    pub on_ground: bool,
    pub episode_active: bool,
    pub frame_history_len: usize,
    pub velocity_history_len: usize,
    pub calibration_attempts: u64,
}

/// A tracked fall episode. At most one exists at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Episode {
    start_ms: u64,
    /// Set once the detection edge has fired for this episode.
    confirmed: bool,
}

/// The fall decision state machine.
#[derive(Debug, Clone)]
pub struct FallDecisionEngine {
    config: DecisionConfig,
    calibration: CalibrationTracker,
    classifier: GroundStateClassifier,
    velocity: VelocityEstimator,

    on_ground: bool,
    episode: Option<Episode>,
    last_standing_ms: u64,
}

impl FallDecisionEngine {
    pub fn new(
        config: DecisionConfig,
        calibration: CalibrationConfig,
        ground: GroundStateConfig,
        velocity: VelocityConfig,
    ) -> Self {
        Self {
            config,
            calibration: CalibrationTracker::new(calibration),
            classifier: GroundStateClassifier::new(ground),
            velocity: VelocityEstimator::new(velocity),
            on_ground: false,
            episode: None,
            last_standing_ms: 0,
        }
    }

    /// Process one frame.
    ///
    /// While uncalibrated the frame is only offered to calibration. Frames
    /// failing the confidence gate leave every piece of state untouched.
    pub fn process_frame(&mut self, frame: &PoseFrame) -> FallDecision {
        let baseline = match self.calibration.baseline() {
            Some(baseline) => *baseline,
            None => {
                if self.calibration.calibrate(frame) {
                    self.last_standing_ms = frame.timestamp_ms;
                }
                return FallDecision::idle(false);
            }
        };

        if !frame.has_confident_keypoints(self.config.min_keypoint_confidence) {
            return FallDecision::idle(self.on_ground);
        }

        let now = frame.timestamp_ms;
        let Some(velocities) = self.velocity.push(frame) else {
            return FallDecision::idle(self.on_ground);
        };

        let was_on_ground = self.on_ground;
        self.on_ground = self.classifier.is_on_ground(frame, &baseline);

        let mut detected = false;
        let mut confidence = 0.0;

        let rapid_descent = velocities.nose_velocity > self.config.velocity_threshold
            || velocities.hip_velocity > self.config.velocity_threshold;

        if self.on_ground && !was_on_ground && rapid_descent {
            self.episode = Some(Episode {
                start_ms: now,
                confirmed: false,
            });
            confidence = (velocities.hip_velocity * 100.0).min(self.config.onset_confidence_cap);
            tracing::debug!(
                start_ms = now,
                nose_velocity = velocities.nose_velocity,
                hip_velocity = velocities.hip_velocity,
                "fall episode started"
            );
        }

        // Also runs on the onset frame, where it rewrites the onset
        // confidence with the zero-length ramp.
        if self.on_ground {
            if let Some(episode) = self.episode.as_mut() {
                let on_ground_ms = now.saturating_sub(episode.start_ms);
                if on_ground_ms >= self.config.confirmation_window_ms {
                    let secs = on_ground_ms as f32 / 1000.0;
                    confidence = (self.config.confirmed_base
                        + secs * self.config.confirmed_per_second)
                        .min(self.config.confirmed_cap);
                    if !episode.confirmed {
                        episode.confirmed = true;
                        detected = true;
                        tracing::info!(
                            start_ms = episode.start_ms,
                            on_ground_ms,
                            confidence,
                            "fall confirmed"
                        );
                    }
                } else {
                    let window = self.config.confirmation_window_ms.max(1) as f32;
                    confidence = on_ground_ms as f32 / window * self.config.ramp_ceiling;
                }
            }
        }

        if !self.on_ground && was_on_ground {
            if let Some(episode) = self.episode {
                let elapsed = now.saturating_sub(episode.start_ms);
                if elapsed < self.config.false_positive_window_ms {
                    self.episode = None;
                    confidence = 0.0;
                    tracing::debug!(
                        start_ms = episode.start_ms,
                        elapsed_ms = elapsed,
                        "fall episode discarded, subject recovered"
                    );
                }
            }
            self.last_standing_ms = now;
        }

        if !self.on_ground
            && now.saturating_sub(self.last_standing_ms) > self.config.stale_episode_ms
        {
            if let Some(episode) = self.episode.take() {
                tracing::debug!(
                    start_ms = episode.start_ms,
                    last_standing_ms = self.last_standing_ms,
                    "stale fall episode cleared"
                );
            }
        }

        FallDecision {
            detected,
            confidence: clamp_confidence(confidence),
            on_ground: self.on_ground,
            velocities: Some(velocities),
        }
    }

    pub fn state(&self) -> FallDecisionState {
        if self.calibration.is_calibrated() {
            FallDecisionState::Monitoring
        } else {
            FallDecisionState::Uncalibrated
        }
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.calibration.baseline()
    }

    pub fn on_ground(&self) -> bool {
        self.on_ground
    }

    /// Start time of the tracked episode, if any.
    pub fn episode_start(&self) -> Option<u64> {
        self.episode.map(|e| e.start_ms)
    }

    pub fn last_standing_ms(&self) -> u64 {
        self.last_standing_ms
    }

    pub fn velocity_estimator(&self) -> &VelocityEstimator {
        &self.velocity
    }

    pub fn stats(&self) -> DetectionStats {
        DetectionStats {
            calibrated: self.calibration.is_calibrated(),
            baseline_height: self.calibration.baseline().map(|b| b.height),
            on_ground: self.on_ground,
            episode_active: self.episode.is_some(),
            frame_history_len: self.velocity.frame_count(),
            velocity_history_len: self.velocity.sample_count(),
            calibration_attempts: self.calibration.failed_attempts(),
        }
    }

    /// Clear episode markers, the on-ground flag and both histories.
    /// The calibration baseline is kept. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.episode = None;
        self.on_ground = false;
        self.velocity.reset();
    }

    /// [`FallDecisionEngine::reset`] plus discarding the baseline, so the
    /// next qualifying frame recalibrates.
    pub fn reset_with_recalibration(&mut self) {
        self.reset();
        self.calibration.reset();
        self.last_standing_ms = 0;
    }
}

impl Default for FallDecisionEngine {
    fn default() -> Self {
        Self::new(
            DecisionConfig::default(),
            CalibrationConfig::default(),
            GroundStateConfig::default(),
            VelocityConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{falling, frame, lying, standing};

    /// Engine calibrated at t=0 with a standing frame, then one more
    /// standing frame at t=1000 so velocity history is primed.
    fn primed_engine() -> FallDecisionEngine {
        let mut engine = FallDecisionEngine::default();
        engine.process_frame(&standing(0));
        assert_eq!(engine.state(), FallDecisionState::Monitoring);
        engine.process_frame(&standing(1000));
        engine
    }

    #[test]
    fn test_first_frame_calibrates_without_decision() {
        let mut engine = FallDecisionEngine::default();
        assert_eq!(engine.state(), FallDecisionState::Uncalibrated);
        let decision = engine.process_frame(&standing(0));
        assert!(!decision.detected);
        assert!(decision.velocities.is_none());
        assert_eq!(engine.state(), FallDecisionState::Monitoring);
        assert_eq!(engine.stats().frame_history_len, 0);
    }

    #[test]
    fn test_low_confidence_frame_is_ignored() {
        let mut engine = primed_engine();
        let before = engine.stats();
        let weak = frame(1500, 0.8, 0.75, 0.9, 0.5, 0.3);
        let decision = engine.process_frame(&weak);
        assert!(!decision.detected);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.velocities.is_none());
        assert_eq!(engine.stats(), before);
    }

    #[test]
    fn test_onset_frame_reports_zero_length_ramp() {
        let mut engine = primed_engine();
        // Hips drop 0.25 in 500ms (0.5/s): episode starts, ramp is at 0ms
        let decision = engine.process_frame(&falling(1500));
        assert!(decision.on_ground);
        assert!(!decision.detected);
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(engine.episode_start(), Some(1500));
    }

    #[test]
    fn test_slow_descent_does_not_start_episode() {
        let mut engine = primed_engine();
        // Same drop spread over 10s: hip speed 0.025/s, nose 0.06/s
        let decision = engine.process_frame(&falling(11_000));
        assert!(decision.on_ground);
        assert_eq!(engine.episode_start(), None);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_ramp_then_single_detection() {
        let mut engine = primed_engine();
        engine.process_frame(&falling(1500));

        let ramp = engine.process_frame(&lying(2500));
        assert!(!ramp.detected);
        assert!((ramp.confidence - 40.0).abs() < 0.01);

        let mut detections = 0;
        let mut confirmed_confidence = 0.0;
        for t in (2600..=6000).step_by(100) {
            let decision = engine.process_frame(&lying(t));
            if decision.detected {
                detections += 1;
                confirmed_confidence = decision.confidence;
                assert_eq!(t, 3500);
            }
        }
        assert_eq!(detections, 1);
        assert!((95.0..=99.0).contains(&confirmed_confidence));
    }

    #[test]
    fn test_confirmed_confidence_is_capped() {
        let mut engine = primed_engine();
        engine.process_frame(&falling(1500));
        engine.process_frame(&lying(3500));
        let late = engine.process_frame(&lying(30_000));
        assert_eq!(late.confidence, 99.0);
        assert!(!late.detected);
    }

    #[test]
    fn test_recovery_inside_window_discards_episode() {
        let mut engine = primed_engine();
        engine.process_frame(&falling(1500));
        engine.process_frame(&lying(2300));
        let decision = engine.process_frame(&standing(2400));
        assert!(!decision.on_ground);
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(engine.episode_start(), None);
        assert_eq!(engine.last_standing_ms(), 2400);
    }

    #[test]
    fn test_late_recovery_keeps_episode_until_stale() {
        let mut engine = primed_engine();
        engine.process_frame(&falling(1500));
        engine.process_frame(&lying(4000));
        engine.process_frame(&lying(7000));

        engine.process_frame(&standing(7100));
        assert_eq!(engine.episode_start(), Some(1500));

        engine.process_frame(&standing(10_000));
        assert_eq!(engine.episode_start(), Some(1500));

        engine.process_frame(&standing(10_200));
        assert_eq!(engine.episode_start(), None);
    }

    #[test]
    fn test_reset_is_idempotent_and_keeps_baseline() {
        let mut engine = primed_engine();
        engine.process_frame(&falling(1500));
        for _ in 0..3 {
            engine.reset();
            let stats = engine.stats();
            assert_eq!(stats.frame_history_len, 0);
            assert_eq!(stats.velocity_history_len, 0);
            assert!(!stats.episode_active);
            assert!(!stats.on_ground);
            assert!(stats.calibrated);
        }
    }

    #[test]
    fn test_reset_with_recalibration_drops_baseline() {
        let mut engine = primed_engine();
        engine.reset_with_recalibration();
        assert_eq!(engine.state(), FallDecisionState::Uncalibrated);
        assert!(engine.baseline().is_none());
    }
}
