//! Engine configuration.
//!
//! Every component owns its own config struct with sensible defaults;
//! [`EngineConfig`] bundles them for loading from a single TOML file. Any
//! table or key left out of the file keeps its default.
//!
//! ```toml
//! [decision]
//! velocity_threshold = 0.35
//!
//! [countdown]
//! duration_secs = 15
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationConfig;
use crate::countdown::CountdownConfig;
use crate::error::ConfigError;
use crate::fall_decision::{DecisionConfig, FallDecisionEngine};
use crate::ground_state::GroundStateConfig;
use crate::velocity::VelocityConfig;

/// Session-level settings that belong to no single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fall records kept in the history log.
    pub history_capacity: usize,
    /// Delay after a confirmed alert before the runtime re-arms (ms).
    pub post_alert_reset_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            post_alert_reset_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub calibration: CalibrationConfig,
    pub ground: GroundStateConfig,
    pub velocity: VelocityConfig,
    pub decision: DecisionConfig,
    pub countdown: CountdownConfig,
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.calibration;
        unit_interval("calibration.min_keypoint_confidence", c.min_keypoint_confidence)?;
        positive_f32(
            "calibration.minimum_calibration_height",
            c.minimum_calibration_height,
        )?;

        let g = &self.ground;
        positive_f32("ground.height_drop_threshold", g.height_drop_threshold)?;
        unit_interval("ground.hip_height_threshold", g.hip_height_threshold)?;

        if self.velocity.history_window_frames < 2 {
            return Err(ConfigError::Invalid(
                "velocity.history_window_frames must be at least 2".into(),
            ));
        }

        let d = &self.decision;
        positive_f32("decision.velocity_threshold", d.velocity_threshold)?;
        nonzero("decision.confirmation_window_ms", d.confirmation_window_ms)?;
        nonzero("decision.false_positive_window_ms", d.false_positive_window_ms)?;
        nonzero("decision.stale_episode_ms", d.stale_episode_ms)?;
        unit_interval("decision.min_keypoint_confidence", d.min_keypoint_confidence)?;
        for (name, value) in [
            ("decision.onset_confidence_cap", d.onset_confidence_cap),
            ("decision.ramp_ceiling", d.ramp_ceiling),
            ("decision.confirmed_base", d.confirmed_base),
            ("decision.confirmed_cap", d.confirmed_cap),
        ] {
            percentage(name, value)?;
        }
        if d.confirmed_per_second < 0.0 || !d.confirmed_per_second.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "decision.confirmed_per_second must be a non-negative number, got {}",
                d.confirmed_per_second
            )));
        }
        if d.confirmed_base > d.confirmed_cap {
            return Err(ConfigError::Invalid(format!(
                "decision.confirmed_base ({}) exceeds decision.confirmed_cap ({})",
                d.confirmed_base, d.confirmed_cap
            )));
        }

        nonzero("countdown.duration_secs", self.countdown.duration_secs as u64)?;
        nonzero("countdown.tick_interval_ms", self.countdown.tick_interval_ms)?;
        nonzero("session.history_capacity", self.session.history_capacity as u64)?;
        Ok(())
    }

    /// A decision engine wired from these settings.
    pub fn build_engine(&self) -> FallDecisionEngine {
        FallDecisionEngine::new(
            self.decision.clone(),
            self.calibration.clone(),
            self.ground.clone(),
            self.velocity.clone(),
        )
    }
}

fn nonzero(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
    }
    Ok(())
}

fn positive_f32(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be a positive number, got {value}"
        )));
    }
    Ok(())
}

fn unit_interval(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn percentage(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 100], got {value}"
        )));
    }
    Ok(())
}
