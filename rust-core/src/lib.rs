//! Fall Sensing Engine Library
//!
//! A streaming fall-detection kernel that consumes body-pose frames from a
//! pose-estimation model and decides, within seconds and with bounded memory,
//! whether the person in view has fallen. A confirmed fall starts a
//! cancellable countdown that ends in a caregiver alert.
//!
//! # Design Philosophy
//!
//! - **Decisions from evidence over time**: a single frame never raises an
//!   alert; a rapid descent must be followed by sustained ground contact.
//! - **Degrade, don't fail**: low-confidence or missing keypoints mean "no
//!   decision", never an error.
//! - **Bounded memory**: fixed ring buffers, O(1) work per frame.
//! - **Explicit ownership**: no global state. The caller owns a
//!   [`MonitoringSession`] and every event is a returned value.
//!
//! # Pipeline
//!
//! ```text
//! PoseFrame -> CalibrationTracker (baseline)
//!           -> GroundStateClassifier + VelocityEstimator
//!           -> FallDecisionEngine -> AlertCountdownController -> events
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fall_sensing::{EngineConfig, ManualClock, MonitoringSession};
//!
//! let clock = ManualClock::new(0);
//! let mut session = MonitoringSession::new(EngineConfig::default(), Arc::new(clock.clone()));
//! session.start_monitoring();
//!
//! for frame in frames {
//!     clock.set(frame.timestamp_ms);
//!     for event in session.handle_frame(&frame).events {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod calibration;
pub mod clock;
pub mod config;
pub mod countdown;
pub mod error;
pub mod events;
pub mod fall_decision;
pub mod ground_state;
pub mod replay;
pub mod ring_buffer;
pub mod runtime;
pub mod session;
pub mod types;
pub mod velocity;

mod stress_tests;

// Re-export commonly used types
pub use calibration::{CalibrationConfig, CalibrationTracker};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{EngineConfig, SessionConfig};
pub use countdown::{AlertCountdownController, AlertState, CountdownConfig, TickOutcome};
pub use error::{
    ConfigError, CountdownError, Error, ReplayError, Result, RuntimeError, SessionError,
};
pub use events::{
    AlertCancelled, AlertConfirmed, AlertMessage, FallDetected, FallHistory, HistorySummary,
    MonitorEvent,
};
pub use fall_decision::{
    DecisionConfig, DetectionStats, FallDecision, FallDecisionEngine, FallDecisionState,
};
pub use ground_state::{GroundStateClassifier, GroundStateConfig};
pub use runtime::{
    LoggingNotifier, MonitorHandle, MonitorService, Notifier, TickHandle, TickScheduler,
    TokioTickScheduler,
};
pub use session::{FrameOutcome, MonitoringSession, SessionStats};
pub use types::{
    CalibrationBaseline, FallEvent, FallEventId, FallSource, FallStatus, Geolocation, Keypoint,
    Landmark, PoseFrame, VelocitySample,
};
pub use velocity::{KeypointSnapshot, VelocityConfig, VelocityEstimator};
