//! Monitoring session.
//!
//! [`MonitoringSession`] owns the decision engine, the alert countdown and
//! the fall history, and is the single place where frames, countdown ticks
//! and lifecycle calls mutate them. Every method takes `&mut self`, so
//! whoever owns the session serializes those steps by construction. The
//! session itself never spawns timers: the owner schedules ticks for
//! [`MonitoringSession::countdown_epoch`] while
//! [`MonitoringSession::is_counting_down`] holds, and feeds them back through
//! [`MonitoringSession::handle_tick`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::countdown::{AlertCountdownController, AlertState, TickOutcome};
use crate::error::SessionError;
use crate::events::{FallDetected, FallHistory, HistorySummary, MonitorEvent};
use crate::fall_decision::{DetectionStats, FallDecision, FallDecisionEngine};
use crate::types::{FallEvent, FallSource, FallStatus, Geolocation, PoseFrame};

/// Confidence recorded for a manually raised emergency.
const MANUAL_CONFIDENCE: f32 = 100.0;
/// Confidence recorded for a simulated fall.
const SIMULATED_CONFIDENCE: f32 = 95.0;

/// Result of feeding one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// `None` when monitoring is off and the frame was dropped.
    pub decision: Option<FallDecision>,
    pub events: Vec<MonitorEvent>,
}

/// Snapshot of the whole session for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub monitoring: bool,
    pub detection: DetectionStats,
    pub alert_state: AlertState,
    pub countdown_remaining_secs: u32,
    pub history: HistorySummary,
}

pub struct MonitoringSession {
    config: EngineConfig,
    engine: FallDecisionEngine,
    countdown: AlertCountdownController,
    history: FallHistory,
    clock: Arc<dyn Clock>,
    monitoring: bool,
    location: Option<Geolocation>,
}

impl MonitoringSession {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine: config.build_engine(),
            countdown: AlertCountdownController::new(config.countdown.clone()),
            history: FallHistory::new(config.session.history_capacity),
            config,
            clock,
            monitoring: false,
            location: None,
        }
    }

    /// Begin a fresh monitoring session.
    ///
    /// Clears the fall history, engine state and calibration; the next
    /// qualifying frame recalibrates. A running countdown is halted.
    pub fn start_monitoring(&mut self) {
        self.engine.reset_with_recalibration();
        self.countdown.rearm();
        self.history = FallHistory::new(self.config.session.history_capacity);
        self.monitoring = true;
        tracing::info!("monitoring started");
    }

    /// Stop ingesting frames and halt any countdown without cancelling it.
    ///
    /// Frames and ticks arriving afterwards are dropped.
    pub fn stop_monitoring(&mut self) {
        if !self.monitoring {
            return;
        }
        self.monitoring = false;
        self.countdown.rearm();
        self.engine.reset();
        tracing::info!("monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Feed one pose frame.
    ///
    /// A confirmed detection is logged and starts the countdown. If a
    /// countdown is already running or awaiting re-arm, the detection is
    /// still logged but does not start another one.
    pub fn handle_frame(&mut self, frame: &PoseFrame) -> FrameOutcome {
        if !self.monitoring {
            return FrameOutcome::default();
        }

        let decision = self.engine.process_frame(frame);
        let mut events = Vec::new();
        if decision.detected {
            let record = self.new_record(
                frame.timestamp_ms,
                decision.confidence,
                FallSource::Detected,
                Some(frame.clone()),
            );
            events.push(MonitorEvent::FallDetected(detected_event(&record)));
            self.history.record(record);

            if let Err(err) = self.countdown.start(frame.timestamp_ms) {
                tracing::debug!(error = %err, "detection logged without a new countdown");
            }
        }

        FrameOutcome {
            decision: Some(decision),
            events,
        }
    }

    /// Apply a countdown tick scheduled under `epoch`.
    ///
    /// Stale epochs and ticks after stop are ignored.
    pub fn handle_tick(&mut self, epoch: u64) -> Vec<MonitorEvent> {
        if !self.monitoring {
            return Vec::new();
        }
        let now = self.clock.now_ms();
        match self.countdown.tick_for(epoch, now) {
            TickOutcome::Ignored => Vec::new(),
            TickOutcome::Remaining(remaining_secs) => vec![MonitorEvent::CountdownTick {
                remaining_secs,
                timestamp_ms: now,
            }],
            TickOutcome::Confirmed(confirmed) => {
                self.history.resolve_latest(FallStatus::AlertSent);
                vec![
                    MonitorEvent::CountdownTick {
                        remaining_secs: 0,
                        timestamp_ms: now,
                    },
                    MonitorEvent::AlertConfirmed(confirmed),
                ]
            }
        }
    }

    /// The subject is fine: cancel the countdown and start over.
    ///
    /// On success the engine is reset (baseline kept), the latest record is
    /// marked cancelled and the countdown is re-armed for the next episode.
    pub fn cancel_fall(&mut self) -> Result<MonitorEvent, SessionError> {
        let cancelled = self.countdown.cancel(self.clock.now_ms())?;
        self.engine.reset();
        self.history.resolve_latest(FallStatus::Cancelled);
        self.countdown.rearm();
        Ok(MonitorEvent::AlertCancelled(cancelled))
    }

    /// Send the alert now instead of waiting out the countdown.
    pub fn confirm_fall(&mut self) -> Result<MonitorEvent, SessionError> {
        let confirmed = self.countdown.confirm_now(self.clock.now_ms())?;
        self.history.resolve_latest(FallStatus::AlertSent);
        Ok(MonitorEvent::AlertConfirmed(confirmed))
    }

    /// Raise an emergency by hand and confirm it immediately.
    ///
    /// Works whether or not monitoring is active. Any running countdown is
    /// superseded.
    pub fn trigger_emergency(&mut self) -> Result<Vec<MonitorEvent>, SessionError> {
        let now = self.clock.now_ms();
        if self.countdown.rearm() {
            tracing::info!("running countdown superseded by manual emergency");
        }
        self.countdown.start(now)?;
        let record = self.new_record(now, MANUAL_CONFIDENCE, FallSource::Manual, None);
        let detected = MonitorEvent::FallDetected(detected_event(&record));
        self.history.record(record);

        let confirmed = self.countdown.confirm_now(now)?;
        self.history.resolve_latest(FallStatus::AlertSent);
        tracing::warn!(timestamp_ms = now, "manual emergency raised");
        Ok(vec![detected, MonitorEvent::AlertConfirmed(confirmed)])
    }

    /// Inject a fall as if the engine had detected one.
    pub fn simulate_fall(&mut self) -> Result<Vec<MonitorEvent>, SessionError> {
        if !self.monitoring {
            return Err(SessionError::NotMonitoring);
        }
        let now = self.clock.now_ms();
        self.countdown.start(now)?;
        let record = self.new_record(now, SIMULATED_CONFIDENCE, FallSource::Simulated, None);
        let detected = MonitorEvent::FallDetected(detected_event(&record));
        self.history.record(record);
        tracing::info!(timestamp_ms = now, "simulated fall injected");
        Ok(vec![detected])
    }

    /// Clear engine state and re-arm the countdown. Idempotent.
    ///
    /// The calibration baseline, the history and the monitoring flag are
    /// kept.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.countdown.rearm();
    }

    /// Location attached to records created from now on.
    pub fn set_location(&mut self, location: Option<Geolocation>) {
        self.location = location;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            monitoring: self.monitoring,
            detection: self.engine.stats(),
            alert_state: self.countdown.state(),
            countdown_remaining_secs: self.countdown.remaining_secs(),
            history: self.history.summary(),
        }
    }

    pub fn history(&self) -> &FallHistory {
        &self.history
    }

    pub fn alert_state(&self) -> AlertState {
        self.countdown.state()
    }

    pub fn is_counting_down(&self) -> bool {
        self.countdown.is_counting_down()
    }

    /// Epoch that ticks for the running countdown must carry.
    pub fn countdown_epoch(&self) -> u64 {
        self.countdown.epoch()
    }

    pub fn engine(&self) -> &FallDecisionEngine {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn new_record(
        &self,
        timestamp_ms: u64,
        confidence: f32,
        source: FallSource,
        skeleton: Option<PoseFrame>,
    ) -> FallEvent {
        let record = FallEvent::new(timestamp_ms, confidence, source, skeleton);
        match self.location {
            Some(location) => record.with_location(location),
            None => record,
        }
    }
}

impl Default for MonitoringSession {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Arc::new(MonotonicClock::new()))
    }
}

fn detected_event(record: &FallEvent) -> FallDetected {
    FallDetected {
        event_id: record.id,
        timestamp_ms: record.timestamp_ms,
        confidence: record.confidence,
        source: record.source,
        skeleton: record.skeleton.clone(),
    }
}
