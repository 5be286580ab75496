//! Alert countdown state machine.
//!
//! After a fall is detected the subject gets a fixed number of seconds to say
//! they are fine before the caregiver alert goes out.
//!
//! ```text
//!   Idle --start--> CountingDown --tick x N--> Confirmed
//!                        |    \--confirm_now--> Confirmed
//!                        \--cancel--> Cancelled
//!   Cancelled / Confirmed --rearm--> Idle
//! ```
//!
//! Terminal states stay put until the owner re-arms for a new episode. Every
//! transition out of CountingDown bumps the epoch; ticks scheduled under an
//! older epoch are ignored, so a tick queued before a cancellation can never
//! confirm afterwards.

use serde::{Deserialize, Serialize};

use crate::error::CountdownError;
use crate::events::{AlertCancelled, AlertConfirmed};

/// Countdown timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Seconds from detection to confirmed alert.
    pub duration_secs: u32,
    /// Real-time spacing of ticks. One tick removes one second.
    pub tick_interval_ms: u64,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertState {
    Idle,
    CountingDown,
    Cancelled,
    Confirmed,
}

impl AlertState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertState::Cancelled | AlertState::Confirmed)
    }
}

/// Result of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not counting down, or the tick belongs to an earlier epoch.
    Ignored,
    Remaining(u32),
    Confirmed(AlertConfirmed),
}

/// Cancellable countdown from detection to caregiver alert.
#[derive(Debug, Clone)]
pub struct AlertCountdownController {
    config: CountdownConfig,
    state: AlertState,
    remaining: u32,
    epoch: u64,
    started_at_ms: Option<u64>,
}

impl AlertCountdownController {
    pub fn new(config: CountdownConfig) -> Self {
        let remaining = config.duration_secs;
        Self {
            config,
            state: AlertState::Idle,
            remaining,
            epoch: 0,
            started_at_ms: None,
        }
    }

    /// Begin counting down. Only valid from Idle.
    ///
    /// Returns the epoch that ticks for this countdown must carry.
    pub fn start(&mut self, now_ms: u64) -> Result<u64, CountdownError> {
        if self.state != AlertState::Idle {
            tracing::debug!(state = ?self.state, "countdown start rejected");
            return Err(CountdownError::AlreadyActive(self.state));
        }
        self.epoch += 1;
        self.state = AlertState::CountingDown;
        self.remaining = self.config.duration_secs;
        self.started_at_ms = Some(now_ms);
        tracing::info!(
            epoch = self.epoch,
            duration_secs = self.remaining,
            "alert countdown started"
        );
        Ok(self.epoch)
    }

    /// Remove one second. Reaching zero confirms the alert, exactly once.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if self.state != AlertState::CountingDown {
            return TickOutcome::Ignored;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.finish_confirmed();
            tracing::warn!(epoch = self.epoch, "alert countdown expired, alert confirmed");
            TickOutcome::Confirmed(AlertConfirmed { timestamp_ms: now_ms })
        } else {
            TickOutcome::Remaining(self.remaining)
        }
    }

    /// [`AlertCountdownController::tick`], but only if `epoch` is current.
    pub fn tick_for(&mut self, epoch: u64, now_ms: u64) -> TickOutcome {
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "stale countdown tick dropped");
            return TickOutcome::Ignored;
        }
        self.tick(now_ms)
    }

    /// Stop the countdown because the subject is fine.
    pub fn cancel(&mut self, now_ms: u64) -> Result<AlertCancelled, CountdownError> {
        if self.state != AlertState::CountingDown {
            return Err(CountdownError::NotCountingDown(self.state));
        }
        self.epoch += 1;
        self.state = AlertState::Cancelled;
        self.remaining = self.config.duration_secs;
        self.started_at_ms = None;
        tracing::info!(epoch = self.epoch, "alert countdown cancelled");
        Ok(AlertCancelled { timestamp_ms: now_ms })
    }

    /// Confirm immediately, skipping the remaining seconds.
    pub fn confirm_now(&mut self, now_ms: u64) -> Result<AlertConfirmed, CountdownError> {
        if self.state != AlertState::CountingDown {
            return Err(CountdownError::NotCountingDown(self.state));
        }
        self.finish_confirmed();
        tracing::warn!(epoch = self.epoch, "alert confirmed before countdown expired");
        Ok(AlertConfirmed { timestamp_ms: now_ms })
    }

    /// Return to Idle with a full countdown, ready for the next episode.
    ///
    /// A running countdown is dropped silently. Returns true if one was.
    pub fn rearm(&mut self) -> bool {
        let halted = self.state == AlertState::CountingDown;
        if self.state != AlertState::Idle {
            self.epoch += 1;
        }
        self.state = AlertState::Idle;
        self.remaining = self.config.duration_secs;
        self.started_at_ms = None;
        if halted {
            tracing::info!(epoch = self.epoch, "running countdown halted");
        }
        halted
    }

    fn finish_confirmed(&mut self) {
        self.epoch += 1;
        self.state = AlertState::Confirmed;
        self.remaining = 0;
        self.started_at_ms = None;
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_counting_down(&self) -> bool {
        self.state == AlertState::CountingDown
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    pub fn config(&self) -> &CountdownConfig {
        &self.config
    }
}

impl Default for AlertCountdownController {
    fn default() -> Self {
        Self::new(CountdownConfig::default())
    }
}
