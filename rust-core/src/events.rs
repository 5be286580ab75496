//! Emitted events and the fall history log.
//!
//! Events are plain values returned from each processing step. The owner
//! decides where they go; nothing here holds a callback.

use serde::{Deserialize, Serialize};

use crate::ring_buffer::RingBuffer;
use crate::types::{FallEvent, FallEventId, FallSource, FallStatus, PoseFrame};

/// A fall was detected, simulated or manually raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallDetected {
    pub event_id: FallEventId,
    pub timestamp_ms: u64,
    pub confidence: f32,
    pub source: FallSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skeleton: Option<PoseFrame>,
}

/// The countdown ran out, or the alert was confirmed by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfirmed {
    pub timestamp_ms: u64,
}

/// The subject cancelled the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCancelled {
    pub timestamp_ms: u64,
}

/// Everything a notifier or UI collaborator can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    FallDetected(FallDetected),
    /// One second elapsed; `remaining_secs` is what the countdown shows now.
    CountdownTick { remaining_secs: u32, timestamp_ms: u64 },
    AlertConfirmed(AlertConfirmed),
    AlertCancelled(AlertCancelled),
}

impl MonitorEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            MonitorEvent::FallDetected(e) => e.timestamp_ms,
            MonitorEvent::CountdownTick { timestamp_ms, .. } => *timestamp_ms,
            MonitorEvent::AlertConfirmed(e) => e.timestamp_ms,
            MonitorEvent::AlertCancelled(e) => e.timestamp_ms,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::FallDetected(_) => "fall_detected",
            MonitorEvent::CountdownTick { .. } => "countdown_tick",
            MonitorEvent::AlertConfirmed(_) => "alert_confirmed",
            MonitorEvent::AlertCancelled(_) => "alert_cancelled",
        }
    }
}

/// Bounded, newest-first log of fall records.
#[derive(Debug, Clone)]
pub struct FallHistory {
    entries: RingBuffer<FallEvent>,
}

impl FallHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RingBuffer::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, event: FallEvent) {
        self.entries.push(event);
    }

    /// The most recent record.
    pub fn latest(&self) -> Option<&FallEvent> {
        self.entries.latest()
    }

    /// Move the most recent record out of `Detected`.
    ///
    /// Records already cancelled or alerted are left alone. Returns the
    /// updated record.
    pub fn resolve_latest(&mut self, status: FallStatus) -> Option<FallEvent> {
        let latest = self.entries.latest_mut()?;
        if latest.status != FallStatus::Detected {
            return None;
        }
        latest.status = status;
        Some(latest.clone())
    }

    /// Records newest first.
    pub fn entries(&self) -> Vec<FallEvent> {
        let mut all: Vec<FallEvent> = self.entries.iter().cloned().collect();
        all.reverse();
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts by outcome over the retained records.
    pub fn summary(&self) -> HistorySummary {
        let mut summary = HistorySummary {
            total: self.entries.len(),
            ..HistorySummary::default()
        };
        for entry in self.entries.iter() {
            match entry.status {
                FallStatus::Detected => summary.pending += 1,
                FallStatus::Cancelled => summary.cancelled += 1,
                FallStatus::AlertSent => summary.alerts_sent += 1,
            }
        }
        summary
    }
}

/// Fall record counts for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total: usize,
    pub alerts_sent: usize,
    pub cancelled: usize,
    /// Still `Detected`: counting down, or stopped before an outcome.
    pub pending: usize,
}

impl Default for FallHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

/// Plain-text caregiver message for a confirmed fall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage(String);

impl AlertMessage {
    pub fn from_event(event: &FallEvent) -> Self {
        let mut text = String::from("FALL ALERT\n\nA fall has been detected.\n\n");
        text.push_str(&format!("Time: {} ms\n", event.timestamp_ms));
        text.push_str(&format!("Confidence: {:.0}%\n", event.confidence));
        match event.source {
            FallSource::Manual => text.push_str("Raised manually by the user.\n"),
            FallSource::Simulated => text.push_str("Simulated fall (demo mode).\n"),
            FallSource::Detected => {}
        }
        if let Some(loc) = event.location {
            text.push_str(&format!(
                "\nLocation: https://maps.google.com/?q={:.4},{:.4}\n",
                loc.latitude, loc.longitude
            ));
        }
        text.push_str("\nPlease check on them immediately.");
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AlertMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
