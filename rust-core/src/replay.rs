//! Offline replay of recorded pose streams.
//!
//! Recordings are JSON lines, one [`PoseFrame`] per line. Replay drives a
//! [`MonitoringSession`] with a [`ManualClock`] that follows the frame
//! timestamps, delivering countdown ticks and the post-alert re-arm at the
//! instants they would have fired live. Output is deterministic for a given
//! recording and config.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::countdown::AlertState;
use crate::error::ReplayError;
use crate::events::MonitorEvent;
use crate::session::{MonitoringSession, SessionStats};
use crate::types::{FallEvent, Keypoint, Landmark, PoseFrame, POSE_LANDMARK_COUNT};

/// Parse JSON-lines frames. Blank lines are skipped; line numbers in errors
/// are 1-based.
pub fn read_frames(reader: impl BufRead) -> Result<Vec<PoseFrame>, ReplayError> {
    let mut frames = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame = serde_json::from_str(&line).map_err(|source| ReplayError::Json {
            line: index + 1,
            source,
        })?;
        frames.push(frame);
    }
    Ok(frames)
}

pub fn load_frames(path: impl AsRef<Path>) -> Result<Vec<PoseFrame>, ReplayError> {
    let file = File::open(path.as_ref())?;
    read_frames(BufReader::new(file))
}

pub fn write_frames<'a>(
    mut writer: impl Write,
    frames: impl IntoIterator<Item = &'a PoseFrame>,
) -> Result<(), ReplayError> {
    for (index, frame) in frames.into_iter().enumerate() {
        let line = serde_json::to_string(frame).map_err(|source| ReplayError::Json {
            line: index + 1,
            source,
        })?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

/// What a replay produced.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub events: Vec<MonitorEvent>,
    pub frames_processed: usize,
    pub stats: SessionStats,
    /// Fall records, newest first.
    pub history: Vec<FallEvent>,
}

/// Feeds frames and virtual ticks into a session.
pub struct Replayer {
    session: MonitoringSession,
    clock: ManualClock,
    /// Epoch and due time of the next countdown tick.
    next_tick: Option<(u64, u64)>,
    /// Epoch and due time of the re-arm after a confirmed alert.
    rearm: Option<(u64, u64)>,
    events: Vec<MonitorEvent>,
    frames_processed: usize,
}

impl Replayer {
    /// A replayer with monitoring already started.
    pub fn new(config: EngineConfig) -> Self {
        let clock = ManualClock::new(0);
        let mut session = MonitoringSession::new(config, Arc::new(clock.clone()));
        session.start_monitoring();
        Self {
            session,
            clock,
            next_tick: None,
            rearm: None,
            events: Vec::new(),
            frames_processed: 0,
        }
    }

    pub fn push_frame(&mut self, frame: &PoseFrame) {
        self.advance_to(frame.timestamp_ms);
        let outcome = self.session.handle_frame(frame);
        self.events.extend(outcome.events);
        self.frames_processed += 1;
        self.sync_timers();
    }

    /// Deliver every tick and re-arm due up to and including `now_ms`, in
    /// time order. A tick wins a tie.
    pub fn advance_to(&mut self, now_ms: u64) {
        loop {
            let tick = self.next_tick.filter(|(_, due)| *due <= now_ms);
            let rearm = self.rearm.filter(|(_, due)| *due <= now_ms);
            match (tick, rearm) {
                (None, None) => break,
                (Some((_, tick_due)), Some((epoch, due))) if due < tick_due => {
                    self.fire_rearm(epoch, due)
                }
                (Some((epoch, due)), _) => self.fire_tick(epoch, due),
                (None, Some((epoch, due))) => self.fire_rearm(epoch, due),
            }
        }
        self.clock.set(now_ms);
    }

    /// Run the clock forward until any countdown in progress has finished
    /// and, if it confirmed, the session has re-armed.
    pub fn drain(&mut self) {
        let config = self.session.config();
        let countdown = &config.countdown;
        let span = countdown.tick_interval_ms * u64::from(countdown.duration_secs)
            + config.session.post_alert_reset_ms;
        let until = self.clock.now_ms() + span;
        self.advance_to(until);
    }

    pub fn session(&self) -> &MonitoringSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut MonitoringSession {
        &mut self.session
    }

    pub fn finish(mut self) -> ReplayReport {
        self.drain();
        ReplayReport {
            stats: self.session.stats(),
            history: self.session.history().entries(),
            events: self.events,
            frames_processed: self.frames_processed,
        }
    }

    fn tick_interval_ms(&self) -> u64 {
        self.session.config().countdown.tick_interval_ms.max(1)
    }

    fn fire_tick(&mut self, epoch: u64, due: u64) {
        self.clock.set(due);
        self.events.extend(self.session.handle_tick(epoch));
        self.next_tick = Some((epoch, due + self.tick_interval_ms()));
        self.sync_timers();
    }

    fn fire_rearm(&mut self, epoch: u64, due: u64) {
        self.clock.set(due);
        self.rearm = None;
        if self.session.alert_state() == AlertState::Confirmed
            && self.session.countdown_epoch() == epoch
        {
            tracing::debug!(at_ms = due, "re-arming after confirmed alert");
            self.session.reset();
        }
        self.sync_timers();
    }

    /// Keep the pending tick and re-arm in line with the countdown.
    fn sync_timers(&mut self) {
        let epoch = self.session.countdown_epoch();
        let now = self.clock.now_ms();

        if !self.session.is_counting_down() {
            self.next_tick = None;
        } else if self.next_tick.map(|(e, _)| e) != Some(epoch) {
            self.next_tick = Some((epoch, now + self.tick_interval_ms()));
        }

        if self.session.alert_state() != AlertState::Confirmed {
            self.rearm = None;
        } else if self.rearm.map(|(e, _)| e) != Some(epoch) {
            let delay = self.session.config().session.post_alert_reset_ms;
            self.rearm = Some((epoch, now + delay));
        }
    }
}

/// Replay `frames` through a fresh session and let any countdown run out.
pub fn replay(config: EngineConfig, frames: &[PoseFrame]) -> ReplayReport {
    let mut replayer = Replayer::new(config);
    for frame in frames {
        replayer.push_frame(frame);
    }
    let report = replayer.finish();
    tracing::info!(
        frames = report.frames_processed,
        events = report.events.len(),
        "replay finished"
    );
    report
}

/// A synthetic recording at `fps`: two seconds standing, a half-second
/// fall, then `lying_secs` on the floor.
pub fn synthetic_fall(fps: u32, lying_secs: u32) -> Vec<PoseFrame> {
    let step_ms = 1000 / u64::from(fps.max(1));
    let standing_end = 2000;
    let fall_end = standing_end + 500;
    let end = fall_end + u64::from(lying_secs) * 1000;

    let mut frames = Vec::new();
    let mut t = 0;
    while t <= end {
        // 0 while upright, 1 once on the floor
        let progress = if t <= standing_end {
            0.0
        } else {
            ((t - standing_end) as f32 / (fall_end - standing_end) as f32).min(1.0)
        };
        let nose_y = 0.2 + 0.6 * progress;
        let hip_y = 0.5 + 0.35 * progress;
        frames.push(synthetic_frame(t, nose_y, hip_y, 0.9));
        t += step_ms;
    }
    frames
}

fn synthetic_frame(timestamp_ms: u64, nose_y: f32, hip_y: f32, ankle_y: f32) -> PoseFrame {
    let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 0.9); POSE_LANDMARK_COUNT];
    landmarks[Keypoint::Nose.index()].y = nose_y;
    for hip in [Keypoint::LeftHip, Keypoint::RightHip] {
        landmarks[hip.index()].y = hip_y;
    }
    for ankle in [Keypoint::LeftAnkle, Keypoint::RightAnkle] {
        landmarks[ankle.index()].y = ankle_y;
    }
    PoseFrame::new(timestamp_ms, landmarks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::standing;
    use crate::types::FallStatus;

    fn kinds(events: &[MonitorEvent]) -> Vec<&'static str> {
        events.iter().map(MonitorEvent::event_type).collect()
    }

    #[test]
    fn test_synthetic_fall_replays_to_alert() {
        let frames = synthetic_fall(30, 15);
        let report = replay(EngineConfig::default(), &frames);

        let kinds = kinds(&report.events);
        assert_eq!(kinds.iter().filter(|k| **k == "fall_detected").count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == "countdown_tick").count(), 10);
        assert_eq!(kinds.last(), Some(&"alert_confirmed"));
        assert_eq!(report.frames_processed, frames.len());
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.history[0].status, FallStatus::AlertSent);
        // Re-armed during the drain after the alert
        assert_eq!(report.stats.alert_state, AlertState::Idle);
    }

    #[test]
    fn test_second_fall_after_alert_gets_its_own_countdown() {
        let first = synthetic_fall(30, 15);
        let mut t = first.last().map_or(0, |f| f.timestamp_ms);
        let mut frames = first.clone();
        // A minute back on their feet, then the same fall again
        for _ in 0..1800 {
            t += 33;
            frames.push(standing(t));
        }
        let offset = t + 33;
        frames.extend(first.iter().map(|f| {
            let mut f = f.clone();
            f.timestamp_ms += offset;
            f
        }));

        let report = replay(EngineConfig::default(), &frames);
        let kinds = kinds(&report.events);
        assert_eq!(kinds.iter().filter(|k| **k == "fall_detected").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "countdown_tick").count(), 20);
        assert_eq!(kinds.iter().filter(|k| **k == "alert_confirmed").count(), 2);
        assert_eq!(report.history.len(), 2);
        assert!(report
            .history
            .iter()
            .all(|e| e.status == FallStatus::AlertSent));
    }

    #[test]
    fn test_ticks_follow_frame_time() {
        let frames = synthetic_fall(10, 5);
        let report = replay(EngineConfig::default(), &frames);

        let detected_at = report
            .events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::FallDetected(d) => Some(d.timestamp_ms),
                _ => None,
            })
            .unwrap();
        let confirmed_at = report
            .events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::AlertConfirmed(c) => Some(c.timestamp_ms),
                _ => None,
            })
            .unwrap();
        assert_eq!(confirmed_at - detected_at, 10_000);
    }

    #[test]
    fn test_quiet_recording_emits_nothing() {
        let frames: Vec<_> = (0..100).map(|i| standing(i * 33)).collect();
        let report = replay(EngineConfig::default(), &frames);
        assert!(report.events.is_empty());
        assert!(report.stats.detection.calibrated);
    }

    #[test]
    fn test_json_lines_round_trip_through_file() {
        let frames = synthetic_fall(5, 1);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_frames(&mut file, &frames).unwrap();
        writeln!(file).unwrap();

        let loaded = load_frames(file.path()).unwrap();
        assert_eq!(loaded, frames);
    }

    #[test]
    fn test_bad_line_reports_its_number() {
        let text = format!(
            "{}\n\nnot json\n",
            serde_json::to_string(&standing(0)).unwrap()
        );
        match read_frames(text.as_bytes()) {
            Err(ReplayError::Json { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a JSON error, got {:?}", other),
        }
    }
}
