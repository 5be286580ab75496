/// Production-level stress testing for the fall-monitoring pipeline.
///
/// These tests are designed to expose real-world failure modes that would only
/// appear under extreme, sustained, or pathological conditions.

#[cfg(test)]
mod stress_tests {
    use std::sync::Arc;

    use crate::clock::{ManualClock, MonotonicClock};
    use crate::config::EngineConfig;
    use crate::countdown::{AlertCountdownController, AlertState, TickOutcome};
    use crate::events::FallHistory;
    use crate::fall_decision::FallDecisionEngine;
    use crate::runtime::MonitorService;
    use crate::session::MonitoringSession;
    use crate::types::fixtures::{falling, frame, lying, standing};
    use crate::types::{FallEvent, FallSource, FallStatus, Landmark, PoseFrame};

    /// Deterministic pseudo-random sequence in [0, 1)
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 40) as f32 / (1u64 << 24) as f32
        }
    }

    fn session() -> (MonitoringSession, ManualClock) {
        let clock = ManualClock::new(0);
        let mut session = MonitoringSession::new(EngineConfig::default(), Arc::new(clock.clone()));
        session.start_monitoring();
        (session, clock)
    }

    // ============================================================================
    // CATEGORY 1: EXTREME DURATION & THROUGHPUT
    // ============================================================================

    /// 1000 frames never grow the histories past their capacity
    #[test]
    fn stress_thousand_frames_bounded_buffers() {
        let mut engine = FallDecisionEngine::default();
        for i in 0..1000u64 {
            engine.process_frame(&standing(i * 33));
            let stats = engine.stats();
            assert!(stats.frame_history_len <= 30);
            assert!(stats.velocity_history_len <= 30);
        }
        let stats = engine.stats();
        assert_eq!(stats.frame_history_len, 30);
        assert_eq!(stats.velocity_history_len, 30);
    }

    /// 10 minutes at 30fps of a subject swaying on their feet
    #[test]
    fn stress_ten_minute_marathon_30fps() {
        let (mut session, clock) = session();
        let mut noise = Lcg(7);
        let mut events = 0;

        for i in 0..18_000u64 {
            let t = i * 33;
            clock.set(t);
            let sway = (noise.next() - 0.5) * 0.02;
            let f = frame(t, 0.2 + sway, 0.5 + sway, 0.9, 0.5 + sway, 0.9);
            events += session.handle_frame(&f).events.len();
        }

        assert_eq!(events, 0);
        let stats = session.stats();
        assert!(stats.detection.calibrated);
        assert!(!stats.detection.episode_active);
        assert_eq!(stats.alert_state, AlertState::Idle);
    }

    /// Hundreds of stumbles that recover inside the suppression window
    #[test]
    fn stress_repeated_stumbles_never_alert() {
        let (mut session, clock) = session();
        let mut t = 0;
        let mut detections = 0;

        for _ in 0..300 {
            let mut frames = vec![standing(t), standing(t + 500), falling(t + 1000)];
            frames.extend((1..=8).map(|i| lying(t + 1000 + i * 100)));
            frames.push(standing(t + 1900));
            for f in &frames {
                clock.set(f.timestamp_ms);
                detections += session.handle_frame(f).events.len();
            }
            assert!(session.engine().episode_start().is_none());
            t += 3000;
        }

        assert_eq!(detections, 0);
        assert!(session.history().is_empty());
    }

    /// Real falls back to back, each cancelled, never exceed history capacity
    #[test]
    fn stress_many_cancelled_falls_bounded_history() {
        let (mut session, clock) = session();
        let mut t = 0;

        for round in 0..120 {
            let mut frames = vec![standing(t), standing(t + 1000), falling(t + 1500)];
            frames.extend((1..=25).map(|i| lying(t + 1500 + i * 100)));
            let mut detected = 0;
            for f in &frames {
                clock.set(f.timestamp_ms);
                detected += session.handle_frame(f).events.len();
            }
            assert_eq!(detected, 1, "round {} should detect once", round);
            session.cancel_fall().unwrap();
            t += 10_000;
        }

        assert_eq!(session.history().len(), 50);
        assert!(session
            .history()
            .entries()
            .iter()
            .all(|e| e.status == FallStatus::Cancelled));
    }

    // ============================================================================
    // CATEGORY 2: PATHOLOGICAL INPUT
    // ============================================================================

    /// Random visibility and jittery geometry: confidence stays in range
    #[test]
    fn stress_noisy_stream_confidence_in_range() {
        let mut engine = FallDecisionEngine::default();
        let mut noise = Lcg(42);

        for i in 0..5000u64 {
            let f = frame(
                i * 33,
                noise.next(),
                noise.next(),
                noise.next(),
                noise.next(),
                noise.next(),
            );
            let decision = engine.process_frame(&f);
            assert!((0.0..=100.0).contains(&decision.confidence));
            assert!(engine.stats().frame_history_len <= 30);
        }
    }

    /// Empty, truncated and NaN-filled frames degrade to "no decision"
    #[test]
    fn stress_malformed_frames_do_not_panic() {
        let mut engine = FallDecisionEngine::default();
        engine.process_frame(&standing(0));
        engine.process_frame(&standing(100));

        let nan = Landmark::new(f32::NAN, f32::NAN, f32::NAN, 0.9);
        let malformed = [
            PoseFrame::new(200, Vec::new()),
            PoseFrame::new(300, vec![Landmark::new(0.5, 0.5, 0.0, 1.0); 5]),
            PoseFrame::new(400, vec![nan; 33]),
            frame(500, f32::NAN, 0.9, 0.9, 0.5, 0.95),
            frame(600, 0.8, 0.85, 0.9, f32::INFINITY, 0.95),
        ];
        for f in &malformed {
            let decision = engine.process_frame(f);
            assert!(!decision.detected);
            assert!((0.0..=100.0).contains(&decision.confidence));
        }
    }

    /// Timestamps that run backwards never produce negative or infinite speed
    #[test]
    fn stress_backwards_timestamps() {
        let mut engine = FallDecisionEngine::default();
        engine.process_frame(&standing(10_000));
        for i in 0..200u64 {
            let t = 10_000 - i * 40;
            let f = if i % 2 == 0 { standing(t) } else { lying(t) };
            let decision = engine.process_frame(&f);
            if let Some(v) = decision.velocities {
                assert!(v.nose_velocity.is_finite() && v.nose_velocity >= 0.0);
                assert!(v.hip_velocity.is_finite() && v.hip_velocity >= 0.0);
            }
            assert!(!decision.detected);
        }
    }

    // ============================================================================
    // CATEGORY 3: COUNTDOWN CHURN
    // ============================================================================

    /// Arm/cancel churn never confirms and never reuses an epoch
    #[test]
    fn stress_countdown_arm_cancel_churn() {
        let mut countdown = AlertCountdownController::default();
        let mut last_epoch = 0;
        let mut stale = Vec::new();

        for i in 0..1000u64 {
            let epoch = countdown.start(i * 10_000).unwrap();
            assert!(epoch > last_epoch);
            last_epoch = epoch;
            for tick in 1..=(i % 9) {
                assert!(matches!(
                    countdown.tick_for(epoch, i * 10_000 + tick * 1000),
                    TickOutcome::Remaining(_)
                ));
            }
            countdown.cancel(i * 10_000 + 9500).unwrap();
            stale.push(epoch);
            countdown.rearm();
        }

        for epoch in stale {
            assert_eq!(countdown.tick_for(epoch, u64::MAX), TickOutcome::Ignored);
        }
        assert_eq!(countdown.state(), AlertState::Idle);
    }

    #[test]
    fn stress_history_eviction() {
        let mut history = FallHistory::new(50);
        for i in 0..10_000u64 {
            history.record(FallEvent::new(i, 95.0, FallSource::Simulated, None));
        }
        let entries = history.entries();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].timestamp_ms, 9_999);
        assert_eq!(entries[49].timestamp_ms, 9_950);
    }

    // ============================================================================
    // CATEGORY 4: RUNTIME BACKPRESSURE
    // ============================================================================

    /// Flood the mailbox well past its capacity
    #[tokio::test(start_paused = true)]
    async fn stress_runtime_frame_flood() {
        let session = MonitoringSession::new(EngineConfig::default(), Arc::new(MonotonicClock::new()));
        let service = MonitorService::spawn(session);
        let handle = service.handle();
        handle.start().await.unwrap();

        for i in 0..5000u64 {
            handle.push_frame(standing(i * 33)).await.unwrap();
        }
        let history = handle.history().await.unwrap();
        assert!(history.is_empty());

        let stats = handle.stats();
        assert!(stats.detection.calibrated);
        assert_eq!(stats.detection.frame_history_len, 30);

        service.shutdown().await;
    }
}
