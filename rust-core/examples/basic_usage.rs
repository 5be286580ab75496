/// Basic usage example: feed pose frames, watch a fall become an alert
use std::sync::Arc;

use fall_sensing::{
    EngineConfig, Keypoint, Landmark, ManualClock, MonitorEvent, MonitoringSession, PoseFrame,
};

fn main() {
    println!("=== Fall Sensing Engine: Basic Example ===\n");

    // Session on a manual clock so the example runs instantly
    let clock = ManualClock::new(0);
    let mut session = MonitoringSession::new(EngineConfig::default(), Arc::new(clock.clone()));
    session.start_monitoring();

    // (timestamp, nose y, hip y): y grows downward, ankles stay at 0.9
    let mut motion = vec![
        // Standing: first frame calibrates the baseline height (0.7)
        (0, 0.20, 0.50),
        (500, 0.20, 0.50),
        (1000, 0.21, 0.50),
        // Fall: hips drop 0.25 in half a second
        (1250, 0.50, 0.62),
        (1500, 0.80, 0.75),
    ];
    // On the floor for three seconds
    motion.extend((1..=30).map(|i| (1500 + i * 100, 0.80, 0.85)));

    println!("Processing {} frames...\n", motion.len());

    for (timestamp, nose_y, hip_y) in motion {
        clock.set(timestamp);
        let frame = pose(timestamp, nose_y, hip_y);
        let outcome = session.handle_frame(&frame);

        if let Some(decision) = outcome.decision {
            if decision.confidence > 0.0 {
                println!(
                    "t={:>5}ms on_ground={} confidence={:.1}",
                    timestamp, decision.on_ground, decision.confidence
                );
            }
        }
        for event in &outcome.events {
            print_event(event);
        }
    }

    // Nobody cancels: let the countdown run out
    println!("\nCountdown running...");
    let epoch = session.countdown_epoch();
    while session.is_counting_down() {
        clock.advance(1000);
        for event in session.handle_tick(epoch) {
            print_event(&event);
        }
    }

    println!("\n=== Summary ===");
    let stats = session.stats();
    println!("Alert state: {:?}", stats.alert_state);
    println!("Falls recorded: {}", stats.history.total);
    println!("Alerts sent: {}", stats.history.alerts_sent);
    if let Some(record) = session.history().latest() {
        println!("\n{}", fall_sensing::AlertMessage::from_event(record));
    }
}

fn pose(timestamp_ms: u64, nose_y: f32, hip_y: f32) -> PoseFrame {
    let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 0.9); 33];
    landmarks[Keypoint::Nose.index()].y = nose_y;
    landmarks[Keypoint::LeftHip.index()].y = hip_y;
    landmarks[Keypoint::RightHip.index()].y = hip_y;
    landmarks[Keypoint::LeftAnkle.index()].y = 0.9;
    landmarks[Keypoint::RightAnkle.index()].y = 0.9;
    PoseFrame::new(timestamp_ms, landmarks)
}

fn print_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::FallDetected(d) => {
            println!("\n--- FALL DETECTED ---");
            println!("Timestamp: {}ms", d.timestamp_ms);
            println!("Confidence: {:.1}", d.confidence);
            println!("Source: {:?}", d.source);
        }
        MonitorEvent::CountdownTick { remaining_secs, .. } => {
            println!("  alert in {}s", remaining_secs)
        }
        MonitorEvent::AlertConfirmed(c) => println!("\n--- ALERT CONFIRMED at {}ms ---", c.timestamp_ms),
        MonitorEvent::AlertCancelled(c) => println!("\n--- alert cancelled at {}ms ---", c.timestamp_ms),
    }
}
