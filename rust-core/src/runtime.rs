//! Async runtime for a monitoring session.
//!
//! One tokio task owns the [`MonitoringSession`] and drains a bounded
//! command mailbox one message at a time, so frames, countdown ticks and
//! lifecycle calls never interleave. Ticks come from a [`TickScheduler`]
//! task that posts into the same mailbox; each carries the countdown epoch
//! it was scheduled for and the session drops stale ones.
//!
//! Events go out on a broadcast channel. Confirmed alerts are additionally
//! handed to each registered [`Notifier`] on its own task, so a slow or
//! failing notifier never holds up the mailbox.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::countdown::AlertState;
use crate::error::{Result, RuntimeError, SessionError};
use crate::events::{AlertMessage, MonitorEvent};
use crate::session::{MonitoringSession, SessionStats};
use crate::types::{FallEvent, Geolocation, PoseFrame};

const MAILBOX_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;
const ALERT_CAPACITY: usize = 16;

/// Messages processed by the session task.
pub enum Command {
    Frame(PoseFrame),
    Tick { epoch: u64 },
    Start,
    Stop,
    Reset,
    SetLocation(Option<Geolocation>),
    CancelFall(oneshot::Sender<std::result::Result<(), SessionError>>),
    ConfirmFall(oneshot::Sender<std::result::Result<(), SessionError>>),
    TriggerEmergency(oneshot::Sender<std::result::Result<(), SessionError>>),
    SimulateFall(oneshot::Sender<std::result::Result<(), SessionError>>),
    History(oneshot::Sender<Vec<FallEvent>>),
    /// Re-arm after a confirmed alert, if still on the same countdown.
    PostAlertReset { epoch: u64 },
    Shutdown,
}

/// Handle to a scheduled tick task. Dropping it stops the ticks.
#[derive(Debug)]
pub struct TickHandle {
    epoch: u64,
    task: JoinHandle<()>,
}

impl TickHandle {
    pub fn new(epoch: u64, task: JoinHandle<()>) -> Self {
        Self { epoch, task }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Stop the ticks. No tick is posted after this returns; any already
    /// queued carries a stale epoch once the countdown has moved on.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Source of periodic countdown ticks.
pub trait TickScheduler: Send + Sync {
    /// Post `Command::Tick { epoch }` to `mailbox` every `period`, starting
    /// one period from now.
    fn schedule(&self, period: Duration, epoch: u64, mailbox: mpsc::Sender<Command>) -> TickHandle;
}

/// Ticks driven by `tokio::time::interval`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTickScheduler;

impl TickScheduler for TokioTickScheduler {
    fn schedule(&self, period: Duration, epoch: u64, mailbox: mpsc::Sender<Command>) -> TickHandle {
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if mailbox.send(Command::Tick { epoch }).await.is_err() {
                    break;
                }
            }
        });
        TickHandle::new(epoch, task)
    }
}

/// Receives confirmed alerts.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &FallEvent, message: &AlertMessage) -> anyhow::Result<()>;
}

/// Notifier that writes the alert to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &FallEvent, message: &AlertMessage) -> anyhow::Result<()> {
        tracing::warn!(
            event_id = %alert.id,
            source = ?alert.source,
            confidence = alert.confidence,
            message = %message,
            "caregiver alert"
        );
        Ok(())
    }
}

pub struct MonitorServiceBuilder {
    session: MonitoringSession,
    scheduler: Arc<dyn TickScheduler>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MonitorServiceBuilder {
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TickScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Spawn the session task and one task per notifier. Must be called
    /// from within a tokio runtime.
    pub fn spawn(self) -> MonitorService {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (alerts, _) = broadcast::channel(ALERT_CAPACITY);
        let snapshot = Arc::new(RwLock::new(self.session.stats()));

        let notifier_tasks = self
            .notifiers
            .into_iter()
            .map(|notifier| tokio::spawn(run_notifier(notifier, alerts.subscribe())))
            .collect();

        let worker = Worker {
            session: self.session,
            scheduler: self.scheduler,
            mailbox: tx.downgrade(),
            ticker: None,
            post_alert: None,
            events: events.clone(),
            alerts,
            snapshot: Arc::clone(&snapshot),
        };
        let task = tokio::spawn(worker.run(rx));

        MonitorService {
            handle: MonitorHandle {
                tx,
                events,
                snapshot,
            },
            task,
            notifier_tasks,
        }
    }
}

/// A running session task.
pub struct MonitorService {
    handle: MonitorHandle,
    task: JoinHandle<()>,
    notifier_tasks: Vec<JoinHandle<()>>,
}

impl MonitorService {
    pub fn builder(session: MonitoringSession) -> MonitorServiceBuilder {
        MonitorServiceBuilder {
            session,
            scheduler: Arc::new(TokioTickScheduler),
            notifiers: Vec::new(),
        }
    }

    /// Spawn with tokio ticks and no notifiers.
    pub fn spawn(session: MonitoringSession) -> Self {
        Self::builder(session).spawn()
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Stop the session task and wait for it to finish. Notifier tasks end
    /// once they have drained alerts already sent.
    pub async fn shutdown(self) {
        // Already closed is fine; the task is finishing either way.
        let _ = self.handle.shutdown().await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "monitor task ended abnormally");
        }
        for task in self.notifier_tasks {
            let _ = task.await;
        }
    }
}

/// Cheap, clonable client of a [`MonitorService`].
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<MonitorEvent>,
    snapshot: Arc<RwLock<SessionStats>>,
}

impl MonitorHandle {
    /// Queue a frame, waiting for mailbox space if needed.
    pub async fn push_frame(&self, frame: PoseFrame) -> std::result::Result<(), RuntimeError> {
        self.send(Command::Frame(frame)).await
    }

    /// Queue a frame without waiting. Returns false if the mailbox is full
    /// and the frame was dropped.
    pub fn try_push_frame(&self, frame: PoseFrame) -> std::result::Result<bool, RuntimeError> {
        match self.tx.try_send(Command::Frame(frame)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("mailbox full, frame dropped");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RuntimeError::Closed),
        }
    }

    pub async fn start(&self) -> std::result::Result<(), RuntimeError> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> std::result::Result<(), RuntimeError> {
        self.send(Command::Stop).await
    }

    pub async fn reset(&self) -> std::result::Result<(), RuntimeError> {
        self.send(Command::Reset).await
    }

    pub async fn set_location(
        &self,
        location: Option<Geolocation>,
    ) -> std::result::Result<(), RuntimeError> {
        self.send(Command::SetLocation(location)).await
    }

    pub async fn cancel_fall(&self) -> Result<()> {
        Ok(self.request(Command::CancelFall).await??)
    }

    pub async fn confirm_fall(&self) -> Result<()> {
        Ok(self.request(Command::ConfirmFall).await??)
    }

    pub async fn trigger_emergency(&self) -> Result<()> {
        Ok(self.request(Command::TriggerEmergency).await??)
    }

    pub async fn simulate_fall(&self) -> Result<()> {
        Ok(self.request(Command::SimulateFall).await??)
    }

    /// Fall records, newest first.
    pub async fn history(&self) -> std::result::Result<Vec<FallEvent>, RuntimeError> {
        self.request(Command::History).await
    }

    /// Session stats as of the last processed command.
    pub fn stats(&self) -> SessionStats {
        *self.snapshot.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) -> std::result::Result<(), RuntimeError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> std::result::Result<(), RuntimeError> {
        self.tx.send(command).await.map_err(|_| RuntimeError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> std::result::Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }
}

struct Worker {
    session: MonitoringSession,
    scheduler: Arc<dyn TickScheduler>,
    /// Weak so that dropping every handle closes the mailbox.
    mailbox: mpsc::WeakSender<Command>,
    ticker: Option<TickHandle>,
    post_alert: Option<(u64, JoinHandle<()>)>,
    events: broadcast::Sender<MonitorEvent>,
    alerts: broadcast::Sender<FallEvent>,
    snapshot: Arc<RwLock<SessionStats>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::info!("monitor service started");
        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
            self.sync_timers();
            *self.snapshot.write() = self.session.stats();
        }
        self.ticker = None;
        if let Some((_, task)) = self.post_alert.take() {
            task.abort();
        }
        tracing::info!("monitor service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Frame(frame) => {
                let outcome = self.session.handle_frame(&frame);
                self.publish(outcome.events);
            }
            Command::Tick { epoch } => {
                let events = self.session.handle_tick(epoch);
                self.publish(events);
            }
            Command::Start => self.session.start_monitoring(),
            Command::Stop => self.session.stop_monitoring(),
            Command::Reset => self.session.reset(),
            Command::SetLocation(location) => self.session.set_location(location),
            Command::CancelFall(reply) => {
                let result = self.session.cancel_fall().map(|event| vec![event]);
                self.reply(reply, result);
            }
            Command::ConfirmFall(reply) => {
                let result = self.session.confirm_fall().map(|event| vec![event]);
                self.reply(reply, result);
            }
            Command::TriggerEmergency(reply) => {
                let result = self.session.trigger_emergency();
                self.reply(reply, result);
            }
            Command::SimulateFall(reply) => {
                let result = self.session.simulate_fall();
                self.reply(reply, result);
            }
            Command::History(reply) => {
                let _ = reply.send(self.session.history().entries());
            }
            Command::PostAlertReset { epoch } => {
                if self.session.alert_state() == AlertState::Confirmed
                    && self.session.countdown_epoch() == epoch
                {
                    tracing::info!("re-arming after confirmed alert");
                    self.session.reset();
                }
            }
            Command::Shutdown => {}
        }
    }

    fn reply(
        &mut self,
        reply: oneshot::Sender<std::result::Result<(), SessionError>>,
        result: std::result::Result<Vec<MonitorEvent>, SessionError>,
    ) {
        let result = match result {
            Ok(events) => {
                self.publish(events);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(error = %err, "session request rejected");
                Err(err)
            }
        };
        let _ = reply.send(result);
    }

    fn publish(&mut self, events: Vec<MonitorEvent>) {
        for event in events {
            tracing::debug!(event = event.event_type(), timestamp_ms = event.timestamp_ms(), "event");
            if matches!(event, MonitorEvent::AlertConfirmed(_)) {
                if let Some(alert) = self.session.history().latest() {
                    // No notifiers registered is not an error
                    let _ = self.alerts.send(alert.clone());
                }
            }
            let _ = self.events.send(event);
        }
    }

    /// Keep the tick task and post-alert timer in line with the countdown.
    fn sync_timers(&mut self) {
        let epoch = self.session.countdown_epoch();

        if self.session.is_counting_down() {
            if self.ticker.as_ref().map(TickHandle::epoch) != Some(epoch) {
                self.ticker = None;
                if let Some(mailbox) = self.mailbox.upgrade() {
                    let period =
                        Duration::from_millis(self.session.config().countdown.tick_interval_ms);
                    self.ticker = Some(self.scheduler.schedule(period, epoch, mailbox));
                }
            }
        } else if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }

        if self.session.alert_state() == AlertState::Confirmed {
            if self.post_alert.as_ref().map(|(e, _)| *e) != Some(epoch) {
                if let Some(mailbox) = self.mailbox.upgrade() {
                    let delay =
                        Duration::from_millis(self.session.config().session.post_alert_reset_ms);
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = mailbox.send(Command::PostAlertReset { epoch }).await;
                    });
                    if let Some((_, old)) = self.post_alert.replace((epoch, task)) {
                        old.abort();
                    }
                }
            }
        } else if let Some((_, task)) = self.post_alert.take() {
            task.abort();
        }
    }
}

async fn run_notifier(notifier: Arc<dyn Notifier>, mut alerts: broadcast::Receiver<FallEvent>) {
    loop {
        match alerts.recv().await {
            Ok(alert) => {
                let message = AlertMessage::from_event(&alert);
                if let Err(e) = notifier.notify(&alert, &message).await {
                    tracing::warn!(
                        event_id = %alert.id,
                        notifier = %notifier.name(),
                        error = %e,
                        "notifier failed to deliver alert"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(notifier = %notifier.name(), lagged = n, "notifier lagged, alerts dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
