//! Lifecycle of one randomisation run: upload the ROM, start the job, follow
//! its progress until the server reports success or failure.
//!
//! The network work happens on a worker thread that only ever sends
//! [`SessionEvent`]s back. All state changes happen on the thread that owns
//! the [`RandomizationSession`], when it calls [`RandomizationSession::poll`]
//! or [`RandomizationSession::wait`].

use serde_json::Value as JsonValue;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::protocol::{parse_server_message, ClientMessage, Inbound, ServerMessage};
use crate::transport::{Transport, TransportError};

pub const STARTING_MESSAGE: &str = "Randomization is starting...\nThis may take a short while!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a ROM.
    Idle,
    Uploading,
    Running,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    /// A job is in flight and cannot be abandoned.
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Uploading | Phase::Running)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Uploaded,
    Progress {
        step: u32,
        total_steps: u32,
        message: String,
        seed: Option<String>,
    },
    Done {
        seed: Option<String>,
    },
    Failed {
        message: String,
        seed: Option<String>,
    },
}

impl SessionEvent {
    fn client_error(detail: impl std::fmt::Display) -> Self {
        SessionEvent::Failed {
            message: format!("Unexpected client error: {}", detail),
            seed: None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Done { .. } | SessionEvent::Failed { .. })
    }
}

impl From<ServerMessage> for SessionEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Progress {
                step,
                total_steps,
                message,
                seed,
            } => SessionEvent::Progress {
                step,
                total_steps,
                message,
                seed,
            },
            ServerMessage::Done { seed } => SessionEvent::Done { seed },
            ServerMessage::Error { message, seed } => SessionEvent::Failed { message, seed },
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("a randomization session is already active; close it first")]
    NotIdle,
}

pub struct RandomizationSession {
    transport: Arc<dyn Transport>,
    phase: Phase,
    step: u32,
    total_steps: u32,
    message: String,
    seed: Option<String>,
    events: Option<Receiver<SessionEvent>>,
}

impl RandomizationSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            phase: Phase::Idle,
            step: 0,
            total_steps: 0,
            message: String::new(),
            seed: None,
            events: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn seed(&self) -> Option<&str> {
        self.seed.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn can_close(&self) -> bool {
        !self.phase.is_busy()
    }

    /// Completed share of the job in `0.0..=1.0`.
    pub fn progress_fraction(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.step as f32 / self.total_steps as f32).clamp(0.0, 1.0)
    }

    /// Uploads `rom` and starts the job with `config` in the background.
    /// Returns as soon as the worker is launched.
    pub fn start(&mut self, rom: Vec<u8>, config: JsonValue) -> Result<(), SessionError> {
        if self.phase != Phase::Idle {
            return Err(SessionError::NotIdle);
        }

        log::info!("starting randomization ({} byte ROM)", rom.len());
        let (tx, rx) = mpsc::channel();
        self.events = Some(rx);
        self.phase = Phase::Uploading;

        let transport = Arc::clone(&self.transport);
        let spawned = thread::Builder::new()
            .name("randomiser-job".to_string())
            .spawn(move || run_job(transport.as_ref(), &rom, config, &tx));
        if let Err(e) = spawned {
            log::error!("could not launch randomization worker: {}", e);
            self.apply(SessionEvent::client_error(e));
        }
        Ok(())
    }

    /// Applies every event the worker has sent so far without blocking.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut applied = Vec::new();
        while let Some(rx) = self.events.as_ref() {
            match rx.try_recv() {
                Ok(event) => {
                    self.apply(event.clone());
                    applied.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.worker_gone(&mut applied);
                    break;
                }
            }
        }
        applied
    }

    /// Blocks until the session reaches a terminal phase or `timeout`
    /// passes, applying events as they arrive.
    pub fn wait(&mut self, timeout: Duration) -> Phase {
        let deadline = Instant::now() + timeout;
        let mut applied = Vec::new();
        while !self.phase.is_terminal() {
            let Some(rx) = self.events.as_ref() else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(event) => self.apply(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.worker_gone(&mut applied);
                    break;
                }
            }
        }
        self.phase
    }

    fn worker_gone(&mut self, applied: &mut Vec<SessionEvent>) {
        self.events = None;
        if self.phase.is_busy() {
            let event = SessionEvent::client_error("the randomization worker stopped unexpectedly");
            self.apply(event.clone());
            applied.push(event);
        }
    }

    /// Advances the state machine by one event.
    pub fn apply(&mut self, event: SessionEvent) {
        if !self.phase.is_busy() {
            log::warn!("ignoring {:?} while {:?}", event, self.phase);
            return;
        }
        match event {
            SessionEvent::Uploaded => {
                log::info!("ROM uploaded, waiting for job progress");
                self.phase = Phase::Running;
                self.step = 0;
                self.total_steps = 1;
                self.message = STARTING_MESSAGE.to_string();
            }
            SessionEvent::Progress {
                step,
                total_steps,
                message,
                seed,
            } => {
                log::debug!("progress {}/{}: {}", step, total_steps, message);
                self.phase = Phase::Running;
                self.step = step;
                self.total_steps = total_steps;
                self.message = message;
                self.keep_seed(seed);
            }
            SessionEvent::Done { seed } => {
                self.phase = Phase::Succeeded;
                self.keep_seed(seed);
                log::info!("randomization finished (seed {})", self.seed.as_deref().unwrap_or("?"));
            }
            SessionEvent::Failed { message, seed } => {
                log::error!("randomization failed: {}", message);
                self.phase = Phase::Failed;
                self.message = message;
                self.keep_seed(seed);
            }
        }
    }

    fn keep_seed(&mut self, seed: Option<String>) {
        if let Some(seed) = seed {
            self.seed = Some(seed);
        }
    }

    /// Returns to `Idle` and forgets the last run. Refused while a job is
    /// uploading or running.
    pub fn close(&mut self) -> bool {
        if self.phase.is_busy() {
            log::warn!("cannot close while the randomization is {:?}", self.phase);
            return false;
        }
        self.phase = Phase::Idle;
        self.step = 0;
        self.total_steps = 0;
        self.message.clear();
        self.seed = None;
        self.events = None;
        true
    }
}

fn run_job(transport: &dyn Transport, rom: &[u8], config: JsonValue, tx: &Sender<SessionEvent>) {
    if let Err(e) = transport.upload(rom) {
        let _ = tx.send(SessionEvent::Failed {
            message: format!("Error during upload: {}.", e),
            seed: None,
        });
        return;
    }
    if tx.send(SessionEvent::Uploaded).is_err() {
        return;
    }
    if let Err(e) = stream_job(transport, config, tx) {
        let _ = tx.send(SessionEvent::client_error(e));
    }
}

fn stream_job(transport: &dyn Transport, config: JsonValue, tx: &Sender<SessionEvent>) -> Result<(), TransportError> {
    let mut channel = transport.open_channel()?;
    let start = ClientMessage::Start { config }
        .to_text()
        .map_err(|e| TransportError::Other(e.to_string()))?;
    channel.send_text(&start)?;

    loop {
        let Some(text) = channel.recv_text()? else {
            return Err(TransportError::Other(
                "connection closed before the randomization finished".to_string(),
            ));
        };
        match parse_server_message(&text) {
            Ok(Inbound::Message(msg)) => {
                let event = SessionEvent::from(msg);
                let terminal = event.is_terminal();
                if tx.send(event).is_err() || terminal {
                    return Ok(());
                }
            }
            Ok(Inbound::Unknown(status)) => {
                log::warn!("ignoring server message with status '{}'", status);
            }
            Err(e) => {
                return Err(TransportError::Other(format!("malformed server message: {}", e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Channel;

    struct Offline;

    impl Transport for Offline {
        fn upload(&self, _rom: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::Other("offline".into()))
        }

        fn open_channel(&self) -> Result<Box<dyn Channel>, TransportError> {
            Err(TransportError::Other("offline".into()))
        }
    }

    fn uploading() -> RandomizationSession {
        let mut session = RandomizationSession::new(Arc::new(Offline));
        session.phase = Phase::Uploading;
        session
    }

    #[test]
    fn upload_then_progress_then_done() {
        let mut s = uploading();
        s.apply(SessionEvent::Uploaded);
        assert_eq!(s.phase(), Phase::Running);
        assert_eq!(s.message(), STARTING_MESSAGE);
        s.apply(SessionEvent::Progress {
            step: 1,
            total_steps: 10,
            message: "Dungeons".into(),
            seed: Some("ABC123".into()),
        });
        assert_eq!((s.step(), s.total_steps()), (1, 10));
        assert!((s.progress_fraction() - 0.1).abs() < f32::EPSILON);
        s.apply(SessionEvent::Done { seed: None });
        assert_eq!(s.phase(), Phase::Succeeded);
        assert_eq!(s.seed(), Some("ABC123"));
    }

    #[test]
    fn error_records_message_and_keeps_seed() {
        let mut s = uploading();
        s.apply(SessionEvent::Progress {
            step: 3,
            total_steps: 10,
            message: "Text".into(),
            seed: Some("42".into()),
        });
        s.apply(SessionEvent::Failed {
            message: "Error: boom".into(),
            seed: None,
        });
        assert_eq!(s.phase(), Phase::Failed);
        assert_eq!(s.message(), "Error: boom");
        assert_eq!(s.seed(), Some("42"));
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut s = uploading();
        s.apply(SessionEvent::Done { seed: Some("A".into()) });
        s.apply(SessionEvent::Progress {
            step: 9,
            total_steps: 10,
            message: "late".into(),
            seed: Some("B".into()),
        });
        assert_eq!(s.phase(), Phase::Succeeded);
        assert_eq!(s.seed(), Some("A"));
    }

    #[test]
    fn close_refused_while_busy() {
        let mut s = uploading();
        s.apply(SessionEvent::Uploaded);
        assert!(!s.close());
        assert_eq!(s.phase(), Phase::Running);
        assert_eq!(s.message(), STARTING_MESSAGE);
    }

    #[test]
    fn close_after_terminal_resets() {
        let mut s = uploading();
        s.apply(SessionEvent::Progress {
            step: 5,
            total_steps: 5,
            message: "ok".into(),
            seed: Some("S".into()),
        });
        s.apply(SessionEvent::Done { seed: None });
        assert!(s.close());
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!((s.step(), s.total_steps()), (0, 0));
        assert_eq!(s.message(), "");
        assert_eq!(s.seed(), None);
    }

    #[test]
    fn start_only_from_idle() {
        let mut s = uploading();
        assert_eq!(s.start(vec![1], JsonValue::Null), Err(SessionError::NotIdle));
    }

    #[test]
    fn offline_upload_fails_the_session() {
        let mut s = RandomizationSession::new(Arc::new(Offline));
        s.start(vec![0; 4], serde_json::json!({})).unwrap();
        assert_eq!(s.wait(Duration::from_secs(5)), Phase::Failed);
        assert_eq!(s.message(), "Error during upload: offline.");
    }
}
