use chrono::Local;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    error::StreamAcquisitionError,
    stream::{FrameSink, FrameSource, StreamOpener},
};

use super::state::{SessionSnapshot, SessionState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// One monitoring run, from acquisition to release. Exclusively owns the
/// input handle and the optional output handle while `Active`/`Stopping`.
pub struct StreamSession {
    state: SessionState,
    pub(super) source: Option<Box<dyn FrameSource>>,
    pub(super) sink: Option<Box<dyn FrameSink>>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl StreamSession {
    pub fn new(stream_ref: impl Into<String>, output_ref: Option<String>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            session_id: Uuid::new_v4().to_string(),
            state: SessionState::Idle,
            stream_ref: stream_ref.into(),
            output_ref,
            output_active: false,
            started_at: None,
            frames_read: 0,
            read_failures: 0,
            plates_detected: 0,
            last_error: None,
        });

        Self {
            state: SessionState::Idle,
            source: None,
            sink: None,
            snapshot,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn id(&self) -> String {
        self.snapshot.borrow().session_id.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn holds_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn holds_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(super) fn update(&self, modify: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_modify(modify);
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            log_error!(
                "Ignoring invalid session transition {:?} -> {:?}",
                self.state,
                next
            );
            return;
        }
        self.state = next;
        self.update(|snapshot| snapshot.state = next);
    }

    /// `Idle -> Starting -> Active`, or `-> Failed` when the input cannot be
    /// opened. An output that fails to open is logged and skipped.
    pub async fn start(&mut self, opener: &dyn StreamOpener) -> Result<(), StreamAcquisitionError> {
        if self.state != SessionState::Idle {
            return Err(StreamAcquisitionError::Unavailable(format!(
                "session is {:?}, not idle",
                self.state
            )));
        }
        self.transition(SessionState::Starting);

        let (stream_ref, output_ref) = {
            let snapshot = self.snapshot.borrow();
            (snapshot.stream_ref.clone(), snapshot.output_ref.clone())
        };

        let source = match opener.open_source(&stream_ref).await {
            Ok(source) => source,
            Err(err) => {
                log_error!("Cannot open stream {stream_ref}: {err}");
                self.update(|snapshot| snapshot.last_error = Some(err.to_string()));
                self.transition(SessionState::Failed);
                return Err(err);
            }
        };

        let properties = source.properties();
        let sink = match output_ref.as_deref() {
            Some(output_ref) => match opener.open_sink(output_ref, properties).await {
                Ok(sink) => {
                    log_info!("Blurred output configured: {output_ref}");
                    Some(sink)
                }
                Err(err) => {
                    log_warn!("Continuing without output {output_ref}: {err}");
                    self.update(|snapshot| snapshot.last_error = Some(err.to_string()));
                    None
                }
            },
            None => None,
        };

        self.transition(SessionState::Active);
        self.source = Some(source);
        self.sink = sink;

        let output_active = self.sink.is_some();
        self.update(|snapshot| {
            snapshot.started_at = Some(Local::now());
            snapshot.output_active = output_active;
        });

        log_info!(
            "Monitoring session {} active on {} ({}x{} @ {:.1} fps)",
            self.id(),
            stream_ref,
            properties.width,
            properties.height,
            properties.fps
        );
        Ok(())
    }

    /// `Active -> Stopping -> Idle`, or `-> Failed` when `fatal` is set. Both
    /// handles are released even if one release fails. No-op unless active.
    pub async fn shutdown(&mut self, fatal: Option<String>) {
        if self.state != SessionState::Active {
            return;
        }
        self.transition(SessionState::Stopping);

        if let Some(mut source) = self.source.take() {
            if let Err(err) = source.release().await {
                log_warn!("Failed to release input stream: {err}");
            }
        }
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.release().await {
                log_warn!("Failed to release output stream: {err}");
            }
        }
        self.update(|snapshot| snapshot.output_active = false);

        match fatal {
            Some(reason) => {
                log_error!("Monitoring session {} failed: {reason}", self.id());
                self.update(|snapshot| snapshot.last_error = Some(reason));
                self.transition(SessionState::Failed);
            }
            None => {
                log_info!("Monitoring session {} stopped", self.id());
                self.transition(SessionState::Idle);
            }
        }
    }
}
