use std::sync::Arc;

use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{error::StreamAcquisitionError, stream::StreamOpener};

use super::{
    loop_worker::MonitorContext,
    state::{SessionSnapshot, SessionState},
    stream_session::StreamSession,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Accepted(SessionSnapshot),
    /// A session was already running; nothing new was started.
    AlreadyRunning(SessionSnapshot),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(SessionSnapshot),
    NotRunning,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub is_active: bool,
    pub is_task_running: bool,
    pub session: Option<SessionSnapshot>,
}

struct RunningSession {
    handle: JoinHandle<SessionSnapshot>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<SessionSnapshot>,
}

/// Allows at most one running monitoring session per supervisor.
pub struct SessionSupervisor {
    opener: Arc<dyn StreamOpener>,
    context: Arc<MonitorContext>,
    current: Mutex<Option<RunningSession>>,
}

impl SessionSupervisor {
    pub fn new(opener: Arc<dyn StreamOpener>, context: Arc<MonitorContext>) -> Self {
        Self {
            opener,
            context,
            current: Mutex::new(None),
        }
    }

    /// Acquires the stream before returning, so an unreachable stream is
    /// reported here. A session that already ended is replaced.
    pub async fn start(
        &self,
        stream_ref: &str,
        output_ref: Option<&str>,
    ) -> Result<StartOutcome, StreamAcquisitionError> {
        let mut current = self.current.lock().await;

        if let Some(running) = current.as_ref() {
            if !running.handle.is_finished() {
                let snapshot = running.snapshot.borrow().clone();
                log_info!(
                    "Monitoring already running as session {}",
                    snapshot.session_id
                );
                return Ok(StartOutcome::AlreadyRunning(snapshot));
            }
        }
        if let Some(finished) = current.take() {
            if let Err(err) = finished.handle.await {
                log_error!("Previous monitoring task ended abnormally: {err}");
            }
        }

        let mut session = StreamSession::new(stream_ref, output_ref.map(str::to_string));
        session.start(self.opener.as_ref()).await?;

        let snapshot = session.subscribe();
        let cancel = CancellationToken::new();
        let context = self.context.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            session.run(&context, &token).await;
            session.snapshot()
        });

        let accepted = snapshot.borrow().clone();
        *current = Some(RunningSession {
            handle,
            cancel,
            snapshot,
        });
        Ok(StartOutcome::Accepted(accepted))
    }

    /// Cancels the running session and waits until its handles are released.
    pub async fn stop(&self) -> StopOutcome {
        let Some(running) = self.current.lock().await.take() else {
            return StopOutcome::NotRunning;
        };

        let was_running = !running.handle.is_finished();
        running.cancel.cancel();

        let last = match running.handle.await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log_error!("Monitoring task failed to join: {err}");
                running.snapshot.borrow().clone()
            }
        };

        if was_running {
            StopOutcome::Stopped(last)
        } else {
            StopOutcome::NotRunning
        }
    }

    pub async fn status(&self) -> SupervisorStatus {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(running) => {
                let snapshot = running.snapshot.borrow().clone();
                SupervisorStatus {
                    is_active: snapshot.state == SessionState::Active,
                    is_task_running: !running.handle.is_finished(),
                    session: Some(snapshot),
                }
            }
            None => SupervisorStatus {
                is_active: false,
                is_task_running: false,
                session: None,
            },
        }
    }
}
