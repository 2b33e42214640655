//! Monitoring session lifecycle.

mod loop_worker;
mod state;
mod stream_session;
mod supervisor;

pub use loop_worker::MonitorContext;
pub use state::{SessionSnapshot, SessionState};
pub use stream_session::StreamSession;
pub use supervisor::{SessionSupervisor, StartOutcome, StopOutcome, SupervisorStatus};
