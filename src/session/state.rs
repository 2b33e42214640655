use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Active)
                | (Starting, Failed)
                | (Active, Stopping)
                | (Stopping, Idle)
                | (Stopping, Failed)
        )
    }

    /// Stream handles may only be owned in these states.
    pub fn may_hold_handles(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Stopping)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed)
    }
}

/// Point-in-time view of a monitoring session, published on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub stream_ref: String,
    pub output_ref: Option<String>,
    pub output_active: bool,
    pub started_at: Option<DateTime<Local>>,
    pub frames_read: u64,
    pub read_failures: u64,
    pub plates_detected: u64,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn lifecycle_edges() {
        assert!(Idle.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Active));
        assert!(Starting.can_transition_to(Failed));
        assert!(Active.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Idle));
        assert!(Stopping.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Active));
        assert!(!Active.can_transition_to(Idle));
        assert!(!Failed.can_transition_to(Starting));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn only_running_states_hold_handles() {
        for state in [Idle, Starting, Failed] {
            assert!(!state.may_hold_handles());
        }
        assert!(Active.may_hold_handles());
        assert!(Stopping.may_hold_handles());
    }
}
