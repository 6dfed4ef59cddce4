use std::fmt;

/// Lifecycle of a container created from a built image.
///
/// ```text
/// Built ──start──▶ Running ──exit / signal──▶ Stopped
/// ```
///
/// `Stopped` is terminal: a stopped container is never resumed, a new one is
/// created from the image instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Built,
    Running,
    Stopped { exit_code: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    /// The entrypoint process exited on its own.
    Exit { code: i64 },
    /// The container was terminated by a signal (stop, kill, Ctrl-C).
    Terminate { signal: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid transition: {event:?} while {from}")]
    InvalidTransition {
        from: ContainerState,
        event: LifecycleEvent,
    },

    #[error("unrecognized container status: {0}")]
    UnknownStatus(String),
}

impl ContainerState {
    pub fn apply(self, event: LifecycleEvent) -> Result<Self, LifecycleError> {
        match (self, event) {
            (Self::Built, LifecycleEvent::Start) => Ok(Self::Running),
            (Self::Running, LifecycleEvent::Exit { code }) => Ok(Self::Stopped { exit_code: code }),
            // Shell convention used by the engine: 128 + signal number.
            (Self::Running, LifecycleEvent::Terminate { signal }) => Ok(Self::Stopped {
                exit_code: 128 + i64::from(signal),
            }),
            (from, event) => Err(LifecycleError::InvalidTransition { from, event }),
        }
    }

    /// Map `docker inspect` output (`.State.Status`, `.State.ExitCode`).
    pub fn from_inspect(status: &str, exit_code: i64) -> Result<Self, LifecycleError> {
        match status.trim() {
            "created" => Ok(Self::Built),
            "running" | "restarting" | "paused" => Ok(Self::Running),
            "exited" | "dead" => Ok(Self::Stopped { exit_code }),
            other => Err(LifecycleError::UnknownStatus(other.to_owned())),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::Stopped { exit_code } => Some(*exit_code),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => f.write_str("built"),
            Self::Running => f.write_str("running"),
            Self::Stopped { exit_code } => write!(f, "stopped (exit code {exit_code})"),
        }
    }
}
