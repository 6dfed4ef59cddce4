#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("docker CLI not found — install: https://docs.docker.com/get-docker/")]
    NotFound { source: std::io::Error },

    #[error("docker command failed: {args:?}\n{stderr}")]
    CommandFailed {
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    #[error("docker output was not valid UTF-8")]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    #[error("failed to read docker output")]
    Output { source: std::io::Error },
}

impl DockerError {
    /// Whether the daemon reported that the named object does not exist.
    pub fn is_no_such_object(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("no such image")
                    || stderr.contains("no such object")
                    || stderr.contains("no such container")
            }
            _ => false,
        }
    }
}

/// Captured result of a command whose exit status is interpreted by the
/// caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}
