use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::docker::{CommandOutput, DockerError};

/// Abstraction over docker CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait DockerExecutor: Send + Sync {
    /// Execute a docker command and capture stdout. Non-zero exit is an error.
    async fn exec(&self, args: &[String]) -> Result<String, DockerError>;

    /// Execute a docker command attached to the terminal and return its exit
    /// code unchanged.
    async fn exec_streaming(&self, args: &[String]) -> Result<Option<i32>, DockerError>;

    /// Execute a docker command, echoing stderr to the terminal while also
    /// capturing it. Non-zero exit is reported through
    /// [`CommandOutput::code`], not as an error.
    async fn exec_tee(&self, args: &[String]) -> Result<CommandOutput, DockerError>;
}

/// Real docker CLI executor.
pub struct RealExecutor;

impl DockerExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, DockerError> {
        tracing::debug!(?args, "docker");
        let output = tokio::process::Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| DockerError::InvalidUtf8 { source: e })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                code: output.status.code(),
                stderr,
            })
        }
    }

    async fn exec_streaming(&self, args: &[String]) -> Result<Option<i32>, DockerError> {
        tracing::debug!(?args, "docker (attached)");
        let status = tokio::process::Command::new("docker")
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        Ok(status.code())
    }

    async fn exec_tee(&self, args: &[String]) -> Result<CommandOutput, DockerError> {
        tracing::debug!(?args, "docker (tee)");
        let mut child = tokio::process::Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::NotFound { source: e })?;

        let mut stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
        });

        let stderr = match child.stderr.take() {
            Some(pipe) => tee_lines(BufReader::new(pipe), |line| eprintln!("{line}"))
                .await
                .map_err(|e| DockerError::Output { source: e })?,
            None => String::new(),
        };

        let status = child
            .wait()
            .await
            .map_err(|e| DockerError::Output { source: e })?;
        let stdout = stdout_task
            .await
            .map_err(|e| DockerError::Output {
                source: std::io::Error::other(e),
            })?
            .map_err(|e| DockerError::Output { source: e })?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Collect `reader` line by line, handing each line to `echo` as it arrives.
/// Builder output is not guaranteed to be UTF-8; invalid bytes are replaced.
async fn tee_lines<R, F>(mut reader: R, mut echo: F) -> std::io::Result<String>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&str),
{
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(captured);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        echo(line);
        captured.push_str(line);
        captured.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tee_survives_invalid_utf8() {
        let input: &[u8] = b"#5 [2/4] RUN pip\n#5 \xff\xfe garbage\r\nERROR: failed to solve";
        let mut echoed = Vec::new();

        let captured = tee_lines(input, |line| echoed.push(line.to_owned()))
            .await
            .unwrap();

        assert_eq!(echoed.len(), 3);
        assert_eq!(echoed[1], "#5 \u{fffd}\u{fffd} garbage");
        assert_eq!(
            captured,
            "#5 [2/4] RUN pip\n#5 \u{fffd}\u{fffd} garbage\nERROR: failed to solve\n"
        );
    }

    #[tokio::test]
    async fn tee_of_empty_stream_is_empty() {
        let captured = tee_lines(&b""[..], |_| panic!("nothing to echo"))
            .await
            .unwrap();
        assert!(captured.is_empty());
    }
}
