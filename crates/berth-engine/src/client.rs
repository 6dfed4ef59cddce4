use crate::docker::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};
use crate::failure::{self, FailureKind};
use crate::lifecycle::{ContainerState, LifecycleError};
use berth_build::{BuildPlan, StageKind};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Docker operations client, parameterized over the executor for testability.
pub struct DockerClient<E: DockerExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DockerExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Preflight ──

    pub async fn check_prerequisites(&self) -> Result<PreflightReport, PreflightError> {
        let mut report = PreflightReport::default();

        // 1. docker CLI available
        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(version) => report.client_version = Some(version.trim().to_owned()),
            Err(DockerError::NotFound { .. }) => return Err(PreflightError::DockerNotInstalled),
            // `docker version` exits non-zero when only the daemon is down
            Err(e) => tracing::debug!(error = %e, "docker version reported an error"),
        }

        // 2. Daemon reachable
        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(version) => report.server_version = Some(version.trim().to_owned()),
            Err(DockerError::NotFound { .. }) => return Err(PreflightError::DockerNotInstalled),
            Err(e) => return Err(PreflightError::DaemonUnreachable { source: e }),
        }

        // 3. BuildKit available (optional; the legacy builder still works)
        report.buildx = self
            .executor
            .exec(&args(["buildx", "version"]))
            .await
            .is_ok();

        Ok(report)
    }

    // ── Doctor ──

    /// Run the Docker checks without early return.
    /// Project checks are filled in by the caller.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        // 1. docker CLI
        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(v) => report.docker = CheckResult::ok(v.trim()),
            Err(e @ DockerError::NotFound { .. }) => {
                report.docker = CheckResult::fail(&e.to_string());
                report.daemon = CheckResult::fail("skipped (no docker CLI)");
                report.buildx = CheckResult::fail("skipped (no docker CLI)");
                return report;
            }
            Err(_) => report.docker = CheckResult::ok("installed"),
        }

        // 2. Daemon
        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(v) => report.daemon = CheckResult::ok(&format!("running ({})", v.trim())),
            Err(_) => report.daemon = CheckResult::fail("daemon not reachable — is Docker running?"),
        }

        // 3. BuildKit
        match self.executor.exec(&args(["buildx", "version"])).await {
            Ok(v) => {
                let version = v.split_whitespace().nth(1).unwrap_or(v.trim());
                report.buildx = CheckResult::ok(version);
            }
            Err(_) => report.buildx = CheckResult::warn("not available, legacy builder will be used"),
        }

        report
    }

    // ── Images ──

    /// Labels of a local image, or `None` when the image does not exist.
    pub async fn image_labels(&self, tag: &str) -> Result<Option<HashMap<String, String>>, ImageError> {
        let output = match self
            .executor
            .exec(&args([
                "image",
                "inspect",
                "--format",
                "{{json .Config.Labels}}",
                tag,
            ]))
            .await
        {
            Ok(output) => output,
            Err(e) if e.is_no_such_object() => return Ok(None),
            Err(e) => return Err(ImageError::Inspect { source: e }),
        };

        let trimmed = output.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Some(HashMap::new()));
        }

        let labels = serde_json::from_str(trimmed).map_err(|e| ImageError::Labels { source: e })?;
        Ok(Some(labels))
    }

    pub async fn image_id(&self, tag: &str) -> Result<String, ImageError> {
        let output = self
            .executor
            .exec(&args(["image", "inspect", "--format", "{{.Id}}", tag]))
            .await
            .map_err(|e| ImageError::Inspect { source: e })?;

        Ok(output.trim().to_owned())
    }

    // ── Build ──

    /// Build `bundle_dir` into `tag`. Builder output is echoed while it runs.
    ///
    /// A failed build is diagnosed against `plan` when one is given; an
    /// ejected Dockerfile has no plan and is classified from output alone.
    pub async fn build_image(
        &self,
        bundle_dir: &Path,
        tag: &str,
        labels: &[(String, String)],
        plan: Option<&BuildPlan>,
    ) -> Result<String, BuildError> {
        let bundle_str = bundle_dir
            .to_str()
            .ok_or_else(|| BuildError::InvalidPath(bundle_dir.to_path_buf()))?;

        let mut cmd = args(["build", "--progress=plain", "-t", tag]);
        for (key, value) in labels {
            cmd.push("--label".to_owned());
            cmd.push(format!("{key}={value}"));
        }
        cmd.push(bundle_str.to_owned());

        let output = self
            .executor
            .exec_tee(&cmd)
            .await
            .map_err(|e| BuildError::Docker { source: e })?;

        if !output.success() {
            let diagnosis = failure::diagnose(&output.stderr, plan);
            tracing::debug!(?diagnosis, code = ?output.code, "build failed");
            return Err(BuildError::Failed {
                kind: diagnosis.kind,
                stage: diagnosis.stage,
                detail: diagnosis.detail,
                code: output.code,
            });
        }

        self.image_id(tag)
            .await
            .map_err(|e| BuildError::Inspect { source: e })
    }

    // ── Containers ──

    /// Run attached to the terminal and return the container's exit code
    /// unchanged.
    pub async fn run_foreground(&self, tag: &str, opts: &RunOptions) -> Result<i32, RunError> {
        let mut cmd = args(["run", "--rm", "-i"]);
        if opts.tty {
            cmd.push("-t".to_owned());
        }
        cmd.extend(opts.to_args());
        cmd.push(tag.to_owned());

        let code = self
            .executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| RunError::Start { source: e })?;

        code.ok_or(RunError::Signaled)
    }

    /// Start in the background and return the container id.
    pub async fn run_detached(&self, tag: &str, opts: &RunOptions) -> Result<String, RunError> {
        let mut cmd = args(["run", "-d"]);
        cmd.extend(opts.to_args());
        cmd.push(tag.to_owned());

        let output = self
            .executor
            .exec(&cmd)
            .await
            .map_err(|e| RunError::Start { source: e })?;

        Ok(output.trim().to_owned())
    }

    pub async fn container_state(&self, container: &str) -> Result<ContainerState, RunError> {
        let output = self
            .executor
            .exec(&args([
                "inspect",
                "--format",
                "{{.State.Status}} {{.State.ExitCode}}",
                container,
            ]))
            .await
            .map_err(|e| {
                if e.is_no_such_object() {
                    RunError::NoSuchContainer(container.to_owned())
                } else {
                    RunError::Inspect { source: e }
                }
            })?;

        let mut parts = output.split_whitespace();
        let status = parts.next().unwrap_or_default();
        let exit_code = match parts.next().map(str::parse::<i64>) {
            Some(Ok(code)) => code,
            Some(Err(_)) | None => {
                return Err(RunError::UnexpectedInspect(output.trim().to_owned()));
            }
        };

        ContainerState::from_inspect(status, exit_code).map_err(RunError::from)
    }

    pub async fn stop_container(&self, container: &str) -> Result<(), RunError> {
        self.executor
            .exec(&args(["stop", container]))
            .await
            .map_err(|e| RunError::Stop { source: e })?;

        Ok(())
    }

    pub async fn remove_container(&self, container: &str) -> Result<(), RunError> {
        self.executor
            .exec(&args(["rm", container]))
            .await
            .map_err(|e| RunError::Remove { source: e })?;

        Ok(())
    }
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Run options ──

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub name: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    /// Runtime configuration injected at container start.
    pub env: Vec<(String, String)>,
    pub tty: bool,
}

impl RunOptions {
    fn to_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(name) = &self.name {
            out.push("--name".to_owned());
            out.push(name.clone());
        }
        out.push("-p".to_owned());
        out.push(format!("{}:{}", self.host_port, self.container_port));
        for (key, value) in &self.env {
            out.push("-e".to_owned());
            out.push(format!("{key}={value}"));
        }
        out
    }
}

// ── Preflight types ──

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub client_version: Option<String>,
    pub server_version: Option<String>,
    pub buildx: bool,
}

impl PreflightReport {
    pub fn has_warnings(&self) -> bool {
        !self.buildx
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("docker CLI not installed — https://docs.docker.com/get-docker/")]
    DockerNotInstalled,

    #[error("docker daemon is not reachable — is Docker running?")]
    DaemonUnreachable { source: DockerError },
}

// ── Doctor types ──

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub docker: CheckResult,
    pub daemon: CheckResult,
    pub buildx: CheckResult,
    pub config_file: CheckResult,
    pub manifest: CheckResult,
    pub lock: CheckResult,
    pub base_image: CheckResult,
    pub installer: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, c)| c.passed)
    }

    pub fn checks(&self) -> [(&'static str, &CheckResult); 8] {
        [
            ("Docker CLI", &self.docker),
            ("Docker daemon", &self.daemon),
            ("BuildKit", &self.buildx),
            ("berth.toml", &self.config_file),
            ("Manifest", &self.manifest),
            ("Lock file", &self.lock),
            ("Base image", &self.base_image),
            ("Installer", &self.installer),
        ]
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, check) in self.checks() {
            writeln!(f, "  [{}] {label:<14} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

/// Outcome of one doctor check. Warnings count as passed.
#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub warning: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            warning: false,
            detail: detail.to_owned(),
        }
    }

    pub fn warn(detail: &str) -> Self {
        Self {
            passed: true,
            warning: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            warning: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        match (self.passed, self.warning) {
            (true, false) => "OK",
            (true, true) => "!!",
            (false, _) => "NG",
        }
    }
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to inspect image")]
    Inspect { source: DockerError },

    #[error("image labels are not valid JSON")]
    Labels { source: serde_json::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("bundle path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),

    #[error("failed to invoke docker build")]
    Docker { source: DockerError },

    #[error("{kind}{}: {detail}", .stage.map(|s| format!(" in {s}")).unwrap_or_default())]
    Failed {
        kind: FailureKind,
        stage: Option<StageKind>,
        detail: String,
        code: Option<i32>,
    },

    #[error("image built but could not be inspected")]
    Inspect { source: ImageError },
}

impl BuildError {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start container")]
    Start { source: DockerError },

    #[error("container process was terminated by a signal")]
    Signaled,

    #[error("no such container: {0}")]
    NoSuchContainer(String),

    #[error("failed to inspect container")]
    Inspect { source: DockerError },

    #[error("unexpected inspect output: {0}")]
    UnexpectedInspect(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("failed to stop container")]
    Stop { source: DockerError },

    #[error("failed to remove container")]
    Remove { source: DockerError },
}
