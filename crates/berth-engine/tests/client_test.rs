use berth_build::{BuildPlan, StageKind};
use berth_core::BerthConfig;
use berth_engine::client::{BuildError, DockerClient, PreflightError, RunError, RunOptions};
use berth_engine::docker::{CommandOutput, DockerError};
use berth_engine::executor::DockerExecutor;
use berth_engine::{ContainerState, FailureKind};
use mockall::mock;
use std::path::Path;

mock! {
    Executor {}

    impl DockerExecutor for Executor {
        async fn exec(&self, args: &[String]) -> Result<String, DockerError>;
        async fn exec_streaming(&self, args: &[String]) -> Result<Option<i32>, DockerError>;
        async fn exec_tee(&self, args: &[String]) -> Result<CommandOutput, DockerError>;
    }
}

fn starts_with(args: &[String], first: &str) -> bool {
    args.first().map(String::as_str) == Some(first)
}

fn has(args: &[String], value: &str) -> bool {
    args.iter().any(|a| a == value)
}

fn not_found() -> DockerError {
    DockerError::NotFound {
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
    }
}

fn failed(stderr: &str) -> DockerError {
    DockerError::CommandFailed {
        args: vec![],
        code: Some(1),
        stderr: stderr.to_owned(),
    }
}

// ── Preflight Tests ──

#[tokio::test]
async fn preflight_all_checks_pass() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "version"))
        .returning(|_| Ok("27.1.1\n".to_owned()));
    mock.expect_exec()
        .withf(|args| starts_with(args, "info"))
        .returning(|_| Ok("27.1.1\n".to_owned()));
    mock.expect_exec()
        .withf(|args| starts_with(args, "buildx"))
        .returning(|_| Ok("github.com/docker/buildx v0.16.1 abc\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let report = client.check_prerequisites().await.unwrap();

    assert_eq!(report.client_version.as_deref(), Some("27.1.1"));
    assert_eq!(report.server_version.as_deref(), Some("27.1.1"));
    assert!(report.buildx);
    assert!(!report.has_warnings());
}

#[tokio::test]
async fn preflight_docker_not_installed() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "version"))
        .returning(|_| Err(not_found()));

    let client = DockerClient::with_executor(mock);
    let result = client.check_prerequisites().await;
    assert!(matches!(result, Err(PreflightError::DockerNotInstalled)));
}

#[tokio::test]
async fn preflight_daemon_down() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "version"))
        .returning(|_| Err(failed("Cannot connect to the Docker daemon")));
    mock.expect_exec()
        .withf(|args| starts_with(args, "info"))
        .returning(|_| Err(failed("Cannot connect to the Docker daemon")));

    let client = DockerClient::with_executor(mock);
    let result = client.check_prerequisites().await;
    assert!(matches!(
        result,
        Err(PreflightError::DaemonUnreachable { .. })
    ));
}

#[tokio::test]
async fn preflight_without_buildx_warns() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "version") || starts_with(args, "info"))
        .returning(|_| Ok("24.0.0\n".to_owned()));
    mock.expect_exec()
        .withf(|args| starts_with(args, "buildx"))
        .returning(|_| Err(failed("'buildx' is not a docker command")));

    let client = DockerClient::with_executor(mock);
    let report = client.check_prerequisites().await.unwrap();
    assert!(!report.buildx);
    assert!(report.has_warnings());
}

// ── Doctor Tests ──

#[tokio::test]
async fn doctor_without_docker_skips_remaining_checks() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "version"))
        .times(1)
        .returning(|_| Err(not_found()));

    let client = DockerClient::with_executor(mock);
    let report = client.doctor().await;
    assert!(!report.docker.passed);
    assert!(!report.daemon.passed);
    assert!(!report.all_passed());
}

#[tokio::test]
async fn doctor_reports_buildx_as_warning() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "version") || starts_with(args, "info"))
        .returning(|_| Ok("27.1.1\n".to_owned()));
    mock.expect_exec()
        .withf(|args| starts_with(args, "buildx"))
        .returning(|_| Err(failed("unknown command")));

    let client = DockerClient::with_executor(mock);
    let mut report = client.doctor().await;
    assert!(report.docker.passed);
    assert_eq!(report.daemon.detail, "running (27.1.1)");
    assert!(report.buildx.passed);
    assert!(report.buildx.warning);
    assert_eq!(report.buildx.icon(), "!!");

    // project checks are filled in by the caller
    assert!(!report.all_passed());
    report.config_file = berth_engine::CheckResult::ok("defaults");
    report.manifest = berth_engine::CheckResult::ok("pyproject.toml");
    report.lock = berth_engine::CheckResult::ok("poetry.lock");
    report.base_image = berth_engine::CheckResult::ok("python:3.11-slim");
    report.installer = berth_engine::CheckResult::warn("unpinned");
    assert!(report.all_passed());

    let rendered = report.to_string();
    assert!(rendered.contains("[OK] Docker CLI"));
    assert!(rendered.contains("[!!] Installer"));
}

// ── Image Tests ──

#[tokio::test]
async fn image_labels_missing_image() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "image") && has(args, "inspect"))
        .returning(|_| Err(failed("Error: No such image: demo:latest")));

    let client = DockerClient::with_executor(mock);
    let labels = client.image_labels("demo:latest").await.unwrap();
    assert!(labels.is_none());
}

#[tokio::test]
async fn image_labels_parsed() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "{{json .Config.Labels}}") && has(args, "demo:latest"))
        .returning(|_| Ok("{\"berth.stage.1\":\"abc\",\"berth.stage.2\":\"def\"}\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let labels = client.image_labels("demo:latest").await.unwrap().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels["berth.stage.1"], "abc");
}

#[tokio::test]
async fn image_labels_null_is_empty() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_| Ok("null\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let labels = client.image_labels("demo:latest").await.unwrap().unwrap();
    assert!(labels.is_empty());
}

// ── Build Tests ──

#[tokio::test]
async fn build_image_passes_tag_and_labels() {
    let mut mock = MockExecutor::new();
    mock.expect_exec_tee()
        .withf(|args| {
            starts_with(args, "build")
                && has(args, "--progress=plain")
                && has(args, "demo:latest")
                && has(args, "berth.stage.1=abc")
                && args.last().map(String::as_str) == Some("/tmp/project/.berth-bundle")
        })
        .times(1)
        .returning(|_| {
            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        });
    mock.expect_exec()
        .withf(|args| has(args, "{{.Id}}"))
        .returning(|_| Ok("sha256:0123456789abcdef\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let labels = vec![("berth.stage.1".to_owned(), "abc".to_owned())];
    let id = client
        .build_image(
            Path::new("/tmp/project/.berth-bundle"),
            "demo:latest",
            &labels,
            None,
        )
        .await
        .unwrap();
    assert_eq!(id, "sha256:0123456789abcdef");
}

#[tokio::test]
async fn build_failure_is_classified_against_plan() {
    let plan = BuildPlan::from_config(&BerthConfig::default()).unwrap();

    let mut mock = MockExecutor::new();
    mock.expect_exec_tee().returning(|_| {
        Ok(CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "#9 [5/8] RUN poetry check --lock && poetry install --no-interaction --no-ansi --no-root --only main\n\
                     #9 0.512 pyproject.toml changed significantly since poetry.lock was last generated.\n\
                     ERROR: failed to solve: process \"/bin/sh -c poetry check --lock && poetry install --no-interaction --no-ansi --no-root --only main\" did not complete successfully: exit code: 1\n"
                .to_owned(),
        })
    });

    let client = DockerClient::with_executor(mock);
    let err = client
        .build_image(Path::new("/tmp/b"), "demo:latest", &[], Some(&plan))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::DependencyResolution));
    match err {
        BuildError::Failed { stage, code, .. } => {
            assert_eq!(stage, Some(StageKind::DependencyInstall));
            assert_eq!(code, Some(1));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn build_without_docker() {
    let mut mock = MockExecutor::new();
    mock.expect_exec_tee().returning(|_| Err(not_found()));

    let client = DockerClient::with_executor(mock);
    let err = client
        .build_image(Path::new("/tmp/b"), "demo:latest", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Docker { .. }));
    assert_eq!(err.kind(), None);
}

// ── Container Tests ──

fn run_options() -> RunOptions {
    RunOptions {
        name: Some("demo-run".to_owned()),
        host_port: 8080,
        container_port: 8000,
        env: vec![("DATABASE_URL".to_owned(), "postgres://db/app".to_owned())],
        tty: false,
    }
}

#[tokio::test]
async fn run_foreground_propagates_exit_code() {
    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming()
        .withf(|args| {
            starts_with(args, "run")
                && has(args, "--rm")
                && has(args, "8080:8000")
                && has(args, "DATABASE_URL=postgres://db/app")
                && !has(args, "-t")
                && args.last().map(String::as_str) == Some("demo:latest")
        })
        .returning(|_| Ok(Some(3)));

    let client = DockerClient::with_executor(mock);
    let code = client
        .run_foreground("demo:latest", &run_options())
        .await
        .unwrap();
    assert_eq!(code, 3);
}

#[tokio::test]
async fn run_foreground_killed_by_signal() {
    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming().returning(|_| Ok(None));

    let client = DockerClient::with_executor(mock);
    let result = client.run_foreground("demo:latest", &run_options()).await;
    assert!(matches!(result, Err(RunError::Signaled)));
}

#[tokio::test]
async fn run_detached_returns_container_id() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "run") && has(args, "-d") && has(args, "demo-run"))
        .returning(|_| Ok("4f2a9c\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let id = client
        .run_detached("demo:latest", &run_options())
        .await
        .unwrap();
    assert_eq!(id, "4f2a9c");
}

#[tokio::test]
async fn container_state_running() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "inspect") && has(args, "4f2a9c"))
        .returning(|_| Ok("running 0\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let state = client.container_state("4f2a9c").await.unwrap();
    assert_eq!(state, ContainerState::Running);
}

#[tokio::test]
async fn container_state_exited_keeps_exit_code() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_| Ok("exited 2\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let state = client.container_state("4f2a9c").await.unwrap();
    assert_eq!(state, ContainerState::Stopped { exit_code: 2 });
}

#[tokio::test]
async fn container_state_unknown_container() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_| Err(failed("Error: No such object: nope")));

    let client = DockerClient::with_executor(mock);
    let result = client.container_state("nope").await;
    assert!(matches!(result, Err(RunError::NoSuchContainer(name)) if name == "nope"));
}

#[tokio::test]
async fn container_state_garbled_output() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_| Ok("running\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let result = client.container_state("4f2a9c").await;
    assert!(matches!(result, Err(RunError::UnexpectedInspect(_))));
}

#[tokio::test]
async fn stop_and_remove() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| starts_with(args, "stop") && has(args, "4f2a9c"))
        .times(1)
        .returning(|_| Ok("4f2a9c\n".to_owned()));
    mock.expect_exec()
        .withf(|args| starts_with(args, "rm") && has(args, "4f2a9c"))
        .times(1)
        .returning(|_| Ok("4f2a9c\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    client.stop_container("4f2a9c").await.unwrap();
    client.remove_container("4f2a9c").await.unwrap();
}

#[tokio::test]
async fn stop_failure_is_reported() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_| Err(failed("permission denied")));

    let client = DockerClient::with_executor(mock);
    let result = client.stop_container("4f2a9c").await;
    assert!(matches!(result, Err(RunError::Stop { .. })));
}
