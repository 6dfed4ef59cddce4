use berth_build::{BuildPlan, LayerChain, SourceTree, StageKind};
use berth_core::BerthConfig;
use berth_engine::docker::{CommandOutput, DockerError};
use berth_engine::executor::DockerExecutor;
use berth_engine::pipeline::{BuildPipeline, PipelineStep, StepError};
use berth_engine::{DockerClient, FailureKind};
use mockall::mock;
use std::path::Path;
use tempfile::TempDir;

mock! {
    Executor {}

    impl DockerExecutor for Executor {
        async fn exec(&self, args: &[String]) -> Result<String, DockerError>;
        async fn exec_streaming(&self, args: &[String]) -> Result<Option<i32>, DockerError>;
        async fn exec_tee(&self, args: &[String]) -> Result<CommandOutput, DockerError>;
    }
}

const PYPROJECT: &str = r#"
[tool.poetry]
name = "auth-api"
version = "0.1.0"

[tool.poetry.dependencies]
python = "^3.11"
fastapi = "^0.110"

[tool.poetry.group.dev.dependencies]
pytest = "^8.0"
"#;

const LOCK: &str = r#"
[[package]]
name = "fastapi"
version = "0.110.0"

[package.dependencies]
starlette = ">=0.36.3,<0.37.0"

[[package]]
name = "starlette"
version = "0.36.3"

[[package]]
name = "pytest"
version = "8.1.1"

[metadata]
lock-version = "2.0"
content-hash = "8e1f2c0a"
"#;

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("pyproject.toml"), PYPROJECT).unwrap();
    std::fs::write(tmp.path().join("poetry.lock"), LOCK).unwrap();
    std::fs::write(tmp.path().join("run.py"), "print('hello')\n").unwrap();
    tmp
}

fn first(args: &[String], value: &str) -> bool {
    args.first().map(String::as_str) == Some(value)
}

fn has(args: &[String], value: &str) -> bool {
    args.iter().any(|a| a == value)
}

fn expect_preflight(mock: &mut MockExecutor) {
    mock.expect_exec()
        .withf(|args| first(args, "version") || first(args, "info"))
        .returning(|_| Ok("27.1.1\n".to_owned()));
    mock.expect_exec()
        .withf(|args| first(args, "buildx"))
        .returning(|_| Ok("github.com/docker/buildx v0.16.1\n".to_owned()));
}

fn expect_image_id(mock: &mut MockExecutor) {
    mock.expect_exec()
        .withf(|args| has(args, "{{.Id}}"))
        .returning(|_| Ok("sha256:feedfacecafe0123\n".to_owned()));
}

fn expect_no_previous_image(mock: &mut MockExecutor) {
    mock.expect_exec()
        .withf(|args| has(args, "{{json .Config.Labels}}"))
        .returning(|_| {
            Err(DockerError::CommandFailed {
                args: vec![],
                code: Some(1),
                stderr: "Error: No such image: auth-api:latest".to_owned(),
            })
        });
}

fn completed_steps(steps: &[berth_engine::StepOutcome]) -> Vec<PipelineStep> {
    steps.iter().map(|s| s.step).collect()
}

#[tokio::test]
async fn pipeline_runs_every_step_in_order() {
    let tmp = project();
    let config = BerthConfig::default();

    let mut mock = MockExecutor::new();
    expect_preflight(&mut mock);
    expect_no_previous_image(&mut mock);
    mock.expect_exec_tee()
        .withf(|args| first(args, "build") && has(args, "auth-api:latest"))
        .times(1)
        .returning(|_| {
            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        });
    expect_image_id(&mut mock);

    let client = DockerClient::with_executor(mock);
    let report = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap();

    assert_eq!(completed_steps(&report.steps), PipelineStep::ORDER.to_vec());
    assert_eq!(report.image_id, "sha256:feedfacecafe0123");
    assert!(report.invalidated.is_none());
    assert!(!report.ejected);

    // dev dependencies stay out of the image
    assert!(report.resolved.contains("fastapi"));
    assert!(report.resolved.contains("starlette"));
    assert!(!report.resolved.contains("pytest"));

    let bundle = tmp.path().join(".berth-bundle");
    assert!(bundle.join("Dockerfile").exists());
    assert!(bundle.join("run.py").exists());
    assert!(bundle.join("poetry.lock").exists());
}

#[tokio::test]
async fn pipeline_records_stage_labels_and_reuse() {
    let tmp = project();
    let config = BerthConfig::default();

    let plan = BuildPlan::from_config(&config).unwrap();
    let tree = SourceTree::discover(tmp.path()).unwrap();
    let chain = LayerChain::compute(&plan, &tree).unwrap();

    // previous image matches stages 1-3; the application stage changed
    let mut previous: serde_json::Map<String, serde_json::Value> = chain
        .labels()
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    previous.insert(
        "berth.stage.4".to_owned(),
        serde_json::Value::String("stale".to_owned()),
    );
    let previous = serde_json::Value::Object(previous).to_string();

    let expected_label = format!(
        "berth.stage.3={}",
        chain.stage_key(StageKind::DependencyInstall).unwrap()
    );

    let mut mock = MockExecutor::new();
    expect_preflight(&mut mock);
    mock.expect_exec()
        .withf(|args| has(args, "{{json .Config.Labels}}"))
        .returning(move |_| Ok(previous.clone()));
    mock.expect_exec_tee()
        .withf(move |args| has(args, &expected_label))
        .times(1)
        .returning(|_| {
            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        });
    expect_image_id(&mut mock);

    let client = DockerClient::with_executor(mock);
    let report = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.invalidated,
        Some(vec![StageKind::ApplicationAssembly])
    );
}

#[tokio::test]
async fn missing_lock_stops_before_docker() {
    let tmp = project();
    std::fs::remove_file(tmp.path().join("poetry.lock")).unwrap();
    let config = BerthConfig::default();

    // no expectations: any docker call would panic
    let client = DockerClient::with_executor(MockExecutor::new());
    let err = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.step, PipelineStep::VerifyLock);
    assert_eq!(completed_steps(&err.completed), vec![PipelineStep::Plan]);
    assert!(matches!(
        err.source,
        StepError::Manifest(berth_core::Error::LockMissing(_))
    ));
}

#[tokio::test]
async fn stale_lock_stops_pipeline() {
    let tmp = project();
    std::fs::write(
        tmp.path().join("pyproject.toml"),
        PYPROJECT.replace("fastapi = \"^0.110\"", "fastapi = \"^0.110\"\nhttpx = \"^0.27\""),
    )
    .unwrap();
    let config = BerthConfig::default();

    let client = DockerClient::with_executor(MockExecutor::new());
    let err = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.step, PipelineStep::VerifyLock);
    match err.source {
        StepError::Manifest(berth_core::Error::LockOutOfDate { missing }) => {
            assert_eq!(missing, vec!["httpx".to_owned()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn stale_lock_tolerated_when_verification_disabled() {
    let tmp = project();
    std::fs::write(
        tmp.path().join("pyproject.toml"),
        PYPROJECT.replace("fastapi = \"^0.110\"", "fastapi = \"^0.110\"\nhttpx = \"^0.27\""),
    )
    .unwrap();
    let mut config = BerthConfig::default();
    config.dependencies.verify_lock = false;

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| first(args, "version") || first(args, "info"))
        .returning(|_| {
            Err(DockerError::CommandFailed {
                args: vec![],
                code: Some(1),
                stderr: "Cannot connect to the Docker daemon".to_owned(),
            })
        });

    let client = DockerClient::with_executor(mock);
    let err = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.step, PipelineStep::Preflight);
    let verify = &err.completed[1];
    assert_eq!(verify.step, PipelineStep::VerifyLock);
    assert!(verify.detail.starts_with("2 runtime packages"), "{}", verify.detail);
}

#[tokio::test]
async fn invalid_config_fails_first_step() {
    let tmp = project();
    let mut config = BerthConfig::default();
    config.image.base_image = "python:latest".to_owned();

    let client = DockerClient::with_executor(MockExecutor::new());
    let err = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.step, PipelineStep::Plan);
    assert!(err.completed.is_empty());
}

#[tokio::test]
async fn daemon_down_stops_at_preflight() {
    let tmp = project();
    let config = BerthConfig::default();

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| first(args, "version") || first(args, "info"))
        .returning(|_| {
            Err(DockerError::CommandFailed {
                args: vec![],
                code: Some(1),
                stderr: "Cannot connect to the Docker daemon".to_owned(),
            })
        });

    let client = DockerClient::with_executor(mock);
    let err = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.step, PipelineStep::Preflight);
    assert_eq!(
        completed_steps(&err.completed),
        vec![PipelineStep::Plan, PipelineStep::VerifyLock]
    );
    assert!(!tmp.path().join(".berth-bundle").exists());
}

#[tokio::test]
async fn failed_build_reports_stage_and_completed_steps() {
    let tmp = project();
    let config = BerthConfig::default();

    let mut mock = MockExecutor::new();
    expect_preflight(&mut mock);
    expect_no_previous_image(&mut mock);
    mock.expect_exec_tee().returning(|_| {
        Ok(CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "ERROR: failed to solve: python:3.11-slim: failed to resolve source metadata for docker.io/library/python:3.11-slim: not found\n".to_owned(),
        })
    });

    let client = DockerClient::with_executor(mock);
    let err = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.step, PipelineStep::Build);
    assert_eq!(err.completed.len(), PipelineStep::ORDER.len() - 1);
    match &err.source {
        StepError::Build(build) => {
            assert_eq!(build.kind(), Some(FailureKind::BaseImageUnavailable));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("'build'"));
}

#[tokio::test]
async fn ejected_dockerfile_is_used_verbatim() {
    let tmp = project();
    let custom = "FROM python:3.12-slim\nCOPY . .\nCMD [\"python\", \"run.py\"]\n";
    berth_build::eject::eject(tmp.path(), custom).unwrap();
    let config = BerthConfig::default();

    let mut mock = MockExecutor::new();
    expect_preflight(&mut mock);
    mock.expect_exec_tee()
        .withf(|args| !args.iter().any(|a| a.starts_with("berth.stage.")))
        .times(1)
        .returning(|_| {
            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        });
    expect_image_id(&mut mock);

    let client = DockerClient::with_executor(mock);
    let report = BuildPipeline::new(&client, tmp.path(), &config, "auth-api:latest")
        .run()
        .await
        .unwrap();

    assert!(report.ejected);
    assert!(report.invalidated.is_none());
    let bundled = std::fs::read_to_string(tmp.path().join(".berth-bundle/Dockerfile")).unwrap();
    assert_eq!(bundled, custom);
    assert!(!Path::new(&tmp.path().join(".berth-bundle/.berth")).exists());
}
