use berth_core::BerthConfig;
use berth_engine::{ContainerState, DockerClient, LifecycleEvent, RunOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

pub struct RunArgs {
    pub tag: Option<String>,
    pub env_file: Option<PathBuf>,
    pub detach: bool,
    pub host_port: Option<u16>,
    pub name: Option<String>,
}

/// Start the image. Returns the container's exit code for foreground runs,
/// `0` once a detached container is started.
pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    config.validate()?;

    let tag = match args.tag {
        Some(tag) => tag,
        None => super::default_tag(&project_dir, &config)?,
    };

    let env_file = args
        .env_file
        .or_else(|| config.service.env_file.as_ref().map(PathBuf::from));
    let env = match &env_file {
        Some(path) => read_env_file(path)?,
        None => Vec::new(),
    };

    let opts = RunOptions {
        name: args.name,
        host_port: args.host_port.unwrap_or(config.service.port),
        container_port: config.service.port,
        env,
        tty: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
    };

    let client = DockerClient::new();

    if args.detach {
        let id = client.run_detached(&tag, &opts).await?;
        let state = client.container_state(&id).await?;
        println!("{id}");
        eprintln!(
            "{tag} {state} on http://localhost:{port}",
            port = opts.host_port
        );
        return Ok(0);
    }

    eprintln!(
        "Running {tag} on http://localhost:{port} (Ctrl-C to stop)",
        port = opts.host_port
    );
    let code = client.run_foreground(&tag, &opts).await?;

    let state = ContainerState::Built
        .apply(LifecycleEvent::Start)?
        .apply(LifecycleEvent::Exit {
            code: i64::from(code),
        })?;
    tracing::info!(%state, "container finished");

    Ok(code)
}

/// Runtime configuration for the container, never baked into the image.
fn read_env_file(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| anyhow::anyhow!("failed to read env file {}: {e}", path.display()))?;
    let mut vars = Vec::new();
    for item in iter {
        let (key, value) =
            item.map_err(|e| anyhow::anyhow!("invalid entry in {}: {e}", path.display()))?;
        vars.push((key, value));
    }
    tracing::debug!(path = %path.display(), count = vars.len(), "env file loaded");
    Ok(vars)
}

pub async fn status(container: &str) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let state = client.container_state(container).await?;
    println!("{container}: {state}");
    Ok(())
}

pub async fn stop(container: &str, keep: bool) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let before = client.container_state(container).await?;

    if before.is_running() {
        client.stop_container(container).await?;
    }
    let after = client.container_state(container).await?;
    match after.exit_code() {
        Some(code) => println!("{container}: stopped (exit code {code})"),
        None => println!("{container}: {after}"),
    }

    if !keep {
        client.remove_container(container).await?;
        println!("{container}: removed");
    }
    Ok(())
}
