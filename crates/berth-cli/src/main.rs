mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "berth",
    about = "Build reproducible container images for Poetry-managed Python services"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a berth.toml template into a Poetry project
    Init,
    /// Print the generated Dockerfile
    Render,
    /// Eject the Dockerfile for manual customization
    Eject,
    /// Show build stages, instructions, and layer cache keys
    Plan {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify the lock file and print the runtime dependency set
    Check {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Build the image with Docker
    Build {
        /// Image tag (default: <project>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
    },
    /// Run the built image
    Run {
        /// Image tag (default: <project>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Env file injected into the container (default: service.env_file)
        #[arg(long)]
        env_file: Option<std::path::PathBuf>,
        /// Run in the background and print the container id
        #[arg(long, short = 'd')]
        detach: bool,
        /// Host port published to the service port (default: service.port)
        #[arg(long, short = 'p')]
        host_port: Option<u16>,
        /// Container name
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the lifecycle state of a container
    Status {
        /// Container name or id
        container: String,
    },
    /// Stop and remove a container
    Stop {
        /// Container name or id
        container: String,
        /// Keep the stopped container
        #[arg(long)]
        keep: bool,
    },
    /// Check Docker setup and project readiness
    Doctor,
    /// Download the dependency manager installer and print its sha256
    PinInstaller {
        /// Installer URL (default: installer.url)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Render => commands::render().await?,
        Commands::Eject => commands::eject().await?,
        Commands::Plan { json } => commands::plan(json).await?,
        Commands::Check { json } => commands::check(json).await?,
        Commands::Build { tag } => commands::build(tag).await?,
        Commands::Run {
            tag,
            env_file,
            detach,
            host_port,
            name,
        } => {
            let code = commands::run(commands::RunArgs {
                tag,
                env_file,
                detach,
                host_port,
                name,
            })
            .await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Status { container } => commands::status(&container).await?,
        Commands::Stop { container, keep } => commands::stop(&container, keep).await?,
        Commands::Doctor => commands::doctor().await?,
        Commands::PinInstaller { url } => commands::pin_installer(url).await?,
    }

    Ok(())
}
