use std::path::Path;

const BERTH_TOML: &str = r#"# berth build configuration. Every value below is the default.

[project]
# name = "my-service"

[image]
# base_image = "python:3.11-slim"   # must be pinned: a tag other than "latest", or @sha256:...
# workdir = "/app"
# extra_packages = ["curl"]

# [image.env]
# TZ = "UTC"

[installer]
# url = "https://install.python-poetry.org"
# bin_dir = "/root/.local/bin"
# version = "1.8.3"
# sha256 = ""                        # run `berth pin-installer` to compute

[dependencies]
# manifest = "pyproject.toml"
# lock = "poetry.lock"
# groups = ["main"]
# install_root = false
# verify_lock = true                 # also skips the local lock check in `berth build`

[service]
# port = 8000
# interpreter = "python"
# entry = "run.py"
# args = []
# env_file = ".env"
"#;

const GITIGNORE_ENTRY: &str = ".berth-bundle/";

/// Initialize berth in an existing Poetry project.
pub async fn init_project() -> anyhow::Result<()> {
    if !Path::new("pyproject.toml").exists() {
        anyhow::bail!("pyproject.toml not found. Run this command from a Poetry project root.");
    }

    let mut created = Vec::new();

    let config_path = Path::new(berth_core::config::CONFIG_FILE);
    if config_path.exists() {
        eprintln!("berth.toml already exists, skipping");
    } else {
        std::fs::write(config_path, BERTH_TOML)?;
        created.push("berth.toml");
    }

    let gitignore_path = Path::new(".gitignore");
    let gitignore = if gitignore_path.exists() {
        std::fs::read_to_string(gitignore_path)?
    } else {
        String::new()
    };
    if !gitignore.lines().any(|l| l.trim() == GITIGNORE_ENTRY) {
        let mut updated = gitignore;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(GITIGNORE_ENTRY);
        updated.push('\n');
        std::fs::write(gitignore_path, updated)?;
        created.push(".gitignore entry");
    }

    if created.is_empty() {
        println!("Nothing to create, already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Lock dependencies:");
    println!("     poetry lock");
    println!();
    println!("  2. Check the lock and preview the image:");
    println!("     berth check");
    println!("     berth plan");
    println!();
    println!("  3. Build and run:");
    println!("     berth build");
    println!("     berth run --env-file .env");

    Ok(())
}
