mod build;
mod check;
mod doctor;
mod eject;
mod init;
mod pin;
mod plan;
mod run;

use berth_core::{BerthConfig, DependencyManifest};
use std::path::Path;

pub use build::build;
pub use check::check;
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use pin::pin_installer;
pub use plan::{plan, render};
pub use run::{RunArgs, run, status, stop};

/// Default image tag: `<project>:latest`.
///
/// The project name comes from `[project].name` in berth.toml, then the
/// manifest's package name, then the directory name.
pub(crate) fn default_tag(project_dir: &Path, config: &BerthConfig) -> anyhow::Result<String> {
    let name = match &config.project.name {
        Some(name) => name.clone(),
        None => match DependencyManifest::load(project_dir, &config.dependencies) {
            Ok(manifest) => match manifest.project_name {
                Some(name) => name,
                None => dir_name(project_dir)?,
            },
            Err(e) => {
                tracing::debug!(error = %e, "manifest unavailable; naming image after directory");
                dir_name(project_dir)?
            }
        },
    };

    Ok(format!("{}:latest", image_name(&name)))
}

fn dir_name(project_dir: &Path) -> anyhow::Result<String> {
    let dir = std::fs::canonicalize(project_dir)?;
    Ok(dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_owned()))
}

/// Docker repository names are lowercase `[a-z0-9._-]`, starting with an
/// alphanumeric.
fn image_name(name: &str) -> String {
    let sanitized: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        "app".to_owned()
    } else {
        trimmed.to_owned()
    }
}
