//! Hand-maintained build recipes.
//!
//! Ejecting freezes the rendered recipe into `.berth/Dockerfile`. From then
//! on the pipeline builds that file as written: no layer keys, no stage
//! labels, and failures are classified from builder output alone.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory holding project-owned build files. Never part of the context.
pub const EJECT_DIR: &str = ".berth";

pub fn ejected_path(project_dir: &Path) -> PathBuf {
    project_dir.join(EJECT_DIR).join("Dockerfile")
}

/// Write `dockerfile_content` as the project's ejected recipe.
///
/// Refuses to replace an existing file; the recipe is the user's from the
/// moment it is written.
pub fn eject(project_dir: &Path, dockerfile_content: &str) -> Result<PathBuf, EjectError> {
    let dir = project_dir.join(EJECT_DIR);
    std::fs::create_dir_all(&dir).map_err(|e| EjectError::Io {
        action: "create",
        path: dir,
        source: e,
    })?;

    let path = ejected_path(project_dir);
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(EjectError::AlreadyEjected(path));
        }
        Err(e) => {
            return Err(EjectError::Io {
                action: "create",
                path,
                source: e,
            });
        }
    };

    file.write_all(dockerfile_content.as_bytes())
        .map_err(|e| EjectError::Io {
            action: "write",
            path: path.clone(),
            source: e,
        })?;

    tracing::info!(path = %path.display(), "recipe ejected");
    Ok(path)
}

pub fn is_ejected(project_dir: &Path) -> bool {
    ejected_path(project_dir).is_file()
}

/// Read the ejected recipe for a build.
///
/// The file must reach a `FROM` instruction before any other build step;
/// only comments, blank lines and `ARG` may precede it.
pub fn load_ejected_dockerfile(project_dir: &Path) -> Result<String, EjectError> {
    let path = ejected_path(project_dir);
    let content = std::fs::read_to_string(&path).map_err(|e| EjectError::Io {
        action: "read",
        path: path.clone(),
        source: e,
    })?;

    let first = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.split_whitespace().next().unwrap_or("").to_ascii_uppercase())
        .find(|keyword| keyword != "ARG");

    match first.as_deref() {
        Some("FROM") => Ok(content),
        found => Err(EjectError::MissingFrom {
            path,
            found: found.map(str::to_owned),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("recipe already ejected to {0}; edit it in place, or delete it to eject again")]
    AlreadyEjected(PathBuf),

    #[error(
        "ejected recipe {path} must start with FROM{}",
        .found.as_ref().map(|k| format!(" (first instruction is {k})")).unwrap_or_default()
    )]
    MissingFrom { path: PathBuf, found: Option<String> },

    #[error("failed to {action} {path}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ejected(content: &str) -> TempDir {
        let tmp = TempDir::new().unwrap();
        eject(tmp.path(), content).unwrap();
        tmp
    }

    #[test]
    fn args_and_comments_may_precede_from() {
        let tmp = ejected("# syntax=docker/dockerfile:1\n\nARG PY=3.12\nfrom python:${PY}-slim\n");
        assert!(load_ejected_dockerfile(tmp.path()).is_ok());
    }

    #[test]
    fn recipe_without_from_is_rejected() {
        let tmp = ejected("# nothing here\nRUN echo hi\n");
        let err = load_ejected_dockerfile(tmp.path()).unwrap_err();
        assert!(matches!(
            &err,
            EjectError::MissingFrom { found: Some(k), .. } if k == "RUN"
        ));
        assert!(err.to_string().contains("first instruction is RUN"));
    }

    #[test]
    fn empty_recipe_is_rejected() {
        let tmp = ejected("");
        assert!(matches!(
            load_ejected_dockerfile(tmp.path()),
            Err(EjectError::MissingFrom { found: None, .. })
        ));
    }

    #[test]
    fn directory_in_place_of_recipe_is_not_ejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(ejected_path(tmp.path())).unwrap();
        assert!(!is_ejected(tmp.path()));
    }
}
