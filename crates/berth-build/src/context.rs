use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Directory the build context is assembled in.
pub const BUNDLE_DIR: &str = ".berth-bundle";

/// Files/directories that berth always excludes from the source tree,
/// regardless of .gitignore content.
const BERTH_EXCLUDES: &[&str] = &[".berth-bundle", ".berth", ".git"];

/// Files berth generates into the context; project copies are ignored so they
/// never reach `COPY . .`.
const GENERATED_FILES: &[&str] = &["Dockerfile", ".dockerignore"];

/// The application source files that make up the build context.
///
/// Paths are relative to `root`, sorted, and unique, so digests over a tree
/// are stable across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl SourceTree {
    /// List the project's files.
    ///
    /// Inside a git work tree this is `git ls-files` (tracked plus untracked
    /// files that are not ignored). Elsewhere the directory is walked,
    /// honoring any `.gitignore` files.
    pub fn discover(project_dir: &Path) -> Result<Self, ContextError> {
        let files = if in_git_work_tree(project_dir) {
            git_ls_files(project_dir)?
        } else {
            tracing::debug!(
                dir = %project_dir.display(),
                "not a git work tree; walking directory"
            );
            walk_files(project_dir)?
        };

        let tree = Self::from_files(project_dir, files);
        tracing::debug!(files = tree.files.len(), "source tree discovered");
        Ok(tree)
    }

    pub fn from_files(root: &Path, files: Vec<PathBuf>) -> Self {
        let mut files: Vec<PathBuf> = files
            .into_iter()
            .filter(|p| !is_excluded(p))
            .collect();
        files.sort();
        files.dedup();
        Self {
            root: root.to_path_buf(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn contains(&self, relative: &Path) -> bool {
        self.files.binary_search_by(|f| f.as_path().cmp(relative)).is_ok()
    }
}

fn is_excluded(relative: &Path) -> bool {
    if BERTH_EXCLUDES.iter().any(|ex| relative.starts_with(ex)) {
        return true;
    }
    GENERATED_FILES.iter().any(|g| relative == Path::new(g))
}

/// Assembles the build context in `<project>/.berth-bundle/`: every file of
/// `tree`, the Dockerfile, and a `.dockerignore` that keeps the generated
/// files out of the image.
pub fn create_bundle(
    tree: &SourceTree,
    dockerfile_content: &str,
) -> Result<PathBuf, ContextError> {
    let bundle_dir = tree.root().join(BUNDLE_DIR);

    // Clean previous bundle
    if bundle_dir.exists() {
        std::fs::remove_dir_all(&bundle_dir).map_err(|e| ContextError::Cleanup {
            path: bundle_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&bundle_dir).map_err(|e| ContextError::Create {
        path: bundle_dir.clone(),
        source: e,
    })?;

    for relative_path in tree.files() {
        let src = tree.root().join(relative_path);
        let dst = bundle_dir.join(relative_path);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ContextError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::copy(&src, &dst).map_err(|e| ContextError::CopyFile {
            path: src,
            source: e,
        })?;
    }

    write_generated(&bundle_dir.join("Dockerfile"), dockerfile_content)?;
    write_generated(
        &bundle_dir.join(".dockerignore"),
        &format!("{}\n", GENERATED_FILES.join("\n")),
    )?;

    tracing::debug!(
        path = %bundle_dir.display(),
        files = tree.files().len(),
        "build context assembled"
    );

    Ok(bundle_dir)
}

fn write_generated(path: &Path, content: &str) -> Result<(), ContextError> {
    std::fs::write(path, content).map_err(|e| ContextError::WriteGenerated {
        path: path.to_path_buf(),
        source: e,
    })
}

fn in_git_work_tree(project_dir: &Path) -> bool {
    match Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(project_dir)
        .output()
    {
        Ok(output) => {
            output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
        }
        Err(e) => {
            tracing::debug!(error = %e, "git unavailable; falling back to directory walk");
            false
        }
    }
}

/// Returns the list of files git considers part of the project:
/// tracked files + untracked files that are not .gitignored.
///
/// Output is NUL-separated so paths come back byte-for-byte, without git's
/// C-style quoting of non-ASCII names.
fn git_ls_files(project_dir: &Path) -> Result<Vec<PathBuf>, ContextError> {
    let listed = run_ls_files(project_dir, &["--cached", "--others", "--exclude-standard"])?;
    let deleted: HashSet<PathBuf> = run_ls_files(project_dir, &["--deleted"])?
        .into_iter()
        .collect();

    let mut files = Vec::with_capacity(listed.len());
    for path in listed {
        if deleted.contains(&path) {
            tracing::debug!(path = %path.display(), "deleted in work tree; skipping");
            continue;
        }
        if project_dir.join(&path).is_dir() {
            tracing::warn!(path = %path.display(), "submodule is not copied into the build context");
            continue;
        }
        files.push(path);
    }

    Ok(files)
}

fn run_ls_files(project_dir: &Path, selection: &[&str]) -> Result<Vec<PathBuf>, ContextError> {
    let output = Command::new("git")
        .args(["ls-files", "-z"])
        .args(selection)
        .current_dir(project_dir)
        .output()
        .map_err(|e| ContextError::GitCommand {
            detail: "failed to execute git ls-files".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ContextError::GitFailed {
            detail: format!(
                "git ls-files exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    output
        .stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(path_from_bytes)
        .collect()
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf, ContextError> {
    use std::os::unix::ffi::OsStrExt;
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf, ContextError> {
    std::str::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| ContextError::GitFailed {
            detail: format!(
                "git ls-files returned a non-UTF-8 path: {}",
                String::from_utf8_lossy(bytes)
            ),
        })
}

fn walk_files(project_dir: &Path) -> Result<Vec<PathBuf>, ContextError> {
    let mut files = Vec::new();
    let walker = ignore::WalkBuilder::new(project_dir)
        .hidden(false)
        .require_git(false)
        .filter_entry(|e| e.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| ContextError::Walk {
            dir: project_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        match entry.path().strip_prefix(project_dir) {
            Ok(relative) => files.push(relative.to_path_buf()),
            Err(e) => tracing::warn!(
                path = %entry.path().display(),
                error = %e,
                "entry outside project directory; skipping"
            ),
        }
    }

    Ok(files)
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to clean up bundle directory {path}")]
    Cleanup {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    WriteGenerated {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk {dir}")]
    Walk {
        dir: std::path::PathBuf,
        source: ignore::Error,
    },
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
}
