//! Classification of failed image builds.
//!
//! Every build failure is fatal. The classifier only decides which stage
//! failed and why, from the builder's output.

use std::fmt;

use berth_build::{BuildPlan, CopySource, Instruction, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The pinned base image could not be pulled.
    BaseImageUnavailable,
    /// Fetching or running the dependency manager installer failed.
    DependencyManagerInstall,
    /// The dependency install failed or the lock no longer matches the manifest.
    DependencyResolution,
    /// A file named by a COPY instruction is missing from the build context.
    SourceCopy,
    Unknown,
}

impl FailureKind {
    pub fn hint(self) -> &'static str {
        match self {
            Self::BaseImageUnavailable => {
                "check the base image reference and registry access; builds never fall back to another tag"
            }
            Self::DependencyManagerInstall => {
                "check network access to the installer URL and, if pinned, the installer sha256"
            }
            Self::DependencyResolution => {
                "run `poetry lock` locally and commit the lock file; `berth check` reports missing pins"
            }
            Self::SourceCopy => "make sure the file exists and is not excluded by .gitignore",
            Self::Unknown => "see the builder output above",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BaseImageUnavailable => "base image unavailable",
            Self::DependencyManagerInstall => "dependency manager install failed",
            Self::DependencyResolution => "dependency resolution failed",
            Self::SourceCopy => "source copy failed",
            Self::Unknown => "build failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: FailureKind,
    /// `None` when the failing stage cannot be identified, e.g. for an
    /// ejected Dockerfile.
    pub stage: Option<StageKind>,
    /// The builder's error line.
    pub detail: String,
}

/// Classify builder output. With a plan, RUN and COPY failures are matched
/// back to the stage that owns the instruction; without one, only textual
/// heuristics apply.
pub fn diagnose(output: &str, plan: Option<&BuildPlan>) -> Diagnosis {
    let detail = error_line(output);

    if let Some(command) = failed_command(&detail) {
        let stage = plan.and_then(|p| stage_of_run(p, &command));
        let kind = match stage {
            Some(StageKind::DependencyManager) => FailureKind::DependencyManagerInstall,
            Some(StageKind::DependencyInstall) => FailureKind::DependencyResolution,
            Some(_) => FailureKind::Unknown,
            None => kind_from_command(&command),
        };
        let stage = stage.or(match kind {
            FailureKind::DependencyManagerInstall if plan.is_some() => {
                Some(StageKind::DependencyManager)
            }
            FailureKind::DependencyResolution if plan.is_some() => {
                Some(StageKind::DependencyInstall)
            }
            _ => None,
        });
        return Diagnosis {
            kind,
            stage,
            detail,
        };
    }

    let lower = detail.to_ascii_lowercase();

    if lower.contains("failed to compute cache key")
        || lower.contains("failed to calculate checksum")
        || lower.contains("copy failed")
    {
        let stage = plan.map(|p| stage_of_copy(p, quoted_path(&detail).as_deref()));
        return Diagnosis {
            kind: FailureKind::SourceCopy,
            stage,
            detail,
        };
    }

    let base_image = plan.map(BuildPlan::base_image);
    let mentions_base = base_image.is_some_and(|image| !image.is_empty() && detail.contains(image));
    if lower.contains("failed to resolve source metadata")
        || lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || (mentions_base && lower.contains("not found"))
    {
        return Diagnosis {
            kind: FailureKind::BaseImageUnavailable,
            stage: plan.map(|_| StageKind::BaseEnvironment),
            detail,
        };
    }

    Diagnosis {
        kind: FailureKind::Unknown,
        stage: None,
        detail,
    }
}

/// The line that best describes the failure: the last one carrying an error
/// marker, or the last non-empty line.
fn error_line(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find(|l| {
            l.contains("ERROR")
                || l.contains("failed to solve")
                || l.contains("returned a non-zero code")
        })
        .or_else(|| lines.last())
        .map(|l| (*l).to_owned())
        .unwrap_or_default()
}

/// Extract the shell command from a failed RUN, in both BuildKit and legacy
/// builder formats.
fn failed_command(detail: &str) -> Option<String> {
    const BUILDKIT: (&str, &str) = ("process \"/bin/sh -c ", "\" did not complete");
    const LEGACY: (&str, &str) = ("The command '/bin/sh -c ", "' returned a non-zero code");

    for (open, close) in [BUILDKIT, LEGACY] {
        if let Some(start) = detail.find(open) {
            let rest = &detail[start + open.len()..];
            let end = rest.rfind(close).unwrap_or(rest.len());
            return Some(rest[..end].replace("\\\"", "\""));
        }
    }
    None
}

fn stage_of_run(plan: &BuildPlan, command: &str) -> Option<StageKind> {
    plan.stages().iter().find_map(|stage| {
        stage
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Run { command: c } if c == command))
            .then_some(stage.kind)
    })
}

fn kind_from_command(command: &str) -> FailureKind {
    if command.contains("poetry install") || command.contains("poetry check") {
        FailureKind::DependencyResolution
    } else if command.contains("install-poetry")
        || command.contains("install.python-poetry.org")
        || command.contains("apt-get")
    {
        FailureKind::DependencyManagerInstall
    } else {
        FailureKind::Unknown
    }
}

/// First double-quoted token, e.g. `"/poetry.lock"` in
/// `failed to compute cache key: "/poetry.lock": not found`.
fn quoted_path(detail: &str) -> Option<String> {
    let start = detail.find('"')? + 1;
    let len = detail[start..].find('"')?;
    Some(detail[start..start + len].trim_start_matches('/').to_owned())
}

fn stage_of_copy(plan: &BuildPlan, path: Option<&str>) -> StageKind {
    let Some(path) = path else {
        return StageKind::ApplicationAssembly;
    };

    for stage in plan.stages() {
        for instruction in &stage.instructions {
            if let Instruction::Copy {
                source: CopySource::Files(files),
                ..
            } = instruction
                && files.iter().any(|f| f.trim_start_matches("./") == path)
            {
                return stage.kind;
            }
        }
    }
    StageKind::ApplicationAssembly
}
