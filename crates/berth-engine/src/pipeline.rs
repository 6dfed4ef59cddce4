//! The ordered build pipeline.
//!
//! ```text
//! plan → verify-lock → preflight → render → scan-sources → bundle → build
//! ```
//!
//! Each step is fallible. The first failure stops the pipeline and the error
//! names the failing step together with the steps already completed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use berth_build::eject::{self, EjectError};
use berth_build::{
    BuildPlan, ContextError, DockerfileGenerator, LayerChain, LayerError, PlanError, SourceTree,
    StageKind, create_bundle,
};
use berth_core::{BerthConfig, DependencyManifest, ResolvedSet};

use crate::client::{BuildError, DockerClient, ImageError, PreflightError};
use crate::executor::DockerExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Plan,
    VerifyLock,
    Preflight,
    Render,
    ScanSources,
    Bundle,
    Build,
}

impl PipelineStep {
    pub const ORDER: [PipelineStep; 7] = [
        Self::Plan,
        Self::VerifyLock,
        Self::Preflight,
        Self::Render,
        Self::ScanSources,
        Self::Bundle,
        Self::Build,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::VerifyLock => "verify-lock",
            Self::Preflight => "preflight",
            Self::Render => "render",
            Self::ScanSources => "scan-sources",
            Self::Bundle => "bundle",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: PipelineStep,
    pub detail: String,
    pub elapsed: Duration,
}

/// Result of a successful pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub tag: String,
    pub image_id: String,
    pub resolved: ResolvedSet,
    pub steps: Vec<StepOutcome>,
    /// Stages rebuilt relative to the previous image under the same tag.
    /// `None` when there was no previous image or the Dockerfile is ejected.
    pub invalidated: Option<Vec<StageKind>>,
    pub ejected: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("build pipeline failed at step '{step}'")]
pub struct PipelineError {
    pub step: PipelineStep,
    pub completed: Vec<StepOutcome>,
    #[source]
    pub source: StepError,
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Manifest(#[from] berth_core::Error),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Eject(#[from] EjectError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Layers(#[from] LayerError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("step '{0}' produced no output")]
    MissingOutput(PipelineStep),
}

/// Values handed from one step to the next.
#[derive(Default)]
struct State {
    plan: Option<BuildPlan>,
    resolved: Option<ResolvedSet>,
    dockerfile: Option<String>,
    ejected: bool,
    tree: Option<SourceTree>,
    chain: Option<LayerChain>,
    bundle_dir: Option<PathBuf>,
    image_id: Option<String>,
    invalidated: Option<Vec<StageKind>>,
}

fn require<T>(slot: &Option<T>, producer: PipelineStep) -> Result<&T, StepError> {
    slot.as_ref().ok_or(StepError::MissingOutput(producer))
}

pub struct BuildPipeline<'a, E: DockerExecutor> {
    client: &'a DockerClient<E>,
    project_dir: &'a Path,
    config: &'a BerthConfig,
    tag: &'a str,
}

impl<'a, E: DockerExecutor> BuildPipeline<'a, E> {
    pub fn new(
        client: &'a DockerClient<E>,
        project_dir: &'a Path,
        config: &'a BerthConfig,
        tag: &'a str,
    ) -> Self {
        Self {
            client,
            project_dir,
            config,
            tag,
        }
    }

    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let mut state = State::default();
        let mut completed = Vec::with_capacity(PipelineStep::ORDER.len());

        for step in PipelineStep::ORDER {
            let started = Instant::now();
            match self.execute(step, &mut state).await {
                Ok(detail) => {
                    let elapsed = started.elapsed();
                    tracing::info!(%step, %detail, ?elapsed, "step completed");
                    completed.push(StepOutcome {
                        step,
                        detail,
                        elapsed,
                    });
                }
                Err(source) => {
                    tracing::debug!(%step, error = %source, "step failed");
                    return Err(PipelineError {
                        step,
                        completed,
                        source,
                    });
                }
            }
        }

        let (Some(resolved), Some(image_id)) = (state.resolved.take(), state.image_id.take())
        else {
            return Err(PipelineError {
                step: PipelineStep::Build,
                completed,
                source: StepError::MissingOutput(PipelineStep::Build),
            });
        };

        Ok(PipelineReport {
            tag: self.tag.to_owned(),
            image_id,
            resolved,
            steps: completed,
            invalidated: state.invalidated,
            ejected: state.ejected,
        })
    }

    async fn execute(&self, step: PipelineStep, state: &mut State) -> Result<String, StepError> {
        match step {
            PipelineStep::Plan => {
                let plan = BuildPlan::from_config(self.config)?;
                let detail = format!(
                    "{} stages from {}",
                    plan.stages().len(),
                    plan.base_image()
                );
                state.plan = Some(plan);
                Ok(detail)
            }

            PipelineStep::VerifyLock => {
                let deps = &self.config.dependencies;
                let manifest = DependencyManifest::load(self.project_dir, deps)?;
                let resolved = if deps.verify_lock {
                    manifest.resolve(&deps.groups)?
                } else {
                    tracing::warn!("lock verification disabled; unpinned requirements are not reported");
                    manifest.resolve_unverified(&deps.groups)?
                };
                let fingerprint = resolved.fingerprint();
                let detail = format!(
                    "{} runtime packages (fingerprint {})",
                    resolved.len(),
                    &fingerprint[..12.min(fingerprint.len())]
                );
                state.resolved = Some(resolved);
                Ok(detail)
            }

            PipelineStep::Preflight => {
                let report = self.client.check_prerequisites().await?;
                if report.has_warnings() {
                    tracing::warn!("BuildKit not available; using the legacy builder");
                }
                Ok(format!(
                    "docker {} (daemon {})",
                    report.client_version.as_deref().unwrap_or("unknown"),
                    report.server_version.as_deref().unwrap_or("unknown"),
                ))
            }

            PipelineStep::Render => {
                if eject::is_ejected(self.project_dir) {
                    state.dockerfile = Some(eject::load_ejected_dockerfile(self.project_dir)?);
                    state.ejected = true;
                    Ok("using ejected .berth/Dockerfile".to_owned())
                } else {
                    let plan = require(&state.plan, PipelineStep::Plan)?;
                    state.dockerfile = Some(DockerfileGenerator::new(plan).render());
                    Ok("Dockerfile generated".to_owned())
                }
            }

            PipelineStep::ScanSources => {
                let tree = SourceTree::discover(self.project_dir)?;
                let detail = format!("{} files", tree.files().len());
                if !state.ejected {
                    let plan = require(&state.plan, PipelineStep::Plan)?;
                    state.chain = Some(LayerChain::compute(plan, &tree)?);
                }
                state.tree = Some(tree);
                Ok(detail)
            }

            PipelineStep::Bundle => {
                let tree = require(&state.tree, PipelineStep::ScanSources)?;
                let dockerfile = require(&state.dockerfile, PipelineStep::Render)?;
                let bundle_dir = create_bundle(tree, dockerfile)?;
                let detail = format!("context at {}", bundle_dir.display());
                state.bundle_dir = Some(bundle_dir);
                Ok(detail)
            }

            PipelineStep::Build => {
                let bundle_dir = require(&state.bundle_dir, PipelineStep::Bundle)?;

                let labels = match &state.chain {
                    Some(chain) => {
                        if let Some(previous) = self.client.image_labels(self.tag).await? {
                            let invalidated = chain.invalidated_since(&previous);
                            tracing::info!(
                                reused = StageKind::ALL.len() - invalidated.len(),
                                rebuilt = invalidated.len(),
                                "compared with previous image"
                            );
                            state.invalidated = Some(invalidated);
                        }
                        chain.labels()
                    }
                    None => Vec::new(),
                };

                let plan = if state.ejected {
                    None
                } else {
                    state.plan.as_ref()
                };
                let image_id = self
                    .client
                    .build_image(bundle_dir, self.tag, &labels, plan)
                    .await?;
                let detail = format!("{} ({})", self.tag, short_id(&image_id));
                state.image_id = Some(image_id);
                Ok(detail)
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    let hex = id.strip_prefix("sha256:").unwrap_or(id);
    &hex[..12.min(hex.len())]
}
