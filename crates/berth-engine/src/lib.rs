//! Docker integration for berth: image builds, container lifecycle, build
//! failure classification, and the ordered build pipeline.
//!
//! All engine access goes through [`DockerExecutor`], so everything above the
//! process boundary is testable with a mock executor.

pub mod client;
pub mod docker;
pub mod executor;
pub mod failure;
pub mod lifecycle;
pub mod pipeline;

pub use client::{
    BuildError, CheckResult, DockerClient, DoctorReport, ImageError, PreflightError,
    PreflightReport, RunError, RunOptions,
};
pub use docker::{CommandOutput, DockerError};
pub use executor::{DockerExecutor, RealExecutor};
pub use failure::{Diagnosis, FailureKind};
pub use lifecycle::{ContainerState, LifecycleError, LifecycleEvent};
pub use pipeline::{BuildPipeline, PipelineError, PipelineReport, PipelineStep, StepError, StepOutcome};
