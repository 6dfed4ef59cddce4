//! Build plan, Dockerfile generation, layer cache keys, and build context
//! for berth.
//!
//! # Image stages
//!
//! ```text
//! BuildPlan::from_config()
//!   1. Base environment   ── FROM <pinned image>, ENV PYTHONDONTWRITEBYTECODE/PYTHONUNBUFFERED
//!   2. Dependency manager ── fetch + run Poetry installer, ENV PATH="<bin>:$PATH"
//!   3. Dependencies       ── WORKDIR, COPY pyproject.toml poetry.lock, poetry install --no-root --only main
//!   4. Application        ── COPY . ., EXPOSE <port>, CMD ["poetry", "run", "python", "-B", <entry>]
//! ```
//!
//! Stage 3 copies only the manifest pair, so its layers stay cached while the
//! pair is unchanged no matter how the rest of the source moves. Stage 4 is
//! the only stage invalidated by source edits. [`LayerChain`] computes the
//! cache identity of every layer so both properties can be checked without a
//! container engine.
//!
//! # Build context
//!
//! The context mirrors the project:
//! - All tracked and untracked (non-ignored) files via `git ls-files`, or an
//!   ignore-aware directory walk outside git
//! - `.berth-bundle/`, `.berth/`, `.git/` are always excluded
//! - The generated `Dockerfile` and `.dockerignore` are written last and kept
//!   out of `COPY . .`

pub mod context;
pub mod dockerfile;
pub mod eject;
pub mod layers;
pub mod plan;

pub use context::{ContextError, SourceTree, create_bundle};
pub use dockerfile::DockerfileGenerator;
pub use layers::{Layer, LayerChain, LayerError};
pub use plan::{BuildPlan, CopySource, Instruction, PlanError, Stage, StageKind};
