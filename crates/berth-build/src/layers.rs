//! Layer cache identities.
//!
//! Each instruction gets a key derived from its parent's key, its rendered
//! text, and the content of whatever it copies from the build context. Keys
//! therefore change exactly when the container engine's layer cache would
//! miss: a changed instruction or changed copied input invalidates that
//! layer and everything after it, and nothing before it.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::context::SourceTree;
use crate::plan::{BuildPlan, CopySource, Instruction, StageKind};

/// Image label prefix under which stage keys are recorded.
pub const STAGE_LABEL_PREFIX: &str = "berth.stage.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub stage: StageKind,
    pub instruction: String,
    pub key: String,
}

impl Layer {
    pub fn short_key(&self) -> &str {
        &self.key[..12.min(self.key.len())]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerChain {
    layers: Vec<Layer>,
}

impl LayerChain {
    /// Compute the key of every layer in `plan` against `tree`.
    ///
    /// # Errors
    ///
    /// [`LayerError::MissingInput`] when a `COPY` names a file that is not in
    /// the source tree (the build would fail at that copy).
    pub fn compute(plan: &BuildPlan, tree: &SourceTree) -> Result<Self, LayerError> {
        let mut layers = Vec::new();
        let mut parent = String::new();

        for stage in plan.stages() {
            for instruction in &stage.instructions {
                let text = instruction.to_string();
                let input = input_digest(instruction, tree)?;

                let mut hasher = Sha256::new();
                hasher.update(parent.as_bytes());
                hasher.update(b"\n");
                hasher.update(text.as_bytes());
                hasher.update(b"\n");
                hasher.update(input.as_bytes());
                let key = hex::encode(hasher.finalize());

                parent.clone_from(&key);
                layers.push(Layer {
                    stage: stage.kind,
                    instruction: text,
                    key,
                });
            }
        }

        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Key of the last layer of `kind`, which identifies the stage's output.
    pub fn stage_key(&self, kind: StageKind) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find(|l| l.stage == kind)
            .map(|l| l.key.as_str())
    }

    /// Index of the first layer whose key differs from `previous`, or `None`
    /// when every layer would be reused.
    pub fn first_invalidated(&self, previous: &LayerChain) -> Option<usize> {
        let shared = self
            .layers
            .iter()
            .zip(&previous.layers)
            .position(|(a, b)| a.key != b.key);
        match shared {
            Some(i) => Some(i),
            None if self.layers.len() > previous.layers.len() => Some(previous.layers.len()),
            None => None,
        }
    }

    /// Stages rebuilt when building this chain after `previous`.
    pub fn invalidated_stages(&self, previous: &LayerChain) -> Vec<StageKind> {
        self.compare(|kind| previous.stage_key(kind).map(str::to_owned))
    }

    /// `(label, key)` pairs recorded on the built image.
    pub fn labels(&self) -> Vec<(String, String)> {
        StageKind::ALL
            .iter()
            .filter_map(|kind| {
                self.stage_key(*kind)
                    .map(|key| (format!("{STAGE_LABEL_PREFIX}{}", kind.number()), key.to_owned()))
            })
            .collect()
    }

    /// Stages rebuilt relative to an image carrying `labels`.
    pub fn invalidated_since(&self, labels: &HashMap<String, String>) -> Vec<StageKind> {
        self.compare(|kind| {
            labels
                .get(&format!("{STAGE_LABEL_PREFIX}{}", kind.number()))
                .cloned()
        })
    }

    fn compare<F>(&self, previous_key: F) -> Vec<StageKind>
    where
        F: Fn(StageKind) -> Option<String>,
    {
        StageKind::ALL
            .iter()
            .copied()
            .filter(|kind| match (self.stage_key(*kind), previous_key(*kind)) {
                (Some(now), Some(before)) => now != before,
                _ => true,
            })
            .collect()
    }
}

fn input_digest(instruction: &Instruction, tree: &SourceTree) -> Result<String, LayerError> {
    let Instruction::Copy { source, .. } = instruction else {
        return Ok(String::new());
    };

    let mut hasher = Sha256::new();
    match source {
        CopySource::Files(files) => {
            for file in files {
                let relative = PathBuf::from(file);
                if !tree.contains(&relative) {
                    return Err(LayerError::MissingInput { path: relative });
                }
                hash_file(&mut hasher, tree.root(), &relative)?;
            }
        }
        CopySource::Context => {
            for relative in tree.files() {
                hash_file(&mut hasher, tree.root(), relative)?;
            }
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

fn hash_file(hasher: &mut Sha256, root: &Path, relative: &Path) -> Result<(), LayerError> {
    let path = root.join(relative);
    let mut file = File::open(&path).map_err(|e| LayerError::Read {
        path: path.clone(),
        source: e,
    })?;

    hasher.update(relative.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    io::copy(&mut file, hasher).map_err(|e| LayerError::Read { path, source: e })?;
    hasher.update([0u8]);
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("{path} is copied into the image but is not part of the source tree")]
    MissingInput { path: PathBuf },

    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
