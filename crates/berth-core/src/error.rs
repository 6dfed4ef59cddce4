use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    // ── Dependency manifest ──
    #[error("dependency manifest not found at {0} — berth expects a Poetry project")]
    ManifestMissing(PathBuf),

    #[error("lock file not found at {0} — run `poetry lock` and commit the result")]
    LockMissing(PathBuf),

    #[error("failed to read {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    ManifestParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{path} declares no Poetry or PEP 621 project metadata")]
    NotAPoetryProject { path: PathBuf },

    #[error(
        "lock file is out of date; missing pins for: {}; run `poetry lock`",
        missing.join(", ")
    )]
    LockOutOfDate { missing: Vec<String> },

    #[error("dependency group '{0}' is not declared in the manifest")]
    UnknownGroup(String),
}
