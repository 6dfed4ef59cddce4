use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Name of the project-level configuration file.
pub const CONFIG_FILE: &str = "berth.toml";

/// Variables the base stage always sets to `1`; user-supplied `[image.env]`
/// may not redefine them.
pub const PYTHONDONTWRITEBYTECODE: &str = "PYTHONDONTWRITEBYTECODE";
pub const PYTHONUNBUFFERED: &str = "PYTHONUNBUFFERED";

/// berth.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub dependencies: DependencyConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Image name (defaults to the package name in pyproject.toml)
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Python runtime base image. Must carry a version tag or digest.
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// Working directory inside the image
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// System packages installed via apt-get before the Poetry installer runs
    #[serde(default = "default_extra_packages")]
    pub extra_packages: Vec<String>,
    /// Additional static environment variables baked into the image.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Location of the Poetry installer script
    #[serde(default = "default_installer_url")]
    pub url: String,
    /// Directory the installer places the `poetry` executable in
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,
    /// Poetry release to install (passed as POETRY_VERSION)
    #[serde(default)]
    pub version: Option<String>,
    /// Expected SHA-256 of the installer script. When set, the script is
    /// verified before it is executed.
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Human-authored dependency manifest
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Machine-generated lock file
    #[serde(default = "default_lock")]
    pub lock: String,
    /// Dependency groups installed into the image
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    /// Install the project itself as a package
    #[serde(default)]
    pub install_root: bool,
    /// Run `poetry check --lock` before installing
    #[serde(default = "default_true")]
    pub verify_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port the application listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interpreter launched through `poetry run`
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Script the interpreter executes
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Extra arguments appended after the entry script
    #[serde(default)]
    pub args: Vec<String>,
    /// Env file injected by `berth run` at container start
    #[serde(default)]
    pub env_file: Option<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            workdir: default_workdir(),
            extra_packages: default_extra_packages(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            url: default_installer_url(),
            bin_dir: default_bin_dir(),
            version: None,
            sha256: None,
        }
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            lock: default_lock(),
            groups: default_groups(),
            install_root: false,
            verify_lock: true,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            interpreter: default_interpreter(),
            entry: default_entry(),
            args: Vec::new(),
            env_file: None,
        }
    }
}

impl BerthConfig {
    /// Load from berth.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            tracing::debug!(path = %config_path.display(), "loading config");
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            tracing::debug!(dir = %project_dir.display(), "no berth.toml; using defaults");
            Ok(Self::default())
        }
    }

    /// Reject configurations that would produce a non-reproducible or
    /// unbootable image.
    pub fn validate(&self) -> crate::Result<()> {
        if !is_pinned_image(&self.image.base_image) {
            return Err(invalid(
                "image.base_image",
                format!(
                    "'{}' is not pinned; use an explicit version tag or @sha256 digest",
                    self.image.base_image
                ),
            ));
        }

        if !self.image.workdir.starts_with('/') {
            return Err(invalid(
                "image.workdir",
                format!("'{}' must be an absolute path", self.image.workdir),
            ));
        }

        check_line("image.base_image", &self.image.base_image)?;
        check_line("image.workdir", &self.image.workdir)?;
        for package in &self.image.extra_packages {
            check_line("image.extra_packages", package)?;
        }
        check_line("installer.url", &self.installer.url)?;
        check_line("installer.bin_dir", &self.installer.bin_dir)?;
        if let Some(version) = &self.installer.version {
            check_line("installer.version", version)?;
        }
        check_line("dependencies.manifest", &self.dependencies.manifest)?;
        check_line("dependencies.lock", &self.dependencies.lock)?;
        for group in &self.dependencies.groups {
            check_line("dependencies.groups", group)?;
        }
        check_line("service.interpreter", &self.service.interpreter)?;
        check_line("service.entry", &self.service.entry)?;
        for arg in &self.service.args {
            check_line("service.args", arg)?;
        }

        for (name, value) in &self.image.env {
            check_line("image.env", value)?;
            if !is_valid_env_name(name) {
                return Err(invalid(
                    "image.env",
                    format!("'{name}' is not a valid environment variable name"),
                ));
            }
            if name == PYTHONDONTWRITEBYTECODE || name == PYTHONUNBUFFERED || name == "PATH" {
                return Err(invalid(
                    "image.env",
                    format!("'{name}' is managed by berth and cannot be overridden"),
                ));
            }
        }

        if !self.installer.bin_dir.starts_with('/') {
            return Err(invalid(
                "installer.bin_dir",
                format!("'{}' must be an absolute path", self.installer.bin_dir),
            ));
        }

        if let Some(sha) = &self.installer.sha256
            && !(sha.len() == 64 && sha.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(invalid(
                "installer.sha256",
                "expected 64 hexadecimal characters".to_owned(),
            ));
        }

        if self.dependencies.groups.is_empty() {
            return Err(invalid(
                "dependencies.groups",
                "at least one dependency group is required".to_owned(),
            ));
        }

        if self.service.port == 0 {
            return Err(invalid("service.port", "port 0 cannot be exposed".to_owned()));
        }

        if self.service.entry.trim().is_empty() {
            return Err(invalid(
                "service.entry",
                "an entry script is required".to_owned(),
            ));
        }

        if self.service.interpreter.trim().is_empty() {
            return Err(invalid(
                "service.interpreter",
                "an interpreter is required".to_owned(),
            ));
        }

        Ok(())
    }

    /// Whether the installer script is verified against a pinned checksum.
    pub fn installer_pinned(&self) -> bool {
        self.installer.sha256.is_some()
    }
}

fn invalid(field: &'static str, reason: String) -> crate::Error {
    crate::Error::InvalidConfig { field, reason }
}

/// Every configured string ends up on a single Dockerfile line.
fn check_line(field: &'static str, value: &str) -> crate::Result<()> {
    match value.chars().find(|c| c.is_control()) {
        Some(c) => Err(invalid(
            field,
            format!("{value:?} contains control character {c:?}"),
        )),
        None => Ok(()),
    }
}

/// An image reference is pinned when it names a digest, or a tag other than
/// `latest`.
///
/// # Examples
///
/// ```
/// use berth_core::config::is_pinned_image;
///
/// assert!(is_pinned_image("python:3.11-slim"));
/// let digest = "0".repeat(64);
/// assert!(is_pinned_image(&format!("registry:5000/python@sha256:{digest}")));
/// assert!(!is_pinned_image("python@sha256:"));
/// assert!(!is_pinned_image("python"));
/// assert!(!is_pinned_image("python:latest"));
/// assert!(!is_pinned_image("registry:5000/python"));
/// ```
pub fn is_pinned_image(reference: &str) -> bool {
    if let Some((name, digest)) = reference.rsplit_once("@sha256:") {
        return !name.is_empty()
            && digest.len() == 64
            && digest.chars().all(|c| c.is_ascii_hexdigit());
    }
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rsplit_once(':') {
        Some((name, tag)) => !name.is_empty() && !tag.is_empty() && tag != "latest",
        None => false,
    }
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_base_image() -> String {
    "python:3.11-slim".to_owned()
}

fn default_workdir() -> String {
    "/app".to_owned()
}

fn default_extra_packages() -> Vec<String> {
    vec!["curl".to_owned()]
}

fn default_true() -> bool {
    true
}

fn default_installer_url() -> String {
    "https://install.python-poetry.org".to_owned()
}

fn default_bin_dir() -> String {
    "/root/.local/bin".to_owned()
}

fn default_manifest() -> String {
    "pyproject.toml".to_owned()
}

fn default_lock() -> String {
    "poetry.lock".to_owned()
}

fn default_groups() -> Vec<String> {
    vec!["main".to_owned()]
}

fn default_port() -> u16 {
    8000
}

fn default_interpreter() -> String {
    "python".to_owned()
}

fn default_entry() -> String {
    "run.py".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        BerthConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_floating_base_image() {
        let mut config = BerthConfig::default();
        config.image.base_image = "python:latest".to_owned();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("image.base_image"), "got: {err}");
    }

    #[test]
    fn rejects_untagged_base_image() {
        let mut config = BerthConfig::default();
        config.image.base_image = "python".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_mandated_env_override() {
        let mut config = BerthConfig::default();
        config
            .image
            .env
            .insert(PYTHONUNBUFFERED.to_owned(), "0".to_owned());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("managed by berth"), "got: {err}");
    }

    #[test]
    fn rejects_multiline_env_value() {
        let mut config = BerthConfig::default();
        config
            .image
            .env
            .insert("GREETING".to_owned(), "hi\nRUN echo pwned".to_owned());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("image.env"), "got: {err}");
    }

    #[test]
    fn accepts_dollar_in_env_value() {
        let mut config = BerthConfig::default();
        config.image.env.insert("DSN".to_owned(), "pa$word".to_owned());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_control_characters_in_command() {
        let mut config = BerthConfig::default();
        config.service.entry = "run.py\r".to_owned();
        assert!(config.validate().is_err());

        let mut config = BerthConfig::default();
        config.service.args = vec!["--name".to_owned(), "a\u{1b}[2J".to_owned()];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("service.args"), "got: {err}");
    }

    #[test]
    fn rejects_empty_digest() {
        let mut config = BerthConfig::default();
        config.image.base_image = "python@sha256:".to_owned();
        assert!(config.validate().is_err());

        config.image.base_image = format!("python@sha256:{}", "ab".repeat(32));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_env_name() {
        let mut config = BerthConfig::default();
        config.image.env.insert("1BAD".to_owned(), "x".to_owned());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_relative_workdir() {
        let mut config = BerthConfig::default();
        config.image.workdir = "app".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_port_zero() {
        let mut config = BerthConfig::default();
        config.service.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_checksum() {
        let mut config = BerthConfig::default();
        config.installer.sha256 = Some("abc123".to_owned());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("installer.sha256"), "got: {err}");
    }

    #[test]
    fn accepts_full_checksum() {
        let mut config = BerthConfig::default();
        config.installer.sha256 = Some("a".repeat(64));
        config.validate().unwrap();
        assert!(config.installer_pinned());
    }

    #[test]
    fn rejects_empty_groups() {
        let mut config = BerthConfig::default();
        config.dependencies.groups.clear();
        assert!(config.validate().is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_panics(reference in "\\PC{0,40}") {
                let _ = is_pinned_image(&reference);
            }

            #[test]
            fn versioned_tags_are_pinned(
                name in "[a-z][a-z0-9-]{0,15}",
                tag in "[0-9][a-z0-9.-]{0,10}",
            ) {
                let pinned = is_pinned_image(&format!("{name}:{tag}"));
                prop_assert!(pinned);
            }

            #[test]
            fn short_digests_are_not_pinned(digest in "[0-9a-f]{0,63}") {
                let pinned = is_pinned_image(&format!("python@sha256:{digest}"));
                prop_assert!(!pinned);
            }

            #[test]
            fn registry_port_is_not_a_tag(
                host in "[a-z]{1,10}",
                port in 1u16..,
                name in "[a-z]{1,10}",
            ) {
                let pinned = is_pinned_image(&format!("{host}:{port}/{name}"));
                prop_assert!(!pinned);
            }
        }
    }
}
