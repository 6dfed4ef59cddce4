use std::fmt;

use berth_core::{BerthConfig, EnvironmentSet, InstallerConfig, SearchPath};

/// Where the installer script is staged when its checksum is verified.
const INSTALLER_SCRIPT: &str = "/tmp/install-poetry.py";

/// The four image stages, in the only order berth emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    BaseEnvironment,
    DependencyManager,
    DependencyInstall,
    ApplicationAssembly,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::BaseEnvironment,
        StageKind::DependencyManager,
        StageKind::DependencyInstall,
        StageKind::ApplicationAssembly,
    ];

    /// 1-based position in the pipeline.
    pub fn number(self) -> usize {
        match self {
            Self::BaseEnvironment => 1,
            Self::DependencyManager => 2,
            Self::DependencyInstall => 3,
            Self::ApplicationAssembly => 4,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::BaseEnvironment => "Base environment",
            Self::DependencyManager => "Dependency manager",
            Self::DependencyInstall => "Dependencies",
            Self::ApplicationAssembly => "Application",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::BaseEnvironment => "base",
            Self::DependencyManager => "installer",
            Self::DependencyInstall => "dependencies",
            Self::ApplicationAssembly => "application",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {}: {}", self.number(), self.title())
    }
}

/// What a `COPY` takes from the build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    /// Specific files, relative to the context root
    Files(Vec<String>),
    /// The whole context
    Context,
}

/// A single Dockerfile instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From { image: String },
    /// A static variable; `$` in the value is never expanded.
    Env { name: String, value: String },
    /// `ENV PATH=<dir>:$PATH`, the one directive that does expand.
    PrependPath { dir: String },
    Run { command: String },
    Workdir { path: String },
    Copy { source: CopySource, dest: String },
    Expose { port: u16 },
    Cmd { argv: Vec<String> },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From { image } => write!(f, "FROM {image}"),
            Self::Env { name, value } => {
                if value
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '$'))
                {
                    write!(f, "ENV {name}={}", quote_env(value))
                } else {
                    write!(f, "ENV {name}={value}")
                }
            }
            Self::PrependPath { dir } => {
                write!(f, "ENV PATH={}", SearchPath::prefix_directive(dir))
            }
            Self::Run { command } => write!(f, "RUN {command}"),
            Self::Workdir { path } => write!(f, "WORKDIR {path}"),
            Self::Copy { source, dest } => match source {
                CopySource::Files(files) => write!(f, "COPY {} {dest}", files.join(" ")),
                CopySource::Context => write!(f, "COPY . {dest}"),
            },
            Self::Expose { port } => write!(f, "EXPOSE {port}"),
            Self::Cmd { argv } => {
                let quoted: Vec<String> = argv.iter().map(|a| quote(a)).collect();
                write!(f, "CMD [{}]", quoted.join(", "))
            }
        }
    }
}

/// JSON string literal for the exec-form argv.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Double-quoted ENV value with Docker's word escapes applied.
fn quote_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    pub instructions: Vec<Instruction>,
}

/// The ordered build-and-bootstrap recipe derived from [`BerthConfig`].
///
/// Construction is the only place stages are created, so the order
/// base → installer → dependencies → application always holds: the
/// manifest-only copy and install precede the full source copy, which keeps
/// the dependency layer cached across source-only changes.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    stages: Vec<Stage>,
    env: EnvironmentSet,
    search_path: SearchPath,
    entrypoint: Vec<String>,
    port: u16,
    manifest_files: Vec<String>,
}

impl BuildPlan {
    pub fn from_config(config: &BerthConfig) -> Result<Self, PlanError> {
        config.validate()?;

        let env = EnvironmentSet::from_config(&config.image);
        let search_path = SearchPath::default().prepend(&config.installer.bin_dir);
        let manifest_files = vec![
            config.dependencies.manifest.clone(),
            config.dependencies.lock.clone(),
        ];

        let mut entrypoint = vec![
            "poetry".to_owned(),
            "run".to_owned(),
            config.service.interpreter.clone(),
            "-B".to_owned(),
            config.service.entry.clone(),
        ];
        entrypoint.extend(config.service.args.iter().cloned());

        // 1. Base environment
        let mut base = vec![Instruction::From {
            image: config.image.base_image.clone(),
        }];
        base.extend(env.iter().map(|(name, value)| Instruction::Env {
            name: name.to_owned(),
            value: value.to_owned(),
        }));

        // 2. Dependency manager
        let mut installer = Vec::new();
        if !config.image.extra_packages.is_empty() {
            installer.push(Instruction::Run {
                command: format!(
                    "apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
                    config.image.extra_packages.join(" ")
                ),
            });
        }
        installer.push(Instruction::Run {
            command: installer_command(&config.installer),
        });
        installer.push(Instruction::PrependPath {
            dir: config.installer.bin_dir.clone(),
        });

        // 3. Dependencies: manifest pair only, then install
        let mut install = String::new();
        if config.dependencies.verify_lock {
            install.push_str("poetry check --lock && ");
        }
        install.push_str("poetry install --no-interaction --no-ansi");
        if !config.dependencies.install_root {
            install.push_str(" --no-root");
        }
        install.push_str(" --only ");
        install.push_str(&config.dependencies.groups.join(","));

        let dependencies = vec![
            Instruction::Workdir {
                path: config.image.workdir.clone(),
            },
            Instruction::Copy {
                source: CopySource::Files(manifest_files.clone()),
                dest: "./".to_owned(),
            },
            Instruction::Run { command: install },
        ];

        // 4. Application
        let application = vec![
            Instruction::Copy {
                source: CopySource::Context,
                dest: ".".to_owned(),
            },
            Instruction::Expose {
                port: config.service.port,
            },
            Instruction::Cmd {
                argv: entrypoint.clone(),
            },
        ];

        let stages = vec![
            Stage {
                kind: StageKind::BaseEnvironment,
                instructions: base,
            },
            Stage {
                kind: StageKind::DependencyManager,
                instructions: installer,
            },
            Stage {
                kind: StageKind::DependencyInstall,
                instructions: dependencies,
            },
            Stage {
                kind: StageKind::ApplicationAssembly,
                instructions: application,
            },
        ];

        tracing::debug!(
            base_image = %config.image.base_image,
            port = config.service.port,
            groups = %config.dependencies.groups.join(","),
            installer_pinned = config.installer_pinned(),
            "build plan created"
        );

        Ok(Self {
            stages,
            env,
            search_path,
            entrypoint,
            port: config.service.port,
            manifest_files,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> &Stage {
        &self.stages[kind.number() - 1]
    }

    pub fn env(&self) -> &EnvironmentSet {
        &self.env
    }

    /// Search path seen by every instruction after the installer stage.
    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    /// Exec-form argv the container runs at start.
    pub fn entrypoint(&self) -> &[String] {
        &self.entrypoint
    }

    pub fn exposed_port(&self) -> u16 {
        self.port
    }

    /// Files copied ahead of the source tree for the dependency install.
    pub fn manifest_files(&self) -> &[String] {
        &self.manifest_files
    }

    pub fn base_image(&self) -> &str {
        match self.stages[0].instructions.first() {
            Some(Instruction::From { image }) => image,
            _ => "",
        }
    }
}

fn installer_command(installer: &InstallerConfig) -> String {
    let version_env = installer
        .version
        .as_ref()
        .map(|v| format!("POETRY_VERSION={v} "))
        .unwrap_or_default();

    match &installer.sha256 {
        Some(sha) => format!(
            "curl -sSL {url} -o {INSTALLER_SCRIPT} \
             && echo \"{sha}  {INSTALLER_SCRIPT}\" | sha256sum -c - \
             && {version_env}python3 {INSTALLER_SCRIPT} \
             && rm {INSTALLER_SCRIPT}",
            url = installer.url,
        ),
        None => format!(
            "curl -sSL {url} | {version_env}python3 -",
            url = installer.url
        ),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid build configuration")]
    Config(#[from] berth_core::Error),
}
