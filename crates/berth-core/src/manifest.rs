//! Poetry manifest/lock pair.
//!
//! `pyproject.toml` declares what the service needs; `poetry.lock` pins the
//! exact versions. berth never resolves versions itself: the install set is
//! the closure of the requested groups' roots over the lock's dependency
//! edges, so two reads of the same pair always produce the same set.
//! Optional edges are followed only for extras that something in the
//! closure requests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use toml::Value;

use crate::config::DependencyConfig;

/// The group Poetry installs by default.
pub const MAIN_GROUP: &str = "main";

/// A dependency declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized package name
    pub name: String,
    /// Dependency group (`main` for runtime dependencies)
    pub group: String,
    /// Requested extras, normalized
    pub extras: Vec<String>,
}

/// An edge from a locked package to one of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedDependency {
    pub name: String,
    pub extras: Vec<String>,
}

/// One `[[package]]` entry of `poetry.lock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    /// Required (non-optional) dependencies
    pub dependencies: Vec<LockedDependency>,
    /// Optional dependencies enabled by each extra, from `[package.extras]`
    pub extras: BTreeMap<String, Vec<LockedDependency>>,
}

#[derive(Debug, Clone, Default)]
pub struct LockFile {
    pub lock_version: Option<String>,
    pub content_hash: Option<String>,
    packages: BTreeMap<String, LockedPackage>,
}

impl LockFile {
    pub fn parse(path: &Path, content: &str) -> crate::Result<Self> {
        let doc: Value = toml::from_str(content).map_err(|e| crate::Error::ManifestParse {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut packages = BTreeMap::new();
        for entry in doc
            .get("package")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let (Some(name), Some(version)) = (
                entry.get("name").and_then(Value::as_str),
                entry.get("version").and_then(Value::as_str),
            ) else {
                tracing::warn!(path = %path.display(), "skipping lock entry without name/version");
                continue;
            };

            let dependencies = entry
                .get("dependencies")
                .and_then(Value::as_table)
                .map(|deps| {
                    deps.iter()
                        .filter(|(_, spec)| !is_optional(spec))
                        .map(|(dep, spec)| LockedDependency {
                            name: normalize_name(dep),
                            extras: requested_extras(spec),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let extras = entry
                .get("extras")
                .and_then(Value::as_table)
                .map(|extras| {
                    extras
                        .iter()
                        .map(|(extra, specs)| {
                            let deps = specs
                                .as_array()
                                .into_iter()
                                .flatten()
                                .filter_map(Value::as_str)
                                .filter_map(pep508_parts)
                                .map(|(name, extras)| LockedDependency { name, extras })
                                .collect();
                            (normalize_name(extra), deps)
                        })
                        .collect()
                })
                .unwrap_or_default();

            let name = normalize_name(name);
            packages.insert(
                name.clone(),
                LockedPackage {
                    name,
                    version: version.to_owned(),
                    dependencies,
                    extras,
                },
            );
        }

        let metadata = doc.get("metadata");
        let field = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        Ok(Self {
            lock_version: field("lock-version"),
            content_hash: field("content-hash"),
            packages,
        })
    }

    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.get(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Parsed manifest/lock pair.
#[derive(Debug, Clone)]
pub struct DependencyManifest {
    /// Package name from `[tool.poetry]` or `[project]`
    pub project_name: Option<String>,
    pub manifest_path: PathBuf,
    pub lock_path: PathBuf,
    requirements: Vec<Requirement>,
    lock: LockFile,
}

impl DependencyManifest {
    /// Read and parse the manifest pair named in `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::ManifestMissing`](crate::Error::ManifestMissing) / [`Error::LockMissing`](crate::Error::LockMissing)
    ///   when either file does not exist
    /// - [`Error::ManifestParse`](crate::Error::ManifestParse) on invalid TOML
    /// - [`Error::NotAPoetryProject`](crate::Error::NotAPoetryProject) when the manifest has no project metadata
    pub fn load(project_dir: &Path, config: &DependencyConfig) -> crate::Result<Self> {
        let manifest_path = project_dir.join(&config.manifest);
        let lock_path = project_dir.join(&config.lock);

        if !manifest_path.exists() {
            return Err(crate::Error::ManifestMissing(manifest_path));
        }
        if !lock_path.exists() {
            return Err(crate::Error::LockMissing(lock_path));
        }

        let manifest_src = read(&manifest_path)?;
        let lock_src = read(&lock_path)?;
        let manifest = Self::from_sources(manifest_path, &manifest_src, lock_path, &lock_src)?;

        tracing::debug!(
            project = manifest.project_name.as_deref().unwrap_or("<unnamed>"),
            requirements = manifest.requirements.len(),
            locked = manifest.lock.len(),
            "dependency manifest loaded"
        );

        Ok(manifest)
    }

    pub fn from_sources(
        manifest_path: PathBuf,
        manifest_src: &str,
        lock_path: PathBuf,
        lock_src: &str,
    ) -> crate::Result<Self> {
        let doc: Value =
            toml::from_str(manifest_src).map_err(|e| crate::Error::ManifestParse {
                path: manifest_path.clone(),
                source: e,
            })?;

        let poetry = doc.get("tool").and_then(|t| t.get("poetry"));
        let project = doc.get("project");
        if poetry.is_none() && project.is_none() {
            return Err(crate::Error::NotAPoetryProject {
                path: manifest_path,
            });
        }

        let project_name = project
            .and_then(|p| p.get("name"))
            .or_else(|| poetry.and_then(|p| p.get("name")))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut requirements = Vec::new();

        // PEP 621 runtime dependencies (Poetry 2)
        for spec in project
            .and_then(|p| p.get("dependencies"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            if let Some((name, extras)) = pep508_parts(spec) {
                push_requirement(&mut requirements, &name, MAIN_GROUP, extras);
            }
        }

        if let Some(poetry) = poetry {
            collect_table(
                &mut requirements,
                poetry.get("dependencies"),
                MAIN_GROUP,
            );
            collect_table(&mut requirements, poetry.get("dev-dependencies"), "dev");

            if let Some(groups) = poetry.get("group").and_then(Value::as_table) {
                for (group, body) in groups {
                    collect_table(&mut requirements, body.get("dependencies"), group);
                }
            }
        }

        let lock = LockFile::parse(&lock_path, lock_src)?;

        Ok(Self {
            project_name,
            manifest_path,
            lock_path,
            requirements,
            lock,
        })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn lock(&self) -> &LockFile {
        &self.lock
    }

    /// Declared group names; `main` is always present.
    pub fn groups(&self) -> BTreeSet<&str> {
        let mut groups: BTreeSet<&str> = self
            .requirements
            .iter()
            .map(|r| r.group.as_str())
            .collect();
        groups.insert(MAIN_GROUP);
        groups
    }

    /// Check that every declared dependency is pinned in the lock file.
    pub fn verify(&self) -> crate::Result<()> {
        let missing: BTreeSet<String> = self
            .requirements
            .iter()
            .filter(|r| self.lock.get(&r.name).is_none())
            .map(|r| r.name.clone())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::LockOutOfDate {
                missing: missing.into_iter().collect(),
            })
        }
    }

    /// The exact set installed for `groups`: the lock-file closure of the
    /// groups' declared roots, including the optional dependencies of every
    /// extra requested along the way.
    pub fn resolve(&self, groups: &[String]) -> crate::Result<ResolvedSet> {
        let declared = self.groups();
        if let Some(unknown) = groups.iter().find(|g| !declared.contains(g.as_str())) {
            return Err(crate::Error::UnknownGroup(unknown.clone()));
        }

        self.verify()?;
        Ok(self.closure(groups))
    }

    /// Like [`resolve`](Self::resolve) but tolerates requirements the lock
    /// does not pin; they are left out of the set.
    pub fn resolve_unverified(&self, groups: &[String]) -> crate::Result<ResolvedSet> {
        let declared = self.groups();
        if let Some(unknown) = groups.iter().find(|g| !declared.contains(g.as_str())) {
            return Err(crate::Error::UnknownGroup(unknown.clone()));
        }
        Ok(self.closure(groups))
    }

    fn closure(&self, groups: &[String]) -> ResolvedSet {
        let mut queue: VecDeque<(&str, &[String])> = self
            .requirements
            .iter()
            .filter(|r| groups.contains(&r.group))
            .map(|r| (r.name.as_str(), r.extras.as_slice()))
            .collect();

        let mut packages = BTreeMap::new();
        let mut activated: BTreeSet<(&str, &str)> = BTreeSet::new();
        while let Some((name, extras)) = queue.pop_front() {
            let Some(locked) = self.lock.packages.get(name) else {
                // Marker-excluded transitive dependencies are absent from the lock.
                tracing::debug!(package = name, "dependency not in lock; skipping");
                continue;
            };

            if !packages.contains_key(name) {
                packages.insert(locked.name.clone(), locked.version.clone());
                queue.extend(
                    locked
                        .dependencies
                        .iter()
                        .map(|d| (d.name.as_str(), d.extras.as_slice())),
                );
            }

            // A package reached again may still bring in extras not seen yet.
            for extra in extras {
                if !activated.insert((locked.name.as_str(), extra.as_str())) {
                    continue;
                }
                match locked.extras.get(extra) {
                    Some(deps) => queue.extend(
                        deps.iter().map(|d| (d.name.as_str(), d.extras.as_slice())),
                    ),
                    None => tracing::warn!(
                        package = name,
                        extra = extra.as_str(),
                        "extra is not declared in the lock file"
                    ),
                }
            }
        }

        ResolvedSet { packages }
    }
}

/// Packages installed into the image, by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    packages: BTreeMap<String, String>,
}

impl ResolvedSet {
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(&normalize_name(name))
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.packages.get(&normalize_name(name)).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.packages.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// SHA-256 over the sorted `name==version` lines.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, version) in &self.packages {
            hasher.update(name.as_bytes());
            hasher.update(b"==");
            hasher.update(version.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// PEP 503 name normalization.
///
/// ```
/// use berth_core::manifest::normalize_name;
///
/// assert_eq!(normalize_name("Flask_SQLAlchemy"), "flask-sqlalchemy");
/// assert_eq!(normalize_name("zope.interface"), "zope-interface");
/// ```
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Name and extras of a PEP 508 requirement such as `uvicorn[standard]>=0.23`.
fn pep508_parts(spec: &str) -> Option<(String, Vec<String>)> {
    let spec = spec.trim_start();
    let end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(spec.len());
    if end == 0 {
        return None;
    }

    let rest = spec[end..].trim_start();
    let extras = rest
        .strip_prefix('[')
        .and_then(|r| r.split_once(']'))
        .map(|(list, _)| {
            list.split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(normalize_name)
                .collect()
        })
        .unwrap_or_default();

    Some((normalize_name(&spec[..end]), extras))
}

/// `extras = [...]` of a Poetry dependency spec. Multiple-constraint specs
/// are arrays of tables; their extras are merged.
fn requested_extras(spec: &Value) -> Vec<String> {
    let tables: Vec<&Value> = match spec {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut extras: Vec<String> = tables
        .into_iter()
        .filter_map(|t| t.get("extras"))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .map(normalize_name)
        .collect();
    extras.sort();
    extras.dedup();
    extras
}

fn collect_table(requirements: &mut Vec<Requirement>, table: Option<&Value>, group: &str) {
    let Some(table) = table.and_then(Value::as_table) else {
        return;
    };
    for (name, spec) in table {
        if name == "python" || is_optional(spec) {
            continue;
        }
        push_requirement(requirements, name, group, requested_extras(spec));
    }
}

fn push_requirement(
    requirements: &mut Vec<Requirement>,
    name: &str,
    group: &str,
    extras: Vec<String>,
) {
    let name = normalize_name(name);
    match requirements
        .iter_mut()
        .find(|r| r.name == name && r.group == group)
    {
        Some(existing) => {
            existing.extras.extend(extras);
            existing.extras.sort();
            existing.extras.dedup();
        }
        None => requirements.push(Requirement {
            name,
            group: group.to_owned(),
            extras,
        }),
    }
}

fn is_optional(spec: &Value) -> bool {
    spec.get("optional")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn read(path: &Path) -> crate::Result<String> {
    std::fs::read_to_string(path).map_err(|e| crate::Error::ManifestRead {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separator_runs() {
        assert_eq!(normalize_name("a__b..c"), "a-b-c");
        assert_eq!(normalize_name("Django"), "django");
        assert_eq!(normalize_name("_leading"), "leading");
    }

    #[test]
    fn pep508_splits_name_and_extras() {
        assert_eq!(
            pep508_parts("fastapi>=0.100"),
            Some(("fastapi".to_owned(), vec![]))
        );
        assert_eq!(
            pep508_parts("uvicorn[standard] (>=0.23)"),
            Some(("uvicorn".to_owned(), vec!["standard".to_owned()]))
        );
        assert_eq!(
            pep508_parts("httptools (>=0.5.0) ; extra == \"standard\""),
            Some(("httptools".to_owned(), vec![]))
        );
        assert_eq!(
            pep508_parts("Pkg [A_b, c]"),
            Some(("pkg".to_owned(), vec!["a-b".to_owned(), "c".to_owned()]))
        );
        assert_eq!(pep508_parts(">=1"), None);
    }

    #[test]
    fn extras_read_from_table_and_constraint_list() {
        let spec: Value =
            toml::from_str("version = \"^0.23\"\nextras = [\"standard\"]").unwrap();
        assert_eq!(requested_extras(&spec), vec!["standard"]);

        let doc: Value = toml::from_str(
            "dep = [{ version = \"1\", extras = [\"b\"] }, { version = \"2\", extras = [\"a\", \"b\"] }]",
        )
        .unwrap();
        assert_eq!(requested_extras(&doc["dep"]), vec!["a", "b"]);
        assert!(requested_extras(&Value::String("^1".to_owned())).is_empty());
    }

    #[test]
    fn optional_table_spec_detected() {
        let spec: Value = toml::from_str("optional = true\nversion = \"1\"").unwrap();
        assert!(is_optional(&spec));
        assert!(!is_optional(&Value::String("^1".to_owned())));
    }
}
