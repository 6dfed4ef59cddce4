//! Process-wide state of the image, modelled as explicit values.
//!
//! Both [`EnvironmentSet`] and [`SearchPath`] are built once from
//! [`BerthConfig`](crate::BerthConfig) and never mutated afterwards. The
//! search path "mutation" after installing Poetry produces a new value.

use std::collections::BTreeMap;

use crate::config::{ImageConfig, PYTHONDONTWRITEBYTECODE, PYTHONUNBUFFERED};

/// Directories consulted by a stock Debian-based Python image.
pub const DEFAULT_SEARCH_PATH: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// Environment variables every later stage and the running process observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSet {
    vars: BTreeMap<String, String>,
}

impl EnvironmentSet {
    pub fn from_config(image: &ImageConfig) -> Self {
        let mut vars = image.env.clone();
        vars.insert(PYTHONDONTWRITEBYTECODE.to_owned(), "1".to_owned());
        vars.insert(PYTHONUNBUFFERED.to_owned(), "1".to_owned());
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Mandated flags first, then user entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mandated = [PYTHONDONTWRITEBYTECODE, PYTHONUNBUFFERED];
        let head = mandated
            .into_iter()
            .filter_map(|name| self.vars.get_key_value(name));
        let tail = self
            .vars
            .iter()
            .filter(move |(k, _)| !mandated.contains(&k.as_str()));
        head.chain(tail).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Ordered directories used to resolve bare command names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<String>,
}

impl Default for SearchPath {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_PATH.iter().map(|d| (*d).to_owned()).collect())
    }
}

impl SearchPath {
    pub fn new(dirs: Vec<String>) -> Self {
        Self { dirs }
    }

    /// Returns a path with `dir` searched before every existing entry.
    ///
    /// An existing occurrence of `dir` is dropped so the result has no
    /// duplicates.
    pub fn prepend(&self, dir: &str) -> Self {
        let mut dirs = Vec::with_capacity(self.dirs.len() + 1);
        dirs.push(dir.to_owned());
        dirs.extend(self.dirs.iter().filter(|d| *d != dir).cloned());
        Self { dirs }
    }

    pub fn dirs(&self) -> &[String] {
        &self.dirs
    }

    /// First directory for which `provides(dir)` reports the command present.
    pub fn lookup<F>(&self, mut provides: F) -> Option<&str>
    where
        F: FnMut(&str) -> bool,
    {
        self.dirs
            .iter()
            .map(String::as_str)
            .find(|dir| provides(dir))
    }

    /// Value for an `ENV PATH=` directive that extends the base image's PATH.
    pub fn prefix_directive(dir: &str) -> String {
        format!("{dir}:$PATH")
    }
}
