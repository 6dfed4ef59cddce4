//! Core types and configuration for berth.
//!
//! This crate defines the `berth.toml` schema ([`BerthConfig`]), the Poetry
//! manifest/lock pair ([`DependencyManifest`]), the image's process-wide
//! environment ([`EnvironmentSet`], [`SearchPath`]), and shared error types.

pub mod config;
pub mod env;
pub mod error;
pub mod manifest;

pub use config::{
    BerthConfig, DependencyConfig, ImageConfig, InstallerConfig, ProjectConfig, ServiceConfig,
};
pub use env::{EnvironmentSet, SearchPath};
pub use error::{Error, Result};
pub use manifest::{
    DependencyManifest, LockFile, LockedDependency, LockedPackage, Requirement, ResolvedSet,
};
