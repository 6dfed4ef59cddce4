use berth_core::{BerthConfig, DependencyManifest};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct CheckOutput<'a> {
    project: Option<&'a str>,
    groups: &'a [String],
    packages: Vec<PackageOutput<'a>>,
    fingerprint: String,
}

#[derive(Serialize)]
struct PackageOutput<'a> {
    name: &'a str,
    version: &'a str,
}

/// Verify the lock against the manifest and print the runtime set.
pub async fn check(json: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let manifest = DependencyManifest::load(&project_dir, &config.dependencies)?;
    let resolved = manifest.resolve(&config.dependencies.groups)?;
    let fingerprint = resolved.fingerprint();

    if json {
        let output = CheckOutput {
            project: manifest.project_name.as_deref(),
            groups: &config.dependencies.groups,
            packages: resolved
                .iter()
                .map(|(name, version)| PackageOutput { name, version })
                .collect(),
            fingerprint,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Lock file is up to date ({} locked, {} installed for groups: {})",
        manifest.lock().len(),
        resolved.len(),
        config.dependencies.groups.join(", ")
    );
    println!();
    for (name, version) in resolved.iter() {
        println!("  {name}=={version}");
    }
    println!();
    println!("Fingerprint: {fingerprint}");

    Ok(())
}
