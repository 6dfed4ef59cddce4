use berth_core::config::{CONFIG_FILE, is_pinned_image};
use berth_core::{BerthConfig, DependencyManifest};
use berth_engine::{CheckResult, DockerClient};
use std::path::Path;

pub async fn doctor() -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let client = DockerClient::new();
    let mut report = client.doctor().await;

    // Config file check
    let config = match BerthConfig::load(project_dir) {
        Ok(config) => {
            report.config_file = if project_dir.join(CONFIG_FILE).exists() {
                CheckResult::ok("Found")
            } else {
                CheckResult::warn("Not found, using defaults")
            };
            config
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&format!("{e:#}"));
            BerthConfig::default()
        }
    };

    // Manifest and lock
    match DependencyManifest::load(project_dir, &config.dependencies) {
        Ok(manifest) => {
            report.manifest = CheckResult::ok(&format!(
                "{} ({} requirements)",
                config.dependencies.manifest,
                manifest.requirements().len()
            ));
            report.lock = match manifest.resolve(&config.dependencies.groups) {
                Ok(resolved) => CheckResult::ok(&format!(
                    "Up to date ({} runtime packages)",
                    resolved.len()
                )),
                Err(e) => CheckResult::fail(&e.to_string()),
            };
        }
        Err(e) => {
            report.manifest = CheckResult::fail(&e.to_string());
            report.lock = CheckResult::fail("skipped (manifest not loaded)");
        }
    }

    // Base image pin
    let base = &config.image.base_image;
    report.base_image = if is_pinned_image(base) {
        CheckResult::ok(base)
    } else {
        CheckResult::fail(&format!("{base} is not pinned; use a versioned tag or digest"))
    };

    // Installer pin
    report.installer = match (&config.installer.version, &config.installer.sha256) {
        (Some(version), Some(_)) => CheckResult::ok(&format!("Poetry {version}, script sha256 pinned")),
        (None, Some(_)) => CheckResult::warn("script sha256 pinned, Poetry version unpinned"),
        (Some(version), None) => CheckResult::warn(&format!(
            "Poetry {version}, script unpinned; run `berth pin-installer`"
        )),
        (None, None) => CheckResult::warn("Unpinned; set installer.version and run `berth pin-installer`"),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed — see above for details");
    }

    Ok(())
}
