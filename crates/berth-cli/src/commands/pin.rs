use berth_core::BerthConfig;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Download the installer script and print the digest to pin in berth.toml.
pub async fn pin_installer(url: Option<String>) -> anyhow::Result<()> {
    let url = match url {
        Some(url) => url,
        None => BerthConfig::load(Path::new("."))?.installer.url,
    };

    eprintln!("Downloading {url}...");
    let response = reqwest::get(&url).await?.error_for_status()?;
    let body = response.bytes().await?;
    if body.is_empty() {
        anyhow::bail!("installer at {url} is empty");
    }

    let digest = hex::encode(Sha256::digest(&body));
    tracing::debug!(bytes = body.len(), %digest, "installer downloaded");

    println!("[installer]");
    println!("url = \"{url}\"");
    println!("sha256 = \"{digest}\"");
    Ok(())
}
