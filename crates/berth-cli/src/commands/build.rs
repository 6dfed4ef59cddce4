use berth_core::BerthConfig;
use berth_engine::pipeline::{BuildPipeline, StepError};
use berth_engine::DockerClient;
use std::path::PathBuf;

/// Execute the build pipeline.
pub async fn build(tag: Option<String>) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let tag = match tag {
        Some(tag) => tag,
        None => super::default_tag(&project_dir, &config)?,
    };

    println!("Building {tag}...");
    let client = DockerClient::new();
    let pipeline = BuildPipeline::new(&client, &project_dir, &config, &tag);

    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(e) => {
            for outcome in &e.completed {
                println!("  [done] {:<13} {}", outcome.step, outcome.detail);
            }
            println!("  [fail] {}", e.step);
            if let StepError::Build(build) = &e.source
                && let Some(kind) = build.kind()
            {
                eprintln!();
                eprintln!("hint: {}", kind.hint());
            }
            return Err(e.into());
        }
    };

    println!();
    for outcome in &report.steps {
        println!(
            "  [done] {:<13} {} ({:.1}s)",
            outcome.step,
            outcome.detail,
            outcome.elapsed.as_secs_f64()
        );
    }

    println!();
    match &report.invalidated {
        Some(stages) if stages.is_empty() => {
            println!("All stages reused from the previous {tag} image.");
        }
        Some(stages) => {
            let rebuilt: Vec<String> = stages.iter().map(ToString::to_string).collect();
            println!("Rebuilt: {}", rebuilt.join(", "));
        }
        None if report.ejected => println!("Built from ejected .berth/Dockerfile."),
        None => println!("No previous image; all stages built."),
    }
    println!(
        "Image {tag} ready ({} runtime packages, fingerprint {}).",
        report.resolved.len(),
        &report.resolved.fingerprint()[..12]
    );

    Ok(())
}
