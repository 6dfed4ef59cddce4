use berth_build::{BuildPlan, DockerfileGenerator, LayerChain, SourceTree};
use berth_core::BerthConfig;
use serde::Serialize;
use std::path::PathBuf;

/// Print the Dockerfile berth would build from.
pub async fn render() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let plan = BuildPlan::from_config(&config)?;

    if berth_build::eject::is_ejected(&project_dir) {
        eprintln!("note: .berth/Dockerfile is ejected; berth build uses it instead of this output");
    }

    print!("{}", DockerfileGenerator::new(&plan).render());
    Ok(())
}

#[derive(Serialize)]
struct PlanOutput {
    base_image: String,
    entrypoint: Vec<String>,
    port: u16,
    search_path: Vec<String>,
    stages: Vec<StageOutput>,
}

#[derive(Serialize)]
struct StageOutput {
    number: usize,
    title: &'static str,
    cache_key: Option<String>,
    layers: Vec<LayerOutput>,
}

#[derive(Serialize)]
struct LayerOutput {
    instruction: String,
    key: String,
}

/// Print the ordered stages with the cache key of every layer.
pub async fn plan(json: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let plan = BuildPlan::from_config(&config)?;
    let tree = SourceTree::discover(&project_dir)?;
    let chain = LayerChain::compute(&plan, &tree)?;

    let stages: Vec<StageOutput> = plan
        .stages()
        .iter()
        .map(|stage| StageOutput {
            number: stage.kind.number(),
            title: stage.kind.title(),
            cache_key: chain.stage_key(stage.kind).map(str::to_owned),
            layers: chain
                .layers()
                .iter()
                .filter(|l| l.stage == stage.kind)
                .map(|l| LayerOutput {
                    instruction: l.instruction.clone(),
                    key: l.key.clone(),
                })
                .collect(),
        })
        .collect();

    if json {
        let output = PlanOutput {
            base_image: plan.base_image().to_owned(),
            entrypoint: plan.entrypoint().to_vec(),
            port: plan.exposed_port(),
            search_path: plan.search_path().dirs().to_vec(),
            stages,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Image plan ({} source files)", tree.files().len());
    for stage in &stages {
        println!();
        println!("Stage {}: {}", stage.number, stage.title);
        for layer in &stage.layers {
            println!("  {}  {}", &layer.key[..12.min(layer.key.len())], layer.instruction);
        }
    }
    println!();
    println!("Entrypoint: {}", plan.entrypoint().join(" "));
    println!("Port:       {}", plan.exposed_port());

    Ok(())
}
