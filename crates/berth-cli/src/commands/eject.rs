use berth_build::{BuildPlan, DockerfileGenerator};
use berth_core::BerthConfig;
use std::path::PathBuf;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let plan = BuildPlan::from_config(&config)?;

    let dockerfile = DockerfileGenerator::new(&plan).render();
    berth_build::eject::eject(&project_dir, &dockerfile)?;

    println!("Ejected build recipe to .berth/Dockerfile");
    println!("You can now edit it directly. berth build will use this file.");
    Ok(())
}
