use crate::plan::BuildPlan;

/// Renders a [`BuildPlan`] as a single-stage Dockerfile, one commented
/// section per pipeline stage.
pub struct DockerfileGenerator<'a> {
    plan: &'a BuildPlan,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(plan: &'a BuildPlan) -> Self {
        Self { plan }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.plan.stages().iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("# === {} ===\n", stage.kind));
            for instruction in &stage.instructions {
                out.push_str(&instruction.to_string());
                out.push('\n');
            }
        }
        out
    }
}
