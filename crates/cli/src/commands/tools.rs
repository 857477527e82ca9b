//! `forgepilot tools`: print the catalogue the model is given.

use std::path::Path;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let registry = forgepilot_tools::default_registry(config.tools.workspace_root.clone())?;

    println!("Tools ({}), workspace {}:", registry.len(), config.tools.workspace_root.display());
    println!();
    print!("{}", registry.describe_all());
    Ok(())
}
