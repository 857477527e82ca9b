//! `forgepilot serve`: start the HTTP API server.

use std::path::Path;

use forgepilot_store::FileStore;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
    ephemeral: bool,
) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let store_path = FileStore::default_path();
    let store = super::open_store(ephemeral, store_path.clone());

    println!("Forgepilot Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:   {} ({})", config.backend.name, config.backend.model);
    println!("   Workspace: {}", config.tools.workspace_root.display());
    if ephemeral {
        println!("   Store:     in memory (lost on exit)");
    } else {
        println!("   Store:     {}", store_path.display());
    }

    forgepilot_gateway::start(config, store).await?;
    Ok(())
}
