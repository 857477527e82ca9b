//! `forgepilot doctor`: diagnose configuration and workspace.

use std::path::Path;

use forgepilot_config::AppConfig;
use forgepilot_tools::Workspace;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("Forgepilot Doctor");
    println!("=================\n");

    let mut issues = 0;

    let file = super::config_file(config_path);
    let config = if file.exists() {
        match super::load_config(config_path) {
            Ok(config) => {
                println!("  ok    Config file valid ({})", file.display());
                config
            }
            Err(e) => {
                println!("  FAIL  {e:#}");
                return Ok(());
            }
        }
    } else {
        println!("  warn  No config file, using defaults (run `forgepilot config init`)");
        issues += 1;
        AppConfig::default()
    };

    if config.has_api_key() || config.backend.name == "ollama" {
        println!("  ok    Backend credentials present ({})", config.backend.name);
    } else {
        println!("  warn  No API key (set FORGEPILOT_API_KEY or OPENAI_API_KEY)");
        issues += 1;
    }

    let workspace = Workspace::new(&config.tools.workspace_root);
    match workspace.list_repos().await {
        Ok(repos) if repos.is_empty() => {
            println!(
                "  warn  No repositories under {}",
                config.tools.workspace_root.display()
            );
            issues += 1;
        }
        Ok(repos) => println!("  ok    {} repositories in the workspace", repos.len()),
        Err(e) => {
            println!("  FAIL  Workspace unreadable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
