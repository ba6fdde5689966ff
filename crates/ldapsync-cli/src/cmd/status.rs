use crate::output::print_json;
use crate::services;
use anyhow::Context;
use ldapsync_core::directory::DirectoryService;
use std::path::Path;

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = services::load_config(config_path)?;
    let mut directory = services::directory(&config)?;
    let locked = directory
        .lock_exists()
        .context("failed to read the lock entry")?;

    if json {
        print_json(&serde_json::json!({
            "config": config_path.display().to_string(),
            "locked": locked,
        }))?;
    } else if locked {
        println!("Locked: a previous run did not complete. Investigate, then `ldapsync run --force`.");
    } else {
        println!("Not locked.");
    }
    Ok(())
}
