use crate::output::print_json;
use crate::services;
use anyhow::Context;
use clap::Subcommand;
use ldapsync_core::profile::{ProfileSchema, ProfileUpdater};
use ldapsync_core::types::ProfileFields;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ProfileSubcommand {
    /// Write a repository profile (JSON object) back to the user's directory entry
    Push {
        /// Directory user name
        user: String,

        /// JSON file holding the profile fields
        file: PathBuf,
    },
}

pub fn run(config_path: &Path, subcmd: ProfileSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ProfileSubcommand::Push { user, file } => push(config_path, &user, &file, json),
    }
}

fn push(config_path: &Path, user: &str, file: &Path, json: bool) -> anyhow::Result<()> {
    let config = services::load_config(config_path)?;
    let fields = read_fields(file)?;

    let updater = ProfileUpdater::new(ProfileSchema::from_config(&config.profile));
    let mut directory = services::directory(&config)?;
    updater
        .push_to_directory(&mut directory, user, &fields)
        .with_context(|| format!("failed to push profile for '{user}'"))?;

    if json {
        print_json(&serde_json::json!({ "user": user, "pushed": true }))?;
    } else {
        println!("Pushed profile for '{user}'.");
    }
    Ok(())
}

fn read_fields(file: &Path) -> anyhow::Result<ProfileFields> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    parse_fields(&data).with_context(|| format!("invalid profile in {}", file.display()))
}

fn parse_fields(data: &str) -> anyhow::Result<ProfileFields> {
    match serde_json::from_str::<serde_json::Value>(data)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => anyhow::bail!("expected a JSON object, found {}", kind_of(&other)),
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
