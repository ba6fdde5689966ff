use crate::output::{print_json, print_pairs};
use crate::services;
use anyhow::Context;
use ldapsync_core::clock::SystemClock;
use ldapsync_core::coordinator::{Reconciler, RunReport};
use std::path::Path;

pub fn run(config_path: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    let config = services::load_config(config_path)?;
    let directory = services::directory(&config)?;
    let repository = services::repository(&config)?;

    let mut reconciler = Reconciler::from_config(directory, repository, SystemClock, &config);
    let report = reconciler.run(force).context("reconciliation run failed")?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let previous = report
        .state
        .last_run_timestamp
        .as_ref()
        .map(|ts| ts.to_string())
        .unwrap_or_else(|| "none".to_string());
    print_pairs(&[
        ("forced", report.forced.to_string()),
        ("previous run", previous),
        ("admins changed", report.state.admins_changed_since_last_run.to_string()),
        ("groups examined", report.groups_examined.to_string()),
        ("members added", report.members_added.to_string()),
        ("members removed", report.members_removed.to_string()),
        ("marking groups set", report.marking_groups_set.to_string()),
        ("deleters added", report.deleters_added.to_string()),
        ("deleters removed", report.deleters_removed.to_string()),
        ("profiles updated", report.profiles_updated.to_string()),
        ("marked for retry", report.marked_for_retry.len().to_string()),
    ]);
    for record in &report.marked_for_retry {
        println!("  retry: {record}");
    }
}
