#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

// Nothing listens on port 1, so any directory access fails fast.
const CONFIG: &str = r#"
directory:
  url: ldap://127.0.0.1:1
  bind_dn: cn=admin,dc=example,dc=com
  bind_password: secret
  groups_base: ou=groups,dc=example,dc=com
  users_base: ou=people,dc=example,dc=com
  control_base: dc=example,dc=com
  prefixes:
    site: site-
    open: open-
    closed: closed-
    org: org-
  admins_group: site-admins-all
  deleters_group: deleters
  timeout_secs: 2
repository:
  url: http://127.0.0.1:1/alfresco
  username: sync
  password: hunter2
  deleters_role: GROUP_DELETERS
  markings:
    open: openMarkings
    closed: closedMarkings
    org: orgMarkings
  timeout_secs: 2
profile:
  fields:
    - kind: text
      attribute: description
      field: biography
"#;

fn ldapsync(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ldapsync").unwrap();
    cmd.current_dir(dir.path()).env_remove("LDAPSYNC_CONFIG");
    cmd
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("ldapsync.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

// ---------------------------------------------------------------------------
// help
// ---------------------------------------------------------------------------

#[test]
fn help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    ldapsync(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("profile"));
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_accepts_good_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    ldapsync(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_json_lists_warnings() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &CONFIG.replace("  bind_password: secret\n", ""));
    let out = ldapsync(&dir)
        .args(["config", "validate", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let warnings = value["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["level"], "warning");
}

#[test]
fn config_validate_rejects_overlapping_prefixes() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &CONFIG.replace("open: open-", "open: site-open-"));
    ldapsync(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_show_omits_passwords() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    ldapsync(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ldap://127.0.0.1:1"))
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("secret").not());
}

#[test]
fn missing_config_is_reported() {
    let dir = TempDir::new().unwrap();
    ldapsync(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn config_env_var_is_honoured() {
    let dir = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    let path = elsewhere.path().join("custom.yaml");
    std::fs::write(&path, CONFIG).unwrap();
    ldapsync(&dir)
        .env("LDAPSYNC_CONFIG", &path)
        .args(["config", "validate", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.yaml"));
}

#[test]
fn config_is_found_in_parent_directory() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    let nested = dir.path().join("a/b");
    std::fs::create_dir_all(&nested).unwrap();
    Command::cargo_bin("ldapsync")
        .unwrap()
        .current_dir(&nested)
        .env_remove("LDAPSYNC_CONFIG")
        .args(["config", "validate"])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// profile push
// ---------------------------------------------------------------------------

#[test]
fn profile_push_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    ldapsync(&dir)
        .args(["profile", "push", "alice", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn profile_push_rejects_non_object_json() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    std::fs::write(dir.path().join("profile.json"), "[]").unwrap();
    ldapsync(&dir)
        .args(["profile", "push", "alice", "profile.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected a JSON object"));
}

#[test]
fn profile_push_unreachable_directory_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    std::fs::write(dir.path().join("profile.json"), r#"{"biography": "hi"}"#).unwrap();
    ldapsync(&dir)
        .args(["profile", "push", "alice", "profile.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to push profile for 'alice'"));
}

// ---------------------------------------------------------------------------
// run / status
// ---------------------------------------------------------------------------

#[test]
fn run_against_unreachable_directory_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    ldapsync(&dir)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("reconciliation run failed"));
}

#[test]
fn run_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, &CONFIG.replace("url: ldap://127.0.0.1:1", "url: http://ldap"));
    ldapsync(&dir)
        .args(["run", "--force"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must start with ldap://"));
}

#[test]
fn status_against_unreachable_directory_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, CONFIG);
    ldapsync(&dir)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read the lock entry"));
}
