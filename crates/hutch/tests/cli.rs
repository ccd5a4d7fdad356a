use std::path::Path;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::tempdir;

mod common;

fn hutch(root: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_hutch"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()?)
}

#[test]
fn spec_writes_rootless_config() -> Result<()> {
    let root = tempdir()?;
    let bundle = tempdir()?;
    let bundle_arg = bundle.path().to_string_lossy().to_string();

    let output = hutch(root.path(), &["spec", "--rootless", "--bundle", &bundle_arg])?;
    assert!(output.status.success(), "{:?}", output);

    let config: serde_json::Value =
        serde_json::from_slice(&std::fs::read(bundle.path().join("config.json"))?)?;
    assert_eq!(config["linux"]["uidMappings"].as_array().map(Vec::len), Some(1));

    // a second run must not clobber the existing config
    let output = hutch(root.path(), &["spec", "--bundle", &bundle_arg])?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn list_empty_root() -> Result<()> {
    let root = tempdir()?;

    let output = hutch(root.path(), &["list", "--format", "json"])?;
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(String::from_utf8(output.stdout)?.trim(), "[]");

    let output = hutch(root.path(), &["list"])?;
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.starts_with("ID"));
    Ok(())
}

#[test]
fn list_shows_unreadable_container() -> Result<()> {
    let root = tempdir()?;
    std::fs::create_dir(root.path().join("broken"))?;

    let output = hutch(root.path(), &["list", "--format", "json"])?;
    assert!(output.status.success(), "{:?}", output);
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(rows[0]["id"], "broken");
    assert_eq!(rows[0]["pid"], -1);
    Ok(())
}

#[test]
fn commands_on_missing_container_fail() -> Result<()> {
    let root = tempdir()?;
    for args in [
        vec!["state", "ghost"],
        vec!["kill", "ghost"],
        vec!["pause", "ghost"],
        vec!["resume", "ghost"],
        vec!["delete", "ghost"],
        vec!["ps", "ghost"],
    ] {
        let output = hutch(root.path(), &args)?;
        assert!(!output.status.success(), "{args:?} succeeded");
    }
    Ok(())
}

#[test]
fn invalid_signal_is_rejected() -> Result<()> {
    let root = tempdir()?;
    let output = hutch(root.path(), &["kill", "ghost", "SIGNOPE"])?;
    assert!(!output.status.success());
    Ok(())
}

fn container_status(root: &Path, id: &str) -> Result<String> {
    let output = hutch(root, &["state", id])?;
    assert!(output.status.success(), "{:?}", output);
    let state: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    Ok(state["status"].as_str().unwrap_or_default().to_string())
}

/// Writes a bundle whose workload is `args`, rootless unless run by root
fn bundle(root: &Path, dir: &Path, args: &[&str]) -> Result<String> {
    let bundle_arg = dir.to_string_lossy().to_string();
    let mut spec_args = vec!["spec", "--bundle", &bundle_arg];
    if !nix::unistd::geteuid().is_root() {
        spec_args.push("--rootless");
    }
    let output = hutch(root, &spec_args)?;
    assert!(output.status.success(), "{:?}", output);

    let config_path = dir.join("config.json");
    let mut config: serde_json::Value = serde_json::from_slice(&std::fs::read(&config_path)?)?;
    config["process"]["args"] = serde_json::json!(args);
    config["process"]["terminal"] = serde_json::json!(false);
    std::fs::write(&config_path, serde_json::to_vec(&config)?)?;
    Ok(bundle_arg)
}

// the workload inherits the standard streams, capturing them would wait for
// it to exit
fn run(root: &Path, args: &[&str]) -> Result<ExitStatus> {
    Ok(Command::new(env!("CARGO_BIN_EXE_hutch"))
        .arg("--root")
        .arg(root)
        .arg("run")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?)
}

#[test]
fn run_pause_kill_delete() -> Result<()> {
    if !common::can_run_containers() {
        return Ok(());
    }

    let root = tempdir()?;
    let dir = tempdir()?;
    let bundle_arg = bundle(root.path(), dir.path(), &["sleep", "60"])?;

    assert!(run(root.path(), &["--detach", "--bundle", &bundle_arg, "sleeper"])?.success());
    assert_eq!(container_status(root.path(), "sleeper")?, "running");

    let output = hutch(root.path(), &["state", "sleeper"])?;
    let state: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let bundle_path = dir.path().canonicalize()?;
    assert_eq!(state["id"], "sleeper");
    assert!(state["pid"].as_i64().unwrap_or_default() > 0);
    assert_eq!(state["bundle"], &*bundle_path.to_string_lossy());
    assert_eq!(state["rootfs"], &*bundle_path.join("rootfs").to_string_lossy());

    let output = hutch(root.path(), &["list", "--quiet"])?;
    assert_eq!(String::from_utf8(output.stdout)?.trim(), "sleeper");

    // a running container cannot be deleted without force
    assert!(!hutch(root.path(), &["delete", "sleeper"])?.status.success());

    if nix::unistd::geteuid().is_root() {
        let output = hutch(root.path(), &["pause", "sleeper"])?;
        assert!(output.status.success(), "{:?}", output);
        assert_eq!(container_status(root.path(), "sleeper")?, "paused");

        let output = hutch(root.path(), &["resume", "sleeper"])?;
        assert!(output.status.success(), "{:?}", output);
        assert_eq!(container_status(root.path(), "sleeper")?, "running");
    } else {
        // rootless containers have no freezer
        assert!(!hutch(root.path(), &["pause", "sleeper"])?.status.success());
    }

    let output = hutch(root.path(), &["kill", "sleeper", "KILL"])?;
    assert!(output.status.success(), "{:?}", output);
    let deadline = Instant::now() + Duration::from_secs(10);
    while container_status(root.path(), "sleeper")? != "stopped" {
        assert!(Instant::now() < deadline, "container did not stop");
        std::thread::sleep(Duration::from_millis(100));
    }

    let output = hutch(root.path(), &["delete", "sleeper"])?;
    assert!(output.status.success(), "{:?}", output);
    assert!(!root.path().join("sleeper").exists());
    Ok(())
}

#[test]
fn foreground_run_returns_exit_code() -> Result<()> {
    if !common::can_run_containers() {
        return Ok(());
    }

    let root = tempdir()?;
    let dir = tempdir()?;
    let bundle_arg = bundle(root.path(), dir.path(), &["sh", "-c", "exit 7"])?;

    let status = run(root.path(), &["--bundle", &bundle_arg, "quick"])?;
    assert_eq!(status.code(), Some(7));
    // the container is removed once its workload has exited
    assert!(!root.path().join("quick").exists());
    Ok(())
}
