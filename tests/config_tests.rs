//! Config loading from disk.

use std::fs;
use std::time::Duration;

use dbgmon::OutputMode;
use dbgmon::config::load;

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load(&dir.path().join("default.toml")).unwrap();
    assert_eq!(cfg.output, OutputMode::Text);
    assert_eq!(
        cfg.monitor_config().stop_timeout,
        Some(Duration::from_secs(5))
    );
}

#[test]
fn reads_the_file_when_present() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.toml");
    fs::write(
        &path,
        "output = \"json\"\n\n[monitor]\nstop_timeout_secs = 12\n",
    )
    .unwrap();

    let cfg = load(&path).unwrap();
    assert_eq!(cfg.output, OutputMode::Json);
    assert_eq!(
        cfg.monitor_config().stop_timeout,
        Some(Duration::from_secs(12))
    );
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.toml");
    fs::write(&path, "output = [not toml").unwrap();
    assert!(load(&path).is_err());
}
