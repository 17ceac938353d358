// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn from_toml(text: &str) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).unwrap();
    Config::from_file(file)
}

#[test]
fn minimal_file_gets_defaults() {
    let config = from_toml("work_dir = \"/var/lib/dray\"").unwrap();

    assert_eq!(config.work_dir, PathBuf::from("/var/lib/dray"));
    assert_eq!(config.recover, RecoverPolicy::Reconnect);
    assert!(!config.strict);
    assert_eq!(config.executor_shutdown_grace, Duration::from_secs(5));
    assert_eq!(config.gc_delay, Duration::from_secs(7 * 24 * 3600));
    assert_eq!(config.socket_path(), PathBuf::from("/var/lib/dray/agent.sock"));
    assert_eq!(config.lock_path(), PathBuf::from("/var/lib/dray/drayd.pid"));
    assert!(!config.hostname.is_empty());
}

#[test]
fn full_file_round_trips() {
    let config = from_toml(
        r#"
work_dir = "/srv/dray"
launcher_dir = "/usr/libexec/dray"
hostname = "node-7.example.com"
master = "master.example.com:5050"
recover = "cleanup"
strict = true
executor_shutdown_grace = "30s"
executor_reregister_timeout = "2m"
gc_delay = "1d"
disk_watch_interval = "10s"

[resources]
cpus = 8.0
mem_mb = 16384
disk_mb = 100000
"#,
    )
    .unwrap();

    assert_eq!(config.launcher_dir, PathBuf::from("/usr/libexec/dray"));
    assert_eq!(config.hostname, "node-7.example.com");
    assert_eq!(config.master.as_deref(), Some("master.example.com:5050"));
    assert_eq!(config.recover, RecoverPolicy::Cleanup);
    assert!(config.strict);
    assert_eq!(config.executor_shutdown_grace, Duration::from_secs(30));
    assert_eq!(config.executor_reregister_timeout, Duration::from_secs(120));
    assert_eq!(config.disk_watch_interval, Duration::from_secs(10));
    assert_eq!(config.resources.cpus, 8.0);
}

#[test]
fn bad_duration_is_rejected_with_its_field() {
    let err = from_toml(
        r#"
work_dir = "/srv/dray"
gc_delay = "eventually"
"#,
    )
    .unwrap_err();

    match err {
        ConfigError::Duration { field, .. } => assert_eq!(field, "gc_delay"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_fields_fail_parsing() {
    let result: Result<ConfigFile, _> = toml::from_str("work_dirr = \"/oops\"");
    assert!(result.is_err());
}
