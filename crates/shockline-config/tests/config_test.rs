// Loading and saving config files on disk.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use uuid::Uuid;

use shockline_config::{Config, ConfigError, ShockerPreference, load_config_from, save_config_to};

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(cfg.backend, "https://api.openshock.app");
    assert_eq!(cfg.timeout, 30);
    assert_eq!(cfg.refresh_interval, 300);
    assert!(cfg.presence);
    assert!(cfg.shockers.is_empty());
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let shocker = Uuid::new_v4();
    std::fs::write(
        &path,
        format!(
            r#"
backend = "https://openshock.example.org"
token_env = "OPENSHOCK_TOKEN"
refresh_interval = 0
presence = false
log_level = "debug"

[shockers.{shocker}]
enabled = false
"#
        ),
    )
    .unwrap();

    let cfg = load_config_from(&path).unwrap();

    assert_eq!(cfg.backend, "https://openshock.example.org");
    assert_eq!(cfg.token_env.as_deref(), Some("OPENSHOCK_TOKEN"));
    assert_eq!(cfg.refresh_interval, 0);
    assert!(!cfg.presence);
    assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    assert_eq!(cfg.timeout, 30);
    assert!(!cfg.shocker_enabled(&shocker));
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let shocker = Uuid::new_v4();

    let cfg = Config {
        token: Some("secret".into()),
        timeout: 10,
        shockers: BTreeMap::from([(
            shocker,
            ShockerPreference {
                enabled: false,
                name: Some("Left".into()),
                device: None,
            },
        )]),
        ..Config::default()
    };
    save_config_to(&cfg, &path).unwrap();

    assert_eq!(load_config_from(&path).unwrap(), cfg);
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "timeout = \"soon\"\n").unwrap();

    assert!(matches!(
        load_config_from(&path),
        Err(ConfigError::Figment(_))
    ));
}
