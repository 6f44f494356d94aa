//! Tests for BridgeConfig parsing, validation and environment overrides.

use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn clear_env() {
    std::env::remove_var(ANALYTICS_OPT_IN_ENV);
    std::env::remove_var(DO_NOT_TRACK_ENV);
    std::env::remove_var(ANALYTICS_DEBUG_ENV);
}

#[test]
fn test_empty_yaml_uses_defaults() {
    let config: BridgeConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.collections.items_per_page, 10);
    assert_eq!(config.analytics.batch_size, 10);
    assert_eq!(config.analytics.queue_capacity, 100);
    assert_eq!(config.analytics.endpoint, "https://analytics.zenml.io/batch");
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let yaml = r#"
sidecar:
  command: /opt/venv/bin/python
  env:
    ZENML_LOGGING_VERBOSITY: DEBUG
collections:
  items_per_page: 25
analytics:
  debug: true
"#;
    let config: BridgeConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.sidecar.command, "/opt/venv/bin/python");
    assert_eq!(config.sidecar.args, vec!["bundled/tool/lsp_server.py"]);
    assert_eq!(config.sidecar.handshake_timeout_secs, 30);
    assert_eq!(config.collections.items_per_page, 25);
    assert_eq!(config.collections.refresh_interval_secs, 30);
    assert!(config.analytics.enabled);
    assert!(config.analytics.debug);
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = BridgeConfig::default();
    config.collections.items_per_page = 0;
    assert_eq!(
        config.validate(),
        Err(ConfigError::InvalidPageSize { value: 0 })
    );

    let mut config = BridgeConfig::default();
    config.collections.items_per_page = 101;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.analytics.batch_size = 0;
    assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));

    let mut config = BridgeConfig::default();
    config.analytics.batch_size = 50;
    config.analytics.queue_capacity = 20;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("must not exceed"));

    let mut config = BridgeConfig::default();
    config.sidecar.command = "  ".to_string();
    assert_eq!(config.validate(), Err(ConfigError::EmptySidecarCommand));
}

#[test]
fn test_transport_config_carries_interpreter() {
    let yaml = r#"
sidecar:
  command: python
  interpreter: /usr/bin/python3.11
  shutdown_grace_secs: 5
"#;
    let config: BridgeConfig = serde_yaml::from_str(yaml).unwrap();
    let transport = config.sidecar.transport_config();
    assert_eq!(transport.program, "python");
    assert_eq!(transport.shutdown_grace, Duration::from_secs(5));
    assert_eq!(
        transport.initialization_options["settings"][0]["interpreter"][0],
        "/usr/bin/python3.11"
    );
    assert_eq!(
        transport.initialization_options["globalSettings"]["interpreter"][0],
        "/usr/bin/python3.11"
    );
}

#[test]
fn test_analytics_settings_mapping() {
    let mut config = BridgeConfig::default();
    config.analytics.disconnect_window_secs = 4;
    let settings = config.analytics.settings();
    assert_eq!(settings.capacity, 100);
    assert_eq!(settings.intent_window, Duration::from_secs(4));
    assert_eq!(settings.send_timeout, Duration::from_secs(5));
}

#[test]
#[serial]
fn test_load_applies_env_opt_out() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "analytics:\n  enabled: true\n").unwrap();

    std::env::set_var(DO_NOT_TRACK_ENV, "1");
    let config = BridgeConfig::load(&path).unwrap();
    assert!(!config.analytics.enabled);
    std::env::remove_var(DO_NOT_TRACK_ENV);

    std::env::set_var(ANALYTICS_OPT_IN_ENV, "false");
    let config = BridgeConfig::load(&path).unwrap();
    assert!(!config.analytics.enabled);
    std::env::set_var(ANALYTICS_OPT_IN_ENV, "true");
    let config = BridgeConfig::load(&path).unwrap();
    assert!(config.analytics.enabled);
    clear_env();
}

#[test]
#[serial]
fn test_debug_flag_from_env() {
    clear_env();
    std::env::set_var(ANALYTICS_DEBUG_ENV, "yes");
    let mut config = BridgeConfig::default();
    config.apply_env_overrides();
    assert!(config.analytics.debug);
    clear_env();
}

#[test]
#[serial]
fn test_load_or_default_without_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    std::env::set_var(crate::paths::HOME_OVERRIDE_ENV, dir.path());
    let config = BridgeConfig::load_or_default(None).unwrap();
    assert_eq!(config, BridgeConfig::default());

    std::fs::write(
        dir.path().join("config.yaml"),
        "collections:\n  items_per_page: 42\n",
    )
    .unwrap();
    let config = BridgeConfig::load_or_default(None).unwrap();
    assert_eq!(config.collections.items_per_page, 42);
    std::env::remove_var(crate::paths::HOME_OVERRIDE_ENV);
}

#[test]
fn test_load_reports_parse_errors_with_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "collections: [unclosed").unwrap();
    let err = BridgeConfig::load(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.yaml"));
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "analytics:\n  batch_size: 0\n").unwrap();
    let err = BridgeConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("batch_size"));
}
