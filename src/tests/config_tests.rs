use crate::Error;
use crate::config::NatConfig;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_load_missing_file_returns_defaults() {
    let dir = TempDir::new().unwrap();
    let config = assert_ok!(NatConfig::load(dir.path().join("nat.json")));
    assert_eq!(config, NatConfig::default());
}

#[test]
fn test_load_empty_file_returns_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nat.json");
    std::fs::write(&path, "  \n").unwrap();

    assert_eq!(NatConfig::load(&path).unwrap(), NatConfig::default());
}

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("nat.json");

    let config = NatConfig {
        pmp_enabled: true,
        gateway: Some("192.168.1.1".parse().unwrap()),
        lease_secs: 7200,
        renewal_interval_secs: Some(1800),
        ..NatConfig::enabled_for("QmPeer")
    };
    assert_ok!(config.save(&path));

    let loaded = NatConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.renewal_interval(), Duration::from_secs(1800));
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nat.json");
    std::fs::write(&path, r#"{ "enabled": true, "external_ip": "82.3.1.5" }"#).unwrap();

    let config = NatConfig::load(&path).unwrap();
    assert!(config.enabled);
    assert_eq!(config.external_ip, Some("82.3.1.5".parse().unwrap()));
    assert_eq!(config.lease_secs, 1200);
    assert!(!config.pmp_enabled);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();

    let malformed = dir.path().join("malformed.json");
    std::fs::write(&malformed, "{ not json").unwrap();
    assert!(matches!(
        NatConfig::load(&malformed),
        Err(Error::JsonSerialization(_))
    ));

    let short_lease = dir.path().join("short.json");
    std::fs::write(&short_lease, r#"{ "lease_secs": 10 }"#).unwrap();
    let err = assert_err!(NatConfig::load(&short_lease));
    assert!(matches!(err, Error::Nat(_)));
}
