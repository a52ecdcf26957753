//! Configuration Tests
//!
//! Tests for backend configuration loading and validation.

use clap::Parser;
use skinlens_backend::{BackendCliOptions, BackendConfig};
use skinlens_inference::DevicePreference;
use skinlens_shared::{LogFormat, SkinlensError};
use std::io::Write;
use std::path::PathBuf;

#[test]
fn test_default_configuration() {
    let config = BackendConfig::default();
    assert_eq!(config.listen_addr.to_string(), "0.0.0.0:5000");
    assert_eq!(config.model_dir, PathBuf::from("model"));
    assert_eq!(config.device, DevicePreference::Auto);
    assert_eq!(config.confidence_threshold, 0.5);
    assert!(config.enable_cors);
}

#[test]
fn test_cli_defaults_match_config_defaults() {
    let opts = BackendCliOptions::try_parse_from(["skinlens-backend"]).unwrap();
    let config = opts.to_config().unwrap();
    assert_eq!(config, BackendConfig::default());
    assert_eq!(opts.logging.log_format, LogFormat::Text);
}

#[test]
fn test_cli_overrides() {
    let opts = BackendCliOptions::try_parse_from([
        "skinlens-backend",
        "--listen-addr",
        "127.0.0.1:8080",
        "--model-dir",
        "/srv/model",
        "--weights-file",
        "/srv/weights.pth",
        "--device",
        "cuda:1",
        "--confidence-threshold",
        "0.7",
        "--enable-cors",
        "false",
        "--log-format",
        "json",
    ])
    .unwrap();

    let config = opts.to_config().unwrap();
    assert_eq!(config.listen_addr.port(), 8080);
    assert_eq!(config.device, DevicePreference::Cuda(1));
    assert_eq!(config.confidence_threshold, 0.7);
    assert!(!config.enable_cors);
    assert_eq!(opts.logging.log_format, LogFormat::Json);

    let paths = config.artifact_paths();
    assert_eq!(paths.weights, PathBuf::from("/srv/weights.pth"));
    assert_eq!(paths.labels, PathBuf::from("/srv/model/label_classes.json"));
}

#[test]
fn test_cli_rejects_invalid_values() {
    assert!(BackendCliOptions::try_parse_from(["skinlens-backend", "--device", "tpu"]).is_err());
    assert!(
        BackendCliOptions::try_parse_from(["skinlens-backend", "--listen-addr", "nowhere"])
            .is_err()
    );

    let opts = BackendCliOptions::try_parse_from([
        "skinlens-backend",
        "--confidence-threshold",
        "2.0",
    ])
    .unwrap();
    assert!(matches!(
        opts.to_config(),
        Err(SkinlensError::Configuration { .. })
    ));
}

#[test]
fn test_config_file_with_partial_keys() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
listen_addr = "127.0.0.1:9000"
model_dir = "/opt/skinlens"
device = "cpu"
confidence_threshold = 0.35
"#
    )
    .unwrap();

    let config = BackendConfig::from_file(file.path()).unwrap();
    assert_eq!(config.listen_addr.port(), 9000);
    assert_eq!(config.device, DevicePreference::Cpu);
    assert_eq!(config.confidence_threshold, 0.35);
    assert_eq!(config.max_upload_bytes, BackendConfig::default().max_upload_bytes);
}

#[test]
fn test_config_file_errors() {
    let err = BackendConfig::from_file("/nonexistent/skinlens.toml").unwrap_err();
    assert!(matches!(err, SkinlensError::Configuration { .. }));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_upload_bytes = 10").unwrap();
    assert!(BackendConfig::from_file(file.path()).is_err());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "device = \"quantum\"").unwrap();
    assert!(BackendConfig::from_file(file.path()).is_err());
}

#[test]
fn test_config_file_takes_precedence() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "model_dir = \"/from/file\"").unwrap();

    let path = file.path().to_string_lossy().to_string();
    let opts = BackendCliOptions::try_parse_from([
        "skinlens-backend",
        "--config",
        path.as_str(),
        "--model-dir",
        "/from/cli",
    ])
    .unwrap();
    assert_eq!(opts.to_config().unwrap().model_dir, PathBuf::from("/from/file"));
}
