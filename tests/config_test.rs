use scs_client::config::{load_config, load_from_vars, load_from_yaml, Protocol};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name: &str| map.get(name).cloned()
}

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
profiles:
  test:
    endpoint: https://scs-1.example.com
    access_key: AKIATEST
    secret_key: secrettest
    region: us-west-2
    bucket: test-bucket
  staging:
    endpoint: staging.example.com:9000
    access_key: AKIASTAGE
    secret_key: secretstage

default_profile: test

client:
  max_retries: 7
  request_timeout_secs: 120
  virtual_host_style: true
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = load_from_yaml(&config_path).unwrap();

    assert_eq!(config.profiles.len(), 2);
    let profile = config.get_profile(None).unwrap();
    assert_eq!(profile.access_key, "AKIATEST");
    assert_eq!(profile.secret_key, "secrettest");
    assert_eq!(profile.bucket, Some("test-bucket".to_string()));

    assert_eq!(config.client.max_retries, 7);
    assert_eq!(config.client.request_timeout().as_secs(), 120);
    assert!(config.client.virtual_host_style);

    let staging = config.get_profile(Some("staging")).unwrap();
    assert_eq!(staging.endpoint_url(Protocol::Http), "http://staging.example.com:9000");
}

/// Selecting a profile by name makes it the default
#[test]
fn test_load_config_with_profile() {
    let yaml = r#"
profiles:
  a:
    endpoint: a.example.com
    access_key: ka
    secret_key: sa
  b:
    endpoint: b.example.com
    access_key: kb
    secret_key: sb
"#;
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();
    let path = config_path.to_str().unwrap();

    let config = load_config(Some(path), Some("b")).unwrap();
    assert_eq!(config.get_profile(None).unwrap().access_key, "kb");

    let err = load_config(Some(path), Some("missing")).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_missing_file_reports_path() {
    let err = load_from_yaml("/nonexistent/scs.yaml").unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/scs.yaml"));
}

/// Test loading configuration from variables (AWS standard names)
#[test]
fn test_vars_aws_format() {
    let config = load_from_vars(vars(&[
        ("SCS_ENDPOINT", "https://scs.test.com"),
        ("AWS_ACCESS_KEY_ID", "test_key"),
        ("AWS_SECRET_ACCESS_KEY", "test_secret"),
        ("AWS_REGION", "eu-west-1"),
        ("SCS_BUCKET", "test-bucket"),
    ]))
    .unwrap();

    let profile = config.get_profile(None).unwrap();
    assert_eq!(profile.endpoint, "https://scs.test.com");
    assert_eq!(profile.access_key, "test_key");
    assert_eq!(profile.region, "eu-west-1");
    assert_eq!(profile.bucket.as_deref(), Some("test-bucket"));
    assert_eq!(config.client.max_retries, 5);
}

/// Legacy SCS_* credential names and client overrides
#[test]
fn test_vars_scs_format() {
    let config = load_from_vars(vars(&[
        ("SCS_ENDPOINT", "localhost:9000"),
        ("SCS_ACCESS_KEY", "legacy_key"),
        ("SCS_SECRET_KEY", "legacy_secret"),
        ("SCS_MAX_RETRIES", "2"),
        ("SCS_PART_SIZE", "10485760"),
        ("SCS_PROTOCOL", "http"),
    ]))
    .unwrap();

    let profile = config.get_profile(None).unwrap();
    assert_eq!(profile.access_key, "legacy_key");
    assert_eq!(profile.region, "us-east-1");
    assert_eq!(config.client.max_retries, 2);
    assert_eq!(config.client.part_size, 10 * 1024 * 1024);
    assert_eq!(profile.endpoint_url(config.client.protocol), "http://localhost:9000");
}

#[test]
fn test_vars_missing_credentials() {
    let err = load_from_vars(vars(&[("SCS_ENDPOINT", "localhost:9000")])).unwrap_err();
    assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));

    assert!(load_from_vars(vars(&[])).is_err());
}

#[test]
fn test_vars_invalid_number() {
    let err = load_from_vars(vars(&[
        ("SCS_ENDPOINT", "localhost:9000"),
        ("SCS_ACCESS_KEY", "k"),
        ("SCS_SECRET_KEY", "s"),
        ("SCS_MAX_RETRIES", "lots"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("SCS_MAX_RETRIES"));
}
