use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use tripleo_ctl::load_config::{load_config, load_undercloud_config};

#[test]
fn test_load_config_overrides_and_defaults() {
    let config_yaml = r#"
local_ip: 10.0.0.1/24
undercloud_public_host: 10.0.0.2
undercloud_admin_host: 10.0.0.3
output_dir: /home/stack/out
roles_file: foo/roles.yaml
container_images_file: /home/stack/containers.yaml
enable_tempest: false
net_config_override: /foo/net-config.json
undercloud_nameservers:
  - 8.8.8.8
  - 8.8.4.4
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.local_ip, "10.0.0.1/24");
    assert_eq!(config.output_dir, PathBuf::from("/home/stack/out"));
    assert_eq!(config.roles_file.as_deref(), Some("foo/roles.yaml"));
    assert!(!config.enable_tempest);
    assert_eq!(config.undercloud_nameservers.len(), 2);
    assert_eq!(config.net_config_override, Some(PathBuf::from("/foo/net-config.json")));
    // Untouched keys keep their defaults.
    assert_eq!(config.local_domain, "localdomain");
    assert!(config.enable_ironic);
    assert!(!config.enable_swift_encryption);
    assert_eq!(config.templates, "/usr/share/openstack-tripleo-heat-templates/");
}

#[test]
fn test_load_config_empty_file_gives_defaults() {
    let config_file = NamedTempFile::new().expect("temp file");
    let config = load_config(config_file.path()).expect("Empty config should load");
    assert_eq!(config.local_ip, "192.168.24.1/24");
    assert_eq!(config.undercloud_public_host, "192.168.24.2");
    assert!(config.net_config_override.is_none());
}

#[test]
fn test_load_config_missing_file_fails() {
    let result = load_config("/nonexistent/undercloud.yaml");
    assert!(result.is_err(), "Expected error for missing config file");
}

#[test]
fn test_load_config_invalid_yaml_fails() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "enable_ironic: [not, a, bool]\n").unwrap();
    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
fn test_explicit_config_path_must_exist() {
    let result = load_undercloud_config(Some(std::path::Path::new("/nonexistent/undercloud.yaml")));
    assert!(result.is_err());
}
