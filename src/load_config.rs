/// `load_config` module: reads the undercloud settings file into
/// [`UndercloudConfig`].
///
/// Every key in the file is optional; missing keys take the defaults defined
/// by the core crate. A missing file is only an error when it was named
/// explicitly on the command line.
///
/// # Errors
/// All errors use `anyhow::Error` and surface at the CLI boundary.
use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::{error, info};
use tripleo_ctl_core::undercloud::UndercloudConfig;

/// Settings file looked up in the working directory when `--config` is absent.
pub const DEFAULT_UNDERCLOUD_CONFIG: &str = "undercloud.yaml";

/// Loads an undercloud settings file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<UndercloudConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    if config_content.trim().is_empty() {
        info!(config_path = ?path_ref, "Config file is empty, using defaults");
        return Ok(UndercloudConfig::default());
    }

    match serde_yaml::from_str::<UndercloudConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Loads `path` if given, else `undercloud.yaml` if present, else defaults.
pub fn load_undercloud_config(path: Option<&Path>) -> Result<UndercloudConfig> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(DEFAULT_UNDERCLOUD_CONFIG).is_file() => load_config(DEFAULT_UNDERCLOUD_CONFIG),
        None => {
            info!("No undercloud config file found, using defaults");
            Ok(UndercloudConfig::default())
        }
    }
}
