use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::{error, info};

use crate::config::Config;

/// Secrets injected from the environment, kept out of the YAML file.
#[derive(Debug)]
pub struct Secrets {
    pub drive_access_token: String,
    pub extraction_api_key: String,
    pub backend_api_key: String,
}

/// Loads the static YAML config file (no secrets) and injects required env
/// vars for secrets. Returns the parsed config plus secrets, or an error
/// naming the missing piece.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<(Config, Secrets)> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let config: Config = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let secrets = Secrets {
        drive_access_token: require_env("DRIVE_ACCESS_TOKEN")?,
        extraction_api_key: require_env("EXTRACTION_API_KEY")?,
        backend_api_key: require_env("BACKEND_API_KEY")?,
    };

    config.trace_loaded();
    Ok((config, secrets))
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) => {
            info!(var = name, "Secret found in env");
            Ok(value)
        }
        Err(e) => {
            error!(error = ?e, var = name, "Environment variable not set");
            Err(anyhow::anyhow!("{name} environment variable not set: {e}"))
        }
    }
}
