use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::DEFAULT_ERROR_MESSAGE;

pub const ENV_PREFIX: &str = "PICUP_";

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    pub upload_url: Option<Url>,
    pub default_error_message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    upload_url: Option<Url>,
    default_error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upload_url: Url,
    pub default_error_message: String,
}

fn merge_config(base: ConfigFile, env: ConfigEnv, url_override: Option<Url>) -> Result<Config> {
    let upload_url = url_override
        .or(env.upload_url)
        .or(base.upload_url)
        .ok_or(anyhow!(
            "No upload URL provided, pass --url, set {}UPLOAD_URL or run `picup config`",
            ENV_PREFIX
        ))?;

    let default_error_message = env
        .default_error_message
        .or(base.default_error_message)
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());

    Ok(Config {
        upload_url,
        default_error_message,
    })
}

fn config_file_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "picup", "picup")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

/// Loads the configuration. The environment wins over the config file, and `url_override`
/// wins over both.
pub fn read_config(url_override: Option<Url>) -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed(ENV_PREFIX)
        .from_env::<ConfigEnv>()
        .unwrap_or_default();

    let config_file = config_file_path()?;
    let file_config = if let Ok(config) = fs::read_to_string(&config_file) {
        toml::from_str(&config)
            .with_context(|| format!("Invalid config file {}", config_file.display()))?
    } else {
        ConfigFile::default()
    };

    merge_config(file_config, env_config, url_override)
}

pub fn write_config(config: &ConfigFile) -> Result<PathBuf> {
    let config_file = config_file_path()?;
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&config_file, toml::to_string_pretty(config)?)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(config_file)
}
