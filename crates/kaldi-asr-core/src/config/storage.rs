use std::fs;
use std::path::{Path, PathBuf};

use crate::config::settings::SessionConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config directory not found")]
    DirNotFound,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 默认配置文件路径
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::DirNotFound)?;
    Ok(config_dir.join("kaldi-asr-client").join("config.json"))
}

/// 加载配置，文件不存在时返回默认配置
pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config {:?} not found, using defaults", path);
        return Ok(SessionConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: SessionConfig = serde_json::from_str(&content)?;

    Ok(config)
}

/// 保存配置
pub fn save_config(path: &Path, config: &SessionConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    tracing::info!("Saving config to: {:?}", path);
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, &content)?;
    Ok(())
}
