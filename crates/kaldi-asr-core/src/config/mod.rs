pub mod settings;
pub mod storage;

pub use settings::{SessionConfig, TextMode};
pub use storage::{default_config_path, load_config, save_config, ConfigError};
