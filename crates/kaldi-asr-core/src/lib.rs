pub mod asr;
pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
mod runtime;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use asr::{Transport, TransportError, WsGatewayTransport};
pub use audio::{encode_to_wav, AudioError, AudioSource, WavSource, WaveData};
pub use config::{default_config_path, load_config, save_config, ConfigError, SessionConfig, TextMode};
pub use error::{ErrorKind, SessionError};
pub use pipeline::{
    install_interrupt_handler, CancellationToken, PerformStatus, SessionController, SessionState,
};
