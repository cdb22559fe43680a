use crate::asr::TransportError;
use crate::audio::AudioError;
use crate::config::ConfigError;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 调用方可以修正输入后重试
    Usage,
    /// 配置阶段的致命错误
    Setup,
    /// 后台回调中发生、被锁存的错误
    Runtime,
    /// 程序或协议缺陷
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("No inputs fed")]
    EmptyBatch,
    #[error("Expected {expected} inputs but got {actual} inputs")]
    InputCountMismatch { expected: usize, actual: usize },
    #[error("Non-uniform sample frequency! Expected {expected}, got {actual}")]
    NonUniformSampleRate { expected: f32, actual: f32 },
    #[error("No server addresses passed!")]
    NoServers,
    #[error("Chunk length must be positive, got {0}")]
    InvalidChunkLength(i64),
    #[error("Utterance {correlation_id} has no samples")]
    EmptyInput { correlation_id: u64 },
    #[error("Unable to decode audio: {0}")]
    Decode(#[from] AudioError),
    #[error("Cannot {op} while session is {state}")]
    InvalidState { op: &'static str, state: &'static str },
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to create client for {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },
    #[error("Unable to get model metadata for '{model}' from {address}: {reason}")]
    Metadata {
        address: String,
        model: String,
        reason: String,
    },
    #[error("Chunk length {chunk_length} exceeds the server frame size of {frame_samples} samples")]
    ChunkTooLarge {
        chunk_length: usize,
        frame_samples: usize,
    },

    #[error("Inference request failed: {0}")]
    RequestRejected(String),
    #[error("Unable to get {output} output for request {request_id}")]
    MissingOutput { output: String, request_id: String },
    #[error("Server {address} is not live")]
    ServerNotLive { address: String },
    #[error("Unable to run model: {0}")]
    Dispatch(#[source] TransportError),

    #[error("Malformed request id '{0}'")]
    MalformedRequestId(String),
    #[error("Correlation id {correlation_id} outside of {slots} output slots")]
    SlotOutOfRange { correlation_id: u64, slots: usize },
    #[error("In-flight counter decremented below zero")]
    InFlightUnderflow,
    #[error("Stream callback panicked: {0}")]
    CallbackPanicked(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::EmptyBatch
            | SessionError::InputCountMismatch { .. }
            | SessionError::NonUniformSampleRate { .. }
            | SessionError::NoServers
            | SessionError::InvalidChunkLength(_)
            | SessionError::EmptyInput { .. }
            | SessionError::Decode(_)
            | SessionError::InvalidState { .. }
            | SessionError::Config(_) => ErrorKind::Usage,
            SessionError::Connect { .. }
            | SessionError::Metadata { .. }
            | SessionError::ChunkTooLarge { .. } => ErrorKind::Setup,
            SessionError::RequestRejected(_)
            | SessionError::MissingOutput { .. }
            | SessionError::ServerNotLive { .. }
            | SessionError::Dispatch(_) => ErrorKind::Runtime,
            SessionError::MalformedRequestId(_)
            | SessionError::SlotOutOfRange { .. }
            | SessionError::InFlightUnderflow
            | SessionError::CallbackPanicked(_) => ErrorKind::Internal,
        }
    }

    /// 连接状态是否可能已经不一致，需要在复用前重置会话
    pub fn requires_reset(&self) -> bool {
        matches!(self.kind(), ErrorKind::Runtime | ErrorKind::Internal)
    }
}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        SessionError::Config(e.to_string())
    }
}
