use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Stream is not started")]
    StreamNotStarted,
    #[error("Stream closed")]
    StreamClosed,
}

/// 模型输入张量描述
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct TensorMetadata {
    pub name: String,
    #[serde(default)]
    pub datatype: String,
    #[serde(default)]
    pub shape: Vec<i64>,
}

/// 模型元数据（只关心输入张量）
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<TensorMetadata>,
}

impl ModelMetadata {
    pub fn input(&self, name: &str) -> Option<&TensorMetadata> {
        self.inputs.iter().find(|t| t.name == name)
    }
}

/// 一次流式推理请求
///
/// `payload` 总是固定帧长（不足部分补零），`sample_count` 给出真实样本数。
#[derive(Debug, Clone)]
pub struct InferRequest {
    pub model_name: String,
    pub request_id: String,
    pub sequence_id: u64,
    pub sequence_start: bool,
    pub sequence_end: bool,
    pub payload: Vec<u8>,
    pub frame_samples: usize,
    pub sample_count: i32,
    pub outputs: Vec<String>,
}

/// 服务端返回的推理结果
#[derive(Debug, Clone, Default)]
pub struct InferResult {
    /// 请求 ID；传输层故障时可能缺失
    pub id: Option<String>,
    /// 服务端或传输层报告的失败原因
    pub error: Option<String>,
    pub outputs: HashMap<String, Vec<String>>,
}

impl InferResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn failed(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(error.into()),
            outputs: HashMap::new(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.outputs.insert(name.into(), values);
        self
    }

    pub fn string_data(&self, name: &str) -> Option<&[String]> {
        self.outputs.get(name).map(Vec::as_slice)
    }
}

/// 流回调：由连接的后台投递线程按 FIFO 顺序调用
pub type StreamCallback = Box<dyn FnMut(InferResult) + Send + 'static>;

/// 一条到推理服务的持久连接
pub trait Connection: Send {
    /// 查询模型元数据
    fn model_metadata(&self, model: &str) -> Result<ModelMetadata, TransportError>;

    /// 建立双向流，之后的每个响应都交给 `callback`
    fn start_stream(&mut self, callback: StreamCallback) -> Result<(), TransportError>;

    /// 关闭双向流；未完成的请求被丢弃
    fn stop_stream(&mut self);

    /// 异步发送一个请求，只在本地或传输层拒绝时同步失败
    fn dispatch(&self, request: InferRequest) -> Result<(), TransportError>;

    fn is_alive(&self) -> bool;
}

/// 连接工厂
pub trait Transport: Send + Sync {
    fn connect(&self, address: &str, verbose: bool) -> Result<Box<dyn Connection>, TransportError>;
}
