//! 一个服务地址上的连接池

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::asr::{
    Chunk, Connection, InferRequest, InferResult, RequestId, StreamCallback, Transport,
    TransportError,
};
use crate::config::{SessionConfig, TextMode};
use crate::error::SessionError;

use super::collector::ResultCollector;
use super::inflight::InFlightTracker;
use super::latch::ErrorLatch;

/// 会话内所有连接池共享的状态
#[derive(Debug)]
pub struct SharedState {
    pub inflight: InFlightTracker,
    pub latch: ErrorLatch,
    pub collector: ResultCollector,
}

impl SharedState {
    pub fn new(mode: TextMode) -> Self {
        Self {
            inflight: InFlightTracker::new(),
            latch: ErrorLatch::new(),
            collector: ResultCollector::new(mode),
        }
    }
}

/// 流回调的处理逻辑，运行在连接的投递线程上
#[derive(Debug, Clone)]
pub struct ResponseHandler {
    state: Arc<SharedState>,
    output_name: &'static str,
}

impl ResponseHandler {
    pub fn new(state: Arc<SharedState>, output_name: &'static str) -> Self {
        Self { state, output_name }
    }

    fn handle(&self, result: InferResult) -> Result<(), SessionError> {
        if let Some(reason) = &result.error {
            return Err(SessionError::RequestRejected(reason.clone()));
        }

        let raw_id = result
            .id
            .as_deref()
            .ok_or_else(|| SessionError::MalformedRequestId("<missing>".to_string()))?;
        let id = RequestId::decode(raw_id)?;

        if !id.is_last && self.state.collector.mode() == TextMode::Final {
            return Ok(());
        }

        let fragments =
            result
                .string_data(self.output_name)
                .ok_or_else(|| SessionError::MissingOutput {
                    output: self.output_name.to_string(),
                    request_id: raw_id.to_string(),
                })?;
        self.state.collector.append(id.correlation_id, fragments)?;

        if id.is_last {
            self.state.inflight.decrement()?;
        }
        Ok(())
    }

    /// 回调边界：任何错误或 panic 都写入锁存器，不向外传播
    pub fn on_response(&self, result: InferResult) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(result))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.state.latch.try_set(e);
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.state.latch.try_set(SessionError::CallbackPanicked(message));
            }
        }
    }

    fn callback(&self) -> StreamCallback {
        let handler = self.clone();
        Box::new(move |result| handler.on_response(result))
    }
}

/// 到一个服务地址的 `ncontextes` 条持久连接
///
/// corr_id 固定映射到 `corr_id % ncontextes` 号连接，同一语音的所有响应都在
/// 同一个投递线程上按序到达。
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    address: String,
    model_name: String,
    nclients: usize,
    verbose: bool,
    frame_samples: usize,
    request_partials: bool,
    output_name: &'static str,
    connections: Vec<Box<dyn Connection>>,
    handler: ResponseHandler,
    streams_started: bool,
}

impl ConnectionPool {
    /// 建立全部连接并从 0 号连接读取帧长；不启动流
    pub fn new(
        transport: Arc<dyn Transport>,
        address: &str,
        config: &SessionConfig,
        handler: ResponseHandler,
    ) -> Result<Self, SessionError> {
        let nclients = config.ncontextes.max(1) as usize;

        let mut pool = Self {
            transport,
            address: address.to_string(),
            model_name: config.model_name.clone(),
            nclients,
            verbose: config.verbose,
            frame_samples: 0,
            request_partials: config.text_mode == TextMode::Accumulate,
            output_name: config.output_name(),
            connections: Vec::with_capacity(nclients),
            handler,
            streams_started: false,
        };

        pool.reset_connections()?;
        pool.frame_samples = pool.fetch_frame_samples()?;

        tracing::info!(
            "Connected {} clients to {} (model {}, {} samples per chunk)",
            pool.nclients,
            pool.address,
            pool.model_name,
            pool.frame_samples
        );

        Ok(pool)
    }

    /// 全部连接建立成功后才替换旧连接，失败时保留原有的 `nclients` 条
    fn reset_connections(&mut self) -> Result<(), SessionError> {
        let connections = (0..self.nclients)
            .map(|_| {
                self.transport
                    .connect(&self.address, self.verbose)
                    .map_err(|source| SessionError::Connect {
                        address: self.address.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.connections = connections;
        Ok(())
    }

    fn fetch_frame_samples(&self) -> Result<usize, SessionError> {
        let metadata_error = |reason: String| SessionError::Metadata {
            address: self.address.clone(),
            model: self.model_name.clone(),
            reason,
        };

        let metadata = self.connections[0]
            .model_metadata(&self.model_name)
            .map_err(|e| metadata_error(e.to_string()))?;

        metadata
            .input("WAV_DATA")
            .and_then(|tensor| tensor.shape.get(1).copied())
            .filter(|&n| n > 0)
            .map(|n| n as usize)
            .ok_or_else(|| metadata_error("model has no WAV_DATA input of shape [1, N]".to_string()))
    }

    pub fn start_streams(&mut self) -> Result<(), SessionError> {
        debug_assert!(!self.streams_started);

        for connection in &mut self.connections {
            connection
                .start_stream(self.handler.callback())
                .map_err(|source| SessionError::Connect {
                    address: self.address.clone(),
                    source,
                })?;
        }

        self.streams_started = true;
        Ok(())
    }

    pub fn stop_streams(&mut self) {
        for connection in &mut self.connections {
            connection.stop_stream();
        }
        self.streams_started = false;
    }

    /// 关闭流、重建全部连接并重新启动流
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.stop_streams();
        self.reset_connections()?;
        self.start_streams()
    }

    pub fn connection_index(&self, correlation_id: u64) -> usize {
        (correlation_id % self.nclients as u64) as usize
    }

    /// 异步发送一个分块；首个分块发送前计数 +1
    pub fn send_chunk(&self, chunk: &Chunk<'_>, inflight: &InFlightTracker) -> Result<(), SessionError> {
        let request_id = RequestId::for_chunk(chunk).encode();

        if self.verbose {
            tracing::debug!(
                "Sending chunk {} with {} samples, is_first: {}, is_last: {}",
                request_id,
                chunk.samples.len(),
                chunk.is_first,
                chunk.is_last
            );
        }

        let sample_count =
            i32::try_from(chunk.samples.len()).map_err(|_| SessionError::ChunkTooLarge {
                chunk_length: chunk.samples.len(),
                frame_samples: self.frame_samples,
            })?;

        let outputs = if chunk.is_last || self.request_partials {
            vec![self.output_name.to_string()]
        } else {
            Vec::new()
        };

        let request = InferRequest {
            model_name: self.model_name.clone(),
            request_id,
            sequence_id: chunk.correlation_id,
            sequence_start: chunk.is_first,
            sequence_end: chunk.is_last,
            payload: chunk.to_payload(self.frame_samples),
            frame_samples: self.frame_samples,
            sample_count,
            outputs,
        };

        if chunk.is_first {
            inflight.increment();
        }

        self.connections
            .get(self.connection_index(chunk.correlation_id))
            .ok_or(SessionError::Dispatch(TransportError::StreamNotStarted))?
            .dispatch(request)
            .map_err(SessionError::Dispatch)
    }

    pub fn is_server_alive(&self) -> bool {
        self.connections.first().is_some_and(|c| c.is_alive())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn len(&self) -> usize {
        self.nclients
    }

    pub fn is_empty(&self) -> bool {
        self.nclients == 0
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.stop_streams();
    }
}
