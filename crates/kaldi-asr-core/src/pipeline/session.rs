use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::asr::{Chunker, Transport, WsGatewayTransport};
use crate::audio::{AudioSource, WavSource, WaveData};
use crate::config::SessionConfig;
use crate::error::SessionError;

use super::cancel::CancellationToken;
use super::pool::{ConnectionPool, ResponseHandler, SharedState};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configured,
    BatchOpen,
    Dispatching,
    Waiting,
    Drained,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Configured => "configured",
            SessionState::BatchOpen => "batch-open",
            SessionState::Dispatching => "dispatching",
            SessionState::Waiting => "waiting",
            SessionState::Drained => "drained",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `perform` / `wait` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformStatus {
    /// 所有语音都已收到结果
    Completed,
    /// 等待被取消，请求仍在进行，可以再次 `wait`
    Interrupted,
}

/// 流式识别会话
///
/// 生命周期：`configure` → (`begin_batch` → `feed`* → `perform` → `next_result`*)*。
/// 连接池跨批次保留，`reset` 重建所有流。
pub struct SessionController {
    transport: Arc<dyn Transport>,
    audio: Box<dyn AudioSource>,
    cancel: CancellationToken,
    state: SessionState,
    config: SessionConfig,
    chunk_length: usize,
    pools: Vec<ConnectionPool>,
    shared: Arc<SharedState>,
    inputs: Vec<WaveData>,
    expected_inputs: usize,
    cursor: usize,
    needs_reset: bool,
    last_error: Option<String>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let config = SessionConfig::default();
        Self {
            transport,
            audio: Box::new(WavSource),
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            shared: Arc::new(SharedState::new(config.text_mode)),
            config,
            chunk_length: 0,
            pools: Vec::new(),
            inputs: Vec::new(),
            expected_inputs: 0,
            cursor: 0,
            needs_reset: false,
            last_error: None,
        }
    }

    /// 使用 WebSocket 推理网关传输
    pub fn ws_gateway() -> Self {
        Self::new(Arc::new(WsGatewayTransport::new()))
    }

    pub fn with_audio_source(mut self, audio: impl AudioSource + 'static) -> Self {
        self.audio = Box::new(audio);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 最近一次失败操作的错误信息
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn in_flight(&self) -> u64 {
        self.shared.inflight.count()
    }

    fn track<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn expect_state(&self, op: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                state: self.state.name(),
            })
        }
    }

    // ========================================================================
    // 配置
    // ========================================================================

    /// 为每个服务地址建立连接池并启动流
    pub fn configure(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        let result = self.configure_(config);
        self.track(result)
    }

    fn configure_(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        self.expect_state(
            "configure",
            &[SessionState::Idle, SessionState::Configured, SessionState::Drained],
        )?;

        if config.servers.is_empty() {
            return Err(SessionError::NoServers);
        }
        if config.chunk_length <= 0 {
            return Err(SessionError::InvalidChunkLength(config.chunk_length));
        }
        let chunk_length = config.chunk_length as usize;

        self.pools.clear();
        self.state = SessionState::Idle;

        let shared = Arc::new(SharedState::new(config.text_mode));
        let mut pools = Vec::with_capacity(config.servers.len());
        for address in &config.servers {
            let handler = ResponseHandler::new(shared.clone(), config.output_name());
            let pool = ConnectionPool::new(self.transport.clone(), address, &config, handler)?;

            if chunk_length > pool.frame_samples() {
                return Err(SessionError::ChunkTooLarge {
                    chunk_length,
                    frame_samples: pool.frame_samples(),
                });
            }
            pools.push(pool);
        }

        for pool in &mut pools {
            pool.start_streams()?;
        }

        tracing::info!(
            "Session configured: {} server(s), {} contexts each, chunk length {}, {:?} text",
            pools.len(),
            config.ncontextes.max(1),
            chunk_length,
            config.text_mode
        );

        self.pools = pools;
        self.shared = shared;
        self.chunk_length = chunk_length;
        self.config = config;
        self.needs_reset = false;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// 关闭所有流、重建连接，清空计数和锁存的错误
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let result = self.reset_();
        self.track(result)
    }

    fn reset_(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Idle {
            return Err(SessionError::InvalidState {
                op: "reset",
                state: self.state.name(),
            });
        }

        self.reset_pools()?;
        self.shared.inflight.reset();
        self.shared.latch.clear();
        self.inputs.clear();
        self.cursor = 0;
        self.state = SessionState::Configured;

        tracing::info!("Session reset");
        Ok(())
    }

    /// 重建所有连接池；任何一个失败都要求下次 `begin_batch` 重试
    fn reset_pools(&mut self) -> Result<(), SessionError> {
        for pool in &mut self.pools {
            if let Err(e) = pool.reset() {
                self.needs_reset = true;
                return Err(e);
            }
        }
        self.needs_reset = false;
        Ok(())
    }

    /// 释放全部连接
    pub fn close(&mut self) {
        self.pools.clear();
        self.inputs.clear();
        self.state = SessionState::Idle;
    }

    // ========================================================================
    // 批次
    // ========================================================================

    /// 开始一个新批次，预分配 `expected` 个输出槽
    pub fn begin_batch(&mut self, expected: usize) -> Result<(), SessionError> {
        let result = self.begin_batch_(expected);
        self.track(result)
    }

    fn begin_batch_(&mut self, expected: usize) -> Result<(), SessionError> {
        self.expect_state(
            "begin a batch",
            &[
                SessionState::Configured,
                SessionState::BatchOpen,
                SessionState::Waiting,
                SessionState::Drained,
            ],
        )?;

        // 放弃被中断的批次时，迟到的响应不能落到新批次的槽里
        if self.state == SessionState::Waiting {
            self.needs_reset = true;
        }

        if self.config.reset_on_begin || self.needs_reset {
            self.reset_pools()?;
        }

        self.inputs.clear();
        self.inputs.reserve(expected);
        self.expected_inputs = expected;
        self.shared.collector.resize(expected);
        self.shared.inflight.reset();
        self.shared.latch.clear();
        self.cursor = 0;
        self.state = SessionState::BatchOpen;
        Ok(())
    }

    /// 解码一条音频并加入待处理列表
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let result = self
            .expect_state("feed", &[SessionState::BatchOpen])
            .and_then(|_| self.audio.parse(bytes).map_err(SessionError::from));
        let wave = self.track(result)?;
        self.inputs.push(wave);
        Ok(())
    }

    /// 直接加入已解码的样本
    pub fn feed_samples(&mut self, samples: Vec<f32>, sample_rate: f32) -> Result<(), SessionError> {
        let result = self.expect_state("feed", &[SessionState::BatchOpen]);
        self.track(result)?;
        self.inputs.push(WaveData::new(samples, sample_rate));
        Ok(())
    }

    fn validate_inputs(&self) -> Result<(), SessionError> {
        if self.expected_inputs != self.inputs.len() {
            return Err(SessionError::InputCountMismatch {
                expected: self.expected_inputs,
                actual: self.inputs.len(),
            });
        }
        if self.inputs.is_empty() {
            return Err(SessionError::EmptyBatch);
        }

        for wave in &self.inputs {
            if wave.sample_rate != self.config.sample_rate {
                return Err(SessionError::NonUniformSampleRate {
                    expected: self.config.sample_rate,
                    actual: wave.sample_rate,
                });
            }
        }

        if let Some(i) = self.inputs.iter().position(|w| w.samples.is_empty()) {
            return Err(SessionError::EmptyInput {
                correlation_id: i as u64 + 1,
            });
        }
        Ok(())
    }

    /// 校验输入，发送全部分块，然后等待结果
    pub fn perform(&mut self) -> Result<PerformStatus, SessionError> {
        let result = self.perform_();
        self.track(result)
    }

    fn perform_(&mut self) -> Result<PerformStatus, SessionError> {
        self.expect_state("perform", &[SessionState::BatchOpen])?;
        self.validate_inputs()?;

        self.state = SessionState::Dispatching;
        if let Err(e) = self.dispatch_all() {
            self.needs_reset = true;
            self.state = SessionState::Configured;
            return Err(e);
        }

        self.state = SessionState::Waiting;
        self.wait_loop()
    }

    fn dispatch_all(&self) -> Result<(), SessionError> {
        let started = Instant::now();
        let mut chunks = 0usize;

        for (i, wave) in self.inputs.iter().enumerate() {
            let correlation_id = i as u64 + 1;
            // 服务器按 (corr - 1) % nservers 轮转，池内再按 corr % ncontextes 选连接。
            // 两者的模数有公因子时部分连接不会被用到，例如 2 个服务器各 2 条连接时，
            // 第一个服务器只收到奇数 corr，只用 1 号连接。
            let pool = &self.pools[i % self.pools.len()];

            for chunk in Chunker::new(&wave.samples, self.chunk_length, correlation_id)? {
                pool.send_chunk(&chunk, &self.shared.inflight)?;
                chunks += 1;
            }
        }

        tracing::debug!(
            "Dispatched {} chunks for {} inputs in {:?}",
            chunks,
            self.inputs.len(),
            started.elapsed()
        );
        Ok(())
    }

    /// 被中断后继续等待同一批次
    pub fn wait(&mut self) -> Result<PerformStatus, SessionError> {
        let result = self
            .expect_state("wait", &[SessionState::Waiting])
            .and_then(|_| self.wait_loop());
        self.track(result)
    }

    fn wait_loop(&mut self) -> Result<PerformStatus, SessionError> {
        let poll_interval = Duration::from_micros(self.config.poll_interval_us.max(1));
        let liveness_interval = Duration::from_millis(self.config.liveness_interval_ms);
        let mut last_liveness = Instant::now();

        loop {
            if let Some(err) = self.shared.latch.get() {
                self.needs_reset = true;
                self.state = SessionState::Configured;
                return Err(err);
            }

            // 中断在这里被消费；等待之外到达的中断留给下一次等待
            if self.cancel.take_cancelled() {
                tracing::info!(
                    "Wait interrupted with {} input(s) in flight",
                    self.shared.inflight.count()
                );
                return Ok(PerformStatus::Interrupted);
            }

            if self.shared.inflight.is_idle() {
                self.cursor = 0;
                self.state = SessionState::Drained;
                tracing::info!("Batch of {} input(s) completed", self.inputs.len());
                return Ok(PerformStatus::Completed);
            }

            if last_liveness.elapsed() >= liveness_interval {
                for pool in &self.pools {
                    if !pool.is_server_alive() {
                        self.shared.latch.try_set(SessionError::ServerNotLive {
                            address: pool.address().to_string(),
                        });
                    }
                }
                last_liveness = Instant::now();
                continue;
            }

            thread::sleep(poll_interval);
        }
    }

    // ========================================================================
    // 结果
    // ========================================================================

    /// 逐条返回结果；全部返回后得到 `None`，游标回到开头
    pub fn next_result(&mut self) -> Option<String> {
        if self.state != SessionState::Drained {
            return None;
        }

        if self.cursor >= self.shared.collector.len() {
            self.cursor = 0;
            return None;
        }

        let result = self.shared.collector.get(self.cursor);
        self.cursor += 1;
        result
    }

    /// 按输入顺序返回全部结果
    pub fn results(&self) -> Result<Vec<String>, SessionError> {
        self.expect_state("read results", &[SessionState::Drained])?;
        Ok(self.shared.collector.snapshot())
    }
}
