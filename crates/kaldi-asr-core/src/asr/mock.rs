//! 测试用进程内传输
//!
//! 每条连接有自己的投递线程，按 FIFO 顺序调用回调；响应内容由 responder 决定。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::traits::{
    Connection, InferRequest, InferResult, ModelMetadata, StreamCallback, TensorMetadata,
    Transport, TransportError,
};

pub type Responder = Arc<dyn Fn(&InferRequest) -> Option<InferResult> + Send + Sync>;

/// 一次 dispatch 的记录
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub address: String,
    pub connection: usize,
    pub request: InferRequest,
}

pub struct MockTransport {
    pub frame_samples: i64,
    pub fail_connect: Vec<String>,
    pub fail_metadata: bool,
    pub responder: Responder,
    pub alive: Arc<AtomicBool>,
    /// 为 true 时投递线程暂停
    pub hold: Arc<AtomicBool>,
    pub dispatched: Arc<Mutex<Vec<Dispatched>>>,
    pub connects: Arc<AtomicUsize>,
    /// 剩余可成功的 connect 次数，用完后 connect 失败
    pub connect_budget: Arc<AtomicUsize>,
    /// 从第 N 次 dispatch（0 起，所有连接合计）开始同步失败
    pub fail_dispatch_from: Arc<AtomicUsize>,
    dispatch_count: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(frame_samples: i64) -> Self {
        Self {
            frame_samples,
            fail_connect: Vec::new(),
            fail_metadata: false,
            responder: Arc::new(|request| Some(text_response(request, "hello"))),
            alive: Arc::new(AtomicBool::new(true)),
            hold: Arc::new(AtomicBool::new(false)),
            dispatched: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
            connect_budget: Arc::new(AtomicUsize::new(usize::MAX)),
            fail_dispatch_from: Arc::new(AtomicUsize::new(usize::MAX)),
            dispatch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&InferRequest) -> Option<InferResult> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.dispatched.lock().unwrap().clone()
    }
}

/// 对请求的每个输出名返回 `text`
pub fn text_response(request: &InferRequest, text: &str) -> InferResult {
    let mut result = InferResult::ok(request.request_id.clone());
    for name in &request.outputs {
        result = result.with_output(name.clone(), vec![text.to_string()]);
    }
    result
}

impl Transport for MockTransport {
    fn connect(&self, address: &str, _verbose: bool) -> Result<Box<dyn Connection>, TransportError> {
        if self.fail_connect.iter().any(|a| a == address) {
            return Err(TransportError::Network(format!("connection refused: {}", address)));
        }
        let budget = self
            .connect_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if budget.is_err() {
            return Err(TransportError::Network("down".to_string()));
        }

        let connection = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            address: address.to_string(),
            connection,
            frame_samples: self.frame_samples,
            fail_metadata: self.fail_metadata,
            responder: self.responder.clone(),
            alive: self.alive.clone(),
            hold: self.hold.clone(),
            dispatched: self.dispatched.clone(),
            fail_dispatch_from: self.fail_dispatch_from.clone(),
            dispatch_count: self.dispatch_count.clone(),
            stream: None,
        }))
    }
}

struct MockStream {
    tx: mpsc::Sender<InferRequest>,
    worker: JoinHandle<()>,
}

pub struct MockConnection {
    address: String,
    /// 全局创建序号，用于区分重建前后的连接
    connection: usize,
    frame_samples: i64,
    fail_metadata: bool,
    responder: Responder,
    alive: Arc<AtomicBool>,
    hold: Arc<AtomicBool>,
    dispatched: Arc<Mutex<Vec<Dispatched>>>,
    fail_dispatch_from: Arc<AtomicUsize>,
    dispatch_count: Arc<AtomicUsize>,
    stream: Option<MockStream>,
}

impl Connection for MockConnection {
    fn model_metadata(&self, model: &str) -> Result<ModelMetadata, TransportError> {
        if self.fail_metadata {
            return Err(TransportError::Protocol(format!("unknown model '{}'", model)));
        }
        Ok(ModelMetadata {
            name: model.to_string(),
            inputs: vec![
                TensorMetadata {
                    name: "WAV_DATA".to_string(),
                    datatype: "FP32".to_string(),
                    shape: vec![1, self.frame_samples],
                },
                TensorMetadata {
                    name: "WAV_DATA_DIM".to_string(),
                    datatype: "INT32".to_string(),
                    shape: vec![1, 1],
                },
            ],
        })
    }

    fn start_stream(&mut self, mut callback: StreamCallback) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::channel::<InferRequest>();
        let responder = self.responder.clone();
        let hold = self.hold.clone();
        let worker = thread::spawn(move || {
            while let Ok(request) = rx.recv() {
                while hold.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                if let Some(result) = responder(&request) {
                    callback(result);
                }
            }
        });
        self.stream = Some(MockStream { tx, worker });
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream.tx);
            stream.worker.join().ok();
        }
    }

    fn dispatch(&self, request: InferRequest) -> Result<(), TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::StreamNotStarted)?;
        let n = self.dispatch_count.fetch_add(1, Ordering::SeqCst);
        if n >= self.fail_dispatch_from.load(Ordering::SeqCst) {
            return Err(TransportError::Network("dispatch rejected".to_string()));
        }
        self.dispatched.lock().unwrap().push(Dispatched {
            address: self.address.clone(),
            connection: self.connection,
            request: request.clone(),
        });
        stream.tx.send(request).map_err(|_| TransportError::StreamClosed)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        // 测试结束时不等待被 hold 住的投递线程
        if let Some(stream) = self.stream.take() {
            drop(stream.tx);
            if !self.hold.load(Ordering::SeqCst) {
                stream.worker.join().ok();
            }
        }
    }
}
