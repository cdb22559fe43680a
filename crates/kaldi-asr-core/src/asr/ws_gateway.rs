//! WebSocket 推理网关的传输层
//!
//! Triton 的流式推理只有 gRPC（`ModelStreamInfer`）。这里连接的是部署在 Triton 前面的网关：
//! 它把 `/v2/models/*` 和 `/v2/health/*` 转发到 Triton 的 HTTP 端口，
//! 并把 `/v2/stream` 上的 JSON 消息转成 `ModelStreamInfer` 流。
//!
//! - 元数据：`GET {base}/v2/models/{model}`（KServe v2 HTTP 格式）
//! - 存活检查：`GET {base}/v2/health/live`
//! - 双向流：`ws://{host}/v2/stream`，每条请求/响应是一条 JSON 文本消息，张量为 base64 小端数据

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::traits::{
    Connection, InferRequest, InferResult, ModelMetadata, StreamCallback, Transport,
    TransportError,
};
use crate::runtime::get_runtime;

/// WebSocket 连接超时时间
const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// HTTP 请求超时时间
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// 关闭流时等待对端确认的时间
const WS_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// 网关地址，`host:port` 或带 `http://` / `https://` 前缀
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    address: String,
    http_base: String,
    ws_url: String,
}

impl Endpoint {
    fn parse(address: &str) -> Result<Self, TransportError> {
        let address = address.trim().trim_end_matches('/');
        let (secure, host) = if let Some(host) = address.strip_prefix("https://") {
            (true, host)
        } else if let Some(host) = address.strip_prefix("http://") {
            (false, host)
        } else {
            (false, address)
        };

        if host.is_empty() || host.contains("://") {
            return Err(TransportError::Network(format!(
                "invalid server address '{}'",
                address
            )));
        }

        let (http, ws) = if secure { ("https", "wss") } else { ("http", "ws") };
        Ok(Self {
            address: address.to_string(),
            http_base: format!("{}://{}", http, host),
            ws_url: format!("{}://{}/v2/stream", ws, host),
        })
    }
}

/// 推理网关传输（HTTP 元数据 + WebSocket 流）
#[derive(Debug, Default, Clone)]
pub struct WsGatewayTransport;

impl WsGatewayTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsGatewayTransport {
    fn connect(&self, address: &str, verbose: bool) -> Result<Box<dyn Connection>, TransportError> {
        let endpoint = Endpoint::parse(address)?;
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if verbose {
            tracing::info!("Created client for {} ({})", endpoint.address, endpoint.ws_url);
        }

        Ok(Box::new(WsGatewayConnection {
            endpoint,
            client,
            verbose,
            stream: None,
        }))
    }
}

// ============================================================================
// 请求 / 响应消息
// ============================================================================

#[derive(Serialize)]
struct StreamRequest<'a> {
    id: &'a str,
    model_name: &'a str,
    sequence_id: u64,
    sequence_start: bool,
    sequence_end: bool,
    inputs: Vec<StreamInput>,
    outputs: Vec<StreamOutput<'a>>,
}

#[derive(Serialize)]
struct StreamInput {
    name: &'static str,
    datatype: &'static str,
    shape: Vec<i64>,
    /// base64 编码的原始小端数据
    raw: String,
}

#[derive(Serialize)]
struct StreamOutput<'a> {
    name: &'a str,
}

impl<'a> StreamRequest<'a> {
    fn from_request(request: &'a InferRequest) -> Self {
        Self {
            id: &request.request_id,
            model_name: &request.model_name,
            sequence_id: request.sequence_id,
            sequence_start: request.sequence_start,
            sequence_end: request.sequence_end,
            inputs: vec![
                StreamInput {
                    name: "WAV_DATA",
                    datatype: "FP32",
                    shape: vec![1, request.frame_samples as i64],
                    raw: BASE64.encode(&request.payload),
                },
                StreamInput {
                    name: "WAV_DATA_DIM",
                    datatype: "INT32",
                    shape: vec![1, 1],
                    raw: BASE64.encode(request.sample_count.to_le_bytes()),
                },
            ],
            outputs: request
                .outputs
                .iter()
                .map(|name| StreamOutput { name })
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct StreamResponse {
    id: Option<String>,
    error: Option<String>,
    #[serde(default)]
    outputs: HashMap<String, Vec<String>>,
}

impl From<StreamResponse> for InferResult {
    fn from(response: StreamResponse) -> Self {
        InferResult {
            id: response.id,
            error: response.error,
            outputs: response.outputs,
        }
    }
}

// ============================================================================
// 连接实现
// ============================================================================

struct ActiveStream {
    request_tx: mpsc::UnboundedSender<InferRequest>,
    reader: tokio::task::JoinHandle<()>,
    delivery: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

pub struct WsGatewayConnection {
    endpoint: Endpoint,
    client: reqwest::Client,
    verbose: bool,
    stream: Option<ActiveStream>,
}

impl Connection for WsGatewayConnection {
    fn model_metadata(&self, model: &str) -> Result<ModelMetadata, TransportError> {
        let url = format!("{}/v2/models/{}", self.endpoint.http_base, model);
        let client = self.client.clone();

        get_runtime().block_on(async move {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            if !status.is_success() {
                return Err(TransportError::Protocol(format!("HTTP {}: {}", status, body)));
            }

            serde_json::from_str::<ModelMetadata>(&body)
                .map_err(|e| TransportError::Protocol(e.to_string()))
        })
    }

    fn start_stream(&mut self, callback: StreamCallback) -> Result<(), TransportError> {
        if self.stream.is_some() {
            self.stop_stream();
        }

        let ws_url = self.endpoint.ws_url.clone();
        let (ws_stream, _) = get_runtime()
            .block_on(async { timeout(WS_CONNECT_TIMEOUT, connect_async(ws_url.as_str())).await })
            .map_err(|_| TransportError::Network("WebSocket connect timed out".to_string()))?
            .map_err(|e| TransportError::Network(format!("WebSocket connect failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<InferRequest>();
        let (result_tx, result_rx) = std_mpsc::channel::<InferResult>();
        let stopped = Arc::new(AtomicBool::new(false));
        let verbose = self.verbose;

        // 投递线程：按到达顺序调用回调
        let stopped_for_delivery = stopped.clone();
        let mut callback = callback;
        let delivery = thread::Builder::new()
            .name(format!("asr-stream-{}", self.endpoint.address))
            .spawn(move || {
                while let Ok(result) = result_rx.recv() {
                    if stopped_for_delivery.load(Ordering::SeqCst) {
                        break;
                    }
                    callback(result);
                }
            })
            .map_err(|e| TransportError::Network(e.to_string()))?;

        // 写任务
        let result_tx_for_writer = result_tx.clone();
        get_runtime().spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let json = match serde_json::to_string(&StreamRequest::from_request(&request)) {
                    Ok(json) => json,
                    Err(e) => {
                        let _ = result_tx_for_writer
                            .send(InferResult::failed(Some(request.request_id), e.to_string()));
                        continue;
                    }
                };

                if verbose {
                    tracing::debug!("-> {} ({} bytes)", request.request_id, json.len());
                }

                if let Err(e) = write.send(Message::Text(json.into())).await {
                    let _ = result_tx_for_writer.send(InferResult::failed(
                        Some(request.request_id),
                        format!("send failed: {}", e),
                    ));
                    break;
                }
            }
            let _ = timeout(WS_CLOSE_TIMEOUT, write.close()).await;
        });

        // 读任务
        let reader = get_runtime().spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let result = match serde_json::from_str::<StreamResponse>(&text) {
                            Ok(response) => {
                                if verbose {
                                    tracing::debug!("<- {:?}", response.id);
                                }
                                InferResult::from(response)
                            }
                            Err(e) => InferResult::failed(None, format!("invalid response: {}", e)),
                        };
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        let _ = result_tx.send(InferResult::failed(None, e.to_string()));
                        break;
                    }
                    _ => {}
                }
            }
        });

        self.stream = Some(ActiveStream {
            request_tx,
            reader,
            delivery: Some(delivery),
            stopped,
        });

        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stopped.store(true, Ordering::SeqCst);
            // 丢弃发送端后写任务会关闭 socket 并退出
            drop(stream.request_tx);
            stream.reader.abort();
            if let Some(handle) = stream.delivery.take() {
                handle.join().ok();
            }
        }
    }

    fn dispatch(&self, request: InferRequest) -> Result<(), TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::StreamNotStarted)?;
        stream
            .request_tx
            .send(request)
            .map_err(|_| TransportError::StreamClosed)
    }

    fn is_alive(&self) -> bool {
        let url = format!("{}/v2/health/live", self.endpoint.http_base);
        let client = self.client.clone();

        get_runtime().block_on(async move {
            match client.get(&url).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    tracing::warn!("Liveness check failed: {}", e);
                    false
                }
            }
        })
    }
}

impl Drop for WsGatewayConnection {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_plain_host() {
        let endpoint = Endpoint::parse("localhost:8010").unwrap();
        assert_eq!(endpoint.http_base, "http://localhost:8010");
        assert_eq!(endpoint.ws_url, "ws://localhost:8010/v2/stream");
    }

    #[test]
    fn test_endpoint_https_uses_wss() {
        let endpoint = Endpoint::parse("https://asr.example.com/").unwrap();
        assert_eq!(endpoint.http_base, "https://asr.example.com");
        assert_eq!(endpoint.ws_url, "wss://asr.example.com/v2/stream");
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("grpc://host:1").is_err());
    }

    #[test]
    fn test_request_message_layout() {
        let request = InferRequest {
            model_name: "kaldi_online".to_string(),
            request_id: "1_0_1_1".to_string(),
            sequence_id: 1,
            sequence_start: true,
            sequence_end: true,
            payload: vec![0u8; 8],
            frame_samples: 2,
            sample_count: 1,
            outputs: vec!["TEXT".to_string()],
        };

        let json = serde_json::to_value(StreamRequest::from_request(&request)).unwrap();
        assert_eq!(json["id"], "1_0_1_1");
        assert_eq!(json["sequence_end"], true);
        assert_eq!(json["inputs"][0]["name"], "WAV_DATA");
        assert_eq!(json["inputs"][0]["shape"], serde_json::json!([1, 2]));
        assert_eq!(json["inputs"][1]["raw"], BASE64.encode(1i32.to_le_bytes()));
        assert_eq!(json["outputs"][0]["name"], "TEXT");
    }

    #[test]
    fn test_response_message_parsing() {
        let response: StreamResponse = serde_json::from_str(
            r#"{"id":"3_2_0_1","outputs":{"TEXT":["HELLO WORLD "]}}"#,
        )
        .unwrap();
        let result = InferResult::from(response);
        assert_eq!(result.id.as_deref(), Some("3_2_0_1"));
        assert!(result.error.is_none());
        assert_eq!(result.string_data("TEXT").unwrap(), ["HELLO WORLD ".to_string()]);
    }

    #[test]
    fn test_dispatch_without_stream_fails() {
        let connection = WsGatewayTransport::new().connect("localhost:1", false).unwrap();
        let err = connection
            .dispatch(InferRequest {
                model_name: String::new(),
                request_id: "1_0_1_1".to_string(),
                sequence_id: 1,
                sequence_start: true,
                sequence_end: true,
                payload: Vec::new(),
                frame_samples: 0,
                sample_count: 0,
                outputs: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::StreamNotStarted));
    }
}
