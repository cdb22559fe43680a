//! FFI 层 - 为 C/C++ 宿主提供批量识别接口
//!
//! # 内存管理约定
//! - Handle 由 `asr_client_alloc` 创建，`asr_client_destroy` 销毁
//! - `asr_client_infer_output` / `asr_client_last_error` 返回的字符串归 Handle 所有，
//!   在同一 Handle 的下一次调用前有效，调用方不要释放
//!
//! # 线程安全
//! - 一个 Handle 同一时间只能被一个线程使用
//! - `asr_client_interrupt` 例外，它只设置取消标志

use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::slice;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::pipeline::{install_interrupt_handler, CancellationToken, PerformStatus, SessionController};

// ============================================================================
// Handle 定义
// ============================================================================

/// 不透明句柄
pub struct AsrClientHandle {
    session: SessionController,
    cancel: CancellationToken,
    /// 最近一次 `asr_client_infer_output` 返回的字符串
    output: Option<CString>,
    /// 最近一次 `asr_client_last_error` 返回的字符串
    error: Option<CString>,
    /// 参数校验失败等不经过会话的错误
    ffi_error: Option<String>,
}

impl AsrClientHandle {
    fn fail(&mut self, message: impl Into<String>) -> i32 {
        let message = message.into();
        tracing::error!("{}", message);
        self.ffi_error = Some(message);
        -1
    }

    fn finish(&mut self, result: Result<(), SessionError>) -> i32 {
        self.ffi_error = None;
        match result {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("{}", e);
                -1
            }
        }
    }
}

unsafe fn handle_mut<'a>(handle: *mut AsrClientHandle) -> Option<&'a mut AsrClientHandle> {
    handle.as_mut()
}

unsafe fn c_str<'a>(s: *const c_char) -> Option<Result<&'a str, std::str::Utf8Error>> {
    if s.is_null() {
        None
    } else {
        Some(CStr::from_ptr(s).to_str())
    }
}

// ============================================================================
// 生命周期
// ============================================================================

/// 创建客户端实例
///
/// 每个实例有自己的取消标志，并观察进程级标志：`asr_client_install_interrupt_handler`
/// 安装后 Ctrl-C 会中断正在等待的实例，`asr_client_interrupt` 只影响本实例。
#[no_mangle]
pub extern "C" fn asr_client_alloc() -> *mut AsrClientHandle {
    let cancel = CancellationToken::process().child();
    let handle = Box::new(AsrClientHandle {
        session: SessionController::ws_gateway().with_cancellation(cancel.clone()),
        cancel,
        output: None,
        error: None,
        ffi_error: None,
    });
    Box::into_raw(handle)
}

/// 销毁客户端实例，关闭全部连接
///
/// # 安全
/// - handle 必须是 `asr_client_alloc` 返回的有效指针
/// - 调用后 handle 不可再使用
#[no_mangle]
pub unsafe extern "C" fn asr_client_destroy(handle: *mut AsrClientHandle) {
    if !handle.is_null() {
        let mut handle = Box::from_raw(handle);
        handle.session.close();
    }
}

/// 库版本号
#[no_mangle]
pub extern "C" fn asr_client_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

// ============================================================================
// 配置
// ============================================================================

/// 配置并连接服务器
///
/// # 参数
/// - samp_freq: 所有输入的采样率
/// - servers: 以 NULL 结尾的服务地址数组
/// - model_name: 模型名，NULL 使用默认值
/// - ncontextes: 每个服务器的连接数
/// - chunk_length: 每个分块的样本数
///
/// # 返回
/// - 0: 成功
/// - -1: 失败，详见 `asr_client_last_error`
///
/// # 安全
/// - servers 必须是以 NULL 结尾的有效 C 字符串数组
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn asr_client_set_config(
    handle: *mut AsrClientHandle,
    samp_freq: f32,
    servers: *const *const c_char,
    model_name: *const c_char,
    ncontextes: i64,
    chunk_length: i64,
    ctm: bool,
    verbose: bool,
) -> i32 {
    let Some(handle) = handle_mut(handle) else {
        return -1;
    };

    let mut addresses = Vec::new();
    if !servers.is_null() {
        let mut cursor = servers;
        while !(*cursor).is_null() {
            match CStr::from_ptr(*cursor).to_str() {
                Ok(address) => addresses.push(address.to_string()),
                Err(e) => return handle.fail(format!("Invalid UTF-8 in server address: {}", e)),
            }
            cursor = cursor.add(1);
        }
    }

    let mut config = SessionConfig {
        servers: addresses,
        sample_rate: samp_freq,
        ncontextes,
        chunk_length,
        ctm,
        verbose,
        ..Default::default()
    };
    match c_str(model_name) {
        Some(Ok(name)) => config.model_name = name.to_string(),
        Some(Err(e)) => return handle.fail(format!("Invalid UTF-8 in model name: {}", e)),
        None => {}
    }

    let result = handle.session.configure(config);
    handle.finish(result)
}

/// 用 JSON 配置连接服务器，字段与配置文件相同，缺失字段取默认值
///
/// # 安全
/// - config_json 必须是有效的 C 字符串
#[no_mangle]
pub unsafe extern "C" fn asr_client_set_config_json(
    handle: *mut AsrClientHandle,
    config_json: *const c_char,
) -> i32 {
    let Some(handle) = handle_mut(handle) else {
        return -1;
    };

    let json = match c_str(config_json) {
        Some(Ok(json)) => json,
        Some(Err(e)) => return handle.fail(format!("Invalid UTF-8 in config: {}", e)),
        None => return handle.fail("Config JSON is NULL"),
    };

    let config: SessionConfig = match serde_json::from_str(json) {
        Ok(config) => config,
        Err(e) => return handle.fail(format!("Failed to parse config JSON: {}", e)),
    };

    let result = handle.session.configure(config);
    handle.finish(result)
}

// ============================================================================
// 批次
// ============================================================================

/// 开始一个批次，随后需要恰好 `expected` 次 `asr_client_infer_feed`
#[no_mangle]
pub unsafe extern "C" fn asr_client_infer_begin(handle: *mut AsrClientHandle, expected: usize) -> i32 {
    let Some(handle) = handle_mut(handle) else {
        return -1;
    };
    handle.output = None;
    let result = handle.session.begin_batch(expected);
    handle.finish(result)
}

/// 加入一段完整的 WAV 文件内容
///
/// # 安全
/// - data 必须指向至少 len 字节的有效内存
#[no_mangle]
pub unsafe extern "C" fn asr_client_infer_feed(
    handle: *mut AsrClientHandle,
    data: *const u8,
    len: usize,
) -> i32 {
    let Some(handle) = handle_mut(handle) else {
        return -1;
    };
    if data.is_null() {
        return handle.fail("Audio data is NULL");
    }

    let bytes = slice::from_raw_parts(data, len);
    let result = handle.session.feed(bytes);
    handle.finish(result)
}

/// 发送全部输入并阻塞等待结果
///
/// # 返回
/// - 0: 全部完成
/// - 1: 被中断，可以再次调用 `asr_client_infer_perform` 继续等待
/// - -1: 失败，详见 `asr_client_last_error`
#[no_mangle]
pub unsafe extern "C" fn asr_client_infer_perform(handle: *mut AsrClientHandle) -> i32 {
    let Some(handle) = handle_mut(handle) else {
        return -1;
    };

    let result = if handle.session.state() == crate::pipeline::SessionState::Waiting {
        handle.session.wait()
    } else {
        handle.session.perform()
    };

    match result {
        Ok(PerformStatus::Completed) => handle.finish(Ok(())),
        Ok(PerformStatus::Interrupted) => 1,
        Err(e) => handle.finish(Err(e)),
    }
}

/// 按输入顺序逐条取结果
///
/// 全部取完后返回 NULL，之后再调用会从第一条重新开始。
#[no_mangle]
pub unsafe extern "C" fn asr_client_infer_output(handle: *mut AsrClientHandle) -> *const c_char {
    let Some(handle) = handle_mut(handle) else {
        return ptr::null();
    };

    handle.output = handle
        .session
        .next_result()
        .map(|text| CString::new(text).unwrap_or_default());
    handle.output.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

// ============================================================================
// 错误与控制
// ============================================================================

/// 最近一次失败的错误信息，没有错误时返回 NULL
#[no_mangle]
pub unsafe extern "C" fn asr_client_last_error(handle: *mut AsrClientHandle) -> *const c_char {
    let Some(handle) = handle_mut(handle) else {
        return ptr::null();
    };

    let message = handle
        .ffi_error
        .clone()
        .or_else(|| handle.session.last_error().map(str::to_string));
    handle.error = message.map(|m| CString::new(m).unwrap_or_default());
    handle.error.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

/// 中断正在进行的等待，可以从其他线程调用
#[no_mangle]
pub unsafe extern "C" fn asr_client_interrupt(handle: *const AsrClientHandle) -> i32 {
    match handle.as_ref() {
        Some(handle) => {
            handle.cancel.cancel();
            0
        }
        None => -1,
    }
}

/// 重建全部连接，运行期错误之后调用
#[no_mangle]
pub unsafe extern "C" fn asr_client_reset(handle: *mut AsrClientHandle) -> i32 {
    let Some(handle) = handle_mut(handle) else {
        return -1;
    };
    handle.output = None;
    let result = handle.session.reset();
    handle.finish(result)
}

/// 安装 Ctrl-C 处理器
#[no_mangle]
pub extern "C" fn asr_client_install_interrupt_handler() {
    install_interrupt_handler();
}
