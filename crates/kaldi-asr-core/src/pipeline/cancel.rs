use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::runtime::get_runtime;

/// 取消标志
///
/// 只用来停止等待，不会中断已经发出的网络请求。子标志同时观察父标志，
/// 取消子标志不影响父标志和兄弟标志。
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

static PROCESS_TOKEN: OnceLock<CancellationToken> = OnceLock::new();
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级取消标志，由 SIGINT 处理器设置
    pub fn process() -> CancellationToken {
        PROCESS_TOKEN.get_or_init(CancellationToken::new).clone()
    }

    /// 派生一个子标志
    pub fn child(&self) -> CancellationToken {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(self.cancelled.clone()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.load(Ordering::SeqCst))
    }

    /// 消费一次取消请求，同时清除自身和父标志
    pub fn take_cancelled(&self) -> bool {
        let own = self.cancelled.swap(false, Ordering::SeqCst);
        let parent = self
            .parent
            .as_ref()
            .is_some_and(|p| p.swap(false, Ordering::SeqCst));
        own || parent
    }
}

/// 安装 Ctrl-C 处理器，每次中断都会设置进程级取消标志
///
/// 重复调用无副作用。
pub fn install_interrupt_handler() {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let token = CancellationToken::process();
    get_runtime().spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Unable to listen for interrupt signal: {}", e);
                break;
            }
            tracing::info!("Interrupt received");
            token.cancel();
        }
    });
}
