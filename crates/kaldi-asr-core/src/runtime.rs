use std::sync::OnceLock;

use tokio::runtime::Runtime;

/// 全局 tokio runtime，懒初始化
///
/// 同步 API 通过 `block_on` 使用它，不能在另一个 runtime 内部调用。
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

pub(crate) fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::new().expect("Failed to create tokio runtime"))
}
