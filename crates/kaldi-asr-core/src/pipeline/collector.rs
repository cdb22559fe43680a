use std::sync::{Mutex, RwLock};

use crate::config::TextMode;
use crate::error::SessionError;

/// 每条语音的输出槽，按 `corr_id - 1` 索引
///
/// 同一 corr_id 的响应只会出现在一条连接的回调线程上，所以槽之间没有竞争；
/// 每个槽仍然带锁。
#[derive(Debug)]
pub struct ResultCollector {
    mode: TextMode,
    slots: RwLock<Vec<Mutex<Vec<String>>>>,
}

impl ResultCollector {
    pub fn new(mode: TextMode) -> Self {
        Self {
            mode,
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> TextMode {
        self.mode
    }

    /// 批次开始时重新分配 `n` 个空槽
    pub fn resize(&self, n: usize) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.clear();
        slots.resize_with(n, || Mutex::new(Vec::new()));
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入一次响应的文本片段
    ///
    /// `Final` 模式用首个片段覆盖槽，`Accumulate` 模式追加全部片段。
    pub fn append(&self, correlation_id: u64, fragments: &[String]) -> Result<(), SessionError> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let slot = correlation_id
            .checked_sub(1)
            .and_then(|i| slots.get(i as usize))
            .ok_or(SessionError::SlotOutOfRange {
                correlation_id,
                slots: slots.len(),
            })?;

        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        match self.mode {
            TextMode::Final => {
                slot.clear();
                slot.extend(fragments.first().cloned());
            }
            TextMode::Accumulate => slot.extend_from_slice(fragments),
        }
        Ok(())
    }

    /// 第 `index` 个槽（0 起）的文本
    pub fn get(&self, index: usize) -> Option<String> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots
            .get(index)
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).concat())
    }

    pub fn snapshot(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).concat())
            .collect()
    }
}
