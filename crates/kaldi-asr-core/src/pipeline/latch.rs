use std::sync::Mutex;

use crate::error::SessionError;

/// 首个错误锁存器
///
/// 后台回调线程中的错误不能跨线程传播，统一写入这里，由等待线程读取。
/// 只保留第一个错误，之后的错误记日志后丢弃。
#[derive(Debug, Default)]
pub struct ErrorLatch {
    slot: Mutex<Option<SessionError>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已有错误时返回 false
    pub fn try_set(&self, err: SessionError) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(first) = slot.as_ref() {
            tracing::warn!("Discarding error after '{}': {}", first, err);
            return false;
        }
        tracing::error!("Latched error: {}", err);
        *slot = Some(err);
        true
    }

    pub fn get(&self) -> Option<SessionError> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn take(&self) -> Option<SessionError> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_first_error_wins() {
        let latch = ErrorLatch::new();
        assert!(latch.try_set(SessionError::RequestRejected("first".into())));
        assert!(!latch.try_set(SessionError::RequestRejected("second".into())));
        match latch.get() {
            Some(SessionError::RequestRejected(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_clear_and_take() {
        let latch = ErrorLatch::new();
        latch.try_set(SessionError::InFlightUnderflow);
        assert!(latch.is_set());
        assert!(latch.take().is_some());
        assert!(!latch.is_set());

        latch.try_set(SessionError::InFlightUnderflow);
        latch.clear();
        assert!(latch.get().is_none());
    }

    #[test]
    fn test_concurrent_failures_keep_exactly_one() {
        let latch = Arc::new(ErrorLatch::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let latch = latch.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    latch.try_set(SessionError::RequestRejected(format!("worker {}", i)))
                })
            })
            .collect();

        let winners: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(winners.iter().filter(|&&won| won).count(), 1);

        let winner = winners.iter().position(|&won| won).unwrap();
        match latch.get() {
            Some(SessionError::RequestRejected(msg)) => assert_eq!(msg, format!("worker {}", winner)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
