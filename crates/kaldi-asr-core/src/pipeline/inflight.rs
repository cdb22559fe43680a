use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SessionError;

/// 未完成语音计数
///
/// 提交首个分块时 +1，收到末尾分块的响应时 -1。等待循环只关心是否归零，
/// 所以使用 Relaxed 即可。
#[derive(Debug, Default)]
pub struct InFlightTracker {
    count: AtomicU64,
    increments: AtomicU64,
    decrements: AtomicU64,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.increments.fetch_add(1, Ordering::Relaxed);
    }

    /// 计数为零时返回错误，不会回绕
    pub fn decrement(&self) -> Result<(), SessionError> {
        self.count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .map_err(|_| SessionError::InFlightUnderflow)?;
        self.decrements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// 自上次重置以来的 (递增次数, 递减次数)
    pub fn totals(&self) -> (u64, u64) {
        (
            self.increments.load(Ordering::Relaxed),
            self.decrements.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.increments.store(0, Ordering::Relaxed);
        self.decrements.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increment_then_decrement_to_zero() {
        let tracker = InFlightTracker::new();
        tracker.increment();
        tracker.increment();
        assert_eq!(tracker.count(), 2);
        tracker.decrement().unwrap();
        tracker.decrement().unwrap();
        assert!(tracker.is_idle());
        assert_eq!(tracker.totals(), (2, 2));
    }

    #[test]
    fn test_underflow_is_an_error() {
        let tracker = InFlightTracker::new();
        assert!(matches!(tracker.decrement(), Err(SessionError::InFlightUnderflow)));
        assert_eq!(tracker.count(), 0);
        assert_eq!(tracker.totals(), (0, 0));
    }

    #[test]
    fn test_concurrent_decrements() {
        let tracker = Arc::new(InFlightTracker::new());
        for _ in 0..400 {
            tracker.increment();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.decrement().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(tracker.is_idle());
        assert_eq!(tracker.totals(), (400, 400));
    }

    #[test]
    fn test_reset_clears_totals() {
        let tracker = InFlightTracker::new();
        tracker.increment();
        tracker.reset();
        assert_eq!(tracker.count(), 0);
        assert_eq!(tracker.totals(), (0, 0));
    }
}
