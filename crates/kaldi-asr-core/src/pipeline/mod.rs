mod cancel;
mod collector;
mod inflight;
mod latch;
mod pool;
mod session;

pub use cancel::{install_interrupt_handler, CancellationToken};
pub use collector::ResultCollector;
pub use inflight::InFlightTracker;
pub use latch::ErrorLatch;
pub use pool::{ConnectionPool, ResponseHandler, SharedState};
pub use session::{PerformStatus, SessionController, SessionState};
