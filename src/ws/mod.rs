// =============================================================================
// WebSocket plumbing: single sessions and the WS-API connection pool
// =============================================================================

pub mod pool;
pub mod session;

pub use pool::ConnPool;
pub use session::{WsHandler, WsSession};
