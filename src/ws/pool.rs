// =============================================================================
// WS-API Connection Pool — round-robin over N request/response sessions
// =============================================================================
//
// A single WS-API connection serializes request/response round-trips; N
// connections amortize that latency across concurrent order placements.
// Sessions start staggered so a venue outage does not produce a synchronized
// reconnect storm.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::error;

use crate::ws::session::{WsHandler, WsSession};

/// Stagger between pool member startups.
pub const POOL_STAGGER: Duration = Duration::from_millis(500);

/// Round-robin pool of WS-API sessions sharing one endpoint.
pub struct ConnPool {
    name: String,
    sessions: RwLock<Vec<Arc<WsSession>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_conn: AtomicUsize,
}

impl ConnPool {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sessions: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            next_conn: AtomicUsize::new(0),
        })
    }

    /// Build `count` sessions via `factory` and start each one, staggered by
    /// [`POOL_STAGGER`] per index.
    pub fn run<F>(&self, count: usize, factory: F, handler: Arc<dyn WsHandler>)
    where
        F: Fn(usize) -> Arc<WsSession>,
    {
        let mut sessions = self.sessions.write();
        let mut tasks = self.tasks.lock();
        for i in 0..count {
            let session = factory(i);
            sessions.push(session.clone());
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(POOL_STAGGER * i as u32).await;
                session.run(handler).await;
            }));
        }
    }

    /// Send through the next ready session, probing at most pool-size slots.
    /// With no ready session, returns `(None, false)` without blocking.
    pub async fn send(&self, payload: &Value, id: &str) -> (Option<Value>, bool) {
        let sessions = self.sessions.read().clone();
        let len = sessions.len();

        for _ in 0..len {
            let idx = self.next_conn.fetch_add(1, Ordering::Relaxed) % len;
            let session = &sessions[idx];
            if session.ready() {
                return session.send(payload, id).await;
            }
        }

        error!(name = %self.name, "no ready ws-api session in pool");
        (None, false)
    }

    /// Abort every session task and clear the pool.
    pub fn close_all(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.sessions.write().clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
