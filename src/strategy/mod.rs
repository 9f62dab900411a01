// =============================================================================
// Strategy seam
// =============================================================================

pub mod hedge;

use crate::exchanges::ExchangeState;
use crate::models::Signal;

/// A strategy turns the venues' local market/account views into paired
/// order signals. Implementations must be pure over the passed-in state so
/// every tick is decided from one consistent snapshot.
pub trait Strategy: Send + Sync {
    fn gen_signal(&self, now_ms: i64, symbol: &str, exchanges: &[&ExchangeState])
        -> Option<Signal>;
}
