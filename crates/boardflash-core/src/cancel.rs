//! Cooperative cancellation of flash attempts

use crate::outcome::InterruptKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const NOT_CANCELLED: u8 = 0;
const CANCELLED_BY_USER: u8 = 1;
const CANCELLED_BY_SYSTEM: u8 = 2;

/// Shared cancellation flag
///
/// Clones share state. Once cancelled the token stays cancelled; the first
/// interrupt kind recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self, kind: InterruptKind) {
        let value = match kind {
            InterruptKind::User => CANCELLED_BY_USER,
            InterruptKind::System => CANCELLED_BY_SYSTEM,
        };
        let _ = self.state.compare_exchange(
            NOT_CANCELLED,
            value,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.interrupted().is_some()
    }

    /// Who cancelled, if anyone
    pub fn interrupted(&self) -> Option<InterruptKind> {
        match self.state.load(Ordering::SeqCst) {
            CANCELLED_BY_USER => Some(InterruptKind::User),
            CANCELLED_BY_SYSTEM => Some(InterruptKind::System),
            _ => None,
        }
    }
}
