// Single-slot register for file-pick requests routed to the collaborator layer
//
// At most one pick request per slot may be in flight. A second request while
// one is pending is a Busy error rather than a silent overwrite.

use std::sync::Mutex;
use tokio::sync::oneshot;

/// Errors from pick-request registration
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PickError {
    /// A pick request is already in flight for this slot
    #[error("A pick request is already pending")]
    Busy,
    /// Internal lock error
    #[error("Failed to acquire pick slot lock")]
    LockError,
}

/// One pending pick request at a time
///
/// `begin` hands the requester a receiver that resolves to the picked URI, or
/// `None` if the user cancelled. `complete` is called by the collaborator
/// layer when the pick finishes.
pub struct PickSlot {
    pending: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl PickSlot {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Register a pick request
    ///
    /// Returns `PickError::Busy` if another request is still pending.
    pub fn begin(&self) -> Result<oneshot::Receiver<Option<String>>, PickError> {
        let mut pending = self.pending.lock().map_err(|_| PickError::LockError)?;
        if pending.is_some() {
            return Err(PickError::Busy);
        }
        let (tx, rx) = oneshot::channel();
        *pending = Some(tx);
        Ok(rx)
    }

    /// Deliver the pick result and clear the slot
    ///
    /// `None` means the user cancelled. Returns false if no request was
    /// pending (stale completion, ignored).
    pub fn complete(&self, uri: Option<String>) -> bool {
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                // Receiver may have been dropped; the slot is cleared either way
                let _ = tx.send(uri);
                true
            }
            None => {
                crate::debug!("[picker] Completion with no pending request, ignoring");
                false
            }
        }
    }

    /// Whether a pick request is currently in flight
    pub fn is_pending(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }
}

impl Default for PickSlot {
    fn default() -> Self {
        Self::new()
    }
}
