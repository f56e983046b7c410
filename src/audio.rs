// Microphone arbitration between the keyword detector and capture sessions
//
// The microphone is the single exclusive audio resource; ownership is tracked
// through an RAII guard and released on drop.

use std::sync::{Arc, Mutex};

/// Which component currently holds the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicOwner {
    /// The always-on keyword detector
    KeywordDetector,
    /// A transient speech-capture session
    CaptureSession,
}

impl std::fmt::Display for MicOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MicOwner::KeywordDetector => write!(f, "keyword detector"),
            MicOwner::CaptureSession => write!(f, "capture session"),
        }
    }
}

/// Errors from microphone acquisition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MicError {
    /// The device is already held by another component
    #[error("Microphone already held by {0}")]
    Held(MicOwner),
    /// Internal lock error
    #[error("Failed to acquire microphone state lock")]
    LockError,
}

/// Handle to the single microphone device
///
/// Cloning shares the same underlying device; at most one `MicGuard` exists
/// across all clones at any instant.
#[derive(Clone)]
pub struct Microphone {
    holder: Arc<Mutex<Option<MicOwner>>>,
}

impl Microphone {
    pub fn new() -> Self {
        Self {
            holder: Arc::new(Mutex::new(None)),
        }
    }

    /// Claim the device for `owner`
    ///
    /// Fails with `MicError::Held` if another component holds it. The device
    /// is released when the returned guard is dropped.
    pub fn acquire(&self, owner: MicOwner) -> Result<MicGuard, MicError> {
        let mut holder = self.holder.lock().map_err(|_| MicError::LockError)?;
        if let Some(current) = *holder {
            return Err(MicError::Held(current));
        }
        *holder = Some(owner);
        crate::debug!("[mic] Acquired by {}", owner);
        Ok(MicGuard {
            holder: self.holder.clone(),
            owner,
        })
    }

    /// The component currently holding the device, if any
    pub fn current_owner(&self) -> Option<MicOwner> {
        self.holder.lock().map(|h| *h).unwrap_or(None)
    }

    /// Whether the device is free to be claimed
    pub fn is_free(&self) -> bool {
        self.current_owner().is_none()
    }

    /// Number of outstanding holds (0 or 1)
    ///
    /// Exposed so tests can assert the device was returned after teardown.
    pub fn active_holds(&self) -> usize {
        usize::from(self.current_owner().is_some())
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard over the microphone; releases the device on drop
pub struct MicGuard {
    holder: Arc<Mutex<Option<MicOwner>>>,
    owner: MicOwner,
}

impl MicGuard {
    /// The component this guard was issued to
    pub fn owner(&self) -> MicOwner {
        self.owner
    }
}

impl Drop for MicGuard {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
        crate::debug!("[mic] Released by {}", self.owner);
    }
}

impl std::fmt::Debug for MicGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicGuard").field("owner", &self.owner).finish()
    }
}
