use crate::error::CopyError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Run-wide stop signal shared by workers, queue endpoints and the consumer.
///
/// The flag is monotonic: once set it is never cleared. The first error passed
/// to [`Cancellation::cancel`] is kept as the cause reported to the caller;
/// later causes are dropped.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    cause: Mutex<Option<CopyError>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sets the flag and records `cause` if it is the first one. Returns true
    /// for the call that actually flipped the flag.
    pub fn cancel(&self, cause: CopyError) -> bool {
        {
            let mut slot = match self.inner.cause.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.is_none() {
                warn!(cause = %cause, "Cancelling copy");
                *slot = Some(cause);
            }
        }
        !self.inner.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Takes the recorded first cause, leaving the flag set.
    pub fn take_cause(&self) -> Option<CopyError> {
        match self.inner.cause.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), CopyError> {
        if self.is_cancelled() {
            Err(CopyError::Cancelled)
        } else {
            Ok(())
        }
    }
}
