//! One-shot broadcast stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::types::{Error, Result};

/// Fires once; every waiter observes it.
///
/// The flag guards the token so a second [`StopSignal::fire`] is reported as
/// [`Error::AlreadyStopped`] instead of being lost or panicking.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    fired: Arc<AtomicBool>,
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Only the first call succeeds.
    pub fn fire(&self) -> Result<()> {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyStopped);
        }
        self.token.cancel();
        Ok(())
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired.
    pub async fn fired(&self) {
        self.token.cancelled().await
    }
}
