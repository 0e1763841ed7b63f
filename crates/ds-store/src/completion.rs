use alloc::sync::Arc;
use spin::Mutex;

use ds_core::{DsError, DsResult};

/// One-shot handle for the final result of an accepted write.
/// Resolved by the Completion Dispatcher, which may run on a different
/// execution context than the one that submitted the write.
#[derive(Clone, Default)]
pub struct Completion {
    slot: Arc<Mutex<Option<DsResult<()>>>>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that resolves this handle. Meant to be handed to `write_async`.
    pub fn completer(&self) -> impl FnOnce(DsResult<()>) + Send + 'static {
        let slot = self.slot.clone();
        move |result| {
            *slot.lock() = Some(result);
        }
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// `WouldBlock` until the write completes, then its result once.
    pub fn poll(&self) -> nb::Result<(), DsError> {
        match self.slot.lock().take() {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(nb::Error::Other(e)),
            None => Err(nb::Error::WouldBlock),
        }
    }
}
