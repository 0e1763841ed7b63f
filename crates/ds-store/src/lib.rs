#![no_std]
#![forbid(unsafe_code)]
#[cfg(feature = "std")]
extern crate std;

extern crate alloc;
use alloc::boxed::Box;
use alloc::sync::Arc;

use log::{debug, error, info, warn};
use zeroize::Zeroize;

use ds_core::{DsError, DsResult, BLOCK_SIZE, DEFAULT_BLOCK_COUNT, LEGACY_UPDATE_LEN};
use ds_hal::{BlockHandle, DriverEvent, ModuleParam, OpCode, StorageDriver};
use ds_mem::SwapPool;

pub mod backend;
pub mod completion;
pub use completion::Completion;

/// Final result of an accepted write, delivered from the event pump.
pub type WriteCallback = Box<dyn FnOnce(DsResult<()>) + Send>;

/// How many bytes of the staged block are handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateLength {
    /// The whole block, payload plus zero padding.
    #[default]
    FullBlock,
    /// `LEGACY_UPDATE_LEN` bytes regardless of payload, as deployed firmware does.
    /// Bytes past that keep whatever the block held before.
    Legacy,
}

impl UpdateLength {
    pub fn bytes(self) -> usize {
        match self {
            UpdateLength::FullBlock => BLOCK_SIZE,
            UpdateLength::Legacy => LEGACY_UPDATE_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub block_count: u32,
    pub update_len: UpdateLength,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            update_len: UpdateLength::FullBlock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Idle,
    WritePending,
}

/// The Storage Session.
/// Owns the driver, the registered base handle, the swap buffer, the
/// pending counter and the pending callback. Created once, never torn down.
pub struct Datastore {
    driver: Box<dyn StorageDriver>,
    config: StoreConfig,
    base: Option<BlockHandle>,
    swap: Arc<SwapPool>,
    pending: u8,
    /// Block of the write in flight; completions for any other block are faults.
    in_flight: Option<BlockHandle>,
    callback: Option<WriteCallback>,
    faults: u32,
}

impl Datastore {
    pub fn new(driver: Box<dyn StorageDriver>, config: StoreConfig) -> Self {
        Self {
            driver,
            config,
            base: None,
            swap: SwapPool::new(),
            pending: 0,
            in_flight: None,
            callback: None,
            faults: 0,
        }
    }

    /// Register the blocks with the driver.
    /// On failure the session stays uninitialized and `init` may be retried.
    pub fn init(&mut self) -> DsResult<()> {
        if self.base.is_some() {
            return Err(DsError::AlreadyInitialized);
        }

        self.driver.init().map_err(|e| {
            warn!("[STORE] driver init failed: {}", e);
            DsError::InitFailed
        })?;

        let param = ModuleParam {
            block_count: self.config.block_count,
            block_size: BLOCK_SIZE,
        };
        let base = self.driver.register(param).map_err(|e| {
            warn!("[STORE] block registration failed: {}", e);
            DsError::InitFailed
        })?;

        info!(
            "[STORE] registered {} blocks x {} bytes (update len {})",
            param.block_count, param.block_size, self.config.update_len.bytes()
        );
        self.base = Some(base);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        if self.base.is_none() {
            SessionState::Uninitialized
        } else if self.pending > 0 {
            SessionState::WritePending
        } else {
            SessionState::Idle
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending > 0
    }

    /// Completions seen with nothing in flight.
    pub fn fault_count(&self) -> u32 {
        self.faults
    }

    pub fn block_count(&self) -> u32 {
        self.config.block_count
    }

    /// True when the swap buffer is home and zeroed.
    pub fn swap_is_clear(&self) -> bool {
        self.swap.is_clear()
    }

    fn ready(&self) -> DsResult<BlockHandle> {
        let base = self.base.ok_or(DsError::NotInitialized)?;
        if self.pending > 0 {
            return Err(DsError::OperationPending);
        }
        Ok(base)
    }

    fn resolve(&self, base: &BlockHandle, id: u32) -> DsResult<BlockHandle> {
        self.driver.block_identifier(base, id).map_err(|e| {
            warn!("[STORE] block {} resolution failed: {}", id, e);
            DsError::HandleResolutionFailed
        })
    }

    /// Copy the first `n` bytes of block `id` into `out`.
    /// Blocks until the driver's load returns.
    pub fn read(&mut self, id: u32, out: Option<&mut [u8]>, n: usize) -> DsResult<()> {
        let base = self.ready()?;

        if n == 0 { return Ok(()); }
        if n > BLOCK_SIZE { return Err(DsError::InvalidLength); }
        if id >= self.config.block_count { return Err(DsError::InvalidId); }

        let out = match out {
            Some(buf) if buf.len() >= n => buf,
            _ => return Err(DsError::InvalidPointer),
        };

        let handle = self.resolve(&base, id)?;

        let mut tmp = [0u8; BLOCK_SIZE];
        let loaded = self.driver.load(&mut tmp, &handle, 0);
        if let Err(e) = loaded {
            warn!("[STORE] load of block {} failed: {}", id, e);
            tmp.zeroize();
            return Err(DsError::LoadFailed);
        }

        out[..n].copy_from_slice(&tmp[..n]);
        tmp.zeroize();
        Ok(())
    }

    /// `read` sized by the output buffer.
    pub fn read_into(&mut self, id: u32, out: &mut [u8]) -> DsResult<()> {
        let n = out.len();
        self.read(id, Some(out), n)
    }

    /// Stage `n` bytes of `data` for block `id` and submit the update.
    /// Returns once the driver accepts the request; `on_complete` runs
    /// from `poll`/`dispatch` when the driver reports the outcome.
    pub fn write_async<F>(
        &mut self,
        id: u32,
        data: Option<&[u8]>,
        n: usize,
        on_complete: F,
    ) -> DsResult<()>
    where
        F: FnOnce(DsResult<()>) + Send + 'static,
    {
        let base = self.ready()?;

        if n > BLOCK_SIZE { return Err(DsError::InvalidLength); }
        if id >= self.config.block_count { return Err(DsError::InvalidId); }

        let payload: &[u8] = match data {
            _ if n == 0 => &[],
            Some(buf) if buf.len() >= n => &buf[..n],
            _ => return Err(DsError::InvalidPointer),
        };

        let handle = self.resolve(&base, id)?;

        let mut lease = match self.swap.alloc() {
            Some(lease) => lease,
            None => {
                // Counter says idle but the driver never gave the buffer back.
                self.faults += 1;
                error!("[STORE] swap buffer held with no write pending");
                return Err(DsError::InternalConsistencyFault);
            }
        };
        lease.stage(payload);

        let len = self.config.update_len.bytes();
        if let Err(e) = self.driver.update(&handle, lease, len, 0) {
            warn!("[STORE] update of block {} rejected: {}", id, e);
            return Err(DsError::SubmitFailed);
        }

        self.callback = Some(Box::new(on_complete));
        self.in_flight = Some(handle);
        self.pending += 1;
        debug!("[STORE] write to block {} accepted ({} bytes)", id, n);
        Ok(())
    }

    /// `write_async` whose outcome lands in a pollable `Completion`.
    pub fn write_tracked(&mut self, id: u32, data: Option<&[u8]>, n: usize) -> DsResult<Completion> {
        let completion = Completion::new();
        self.write_async(id, data, n, completion.completer())?;
        Ok(completion)
    }

    /// The Completion Dispatcher. Feed every driver event through here.
    pub fn dispatch(&mut self, event: DriverEvent) -> DsResult<()> {
        if event.op != OpCode::Update {
            return Ok(());
        }

        // Only the driver returning our lease for our block completes the write.
        let matched = self.pending > 0
            && self.in_flight == Some(event.block)
            && event.buffer.is_some();

        // Clears regardless of outcome; dropping returns it to the pool.
        if let Some(mut lease) = event.buffer {
            lease.clear();
        }

        if !matched {
            self.faults += 1;
            error!(
                "[STORE] unmatched update completion at {:?} (pending {}, expected {:?}, fault #{})",
                event.block, self.pending, self.in_flight, self.faults
            );
            return Err(DsError::InternalConsistencyFault);
        }
        self.pending -= 1;
        self.in_flight = None;

        let result = match event.result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("[STORE] update at {:?} failed: {}", event.block, e);
                Err(DsError::AsyncUpdateFailed)
            }
        };
        debug!("[STORE] write completed: {:?}", result);

        if let Some(cb) = self.callback.take() {
            cb(result);
        }
        Ok(())
    }

    /// Drain every event the driver has ready. Returns true if any work was done.
    pub fn poll(&mut self) -> bool {
        let mut work_done = false;
        loop {
            match self.driver.poll_event() {
                Ok(event) => {
                    // Faults are counted and logged inside dispatch.
                    let _ = self.dispatch(event);
                    work_done = true;
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!("[STORE] driver event poll failed: {}", e);
                    break;
                }
            }
        }
        work_done
    }
}
