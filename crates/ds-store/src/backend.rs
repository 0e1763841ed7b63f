//! In-memory storage driver.
//! Usable on targets without a filesystem and as the steerable driver in tests.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use ds_core::{DsError, DriverError, DriverResult};
use ds_hal::{BlockHandle, DriverEvent, ModuleParam, OpCode, StorageDriver};
use ds_mem::SwapLease;

/// Fault injection switches. Each `fail_*` fires once and resets.
#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    init: Option<DriverError>,
    register: Option<DriverError>,
    identifier: Option<DriverError>,
    load: Option<DriverError>,
    submit: Option<DriverError>,
    completion: Option<DriverError>,
    poll: bool,
}

struct Region {
    base: usize,
    block_count: u32,
    block_size: usize,
}

struct QueuedUpdate {
    block: BlockHandle,
    src: SwapLease,
    len: usize,
    offset: usize,
    result: DriverResult<()>,
}

struct RamState {
    initialized: bool,
    cells: Vec<u8>,
    regions: Vec<Region>,
    queue: VecDeque<QueuedUpdate>,
    spurious: VecDeque<DriverEvent>,
    hold: bool,
    faults: Faults,
    max_regions: usize,
}

/// Shared handle to a RAM-backed block device.
/// Clones observe and steer the same device.
#[derive(Clone)]
pub struct RamFlash {
    state: Arc<Mutex<RamState>>,
}

impl RamFlash {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RamState {
                initialized: false,
                cells: Vec::new(),
                regions: Vec::new(),
                queue: VecDeque::new(),
                spurious: VecDeque::new(),
                hold: false,
                faults: Faults::default(),
                max_regions: 4,
            })),
        }
    }

    /// While held, completions stay queued and `poll_event` reports `WouldBlock`.
    pub fn hold_completions(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Updates accepted but not yet completed.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn fail_next_init(&self, e: DriverError) { self.state.lock().faults.init = Some(e); }
    pub fn fail_next_register(&self, e: DriverError) { self.state.lock().faults.register = Some(e); }
    pub fn fail_next_identifier(&self, e: DriverError) { self.state.lock().faults.identifier = Some(e); }
    pub fn fail_next_load(&self, e: DriverError) { self.state.lock().faults.load = Some(e); }
    pub fn fail_next_submit(&self, e: DriverError) { self.state.lock().faults.submit = Some(e); }

    /// The next `poll_event` fails with `HalError` and delivers nothing.
    pub fn fail_next_poll(&self) { self.state.lock().faults.poll = true; }

    /// The next accepted update completes with `e` and leaves the cells untouched.
    pub fn fail_next_completion(&self, e: DriverError) { self.state.lock().faults.completion = Some(e); }

    /// Queue a completion event that matches no submission.
    pub fn inject_completion(&self, op: OpCode) {
        self.state.lock().spurious.push_back(DriverEvent {
            op,
            block: BlockHandle::new(0, 0),
            result: Ok(()),
            buffer: None,
        });
    }

    /// Raw view of the stored bytes at `address`, bypassing the driver API.
    /// Empty if the range falls outside the device.
    pub fn peek(&self, address: usize, len: usize) -> Vec<u8> {
        let st = self.state.lock();
        address
            .checked_add(len)
            .and_then(|end| st.cells.get(address..end))
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    /// Overwrite stored bytes directly, as if flash held them from a previous boot.
    pub fn poke(&self, address: usize, bytes: &[u8]) -> DriverResult<()> {
        let end = address.checked_add(bytes.len()).ok_or(DriverError::InvalidAddr)?;
        let mut st = self.state.lock();
        if st.cells.len() < end {
            st.cells.resize(end, 0);
        }
        st.cells[address..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for RamFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl RamState {
    fn check_block(&self, block: &BlockHandle, offset: usize, len: usize) -> DriverResult<()> {
        let region = self.regions.get(block.module() as usize).ok_or(DriverError::InvalidState)?;
        let end = region.base + region.block_count as usize * region.block_size;
        if block.address() < region.base || block.address() >= end {
            return Err(DriverError::InvalidAddr);
        }
        if offset + len > region.block_size {
            return Err(DriverError::InvalidParam);
        }
        Ok(())
    }
}

impl StorageDriver for RamFlash {
    fn init(&mut self) -> DriverResult<()> {
        let mut st = self.state.lock();
        if let Some(e) = st.faults.init.take() { return Err(e); }
        st.initialized = true;
        Ok(())
    }

    fn register(&mut self, param: ModuleParam) -> DriverResult<BlockHandle> {
        let mut st = self.state.lock();
        if let Some(e) = st.faults.register.take() { return Err(e); }
        if !st.initialized { return Err(DriverError::InvalidState); }
        if param.block_count == 0 || param.block_size == 0 { return Err(DriverError::InvalidParam); }
        if st.regions.len() >= st.max_regions { return Err(DriverError::NoMem); }

        let base = st.regions.last().map(|r| r.base + r.block_count as usize * r.block_size).unwrap_or(0);
        let end = base + param.block_count as usize * param.block_size;
        if st.cells.len() < end {
            st.cells.resize(end, 0);
        }

        let module = st.regions.len() as u32;
        st.regions.push(Region { base, block_count: param.block_count, block_size: param.block_size });
        Ok(BlockHandle::new(module, base))
    }

    fn block_identifier(&self, base: &BlockHandle, id: u32) -> DriverResult<BlockHandle> {
        let mut st = self.state.lock();
        if let Some(e) = st.faults.identifier.take() { return Err(e); }
        let region = st.regions.get(base.module() as usize).ok_or(DriverError::InvalidState)?;
        if id >= region.block_count { return Err(DriverError::InvalidParam); }
        Ok(BlockHandle::new(base.module(), region.base + id as usize * region.block_size))
    }

    fn load(&mut self, dest: &mut [u8], block: &BlockHandle, offset: usize) -> DriverResult<()> {
        let mut st = self.state.lock();
        if let Some(e) = st.faults.load.take() { return Err(e); }
        st.check_block(block, offset, dest.len())?;
        let start = block.address() + offset;
        dest.copy_from_slice(&st.cells[start..start + dest.len()]);
        Ok(())
    }

    fn update(&mut self, block: &BlockHandle, src: SwapLease, len: usize, offset: usize) -> DriverResult<()> {
        let mut st = self.state.lock();
        if let Some(e) = st.faults.submit.take() { return Err(e); }
        if len > src.data.len() { return Err(DriverError::InvalidParam); }
        st.check_block(block, offset, len)?;
        let result = match st.faults.completion.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        st.queue.push_back(QueuedUpdate { block: *block, src, len, offset, result });
        Ok(())
    }

    fn poll_event(&mut self) -> nb::Result<DriverEvent, DsError> {
        let mut st = self.state.lock();
        if core::mem::take(&mut st.faults.poll) {
            return Err(nb::Error::Other(DsError::HalError));
        }
        if let Some(ev) = st.spurious.pop_front() {
            return Ok(ev);
        }
        if st.hold {
            return Err(nb::Error::WouldBlock);
        }
        let op = match st.queue.pop_front() {
            Some(op) => op,
            None => return Err(nb::Error::WouldBlock),
        };

        if op.result.is_ok() {
            let start = op.block.address() + op.offset;
            st.cells[start..start + op.len].copy_from_slice(op.src.bytes(op.len));
        }

        Ok(DriverEvent {
            op: OpCode::Update,
            block: op.block,
            result: op.result,
            buffer: Some(op.src),
        })
    }
}
