#![no_std]
#![forbid(unsafe_code)]

use ds_core::{DsError, DriverResult};
use ds_mem::SwapLease;

/// Opaque location of a block inside the driver's storage.
/// Produced by the driver, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    module: u32,
    address: usize,
}

impl BlockHandle {
    pub const fn new(module: u32, address: usize) -> Self {
        Self { module, address }
    }

    pub fn module(&self) -> u32 { self.module }
    pub fn address(&self) -> usize { self.address }
}

/// Registration request: how many blocks of what size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleParam {
    pub block_count: u32,
    pub block_size: usize,
}

/// Operation a driver event reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Load,
    Store,
    Update,
    Clear,
}

/// Completion notification delivered through the driver's event channel.
#[derive(Debug)]
pub struct DriverEvent {
    pub op: OpCode,
    pub block: BlockHandle,
    pub result: DriverResult<()>,
    /// The staged buffer handed over with the request, returned on completion.
    pub buffer: Option<SwapLease>,
}

/// The Underlying Storage Driver.
/// INVARIANT: `load` is synchronous, `update` only queues; its outcome is
/// reported later through `poll_event`.
pub trait StorageDriver: Send {
    /// Bring up the driver. Called once before `register`.
    fn init(&mut self) -> DriverResult<()>;

    /// Reserve `param.block_count` blocks and return the base handle.
    fn register(&mut self, param: ModuleParam) -> DriverResult<BlockHandle>;

    /// Resolve block `id` relative to a base handle from `register`.
    fn block_identifier(&self, base: &BlockHandle, id: u32) -> DriverResult<BlockHandle>;

    /// Fill `dest` from the block, starting `offset` bytes in.
    fn load(&mut self, dest: &mut [u8], block: &BlockHandle, offset: usize) -> DriverResult<()>;

    /// Queue a write of the first `len` bytes of `src` at `offset`.
    /// The driver keeps the lease until it reports completion; on rejection
    /// the lease is dropped and thereby returned to its pool.
    fn update(
        &mut self,
        block: &BlockHandle,
        src: SwapLease,
        len: usize,
        offset: usize,
    ) -> DriverResult<()>;

    /// Next completion event, or `WouldBlock` if none is ready.
    fn poll_event(&mut self) -> nb::Result<DriverEvent, DsError>;
}
