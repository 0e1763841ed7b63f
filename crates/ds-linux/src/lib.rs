use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use ds_core::{DsError, DriverError, DriverResult};
use ds_hal::{BlockHandle, DriverEvent, ModuleParam, OpCode, StorageDriver};
use ds_mem::SwapLease;

pub mod setup;

struct QueuedUpdate {
    block: BlockHandle,
    src: SwapLease,
    len: usize,
    offset: usize,
}

/// Storage driver over a flat image file.
/// Block `i` lives at byte `i * block_size`; the image has no header.
/// Updates are queued and only hit the file when `poll_event` completes them.
pub struct ImageFlash {
    file: File,
    path: PathBuf,
    initialized: bool,
    region: Option<ModuleParam>,
    queue: VecDeque<QueuedUpdate>,
}

impl ImageFlash {
    /// Open (or create) the image at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true).write(true).create(true)
            .open(&path)?;

        Ok(Self {
            file,
            path,
            initialized: false,
            region: None,
            queue: VecDeque::new(),
        })
    }

    fn check_block(&self, block: &BlockHandle, offset: usize, len: usize) -> DriverResult<()> {
        let region = self.region.ok_or(DriverError::InvalidState)?;
        if block.module() != 0 {
            return Err(DriverError::InvalidState);
        }
        let end = region.block_count as usize * region.block_size;
        if block.address() >= end || block.address() % region.block_size != 0 {
            return Err(DriverError::InvalidAddr);
        }
        if offset + len > region.block_size {
            return Err(DriverError::InvalidParam);
        }
        Ok(())
    }

    fn write_at(&mut self, pos: u64, bytes: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(bytes)?;
        // Completion must mean the bytes are on the medium
        self.file.sync_data()
    }
}

impl StorageDriver for ImageFlash {
    fn init(&mut self) -> DriverResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn register(&mut self, param: ModuleParam) -> DriverResult<BlockHandle> {
        if !self.initialized { return Err(DriverError::InvalidState); }
        if self.region.is_some() { return Err(DriverError::NoMem); }
        if param.block_count == 0 || param.block_size == 0 { return Err(DriverError::InvalidParam); }

        // Fresh blocks read back as zero
        let size = param.block_count as u64 * param.block_size as u64;
        let current = self.file.metadata().map_err(|_| DriverError::Io)?.len();
        if current < size {
            self.file.set_len(size).map_err(|_| DriverError::Io)?;
        }

        info!("[IMAGE] {} registered: {} x {} bytes", self.path.display(), param.block_count, param.block_size);
        self.region = Some(param);
        Ok(BlockHandle::new(0, 0))
    }

    fn block_identifier(&self, base: &BlockHandle, id: u32) -> DriverResult<BlockHandle> {
        let region = self.region.ok_or(DriverError::InvalidState)?;
        if id >= region.block_count { return Err(DriverError::InvalidParam); }
        Ok(BlockHandle::new(base.module(), base.address() + id as usize * region.block_size))
    }

    fn load(&mut self, dest: &mut [u8], block: &BlockHandle, offset: usize) -> DriverResult<()> {
        self.check_block(block, offset, dest.len())?;
        let pos = (block.address() + offset) as u64;
        self.file.seek(SeekFrom::Start(pos)).map_err(|_| DriverError::Io)?;
        self.file.read_exact(dest).map_err(|_| DriverError::Io)
    }

    fn update(&mut self, block: &BlockHandle, src: SwapLease, len: usize, offset: usize) -> DriverResult<()> {
        if len > src.data.len() { return Err(DriverError::InvalidParam); }
        self.check_block(block, offset, len)?;
        debug!("[IMAGE] queued update at 0x{:X} ({} bytes)", block.address(), len);
        self.queue.push_back(QueuedUpdate { block: *block, src, len, offset });
        Ok(())
    }

    fn poll_event(&mut self) -> nb::Result<DriverEvent, DsError> {
        let op = match self.queue.pop_front() {
            Some(op) => op,
            None => return Err(nb::Error::WouldBlock),
        };

        let pos = (op.block.address() + op.offset) as u64;
        let result = match self.write_at(pos, op.src.bytes(op.len)) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("[IMAGE] write at 0x{:X} failed: {}", pos, e);
                Err(DriverError::Io)
            }
        };

        Ok(DriverEvent {
            op: OpCode::Update,
            block: op.block,
            result,
            buffer: Some(op.src),
        })
    }
}
