#![no_std]
#[cfg(feature = "std")]
extern crate std;

/// Bytes per block. Every block on the device has exactly this size.
pub const BLOCK_SIZE: usize = 32;

/// Blocks registered by a default session.
pub const DEFAULT_BLOCK_COUNT: u32 = 16;

/// Update length the deployed firmware submits regardless of the payload.
/// Only these leading bytes are guaranteed to reach flash in legacy mode.
pub const LEGACY_UPDATE_LEN: usize = 16;

pub type DsResult<T> = Result<T, DsError>;

/// Datastore error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsError {
    /// Another write is in flight.
    OperationPending,
    /// Block id outside `[0, N)`.
    InvalidId,
    /// Requested length exceeds the block size.
    InvalidLength,
    /// Required buffer missing, or too short for the requested length.
    InvalidPointer,
    /// Driver could not map the id to a location.
    HandleResolutionFailed,
    /// Synchronous load from the driver failed.
    LoadFailed,
    /// Driver rejected the update request.
    SubmitFailed,
    /// Driver reported failure when the update completed.
    AsyncUpdateFailed,
    /// Completion arrived with no matching submission.
    InternalConsistencyFault,
    NotInitialized,
    AlreadyInitialized,
    /// Driver init or block registration failed.
    InitFailed,
    HalError,
}

impl core::fmt::Display for DsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DsError {}

pub type DriverResult<T> = Result<T, DriverError>;

/// Status codes a storage driver reports on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Driver not initialized, or the module is not registered.
    InvalidState,
    /// Parameter out of the range the driver accepts.
    InvalidParam,
    /// Address falls outside the registered region.
    InvalidAddr,
    /// No room for another registration or queued operation.
    NoMem,
    /// Medium access failed.
    Io,
    /// Vendor-specific code.
    Other(u32),
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DriverError::Other(code) => write!(f, "driver error 0x{:08X}", code),
            e => write!(f, "{:?}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DriverError {}
