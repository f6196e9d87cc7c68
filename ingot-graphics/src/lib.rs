#![allow(
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Matches are good and extendable, no need to make an exception here.
    clippy::single_match,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

mod encoder;
pub mod soft;
mod traits;

pub use encoder::*;
pub use traits::*;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("Invalid buffer {0:?}")]
    InvalidBuffer(Buffer),
    #[error("Invalid command encoder '{0}'")]
    InvalidEncoder(String),
    #[error("Command encoder '{0}' is not finished")]
    EncoderNotFinished(String),
    #[error("Queue ownership violation on {0:?}")]
    OwnershipViolation(Buffer),
    #[error("Not supported: {0}")]
    NotSupported(&'static str),
    #[error("Device lost")]
    DeviceLost,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId(pub u32);

/// Handle to a device buffer. Only meaningful for the device that created it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Buffer {
    raw: u64,
}

impl Buffer {
    pub fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    pub fn raw(self) -> u64 {
        self.raw
    }

    pub fn at(self, offset: u64) -> BufferPiece {
        BufferPiece {
            buffer: self,
            offset,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BufferPiece {
    pub buffer: Buffer,
    pub offset: u64,
}

impl From<Buffer> for BufferPiece {
    fn from(buffer: Buffer) -> Self {
        Self { buffer, offset: 0 }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueueFamily {
    Graphics,
    Transfer,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Memory {
    /// Device-local memory, not visible to the host.
    Device,
    /// Host-visible memory that is also fast to access from the device.
    Shared,
    /// Host-visible memory for staging uploads.
    Upload,
}

impl Memory {
    pub fn is_host_visible(self) -> bool {
        match self {
            Self::Device => false,
            Self::Shared | Self::Upload => true,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const STORAGE = 1 << 4;
        const DEVICE_ADDRESS = 1 << 5;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct AccessFlags: u32 {
        const TRANSFER_READ = 1 << 0;
        const TRANSFER_WRITE = 1 << 1;
        const VERTEX_READ = 1 << 2;
        const INDEX_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const TRANSFER = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const BOTTOM_OF_PIPE = 1 << 4;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct DeviceFeatures: u32 {
        const BUFFER_DEVICE_ADDRESS = 1 << 0;
        const DESCRIPTOR_INDEXING = 1 << 1;
        const BINDLESS = Self::BUFFER_DEVICE_ADDRESS.bits() | Self::DESCRIPTOR_INDEXING.bits();
    }
}

#[derive(Clone, Debug)]
pub struct DeviceDesc {
    pub name: String,
    pub features: DeviceFeatures,
    /// Transfer and graphics work share a single queue family.
    pub unified_queues: bool,
    /// Upper bound on allocated buffer bytes, if any.
    pub memory_budget: Option<u64>,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            features: DeviceFeatures::empty(),
            unified_queues: true,
            memory_budget: None,
        }
    }
}

#[derive(Debug)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub memory: Memory,
    pub usage: BufferUsage,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufferBarrier {
    pub piece: BufferPiece,
    pub size: u64,
    pub access_before: AccessFlags,
    pub access_after: AccessFlags,
    pub stages_before: PipelineStages,
    pub stages_after: PipelineStages,
    /// Source and destination families of a queue ownership transfer.
    pub queue_transfer: Option<(QueueFamily, QueueFamily)>,
}

impl BufferBarrier {
    pub fn is_release(&self) -> bool {
        self.queue_transfer.is_some() && self.access_after.is_empty()
    }

    pub fn is_acquire(&self) -> bool {
        self.queue_transfer.is_some() && self.access_before.is_empty()
    }
}

#[derive(Debug)]
pub struct CommandEncoderDesc<'a> {
    pub name: &'a str,
    pub queue: QueueFamily,
}

/// Point on a queue timeline reached by a submission.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SyncPoint {
    pub queue: QueueFamily,
    pub value: u64,
}

pub type CompletionCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct SubmitDesc {
    /// Submission that has to complete before this one starts.
    pub wait: Option<SyncPoint>,
    /// Invoked once the submission has completed on the device.
    pub on_complete: Option<CompletionCallback>,
}
