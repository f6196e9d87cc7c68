#![allow(irrefutable_let_patterns, clippy::new_without_default)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod arena;
mod bitset;
pub mod job;
mod store;

pub use arena::{Arena, Handle, Table};
pub use bitset::AtomicBitSet;
pub use job::{Gate, Job, JobBatch, JobContext, JobPriority, JobStatus, Scheduler, Signal};
pub use store::{AssetGuid, AssetStore, DirectoryStore, LoadCallback, MemoryStore, Registry};
