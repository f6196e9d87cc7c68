//! Software device keeping every buffer in host memory.
//!
//! Submissions execute synchronously on the submitting thread, which makes
//! the device deterministic and suitable for tests and headless tools.

use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

mod command;
mod resource;

const BASE_ADDRESS: u64 = 0x1_0000;
const ADDRESS_ALIGNMENT: u64 = 0x100;

struct BufferEntry {
    name: String,
    memory: crate::Memory,
    generation: u32,
    address: u64,
    data: Box<[u8]>,
}

struct ResourceState {
    buffers: slab::Slab<BufferEntry>,
    generation: u32,
    next_address: u64,
    memory_used: u64,
}

#[derive(Default)]
struct QueueState {
    graphics_value: u64,
    transfer_value: u64,
    /// Buffer ranges released by one queue family and not yet acquired by the other.
    pending_releases: HashSet<(crate::BufferPiece, crate::QueueFamily)>,
    submissions: Vec<Submission>,
    submission_count: u64,
}

impl QueueState {
    fn value_mut(&mut self, queue: crate::QueueFamily) -> &mut u64 {
        match queue {
            crate::QueueFamily::Graphics => &mut self.graphics_value,
            crate::QueueFamily::Transfer => &mut self.transfer_value,
        }
    }
}

/// Record of an executed submission.
#[derive(Clone, Debug)]
pub struct Submission {
    pub encoder: String,
    pub queue: crate::QueueFamily,
    pub wait: Option<crate::SyncPoint>,
    pub sync_point: crate::SyncPoint,
    pub commands: Vec<crate::Command>,
}

impl Submission {
    pub fn barriers(&self) -> impl Iterator<Item = &crate::BufferBarrier> {
        self.commands.iter().filter_map(|command| match *command {
            crate::Command::Barrier(ref barrier) => Some(barrier),
            crate::Command::CopyBufferToBuffer { .. } => None,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub live_buffers: usize,
    pub live_encoders: usize,
    pub memory_used: u64,
    pub submissions: u64,
}

pub struct Context {
    id: crate::DeviceId,
    desc: crate::DeviceDesc,
    resources: Mutex<ResourceState>,
    queues: Mutex<QueueState>,
    live_encoders: AtomicUsize,
    lost: AtomicBool,
    /// Keep the log of submissions for inspection.
    record: bool,
}

impl Context {
    pub fn new(id: crate::DeviceId, desc: crate::DeviceDesc) -> Self {
        log::info!(
            "Creating soft device {:?} '{}' with {:?}, unified queues: {}",
            id,
            desc.name,
            desc.features,
            desc.unified_queues
        );
        Self {
            id,
            desc,
            resources: Mutex::new(ResourceState {
                buffers: slab::Slab::new(),
                generation: 0,
                next_address: BASE_ADDRESS,
                memory_used: 0,
            }),
            queues: Mutex::new(QueueState::default()),
            live_encoders: AtomicUsize::new(0),
            lost: AtomicBool::new(false),
            record: true,
        }
    }

    /// Stop recording the submission log.
    pub fn without_recording(mut self) -> Self {
        self.record = false;
        self
    }

    pub fn desc(&self) -> &crate::DeviceDesc {
        &self.desc
    }

    pub fn stats(&self) -> Stats {
        let (live_buffers, memory_used) = {
            let resources = self.resources.lock();
            (resources.buffers.len(), resources.memory_used)
        };
        Stats {
            live_buffers,
            live_encoders: self.live_encoders.load(Ordering::Acquire),
            memory_used,
            submissions: self.queues.lock().submission_count,
        }
    }

    pub fn take_submissions(&self) -> Vec<Submission> {
        std::mem::take(&mut self.queues.lock().submissions)
    }

    /// Simulate a device loss: every following call fails.
    pub fn lose(&self) {
        log::warn!("Soft device '{}' is lost", self.desc.name);
        self.lost.store(true, Ordering::Release);
    }

    fn check_alive(&self) -> Result<(), crate::DeviceError> {
        if self.lost.load(Ordering::Acquire) {
            Err(crate::DeviceError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl crate::Device for Context {
    fn id(&self) -> crate::DeviceId {
        self.id
    }
    fn name(&self) -> &str {
        &self.desc.name
    }
    fn features(&self) -> crate::DeviceFeatures {
        self.desc.features
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use crate::{
        AccessFlags, BufferDesc, BufferUsage, CommandDevice as _, CommandEncoderDesc, DeviceDesc,
        DeviceError, DeviceFeatures, DeviceId, EncoderPair, Memory, QueueFamily,
        ResourceDevice as _, SubmitDesc,
    };
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn buffer_desc(name: &str, size: u64, memory: Memory) -> BufferDesc {
        BufferDesc {
            name,
            size,
            memory,
            usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
        }
    }

    #[test]
    fn copy_and_read_back() {
        let context = Context::new(DeviceId(0), DeviceDesc::default());
        let staging = context
            .create_buffer(buffer_desc("staging", 8, Memory::Upload))
            .unwrap();
        let target = context
            .create_buffer(buffer_desc("target", 8, Memory::Device))
            .unwrap();
        context
            .write_buffer(staging.into(), &[1, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        assert!(matches!(
            context.write_buffer(target.into(), &[0]),
            Err(DeviceError::NotSupported(_))
        ));

        let mut encoder = context.create_command_encoder(CommandEncoderDesc {
            name: "copy",
            queue: QueueFamily::Graphics,
        });
        encoder.start();
        encoder
            .transfer()
            .copy_buffer_to_buffer(staging.at(4), target.into(), 4);
        encoder.finish();
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = Arc::clone(&done);
        let sp = context
            .submit(
                &mut encoder,
                SubmitDesc {
                    wait: None,
                    on_complete: Some(Box::new(move || done_clone.store(true, Ordering::Release))),
                },
            )
            .unwrap();
        assert!(done.load(Ordering::Acquire));
        assert!(context.wait_for(&sp, 0));
        assert_eq!(context.read_buffer(target.into(), 8).unwrap(), [5, 6, 7, 8, 0, 0, 0, 0]);
        context.destroy_command_encoder(encoder);

        context.destroy_buffer(staging);
        context.destroy_buffer(target);
        let stats = context.stats();
        assert_eq!((stats.live_buffers, stats.live_encoders, stats.memory_used), (0, 0, 0));
        assert!(context.read_buffer(target.into(), 1).is_err());
    }

    #[test]
    fn memory_budget() {
        let context = Context::new(
            DeviceId(1),
            DeviceDesc {
                memory_budget: Some(100),
                ..Default::default()
            },
        );
        let a = context
            .create_buffer(buffer_desc("a", 60, Memory::Device))
            .unwrap();
        match context.create_buffer(buffer_desc("b", 60, Memory::Device)) {
            Err(DeviceError::OutOfMemory {
                requested,
                available,
            }) => assert_eq!((requested, available), (60, 40)),
            other => panic!("Unexpected {:?}", other),
        }
        context.destroy_buffer(a);
        assert!(context
            .create_buffer(buffer_desc("b", 60, Memory::Device))
            .is_ok());
    }

    #[test]
    fn ownership_transfer() {
        let context = Context::new(
            DeviceId(2),
            DeviceDesc {
                unified_queues: false,
                ..Default::default()
            },
        );
        let buffer = context
            .create_buffer(buffer_desc("vertex", 16, Memory::Device))
            .unwrap();
        let make_pair = || {
            EncoderPair::new(
                context.create_command_encoder(CommandEncoderDesc {
                    name: "transfer",
                    queue: QueueFamily::Transfer,
                }),
                Some(context.create_command_encoder(CommandEncoderDesc {
                    name: "graphics",
                    queue: QueueFamily::Graphics,
                })),
            )
        };

        let mut pair = make_pair();
        pair.start();
        pair.transfer_ownership(
            buffer.into(),
            16,
            AccessFlags::TRANSFER_WRITE,
            AccessFlags::VERTEX_READ,
        );
        pair.finish();
        let (mut transfer, graphics) = pair.into_encoders();
        let mut graphics = graphics.unwrap();

        // acquiring before the release was executed is a violation
        assert!(matches!(
            context.submit(&mut graphics, SubmitDesc::default()),
            Err(DeviceError::OwnershipViolation(_))
        ));

        let mut pair = EncoderPair::new(transfer, Some(graphics));
        pair.start();
        pair.transfer_ownership(
            buffer.into(),
            16,
            AccessFlags::TRANSFER_WRITE,
            AccessFlags::VERTEX_READ,
        );
        pair.finish();
        transfer = pair.transfer;
        graphics = pair.graphics.unwrap();
        let sp = context.submit(&mut transfer, SubmitDesc::default()).unwrap();
        assert_eq!(sp.queue, QueueFamily::Transfer);
        context
            .submit(
                &mut graphics,
                SubmitDesc {
                    wait: Some(sp),
                    on_complete: None,
                },
            )
            .unwrap();

        let submissions = context.take_submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[1].wait, Some(sp));
        assert!(submissions[0].barriers().all(|b| b.is_release()));
        assert!(submissions[1].barriers().all(|b| b.is_acquire()));
    }

    #[test]
    fn unrecorded_submissions_are_counted() {
        let context = Context::new(DeviceId(5), DeviceDesc::default()).without_recording();
        let staging = context
            .create_buffer(buffer_desc("staging", 4, Memory::Upload))
            .unwrap();
        let target = context
            .create_buffer(buffer_desc("target", 4, Memory::Device))
            .unwrap();
        for _ in 0..3 {
            let mut encoder = context.create_command_encoder(CommandEncoderDesc {
                name: "fill",
                queue: QueueFamily::Graphics,
            });
            encoder.start();
            encoder
                .transfer()
                .copy_buffer_to_buffer(staging.into(), target.into(), 4);
            encoder.finish();
            context.submit(&mut encoder, SubmitDesc::default()).unwrap();
            context.destroy_command_encoder(encoder);
        }
        assert_eq!(context.stats().submissions, 3);
        assert!(context.take_submissions().is_empty());
        context.destroy_buffer(staging);
        context.destroy_buffer(target);
    }

    #[test]
    fn device_address_and_loss() {
        let plain = Context::new(DeviceId(3), DeviceDesc::default());
        let buffer = plain
            .create_buffer(buffer_desc("plain", 4, Memory::Device))
            .unwrap();
        assert!(plain.buffer_device_address(buffer).is_err());

        let bindless = Context::new(
            DeviceId(4),
            DeviceDesc {
                features: DeviceFeatures::BINDLESS,
                ..Default::default()
            },
        );
        let a = bindless
            .create_buffer(buffer_desc("a", 4, Memory::Device))
            .unwrap();
        let b = bindless
            .create_buffer(buffer_desc("b", 4, Memory::Device))
            .unwrap();
        let address_a = bindless.buffer_device_address(a).unwrap();
        let address_b = bindless.buffer_device_address(b).unwrap();
        assert_ne!(address_a, 0);
        assert!(address_b > address_a);

        bindless.lose();
        assert!(matches!(
            bindless.create_buffer(buffer_desc("c", 4, Memory::Device)),
            Err(DeviceError::DeviceLost)
        ));
    }
}
