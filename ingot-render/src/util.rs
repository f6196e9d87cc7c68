use ingot_graphics::{self as gpu, CommandDevice as _};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    mem,
    sync::Arc,
    thread::{self, ThreadId},
};

pub fn align_to(offset: u64, alignment: u64) -> u64 {
    let rem = offset & (alignment - 1);
    if rem == 0 {
        offset
    } else {
        offset - rem + alignment
    }
}

/// Command encoders owned by one thread.
///
/// Only the owning thread acquires from the pool. Other threads hand
/// encoders back with [`CommandPools::retire`], and the owner picks them up
/// on its next acquisition.
pub struct CommandPool {
    thread: ThreadId,
    free: Mutex<Vec<gpu::CommandEncoder>>,
    retired: Mutex<Vec<gpu::CommandEncoder>>,
}

impl CommandPool {
    fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            free: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    fn recycle(&self) {
        let retired = mem::take(&mut *self.retired.lock());
        if !retired.is_empty() {
            log::trace!("Recycling {} encoders on {:?}", retired.len(), self.thread);
            self.free.lock().extend(retired);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn acquire(
        &self,
        device: &dyn gpu::Device,
        queue: gpu::QueueFamily,
        name: &str,
    ) -> gpu::CommandEncoder {
        debug_assert_eq!(thread::current().id(), self.thread);
        let mut free = self.free.lock();
        match free.iter().position(|encoder| encoder.queue() == queue) {
            Some(index) => free.swap_remove(index),
            None => device.create_command_encoder(gpu::CommandEncoderDesc { name, queue }),
        }
    }

    /// Encoders for an upload: a transfer one, plus a graphics one if the
    /// device has separate queue families.
    pub fn acquire_pair(&self, device: &dyn gpu::Device, name: &str) -> gpu::EncoderPair {
        if device.is_unified() {
            gpu::EncoderPair::new(self.acquire(device, gpu::QueueFamily::Graphics, name), None)
        } else {
            gpu::EncoderPair::new(
                self.acquire(device, gpu::QueueFamily::Transfer, name),
                Some(self.acquire(device, gpu::QueueFamily::Graphics, name)),
            )
        }
    }

    fn drain(&self, device: &dyn gpu::Device) {
        let free = mem::take(&mut *self.free.lock());
        let retired = mem::take(&mut *self.retired.lock());
        for encoder in free.into_iter().chain(retired) {
            device.destroy_command_encoder(encoder);
        }
    }
}

/// Per-thread command pools of a device.
#[derive(Default)]
pub struct CommandPools {
    pools: Mutex<HashMap<ThreadId, Arc<CommandPool>>>,
}

impl CommandPools {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, thread: ThreadId) -> Arc<CommandPool> {
        Arc::clone(
            self.pools
                .lock()
                .entry(thread)
                .or_insert_with(|| Arc::new(CommandPool::new(thread))),
        )
    }

    /// Pool of the calling thread, with encoders retired to it recycled.
    pub fn current(&self) -> Arc<CommandPool> {
        let pool = self.get_or_create(thread::current().id());
        pool.recycle();
        pool
    }

    pub fn find(&self, thread: ThreadId) -> Option<Arc<CommandPool>> {
        self.pools.lock().get(&thread).cloned()
    }

    /// Return an encoder to the pool of the thread that recorded it.
    pub fn retire(&self, thread: ThreadId, encoder: gpu::CommandEncoder) {
        self.get_or_create(thread).retired.lock().push(encoder);
    }

    pub fn retire_pair(&self, thread: ThreadId, encoders: gpu::EncoderPair) {
        let (transfer, graphics) = encoders.into_encoders();
        self.retire(thread, transfer);
        if let Some(graphics) = graphics {
            self.retire(thread, graphics);
        }
    }

    /// Destroy every pooled encoder, regardless of its thread.
    pub fn drain(&self, device: &dyn gpu::Device) {
        let pools = mem::take(&mut *self.pools.lock());
        for pool in pools.values() {
            pool.drain(device);
        }
    }
}
