use ingot_graphics as gpu;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// Table of the live rendering devices.
#[derive(Default)]
pub struct RenderContext {
    devices: RwLock<HashMap<gpu::DeviceId, Arc<dyn gpu::Device>>>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device previously registered under the same id.
    pub fn add(&self, device: Arc<dyn gpu::Device>) -> Option<Arc<dyn gpu::Device>> {
        log::info!("Adding device {:?} '{}'", device.id(), device.name());
        self.devices.write().insert(device.id(), device)
    }

    pub fn remove(&self, id: gpu::DeviceId) -> Option<Arc<dyn gpu::Device>> {
        let device = self.devices.write().remove(&id)?;
        log::info!("Removing device {:?} '{}'", id, device.name());
        Some(device)
    }

    pub fn device(&self, id: gpu::DeviceId) -> Option<Arc<dyn gpu::Device>> {
        self.devices.read().get(&id).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<dyn gpu::Device>> {
        let mut list = self.devices.read().values().cloned().collect::<Vec<_>>();
        list.sort_by_key(|device| device.id().0);
        list
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[test]
fn add_and_remove() {
    let context = RenderContext::new();
    for index in [2, 0] {
        let device = gpu::soft::Context::new(gpu::DeviceId(index), gpu::DeviceDesc::default());
        assert!(context.add(Arc::new(device)).is_none());
    }
    let ids = context.devices().iter().map(|d| d.id()).collect::<Vec<_>>();
    assert_eq!(ids, [gpu::DeviceId(0), gpu::DeviceId(2)]);
    assert!(context.remove(gpu::DeviceId(0)).is_some());
    assert!(context.device(gpu::DeviceId(0)).is_none());
    assert!(context.remove(gpu::DeviceId(0)).is_none());
    assert!(!context.is_empty());
}
