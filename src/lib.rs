#![allow(irrefutable_let_patterns, clippy::new_without_default)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub use ingot_asset as asset;
pub use ingot_graphics as gpu;
pub use ingot_render as render;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

pub mod config;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("Unable to open the asset store: {0}")]
    Store(#[from] std::io::Error),
    #[error(transparent)]
    Device(#[from] gpu::DeviceError),
}

/// Ingot encapsulates the whole mesh pipeline: the task workers,
/// the rendering devices, and the mesh cache feeding them.
pub struct Ingot {
    render_context: render::RenderContext,
    mesh_cache: Arc<render::MeshCache>,
    scheduler: asset::Scheduler,
    primitives: Option<render::ProceduralMeshes>,
    next_device_id: AtomicU32,
    workers: Vec<choir::WorkerHandle>,
    choir: Arc<choir::Choir>,
}

impl Ingot {
    /// Create the pipeline with the asset store named by the config.
    #[profiling::function]
    pub fn new(config: &config::Engine) -> Result<Self, Error> {
        config.validate()?;
        let choir = choir::Choir::new();
        let store: Arc<dyn asset::AssetStore> = match config.asset_path {
            Some(ref path) => Arc::new(asset::DirectoryStore::new(path, &choir)?),
            None => Arc::new(asset::MemoryStore::default()),
        };
        Self::with_store(config, choir, store)
    }

    /// Create the pipeline on top of an existing task runtime and asset store.
    pub fn with_store(
        config: &config::Engine,
        choir: Arc<choir::Choir>,
        store: Arc<dyn asset::AssetStore>,
    ) -> Result<Self, Error> {
        log::info!("Initializing Ingot");
        config.validate()?;

        let num_workers = config.worker_count();
        log::info!("Initializing Choir with {} workers", num_workers);
        let workers = (0..num_workers)
            .map(|i| choir.add_worker(&format!("Worker-{}", i)))
            .collect();

        let scheduler = asset::Scheduler::new(&choir);
        let mesh_cache = render::MeshCache::new(&scheduler, store, config.max_meshes);
        let primitives = if config.create_primitives {
            Some(mesh_cache.create_procedural_meshes())
        } else {
            None
        };

        let ingot = Self {
            render_context: render::RenderContext::new(),
            mesh_cache,
            scheduler,
            primitives,
            next_device_id: AtomicU32::new(0),
            workers,
            choir,
        };
        for device in config.devices.iter() {
            ingot.add_device(device.desc())?;
        }
        Ok(ingot)
    }

    /// Bring up a new device and its mesh tables.
    pub fn add_device(&self, desc: gpu::DeviceDesc) -> Result<gpu::DeviceId, gpu::DeviceError> {
        let id = gpu::DeviceId(self.next_device_id.fetch_add(1, Ordering::Relaxed));
        let device: Arc<dyn gpu::Device> =
            Arc::new(gpu::soft::Context::new(id, desc).without_recording());
        self.mesh_cache.on_device_created(Arc::clone(&device))?;
        self.render_context.add(device);
        Ok(id)
    }

    /// Release every mesh resource of a device and forget it.
    pub fn remove_device(&self, id: gpu::DeviceId) -> bool {
        self.mesh_cache.on_device_destroyed(id);
        self.render_context.remove(id).is_some()
    }

    pub fn device(&self, id: gpu::DeviceId) -> Option<Arc<dyn gpu::Device>> {
        self.render_context.device(id)
    }

    pub fn render_context(&self) -> &render::RenderContext {
        &self.render_context
    }

    pub fn mesh_cache(&self) -> &Arc<render::MeshCache> {
        &self.mesh_cache
    }

    pub fn scheduler(&self) -> &asset::Scheduler {
        &self.scheduler
    }

    pub fn primitives(&self) -> Option<&render::ProceduralMeshes> {
        self.primitives.as_ref()
    }

    /// Re-raise a panic that happened on one of the workers.
    pub fn check_panic(&self) {
        self.choir.check_panic();
    }

    pub fn destroy(&mut self) {
        log::info!("Shutting down Ingot");
        self.mesh_cache.destroy();
        for device in self.render_context.devices() {
            self.render_context.remove(device.id());
        }
        self.workers.clear();
        self.choir.check_panic();
    }
}
