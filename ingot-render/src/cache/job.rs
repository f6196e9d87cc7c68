use super::{DeviceMeshes, MeshCache, MeshIdentifier, MeshState, Published};
use crate::{
    mesh::{submit_upload, RenderMesh},
    static_object::StaticObject,
};
use ingot_asset::{AssetGuid, AssetStore, Job, JobContext, JobStatus};
use ingot_graphics::{self as gpu, CommandDevice as _, ResourceDevice as _};
use std::{
    mem,
    sync::{Arc, Weak},
    thread::ThreadId,
};

/// Reads a mesh from the asset store and decodes it.
pub(super) struct LoadStaticMeshFromStoreJob {
    cache: Weak<MeshCache>,
    store: Arc<dyn AssetStore>,
    guid: AssetGuid,
    identifier: MeshIdentifier,
    requested: bool,
}

impl LoadStaticMeshFromStoreJob {
    pub(super) fn new(
        cache: Weak<MeshCache>,
        store: Arc<dyn AssetStore>,
        guid: AssetGuid,
        identifier: MeshIdentifier,
    ) -> Self {
        Self {
            cache,
            store,
            guid,
            identifier,
            requested: false,
        }
    }
}

impl Job for LoadStaticMeshFromStoreJob {
    fn step(&mut self, context: &JobContext) -> JobStatus {
        if self.requested {
            return JobStatus::Done;
        }
        self.requested = true;

        let signal = context.signal();
        let cache = self.cache.clone();
        let guid = self.guid;
        let identifier = self.identifier;
        self.store.load_binary(
            guid,
            context.priority(),
            Box::new(move |bytes| {
                if let Some(cache) = cache.upgrade() {
                    if bytes.is_empty() {
                        log::warn!("Asset {} has no data", guid);
                        cache.on_mesh_loading_failed(identifier);
                    } else {
                        profiling::scope!("Decode static mesh");
                        cache.on_mesh_loaded(identifier, StaticObject::decode(bytes));
                    }
                }
                signal.raise();
            }),
        );
        JobStatus::AwaitExternalSignal
    }
}

/// Copies the geometry of a loaded master mesh into its clone.
pub(super) struct CloneMasterMeshJob {
    cache: Weak<MeshCache>,
    identifier: MeshIdentifier,
    master: MeshIdentifier,
}

impl CloneMasterMeshJob {
    pub(super) fn new(
        cache: Weak<MeshCache>,
        identifier: MeshIdentifier,
        master: MeshIdentifier,
    ) -> Self {
        Self {
            cache,
            identifier,
            master,
        }
    }
}

impl Job for CloneMasterMeshJob {
    fn step(&mut self, _context: &JobContext) -> JobStatus {
        let cache = match self.cache.upgrade() {
            Some(cache) => cache,
            None => return JobStatus::Done,
        };
        match cache.find_mesh(self.master) {
            Some(geometry) => {
                log::debug!("Cloning mesh {:?} into {:?}", self.master, self.identifier);
                cache.on_mesh_loaded(self.identifier, StaticObject::clone(&geometry));
            }
            None => {
                log::warn!("Master mesh {:?} is not available", self.master);
                cache.on_mesh_loading_failed(self.identifier);
            }
        }
        JobStatus::Done
    }
}

struct Upload {
    thread: ThreadId,
    encoders: gpu::EncoderPair,
    mesh: RenderMesh,
    staging: Option<gpu::Buffer>,
}

enum Stage {
    AwaitingLoad,
    AwaitingRenderMeshCreation {
        thread: ThreadId,
        encoders: gpu::EncoderPair,
    },
    AwaitingTransferStart(Upload),
    AwaitingTransferCompletion(Upload),
    Finished,
}

/// Uploads the CPU geometry of a mesh to one device and publishes it.
pub(super) struct LoadRenderMeshJob {
    cache: Arc<MeshCache>,
    device: Arc<DeviceMeshes>,
    identifier: MeshIdentifier,
    stage: Stage,
}

impl LoadRenderMeshJob {
    pub(super) fn new(
        cache: Arc<MeshCache>,
        device: Arc<DeviceMeshes>,
        identifier: MeshIdentifier,
    ) -> Self {
        Self {
            cache,
            device,
            identifier,
            stage: Stage::AwaitingLoad,
        }
    }

    fn await_load(&mut self) -> JobStatus {
        let index = self.identifier.index();
        let state = match self.cache.mesh_info(self.identifier, |info| info.state()) {
            Some(state) => state,
            // the removal released our loading bit, which may belong to a new mesh by now
            None => return JobStatus::Done,
        };
        if self.cache.loading_meshes.is_set(index) {
            self.stage = Stage::AwaitingLoad;
            return JobStatus::TryRequeue;
        }
        match state {
            MeshState::Loaded => {
                let device = &*self.device.device;
                let pool = self.device.pools.current();
                let mut encoders = pool.acquire_pair(device, "mesh upload");
                encoders.start();
                self.stage = Stage::AwaitingRenderMeshCreation {
                    thread: pool.thread(),
                    encoders,
                };
                JobStatus::Continue
            }
            MeshState::Unloaded | MeshState::Failed => {
                log::debug!("Mesh {:?} has no geometry to upload", self.identifier);
                self.device.loading.clear(index);
                JobStatus::Done
            }
        }
    }

    fn create_render_mesh(
        &mut self,
        thread: ThreadId,
        mut encoders: gpu::EncoderPair,
    ) -> JobStatus {
        profiling::scope!("Create render mesh");
        let (mesh, staging) = match self.cache.find_mesh(self.identifier) {
            Some(object) => RenderMesh::from_object(&*self.device.device, &mut encoders, &object),
            None => (RenderMesh::INVALID, None),
        };
        encoders.finish();
        let upload = Upload {
            thread,
            encoders,
            mesh,
            staging,
        };
        self.stage = if mesh.is_valid() {
            Stage::AwaitingTransferStart(upload)
        } else {
            Stage::AwaitingTransferCompletion(upload)
        };
        JobStatus::Continue
    }

    fn start_transfer(&mut self, context: &JobContext, mut upload: Upload) -> JobStatus {
        let device = &*self.device.device;
        let signal = context.signal();
        let on_complete: gpu::CompletionCallback = Box::new(move || signal.raise());
        match submit_upload(device, &mut upload.encoders, Some(on_complete)) {
            Ok(_) => {
                self.stage = Stage::AwaitingTransferCompletion(upload);
                JobStatus::AwaitExternalSignal
            }
            Err(e) => {
                log::error!("Unable to submit mesh {:?}: {}", self.identifier, e);
                upload.mesh.destroy(device);
                upload.mesh = RenderMesh::INVALID;
                self.stage = Stage::AwaitingTransferCompletion(upload);
                JobStatus::Continue
            }
        }
    }

    fn complete_transfer(&mut self, upload: Upload) -> JobStatus {
        let device = &*self.device.device;
        match self.cache.publish(&self.device, self.identifier, upload.mesh) {
            Published::First => {}
            Published::Replaced(previous) => previous.destroy(device),
            Published::Removed(mesh) => {
                log::debug!("Mesh {:?} was removed during the upload", self.identifier);
                mesh.destroy(device);
            }
        }
        if let Some(staging) = upload.staging {
            device.destroy_buffer(staging);
        }
        if self.cache.is_current(&self.device) {
            self.device.pools.retire_pair(upload.thread, upload.encoders);
        } else {
            let (transfer, graphics) = upload.encoders.into_encoders();
            device.destroy_command_encoder(transfer);
            if let Some(graphics) = graphics {
                device.destroy_command_encoder(graphics);
            }
        }
        JobStatus::Done
    }
}

impl Job for LoadRenderMeshJob {
    fn step(&mut self, context: &JobContext) -> JobStatus {
        match mem::replace(&mut self.stage, Stage::Finished) {
            Stage::AwaitingLoad => self.await_load(),
            Stage::AwaitingRenderMeshCreation { thread, encoders } => {
                self.create_render_mesh(thread, encoders)
            }
            Stage::AwaitingTransferStart(upload) => self.start_transfer(context, upload),
            Stage::AwaitingTransferCompletion(upload) => self.complete_transfer(upload),
            Stage::Finished => JobStatus::Done,
        }
    }
}
