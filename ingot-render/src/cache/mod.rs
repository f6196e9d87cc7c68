//! Mesh cache: registration, CPU loading and per-device GPU uploads.
//!
//! Every mesh is loaded into CPU memory at most once at a time, guarded by
//! a bit in `loading_meshes`. Every device uploads a mesh at most once at a
//! time, guarded by the device `loading` bits. Requests that arrive while a
//! load is in flight only register their listeners.

use crate::{
    mesh::{submit_upload, MeshAddresses, RenderMesh},
    static_object::StaticObject,
    util::CommandPools,
};
use ingot_asset::{
    Arena, AssetGuid, AssetStore, AtomicBitSet, Handle, JobBatch, JobPriority, Registry,
    Scheduler, Table,
};
use ingot_graphics::{self as gpu, CommandDevice as _, ResourceDevice as _};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    mem,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc, Weak,
    },
};

mod job;

use job::{CloneMasterMeshJob, LoadRenderMeshJob, LoadStaticMeshFromStoreJob};

pub type MeshIdentifier = Handle<StaticMeshInfo>;
pub type StaticMeshListener = Box<dyn FnOnce(MeshIdentifier, Option<Arc<StaticObject>>) + Send>;
pub type RenderMeshListener =
    Arc<dyn Fn(MeshIdentifier, &RenderMesh, LoadedMeshFlags) + Send + Sync>;
pub type LoadingCallback = Arc<dyn Fn(MeshIdentifier) -> JobBatch + Send + Sync>;

pub const DEFAULT_MAX_MESHES: usize = 1 << 16;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct StaticMeshFlags: u8 {
        const IS_CLONE = 1 << 0;
        const ALLOW_CPU_VERTEX_ACCESS = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct MeshLoadFlags: u8 {
        /// Deliver the device dummy mesh while the real one is loading.
        const LOAD_DUMMY = 1 << 0;
    }
}

impl Default for MeshLoadFlags {
    fn default() -> Self {
        Self::LOAD_DUMMY
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct LoadedMeshFlags: u8 {
        const IS_DUMMY = 1 << 0;
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MeshState {
    Unloaded = 0,
    Loaded = 1,
    Failed = 2,
}

impl MeshState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Loaded,
            2 => Self::Failed,
            _ => Self::Unloaded,
        }
    }
}

/// Outcome of publishing a render mesh into its device slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Published {
    /// The slot was empty.
    First,
    /// The slot held this mesh, now owned by the caller.
    Replaced(RenderMesh),
    /// The mesh or the device is gone, the given mesh was not stored.
    Removed(RenderMesh),
}

/// CPU-side record of a registered mesh.
pub struct StaticMeshInfo {
    guid: AssetGuid,
    flags: StaticMeshFlags,
    master: Option<MeshIdentifier>,
    loading_callback: LoadingCallback,
    state: AtomicU8,
    geometry: RwLock<Option<Arc<StaticObject>>>,
    listeners: Mutex<Vec<StaticMeshListener>>,
}

impl StaticMeshInfo {
    pub fn guid(&self) -> AssetGuid {
        self.guid
    }

    pub fn flags(&self) -> StaticMeshFlags {
        self.flags
    }

    pub fn master(&self) -> Option<MeshIdentifier> {
        self.master
    }

    pub fn state(&self) -> MeshState {
        MeshState::from_raw(self.state.load(Ordering::Acquire))
    }
}

type Requesters = Mutex<Vec<(ListenerId, RenderMeshListener)>>;

struct DeviceMeshes {
    device: Arc<dyn gpu::Device>,
    /// Published meshes, tagged with the identifier that owns them.
    render_meshes: Table<(MeshIdentifier, RenderMesh)>,
    loading: AtomicBitSet,
    requesters: RwLock<HashMap<MeshIdentifier, Arc<Requesters>>>,
    dummy: RenderMesh,
    bindless: Option<gpu::Buffer>,
    pools: CommandPools,
}

impl DeviceMeshes {
    fn add_requester(
        &self,
        identifier: MeshIdentifier,
        listener_id: ListenerId,
        listener: RenderMeshListener,
    ) {
        let existing = self.requesters.read().get(&identifier).cloned();
        let bucket = match existing {
            Some(bucket) => bucket,
            None => Arc::clone(self.requesters.write().entry(identifier).or_default()),
        };
        bucket.lock().push((listener_id, listener));
    }

    fn has_requesters(&self, identifier: MeshIdentifier) -> bool {
        self.requesters.read().contains_key(&identifier)
    }

    /// Take the upload slot of a mesh that has nothing published yet.
    ///
    /// A publish racing with the caller already notified its listener,
    /// so the slot is released again in that case.
    fn claim_first_upload(&self, identifier: MeshIdentifier) -> bool {
        if !self.loading.set(identifier.index()) {
            return false;
        }
        if self.find(identifier).is_some() {
            self.loading.clear(identifier.index());
            return false;
        }
        true
    }

    fn find(&self, identifier: MeshIdentifier) -> Option<RenderMesh> {
        match self.render_meshes.get(identifier.index()) {
            Some((owner, mesh)) if owner == identifier => Some(mesh),
            _ => None,
        }
    }

    fn write_mesh_addresses(
        &self,
        index: usize,
        mesh: &RenderMesh,
    ) -> Result<(), gpu::DeviceError> {
        let bindless = match self.bindless {
            Some(buffer) => buffer,
            None => return Ok(()),
        };
        let device = &*self.device;
        let addresses = MeshAddresses::new(device, mesh)?;
        let staging = device.create_buffer(gpu::BufferDesc {
            name: "mesh addresses staging",
            size: MeshAddresses::SIZE,
            memory: gpu::Memory::Upload,
            usage: gpu::BufferUsage::TRANSFER_SRC,
        })?;
        let target = bindless.at(index as u64 * MeshAddresses::SIZE);
        let result = self.upload_mesh_addresses(staging, target, &addresses);
        device.destroy_buffer(staging);
        result
    }

    fn upload_mesh_addresses(
        &self,
        staging: gpu::Buffer,
        target: gpu::BufferPiece,
        addresses: &MeshAddresses,
    ) -> Result<(), gpu::DeviceError> {
        let device = &*self.device;
        device.write_buffer(staging.into(), bytemuck::bytes_of(addresses))?;
        let pool = self.pools.current();
        let mut encoder = pool.acquire(device, gpu::QueueFamily::Graphics, "mesh addresses");
        encoder.start();
        {
            let mut pass = encoder.transfer();
            pass.copy_buffer_to_buffer(staging.into(), target, MeshAddresses::SIZE);
            pass.buffer_barrier(
                target,
                MeshAddresses::SIZE,
                (gpu::AccessFlags::TRANSFER_WRITE, gpu::AccessFlags::SHADER_READ),
                (gpu::PipelineStages::TRANSFER, gpu::PipelineStages::VERTEX_SHADER),
            );
        }
        encoder.finish();
        let result = device.submit(&mut encoder, gpu::SubmitDesc::default());
        self.pools.retire(pool.thread(), encoder);
        let sync_point = result?;
        if !device.wait_for(&sync_point, !0) {
            log::warn!("Timed out uploading mesh addresses");
        }
        Ok(())
    }
}

/// Owner of every registered mesh and of their uploads to each device.
pub struct MeshCache {
    weak: Weak<Self>,
    scheduler: Scheduler,
    store: Arc<dyn AssetStore>,
    meshes: Arena<StaticMeshInfo>,
    registry: Registry<MeshIdentifier>,
    /// Meshes with a CPU load in flight.
    loading_meshes: AtomicBitSet,
    /// Meshes with a hot reload in flight.
    reloading_meshes: AtomicBitSet,
    devices: RwLock<HashMap<gpu::DeviceId, Arc<DeviceMeshes>>>,
    next_listener: AtomicU64,
}

impl MeshCache {
    pub fn new(scheduler: &Scheduler, store: Arc<dyn AssetStore>, max_meshes: usize) -> Arc<Self> {
        log::info!("Creating mesh cache for {} meshes", max_meshes);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            scheduler: scheduler.clone(),
            store,
            meshes: Arena::new(max_meshes),
            registry: Registry::default(),
            loading_meshes: AtomicBitSet::new(max_meshes),
            reloading_meshes: AtomicBitSet::new(max_meshes),
            devices: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    pub fn max_meshes(&self) -> usize {
        self.meshes.capacity()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn create_internal(
        &self,
        guid: AssetGuid,
        flags: StaticMeshFlags,
        master: Option<MeshIdentifier>,
        loading_callback: LoadingCallback,
    ) -> Option<MeshIdentifier> {
        let identifier = self.meshes.alloc(StaticMeshInfo {
            guid,
            flags,
            master,
            loading_callback,
            state: AtomicU8::new(MeshState::Unloaded as u8),
            geometry: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
        });
        match identifier {
            Some(identifier) => log::debug!("Registered mesh {:?} as {:?}", guid, identifier),
            None => log::error!(
                "Unable to register mesh {:?}, all {} slots are taken",
                guid,
                self.meshes.capacity()
            ),
        }
        identifier
    }

    /// Register a mesh loaded by a custom callback, under a fresh GUID.
    pub fn create(
        &self,
        loading_callback: impl Fn(MeshIdentifier) -> JobBatch + Send + Sync + 'static,
        flags: StaticMeshFlags,
    ) -> MeshIdentifier {
        let guid = AssetGuid::generate();
        match self.create_internal(guid, flags, None, Arc::new(loading_callback)) {
            Some(identifier) => {
                self.registry.insert(guid, identifier);
                identifier
            }
            None => MeshIdentifier::INVALID,
        }
    }

    fn store_callback(&self, guid: AssetGuid) -> LoadingCallback {
        let weak = self.weak.clone();
        let store = Arc::clone(&self.store);
        let scheduler = self.scheduler.clone();
        Arc::new(move |identifier| {
            scheduler.job(
                "load static mesh",
                JobPriority::LoadMeshData,
                LoadStaticMeshFromStoreJob::new(weak.clone(), Arc::clone(&store), guid, identifier),
            )
        })
    }

    /// Register a mesh read from the asset store.
    pub fn register_asset(&self, guid: AssetGuid) -> MeshIdentifier {
        let identifier = match self.create_internal(
            guid,
            StaticMeshFlags::empty(),
            None,
            self.store_callback(guid),
        ) {
            Some(identifier) => identifier,
            None => return MeshIdentifier::INVALID,
        };
        if let Some(previous) = self.registry.insert(guid, identifier) {
            log::warn!("Asset {} was already registered as {:?}", guid, previous);
        }
        identifier
    }

    pub fn find_or_register_asset(&self, guid: AssetGuid) -> MeshIdentifier {
        self.registry
            .find_or_try_insert_with(guid, || {
                self.create_internal(
                    guid,
                    StaticMeshFlags::empty(),
                    None,
                    self.store_callback(guid),
                )
            })
            .unwrap_or(MeshIdentifier::INVALID)
    }

    /// Register a mesh whose geometry comes from `generator`, loaded synchronously.
    pub fn find_or_register_procedural(
        &self,
        guid: AssetGuid,
        generator: impl Fn() -> StaticObject + Send + Sync + 'static,
    ) -> MeshIdentifier {
        let weak = self.weak.clone();
        let callback: LoadingCallback = Arc::new(move |identifier| {
            if let Some(cache) = weak.upgrade() {
                cache.on_mesh_loaded(identifier, generator());
            }
            JobBatch::default()
        });
        self.registry
            .find_or_try_insert_with(guid, || {
                self.create_internal(guid, StaticMeshFlags::empty(), None, callback)
            })
            .unwrap_or(MeshIdentifier::INVALID)
    }

    pub fn find_identifier(&self, guid: AssetGuid) -> Option<MeshIdentifier> {
        self.registry.find(guid)
    }

    /// Register a mesh that copies the geometry of `master` once it's loaded.
    pub fn clone_mesh(&self, master: MeshIdentifier, flags: StaticMeshFlags) -> MeshIdentifier {
        let weak = self.weak.clone();
        let scheduler = self.scheduler.clone();
        let callback: LoadingCallback = Arc::new(move |identifier| {
            let cache = match weak.upgrade() {
                Some(cache) => cache,
                None => return JobBatch::default(),
            };
            let gate = scheduler.gate("master mesh loaded");
            let master_batch = {
                let gate = Arc::clone(&gate);
                cache.try_load_static_mesh(
                    master,
                    Box::new(move |_, _| {
                        gate.open();
                    }),
                )
            };
            master_batch.then(scheduler.after(&gate)).then(scheduler.job(
                "clone mesh",
                JobPriority::CloneMeshData,
                CloneMasterMeshJob::new(weak.clone(), identifier, master),
            ))
        });
        let guid = AssetGuid::generate();
        match self.create_internal(guid, flags | StaticMeshFlags::IS_CLONE, Some(master), callback)
        {
            Some(identifier) => {
                self.registry.insert(guid, identifier);
                identifier
            }
            None => MeshIdentifier::INVALID,
        }
    }

    /// Unregister a mesh and release its resources on every device.
    ///
    /// Jobs in flight for it find the identifier gone and drop their results.
    pub fn remove(&self, identifier: MeshIdentifier) -> bool {
        let info = match self.meshes.dealloc(identifier) {
            Some(info) => info,
            None => return false,
        };
        let index = identifier.index();
        self.loading_meshes.clear(index);
        self.reloading_meshes.clear(index);

        for device in self.devices.read().values() {
            if let Some((_, mesh)) = device
                .render_meshes
                .take_if(index, |&(owner, _)| owner == identifier)
            {
                if let Err(e) = device.write_mesh_addresses(index, &RenderMesh::INVALID) {
                    log::warn!("Unable to reset mesh addresses: {}", e);
                }
                mesh.destroy(&*device.device);
            }
            device.loading.clear(index);
            device.requesters.write().remove(&identifier);
        }

        if self.registry.find(info.guid) == Some(identifier) {
            self.registry.remove(info.guid);
        }
        log::debug!("Removed mesh {:?}", identifier);

        let listeners = mem::take(&mut *info.listeners.lock());
        for listener in listeners {
            listener(identifier, None);
        }
        true
    }

    /// Request the CPU geometry of a mesh.
    ///
    /// The listener fires right away if the mesh is loaded or failed,
    /// otherwise once the load finishes. The returned batch is non-empty
    /// only for the request that started the load.
    pub fn try_load_static_mesh(
        &self,
        identifier: MeshIdentifier,
        listener: StaticMeshListener,
    ) -> JobBatch {
        let callback = {
            let info = match self.meshes.get(identifier) {
                Some(info) => info,
                None => {
                    listener(identifier, None);
                    return JobBatch::default();
                }
            };
            let ready = {
                let mut listeners = info.listeners.lock();
                if info.state() == MeshState::Unloaded {
                    listeners.push(listener);
                    None
                } else {
                    Some(listener)
                }
            };
            if let Some(listener) = ready {
                let geometry = info.geometry.read().clone();
                drop(info);
                listener(identifier, geometry);
                return JobBatch::default();
            }
            if !self.loading_meshes.set(identifier.index()) {
                return JobBatch::default();
            }
            Arc::clone(&info.loading_callback)
        };
        log::debug!("Loading static mesh {:?}", identifier);
        callback(identifier)
    }

    fn take_listeners(
        &self,
        identifier: MeshIdentifier,
        state: MeshState,
        geometry: Option<Arc<StaticObject>>,
    ) -> Option<Vec<StaticMeshListener>> {
        let info = self.meshes.get(identifier)?;
        *info.geometry.write() = geometry;
        let mut listeners = info.listeners.lock();
        info.state.store(state as u8, Ordering::Release);
        self.loading_meshes.clear(identifier.index());
        Some(mem::take(&mut *listeners))
    }

    /// Store the geometry of a mesh and notify its listeners.
    pub fn on_mesh_loaded(&self, identifier: MeshIdentifier, object: StaticObject) {
        if !object.is_valid() {
            log::warn!("Mesh {:?} was loaded without geometry", identifier);
            self.on_mesh_loading_failed(identifier);
            return;
        }
        let geometry = Arc::new(object);
        let listeners =
            match self.take_listeners(identifier, MeshState::Loaded, Some(Arc::clone(&geometry))) {
                Some(listeners) => listeners,
                None => {
                    log::debug!("Mesh {:?} was removed while loading", identifier);
                    return;
                }
            };
        log::debug!(
            "Loaded mesh {:?} with {} vertices",
            identifier,
            geometry.vertex_count()
        );
        for listener in listeners {
            listener(identifier, Some(Arc::clone(&geometry)));
        }
    }

    pub fn on_mesh_loading_failed(&self, identifier: MeshIdentifier) {
        log::warn!("Failed to load mesh {:?}", identifier);
        if let Some(listeners) = self.take_listeners(identifier, MeshState::Failed, None) {
            for listener in listeners {
                listener(identifier, None);
            }
        }
    }

    fn device_meshes(&self, device: gpu::DeviceId) -> Option<Arc<DeviceMeshes>> {
        self.devices.read().get(&device).cloned()
    }

    fn is_current(&self, device: &Arc<DeviceMeshes>) -> bool {
        self.devices
            .read()
            .get(&device.device.id())
            .map_or(false, |current| Arc::ptr_eq(current, device))
    }

    fn render_mesh_job(
        self: &Arc<Self>,
        device: &Arc<DeviceMeshes>,
        identifier: MeshIdentifier,
    ) -> JobBatch {
        self.scheduler.job(
            "load render mesh",
            JobPriority::CreateRenderMesh,
            LoadRenderMeshJob::new(Arc::clone(self), Arc::clone(device), identifier),
        )
    }

    /// CPU load, then the upload to `device` once the geometry is there.
    fn load_render_mesh_data(
        self: &Arc<Self>,
        device: &Arc<DeviceMeshes>,
        identifier: MeshIdentifier,
    ) -> JobBatch {
        let gate = self.scheduler.gate("static mesh loaded");
        let cpu = {
            let gate = Arc::clone(&gate);
            self.try_load_static_mesh(
                identifier,
                Box::new(move |_, _| {
                    gate.open();
                }),
            )
        };
        let loaded = self.scheduler.after(&gate);
        let gpu = if device.has_requesters(identifier) && device.claim_first_upload(identifier) {
            self.render_mesh_job(device, identifier)
        } else {
            JobBatch::default()
        };
        cpu.then(loaded).then(gpu)
    }

    /// Request the render mesh of `identifier` on a device.
    ///
    /// The listener stays registered and fires on every publish, including
    /// reloads, until it is removed with [`Self::remove_render_mesh_listener`].
    pub fn try_load_render_mesh(
        self: &Arc<Self>,
        device: gpu::DeviceId,
        identifier: MeshIdentifier,
        listener: RenderMeshListener,
        flags: MeshLoadFlags,
    ) -> (ListenerId, JobBatch) {
        let listener_id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let device = match self.device_meshes(device) {
            Some(device) => device,
            None => {
                log::warn!("Mesh {:?} requested on unknown {:?}", identifier, device);
                return (listener_id, JobBatch::default());
            }
        };
        if !self.meshes.contains(identifier) {
            return (listener_id, JobBatch::default());
        }
        // the dummy goes out before registering, so it can't overtake a publish
        if flags.contains(MeshLoadFlags::LOAD_DUMMY) && device.find(identifier).is_none() {
            listener(identifier, &device.dummy, LoadedMeshFlags::IS_DUMMY);
        }
        device.add_requester(identifier, listener_id, Arc::clone(&listener));

        if let Some(mesh) = device.find(identifier) {
            listener(identifier, &mesh, LoadedMeshFlags::empty());
            return (listener_id, JobBatch::default());
        }

        let batch = if !self.is_mesh_loaded(identifier) {
            self.load_render_mesh_data(&device, identifier)
        } else if device.claim_first_upload(identifier) {
            self.render_mesh_job(&device, identifier)
        } else {
            // an upload in flight or a racing publish notifies the listener
            JobBatch::default()
        };
        (listener_id, batch)
    }

    pub fn remove_render_mesh_listener(
        &self,
        device: gpu::DeviceId,
        identifier: MeshIdentifier,
        listener_id: ListenerId,
    ) -> bool {
        let device = match self.device_meshes(device) {
            Some(device) => device,
            None => return false,
        };
        let requesters = device.requesters.read();
        let bucket = match requesters.get(&identifier) {
            Some(bucket) => bucket,
            None => return false,
        };
        let mut listeners = bucket.lock();
        match listeners.iter().position(|&(id, _)| id == listener_id) {
            Some(position) => {
                listeners.remove(position);
                true
            }
            None => false,
        }
    }

    fn publish(
        &self,
        device: &Arc<DeviceMeshes>,
        identifier: MeshIdentifier,
        mesh: RenderMesh,
    ) -> Published {
        let index = identifier.index();
        let previous = {
            let devices = self.devices.read();
            let is_current = devices
                .get(&device.device.id())
                .map_or(false, |current| Arc::ptr_eq(current, device));
            // holding the entry keeps `remove` from racing the swap
            let _info = match self.meshes.get(identifier) {
                Some(info) if is_current => info,
                _ => return Published::Removed(mesh),
            };
            let previous = device.render_meshes.replace(index, Some((identifier, mesh)));
            device.loading.clear(index);
            previous
        };

        if let Err(e) = device.write_mesh_addresses(index, &mesh) {
            log::warn!("Unable to write addresses of mesh {:?}: {}", identifier, e);
        }

        // listeners may request or remove meshes, so no lock is held while they run
        let bucket = device.requesters.read().get(&identifier).cloned();
        if let Some(bucket) = bucket {
            let listeners = bucket
                .lock()
                .iter()
                .map(|&(_, ref listener)| Arc::clone(listener))
                .collect::<Vec<_>>();
            for listener in listeners {
                listener(identifier, &mesh, LoadedMeshFlags::empty());
            }
        }

        match previous {
            Some((_, previous)) => Published::Replaced(previous),
            None => Published::First,
        }
    }

    /// Store a finished render mesh and notify the requesters.
    ///
    /// The caller owns whatever mesh is handed back in the result.
    pub fn on_render_mesh_loaded(
        &self,
        device: gpu::DeviceId,
        identifier: MeshIdentifier,
        mesh: RenderMesh,
    ) -> Published {
        match self.device_meshes(device) {
            Some(device) => self.publish(&device, identifier, mesh),
            None => Published::Removed(mesh),
        }
    }

    /// Load the mesh again from its source and re-upload it to every
    /// device that requested it. The old render meshes stay published
    /// until the new ones replace them.
    ///
    /// A mesh that failed to load goes back to unloaded and gets another
    /// attempt. Meshes that were never requested are left alone.
    pub fn reload_mesh(self: &Arc<Self>, identifier: MeshIdentifier) -> JobBatch {
        let index = identifier.index();
        let cpu = {
            let info = match self.meshes.get(identifier) {
                Some(info) => info,
                None => return JobBatch::default(),
            };
            if info.state() == MeshState::Unloaded {
                return JobBatch::default();
            }
            if self.loading_meshes.set(index) {
                if info.state() == MeshState::Failed {
                    // new listeners queue up behind the retry
                    let _listeners = info.listeners.lock();
                    info.state.store(MeshState::Unloaded as u8, Ordering::Release);
                }
                let callback = Arc::clone(&info.loading_callback);
                drop(info);
                log::debug!("Reloading static mesh {:?}", identifier);
                callback(identifier)
            } else {
                JobBatch::default()
            }
        };

        let devices = self.devices.read().values().cloned().collect::<Vec<_>>();
        let mut gpu = JobBatch::default();
        for device in devices.iter() {
            if device.has_requesters(identifier) && device.loading.set(index) {
                gpu = gpu.merge(self.render_mesh_job(device, identifier));
            }
        }
        cpu.then(gpu)
    }

    /// Upload the current geometry again to one device.
    pub fn reload_render_mesh(
        self: &Arc<Self>,
        device: gpu::DeviceId,
        identifier: MeshIdentifier,
    ) -> JobBatch {
        match self.device_meshes(device) {
            Some(ref device)
                if self.is_mesh_loaded(identifier)
                    && device.has_requesters(identifier)
                    && device.loading.set(identifier.index()) =>
            {
                self.render_mesh_job(device, identifier)
            }
            _ => JobBatch::default(),
        }
    }

    /// Hot reload entry point for a changed asset.
    pub fn on_asset_modified(self: &Arc<Self>, guid: AssetGuid) -> JobBatch {
        let identifier = match self.registry.find(guid) {
            Some(identifier) => identifier,
            None => return JobBatch::default(),
        };
        let index = identifier.index();
        if !self.reloading_meshes.set(index) {
            log::debug!("Mesh {:?} is already reloading", identifier);
            return JobBatch::default();
        }
        log::info!("Asset {} was modified, reloading {:?}", guid, identifier);
        let weak = self.weak.clone();
        self.reload_mesh(identifier).then(self.scheduler.callback(
            "mesh reloaded",
            JobPriority::FileChangeDetection,
            move || {
                if let Some(cache) = weak.upgrade() {
                    cache.reloading_meshes.clear(index);
                }
            },
        ))
    }

    pub fn mesh_info<R>(
        &self,
        identifier: MeshIdentifier,
        fun: impl FnOnce(&StaticMeshInfo) -> R,
    ) -> Option<R> {
        self.meshes.get(identifier).map(|info| fun(&info))
    }

    pub fn find_mesh(&self, identifier: MeshIdentifier) -> Option<Arc<StaticObject>> {
        self.meshes.get(identifier)?.geometry.read().clone()
    }

    pub fn is_mesh_loaded(&self, identifier: MeshIdentifier) -> bool {
        self.mesh_info(identifier, StaticMeshInfo::state) == Some(MeshState::Loaded)
    }

    pub fn did_loading_fail(&self, identifier: MeshIdentifier) -> bool {
        self.mesh_info(identifier, StaticMeshInfo::state) == Some(MeshState::Failed)
    }

    pub fn is_loading_static_mesh(&self, identifier: MeshIdentifier) -> bool {
        self.meshes.contains(identifier) && self.loading_meshes.is_set(identifier.index())
    }

    pub fn find_render_mesh(
        &self,
        device: gpu::DeviceId,
        identifier: MeshIdentifier,
    ) -> Option<RenderMesh> {
        self.device_meshes(device)?.find(identifier)
    }

    pub fn dummy_mesh(&self, device: gpu::DeviceId) -> Option<RenderMesh> {
        self.device_meshes(device).map(|device| device.dummy)
    }

    /// Storage buffer of [`MeshAddresses`], one entry per identifier index.
    pub fn mesh_addresses_buffer(&self, device: gpu::DeviceId) -> Option<gpu::Buffer> {
        self.device_meshes(device)?.bindless
    }

    /// Set up the per-device tables and upload the dummy mesh.
    pub fn on_device_created(&self, device: Arc<dyn gpu::Device>) -> Result<(), gpu::DeviceError> {
        profiling::scope!("Mesh cache device setup");
        let id = device.id();
        if self.devices.read().contains_key(&id) {
            log::warn!("Device {:?} is already known, replacing it", id);
            self.on_device_destroyed(id);
        }

        let max_meshes = self.meshes.capacity();
        let pools = CommandPools::new();
        let dummy = Self::create_dummy(&*device, &pools)?;
        let bindless = if device.features().contains(gpu::DeviceFeatures::BINDLESS) {
            match device.create_buffer(gpu::BufferDesc {
                name: "mesh addresses",
                size: max_meshes as u64 * MeshAddresses::SIZE,
                memory: gpu::Memory::Device,
                usage: gpu::BufferUsage::STORAGE | gpu::BufferUsage::TRANSFER_DST,
            }) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    dummy.destroy(&*device);
                    pools.drain(&*device);
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Mesh cache is ready on {:?} '{}', bindless: {}",
            id,
            device.name(),
            bindless.is_some()
        );
        let meshes = DeviceMeshes {
            device,
            render_meshes: Table::new(max_meshes),
            loading: AtomicBitSet::new(max_meshes),
            requesters: RwLock::new(HashMap::new()),
            dummy,
            bindless,
            pools,
        };
        self.devices.write().insert(id, Arc::new(meshes));
        Ok(())
    }

    fn create_dummy(
        device: &dyn gpu::Device,
        pools: &CommandPools,
    ) -> Result<RenderMesh, gpu::DeviceError> {
        let pool = pools.current();
        let mut encoders = pool.acquire_pair(device, "dummy mesh");
        encoders.start();
        let (dummy, staging) = RenderMesh::dummy(device, &mut encoders);
        encoders.finish();
        let result = if dummy.is_valid() {
            submit_upload(device, &mut encoders, None).map(|sync_point| {
                device.wait_for(&sync_point, !0);
            })
        } else {
            Err(gpu::DeviceError::NotSupported("dummy mesh allocation"))
        };
        if let Some(staging) = staging {
            device.destroy_buffer(staging);
        }
        pools.retire_pair(pool.thread(), encoders);
        match result {
            Ok(()) => Ok(dummy),
            Err(e) => {
                dummy.destroy(device);
                pools.drain(device);
                Err(e)
            }
        }
    }

    /// Release every resource the cache holds on a device.
    pub fn on_device_destroyed(&self, id: gpu::DeviceId) {
        let meshes = match self.devices.write().remove(&id) {
            Some(meshes) => meshes,
            None => return,
        };
        log::info!("Releasing meshes of {:?}", id);
        let device = &*meshes.device;
        if let Some(buffer) = meshes.bindless {
            device.destroy_buffer(buffer);
        }
        let mut count = 0;
        meshes.render_meshes.drain(|_, (_, mesh)| {
            mesh.destroy(device);
            count += 1;
        });
        log::debug!("Destroyed {} render meshes", count);
        meshes.dummy.destroy(device);
        meshes.requesters.write().clear();
        meshes.loading.clear_all();
        meshes.pools.drain(device);
    }

    /// Release every device and drop the registered meshes.
    pub fn destroy(&self) {
        let ids = self.devices.read().keys().cloned().collect::<Vec<_>>();
        for id in ids {
            self.on_device_destroyed(id);
        }
        let mut identifiers = Vec::new();
        self.meshes.for_each(|identifier, _| identifiers.push(identifier));
        for identifier in identifiers {
            self.remove(identifier);
        }
    }
}
