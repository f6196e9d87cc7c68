use ingot_asset::{
    AssetGuid, AssetStore, JobBatch, JobPriority, LoadCallback, MemoryStore, Scheduler,
};
use ingot_graphics::{self as gpu, soft, ResourceDevice as _};
use ingot_render::{
    primitives, LoadedMeshFlags, MeshAddresses, MeshCache, MeshIdentifier, MeshLoadFlags,
    RenderMesh, RenderMeshListener, StaticMeshFlags, StaticObject,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

const DEVICE: gpu::DeviceId = gpu::DeviceId(0);

struct Harness {
    cache: Arc<MeshCache>,
    store: Arc<MemoryStore>,
    scheduler: Scheduler,
    _workers: Vec<choir::WorkerHandle>,
}

fn harness(max_meshes: usize) -> Harness {
    let _ = env_logger::try_init();
    let choir = choir::Choir::new();
    let workers = (0..3)
        .map(|i| choir.add_worker(&format!("worker{}", i)))
        .collect();
    let scheduler = Scheduler::new(&choir);
    let store = Arc::new(MemoryStore::default());
    let cache = MeshCache::new(&scheduler, Arc::clone(&store) as _, max_meshes);
    Harness {
        cache,
        store,
        scheduler,
        _workers: workers,
    }
}

impl Harness {
    fn add_device(&self, desc: gpu::DeviceDesc) -> Arc<soft::Context> {
        let device = Arc::new(soft::Context::new(DEVICE, desc));
        let dyn_device: Arc<dyn gpu::Device> = Arc::clone(&device) as _;
        self.cache.on_device_created(dyn_device).unwrap();
        device
    }

    fn request(
        &self,
        identifier: MeshIdentifier,
        received: &Received,
        flags: MeshLoadFlags,
    ) -> JobBatch {
        let (_, batch) =
            self.cache
                .try_load_render_mesh(DEVICE, identifier, received.listener(), flags);
        batch
    }
}

#[derive(Clone, Default)]
struct Received(Arc<Mutex<Vec<(RenderMesh, LoadedMeshFlags)>>>);

impl Received {
    fn listener(&self) -> RenderMeshListener {
        let list = Arc::clone(&self.0);
        Arc::new(move |_, mesh: &RenderMesh, flags| list.lock().unwrap().push((*mesh, flags)))
    }

    fn take(&self) -> Vec<(RenderMesh, LoadedMeshFlags)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

fn read_indices(device: &soft::Context, mesh: &RenderMesh) -> Vec<u32> {
    let size = mesh.index_count as u64 * 4;
    let bytes = device
        .read_buffer(mesh.index_buffer.unwrap().into(), size)
        .unwrap();
    bytemuck::pod_collect_to_vec(&bytes)
}

#[test]
fn procedural_box_end_to_end() {
    let h = harness(64);
    let device = h.add_device(gpu::DeviceDesc::default());
    let meshes = h.cache.create_procedural_meshes();
    assert_eq!(h.cache.create_procedural_meshes().cube, meshes.cube);
    assert_eq!(h.cache.find_identifier(primitives::BOX_GUID), Some(meshes.cube));

    let received = Received::default();
    h.request(meshes.cube, &received, MeshLoadFlags::LOAD_DUMMY)
        .wait();

    let list = received.take();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0], (h.cache.dummy_mesh(DEVICE).unwrap(), LoadedMeshFlags::IS_DUMMY));
    let (mesh, flags) = list[1];
    assert_eq!(flags, LoadedMeshFlags::empty());
    assert!(mesh.is_valid());
    assert_eq!((mesh.vertex_count, mesh.index_count), (24, 36));
    assert_eq!(h.cache.find_render_mesh(DEVICE, meshes.cube), Some(mesh));

    let geometry = h.cache.find_mesh(meshes.cube).unwrap();
    assert_eq!(read_indices(&device, &mesh), geometry.indices());
    let vertex_bytes = device
        .read_buffer(mesh.vertex_buffer.unwrap().into(), geometry.vertex_data().len() as u64)
        .unwrap();
    assert_eq!(vertex_bytes, geometry.vertex_data());

    // a late request is answered from the published slot
    let late = Received::default();
    assert!(h.request(meshes.cube, &late, MeshLoadFlags::LOAD_DUMMY).is_empty());
    assert_eq!(late.take(), [(mesh, LoadedMeshFlags::empty())]);

    h.cache.on_device_destroyed(DEVICE);
    let stats = device.stats();
    assert_eq!((stats.live_buffers, stats.live_encoders, stats.memory_used), (0, 0, 0));
    assert_eq!(h.cache.find_render_mesh(DEVICE, meshes.cube), None);
}

#[test]
fn concurrent_requests_share_one_upload() {
    let h = harness(64);
    let device = h.add_device(gpu::DeviceDesc::default());
    let guid = AssetGuid::generate();
    h.store
        .insert(guid, primitives::sphere(1.0, 8, 8).encode());
    let identifier = h.cache.find_or_register_asset(guid);
    assert_eq!(h.cache.find_or_register_asset(guid), identifier);
    let submissions_before = device.stats().submissions;

    let received = Received::default();
    let cache = &h.cache;
    thread::scope(|scope| {
        for _ in 0..8 {
            let listener = received.listener();
            scope.spawn(move || {
                let (_, batch) = cache.try_load_render_mesh(
                    DEVICE,
                    identifier,
                    listener,
                    MeshLoadFlags::empty(),
                );
                batch.wait();
            });
        }
    });

    let list = received.take();
    assert!(list.len() >= 8);
    let mesh = list[0].0;
    assert!(mesh.is_valid());
    assert!(list.iter().all(|&(m, flags)| m == mesh && flags.is_empty()));
    assert_eq!(device.stats().submissions - submissions_before, 1);
}

#[test]
fn one_static_load_in_flight() {
    let h = harness(16);
    let calls = Arc::new(AtomicUsize::new(0));
    let weak = Arc::downgrade(&h.cache);
    let scheduler = h.scheduler.clone();
    let calls_clone = Arc::clone(&calls);
    let identifier = h.cache.create(
        move |identifier| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let weak = weak.clone();
            scheduler.callback("generate", JobPriority::LoadMeshData, move || {
                thread::sleep(Duration::from_millis(20));
                if let Some(cache) = weak.upgrade() {
                    cache.on_mesh_loaded(identifier, primitives::triangle());
                }
            })
        },
        StaticMeshFlags::ALLOW_CPU_VERTEX_ACCESS,
    );

    let (sender, receiver) = mpsc::channel();
    let mut batch = JobBatch::default();
    for _ in 0..10 {
        let sender = sender.clone();
        batch = batch.merge(h.cache.try_load_static_mesh(
            identifier,
            Box::new(move |_, geometry| sender.send(geometry.is_some()).unwrap()),
        ));
        assert!(h.cache.is_loading_static_mesh(identifier));
    }
    batch.wait();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(receiver.try_iter().collect::<Vec<_>>(), [true; 10]);
    assert!(h.cache.is_mesh_loaded(identifier));
    assert!(!h.cache.is_loading_static_mesh(identifier));
    assert_eq!(
        h.cache.mesh_info(identifier, |info| info.flags()),
        Some(StaticMeshFlags::ALLOW_CPU_VERTEX_ACCESS)
    );
}

#[test]
fn dummy_for_missing_asset() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc::default());
    let identifier = h.cache.register_asset(AssetGuid::generate());

    let received = Received::default();
    h.request(identifier, &received, MeshLoadFlags::default())
        .wait();

    let dummy = h.cache.dummy_mesh(DEVICE).unwrap();
    assert_eq!(received.take(), [(dummy, LoadedMeshFlags::IS_DUMMY)]);
    assert!(dummy.is_valid());
    assert_eq!(read_indices(&device, &dummy), [0, 1, 2, 2, 3, 0]);
    assert!(h.cache.did_loading_fail(identifier));
    assert_eq!(h.cache.find_render_mesh(DEVICE, identifier), None);
    assert_eq!(h.cache.find_mesh(identifier), None);
}

#[test]
fn newer_version_fails_to_load() {
    let h = harness(16);
    let guid = AssetGuid::generate();
    let mut bytes = primitives::triangle().encode();
    bytes[..2].copy_from_slice(&1u16.to_le_bytes());
    h.store.insert(guid, bytes);
    let identifier = h.cache.register_asset(guid);

    let (sender, receiver) = mpsc::channel();
    h.cache
        .try_load_static_mesh(
            identifier,
            Box::new(move |_, geometry| sender.send(geometry).unwrap()),
        )
        .wait();
    assert!(receiver.recv().unwrap().is_none());
    assert!(h.cache.did_loading_fail(identifier));
    assert!(!h.cache.is_mesh_loaded(identifier));

    // failed meshes answer new listeners right away
    let (sender, receiver) = mpsc::channel();
    let batch = h.cache.try_load_static_mesh(
        identifier,
        Box::new(move |_, geometry| sender.send(geometry).unwrap()),
    );
    assert!(batch.is_empty());
    assert!(receiver.try_recv().unwrap().is_none());
}

#[test]
fn reload_publishes_before_destroying() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc::default());
    let guid = AssetGuid::generate();
    h.store.insert(guid, primitives::plane(glam::Vec2::ONE).encode());
    let identifier = h.cache.register_asset(guid);

    // every delivery must find the previously delivered mesh still alive
    let deliveries = Arc::new(Mutex::new(Vec::<RenderMesh>::new()));
    let violations = Arc::new(AtomicUsize::new(0));
    let listener: RenderMeshListener = {
        let deliveries = Arc::clone(&deliveries);
        let violations = Arc::clone(&violations);
        let device = Arc::clone(&device);
        Arc::new(move |_, mesh: &RenderMesh, _| {
            let mut list = deliveries.lock().unwrap();
            if let Some(previous) = list.last() {
                if device.read_buffer(previous.vertex_buffer.unwrap().into(), 4).is_err() {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
            }
            list.push(*mesh);
        })
    };
    let (_, batch) =
        h.cache
            .try_load_render_mesh(DEVICE, identifier, listener, MeshLoadFlags::empty());
    batch.wait();
    let first = h.cache.find_render_mesh(DEVICE, identifier).unwrap();
    assert_eq!(first.vertex_count, 4);

    h.store.insert(guid, primitives::triangle().encode());
    let reload = h.cache.on_asset_modified(guid);
    assert!(!reload.is_empty());
    assert!(h.cache.on_asset_modified(guid).is_empty());
    reload.wait();

    let second = h.cache.find_render_mesh(DEVICE, identifier).unwrap();
    assert_ne!(second, first);
    assert_eq!((second.vertex_count, second.index_count), (3, 3));
    assert_eq!(h.cache.find_mesh(identifier).unwrap().vertex_count(), 3);
    assert_eq!(*deliveries.lock().unwrap(), [first, second]);
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert!(device
        .read_buffer(first.vertex_buffer.unwrap().into(), 4)
        .is_err());

    // the reload guard is released once the batch is done
    let again = h.cache.on_asset_modified(guid);
    assert!(!again.is_empty());
    again.wait();

    let upload = h.cache.reload_render_mesh(DEVICE, identifier);
    assert!(!upload.is_empty());
    upload.wait();
    assert_eq!(deliveries.lock().unwrap().len(), 4);
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn removal_releases_everything() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc::default());
    let baseline = device.stats();
    let meshes = h.cache.create_procedural_meshes();

    let received = Received::default();
    h.request(meshes.cube, &received, MeshLoadFlags::empty())
        .wait();
    assert_eq!(device.stats().live_buffers, baseline.live_buffers + 2);

    assert!(h.cache.remove(meshes.cube));
    assert!(!h.cache.remove(meshes.cube));
    assert_eq!(device.stats().live_buffers, baseline.live_buffers);
    assert_eq!(device.stats().memory_used, baseline.memory_used);
    assert_eq!(h.cache.find_render_mesh(DEVICE, meshes.cube), None);
    assert_eq!(h.cache.find_identifier(primitives::BOX_GUID), None);
    assert!(!h.cache.is_mesh_loaded(meshes.cube));

    // the slot is recycled, the stale identifier stays dead
    let cube = h.cache.create_procedural_meshes().cube;
    assert_eq!(cube.index(), meshes.cube.index());
    assert_ne!(cube, meshes.cube);
    assert_eq!(h.cache.find_mesh(meshes.cube), None);
}

#[test]
fn removal_during_load() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc::default());
    let baseline = device.stats();
    let guid = AssetGuid::generate();
    h.store.insert(guid, primitives::cylinder(1.0, 1.0, 8).encode());
    let identifier = h.cache.register_asset(guid);

    let received = Received::default();
    let batch = h.request(identifier, &received, MeshLoadFlags::empty());
    assert!(h.cache.remove(identifier));
    batch.wait();

    assert!(received.take().is_empty());
    assert_eq!(device.stats().live_buffers, baseline.live_buffers);
    assert_eq!(h.cache.find_identifier(guid), None);
}

/// Holds every read until the test lets it through.
struct GatedStore {
    inner: MemoryStore,
    started: Mutex<mpsc::Sender<AssetGuid>>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl AssetStore for GatedStore {
    fn load_binary(&self, guid: AssetGuid, priority: JobPriority, callback: LoadCallback) {
        let _ = self.started.lock().unwrap().send(guid);
        let _ = self.gate.lock().unwrap().recv();
        self.inner.load_binary(guid, priority, callback);
    }
}

#[test]
fn removal_while_reading_from_the_store() {
    let h = harness(16);
    let (started_sender, started) = mpsc::channel();
    let (release, gate) = mpsc::channel();
    let store = Arc::new(GatedStore {
        inner: MemoryStore::default(),
        started: Mutex::new(started_sender),
        gate: Mutex::new(gate),
    });
    let guid = AssetGuid::generate();
    store
        .inner
        .insert(guid, primitives::sphere(1.0, 6, 6).encode());
    let cache = MeshCache::new(&h.scheduler, Arc::clone(&store) as _, 16);
    let device = Arc::new(soft::Context::new(DEVICE, gpu::DeviceDesc::default()));
    let dyn_device: Arc<dyn gpu::Device> = Arc::clone(&device) as _;
    cache.on_device_created(dyn_device).unwrap();
    let baseline = device.stats();
    let identifier = cache.register_asset(guid);

    let received = Received::default();
    let (_, batch) =
        cache.try_load_render_mesh(DEVICE, identifier, received.listener(), MeshLoadFlags::empty());
    let task = batch.queue().unwrap();
    assert_eq!(started.recv_timeout(Duration::from_secs(10)).unwrap(), guid);
    assert!(cache.is_loading_static_mesh(identifier));

    assert!(cache.remove(identifier));
    release.send(()).unwrap();
    let _ = task.join();

    assert!(received.take().is_empty());
    assert!(!cache.is_mesh_loaded(identifier));
    assert_eq!(cache.find_render_mesh(DEVICE, identifier), None);
    assert_eq!(cache.find_identifier(guid), None);
    assert_eq!(device.stats().live_buffers, baseline.live_buffers);
    assert_eq!(device.stats().memory_used, baseline.memory_used);
    cache.destroy();
}

#[test]
fn failed_mesh_recovers_on_reload() {
    let h = harness(16);
    let _device = h.add_device(gpu::DeviceDesc::default());
    let guid = AssetGuid::generate();
    let identifier = h.cache.register_asset(guid);

    let (sender, receiver) = mpsc::channel();
    h.cache
        .try_load_static_mesh(
            identifier,
            Box::new(move |_, geometry| sender.send(geometry).unwrap()),
        )
        .wait();
    assert!(receiver.recv().unwrap().is_none());
    assert!(h.cache.did_loading_fail(identifier));

    let received = Received::default();
    h.request(identifier, &received, MeshLoadFlags::default())
        .wait();
    let dummy = h.cache.dummy_mesh(DEVICE).unwrap();
    assert_eq!(received.take(), [(dummy, LoadedMeshFlags::IS_DUMMY)]);

    h.store.insert(guid, primitives::triangle().encode());
    h.cache.on_asset_modified(guid).wait();

    assert!(h.cache.is_mesh_loaded(identifier));
    assert!(!h.cache.did_loading_fail(identifier));
    assert_eq!(h.cache.find_mesh(identifier).unwrap().vertex_count(), 3);
    let mesh = h.cache.find_render_mesh(DEVICE, identifier).unwrap();
    assert_eq!(mesh.index_count, 3);
    assert_eq!(received.take(), [(mesh, LoadedMeshFlags::empty())]);

    // unloaded meshes have nothing to reload
    let idle = h.cache.register_asset(AssetGuid::generate());
    assert!(h.cache.reload_mesh(idle).is_empty());
    assert!(!h.cache.did_loading_fail(idle));
}

#[test]
fn listeners_may_request_and_remove_meshes() {
    let h = harness(16);
    let _device = h.add_device(gpu::DeviceDesc::default());
    let meshes = h.cache.create_procedural_meshes();

    let (sender, receiver) = mpsc::channel();
    let nested: RenderMeshListener = {
        let sender = Mutex::new(sender);
        Arc::new(move |_, mesh: &RenderMesh, _| {
            let _ = sender.lock().unwrap().send(*mesh);
        })
    };
    let removed = Arc::new(AtomicUsize::new(0));
    let listener: RenderMeshListener = {
        let weak = Arc::downgrade(&h.cache);
        let removed = Arc::clone(&removed);
        Arc::new(move |_, _: &RenderMesh, flags: LoadedMeshFlags| {
            let cache = match weak.upgrade() {
                Some(cache) => cache,
                None => return,
            };
            if flags.contains(LoadedMeshFlags::IS_DUMMY) {
                return;
            }
            if cache.remove(meshes.plane) {
                removed.fetch_add(1, Ordering::SeqCst);
            }
            let (_, batch) = cache.try_load_render_mesh(
                DEVICE,
                meshes.sphere,
                Arc::clone(&nested),
                MeshLoadFlags::empty(),
            );
            let _ = batch.queue();
        })
    };
    let (_, batch) =
        h.cache
            .try_load_render_mesh(DEVICE, meshes.cube, listener, MeshLoadFlags::default());
    batch.wait();

    let sphere = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(sphere.is_valid());
    assert_eq!(h.cache.find_render_mesh(DEVICE, meshes.sphere), Some(sphere));
    assert_eq!(removed.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.find_identifier(primitives::PLANE_GUID), None);
    assert!(h.cache.find_render_mesh(DEVICE, meshes.cube).is_some());
}

#[test]
fn dummy_never_follows_the_real_mesh() {
    let h = harness(64);
    let _device = h.add_device(gpu::DeviceDesc::default());
    let guid = AssetGuid::generate();
    h.store
        .insert(guid, primitives::sphere(1.0, 12, 12).encode());
    let identifier = h.cache.register_asset(guid);

    let cache = &h.cache;
    let lists = thread::scope(|scope| {
        let handles = (0..8)
            .map(|_| {
                scope.spawn(move || {
                    let received = Received::default();
                    let (_, batch) = cache.try_load_render_mesh(
                        DEVICE,
                        identifier,
                        received.listener(),
                        MeshLoadFlags::LOAD_DUMMY,
                    );
                    batch.wait();
                    received
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    let mesh = h.cache.find_render_mesh(DEVICE, identifier).unwrap();
    for received in lists {
        let list = received.take();
        let first_real = list
            .iter()
            .position(|&(_, flags)| flags.is_empty())
            .unwrap();
        assert!(first_real <= 1);
        assert!(list[first_real..]
            .iter()
            .all(|&(m, flags)| m == mesh && flags.is_empty()));
    }
}

#[test]
fn registration_beyond_capacity() {
    let h = harness(2);
    let _device = h.add_device(gpu::DeviceDesc::default());
    let first = h.cache.register_asset(AssetGuid::generate());
    let second = h
        .cache
        .create(|_| JobBatch::default(), StaticMeshFlags::empty());
    assert!(first.is_valid() && second.is_valid());

    let guid = AssetGuid::generate();
    let full = h.cache.find_or_register_asset(guid);
    assert_eq!(full, MeshIdentifier::INVALID);
    assert_eq!(h.cache.find_identifier(guid), None);
    assert_eq!(
        h.cache.clone_mesh(first, StaticMeshFlags::empty()),
        MeshIdentifier::INVALID
    );

    let received = Received::default();
    assert!(h.request(full, &received, MeshLoadFlags::default()).is_empty());
    assert!(received.take().is_empty());
    assert_eq!(h.cache.find_render_mesh(DEVICE, full), None);
    assert!(!h.cache.is_mesh_loaded(full));
    assert!(!h.cache.remove(full));

    assert!(h.cache.remove(second));
    let identifier = h.cache.find_or_register_asset(guid);
    assert!(identifier.is_valid());
    assert_eq!(h.cache.find_identifier(guid), Some(identifier));
}

#[test]
fn separate_queues_transfer_ownership() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc {
        unified_queues: false,
        ..Default::default()
    });
    let _ = device.take_submissions();
    let triangle = h.cache.create_procedural_meshes().triangle;

    let received = Received::default();
    h.request(triangle, &received, MeshLoadFlags::empty())
        .wait();
    assert!(received.take()[0].0.is_valid());

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 2);
    let (transfer, graphics) = (&submissions[0], &submissions[1]);
    assert_eq!(transfer.queue, gpu::QueueFamily::Transfer);
    assert_eq!(graphics.queue, gpu::QueueFamily::Graphics);
    assert_eq!(graphics.wait, Some(transfer.sync_point));

    let releases = transfer.barriers().collect::<Vec<_>>();
    let acquires = graphics.barriers().collect::<Vec<_>>();
    assert_eq!(releases.len(), 2);
    assert_eq!(acquires.len(), 2);
    for (release, acquire) in releases.iter().zip(acquires.iter()) {
        assert!(release.is_release());
        assert!(acquire.is_acquire());
        assert_eq!(release.piece, acquire.piece);
        assert_eq!(
            acquire.access_after,
            gpu::AccessFlags::VERTEX_READ | gpu::AccessFlags::INDEX_READ
        );
    }
}

#[test]
fn unified_queues_single_barrier() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc::default());
    let _ = device.take_submissions();
    let plane = h.cache.create_procedural_meshes().plane;
    h.request(plane, &Received::default(), MeshLoadFlags::empty())
        .wait();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 1);
    let barriers = submissions[0].barriers().collect::<Vec<_>>();
    assert_eq!(barriers.len(), 2);
    assert!(barriers.iter().all(|b| b.queue_transfer.is_none()));
}

#[test]
fn bindless_addresses() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc {
        features: gpu::DeviceFeatures::BINDLESS,
        ..Default::default()
    });
    let buffer = h.cache.mesh_addresses_buffer(DEVICE).unwrap();
    let sphere = h.cache.create_procedural_meshes().sphere;
    h.request(sphere, &Received::default(), MeshLoadFlags::empty())
        .wait();
    let mesh = h.cache.find_render_mesh(DEVICE, sphere).unwrap();

    let read = || -> MeshAddresses {
        let offset = sphere.index() as u64 * MeshAddresses::SIZE;
        let bytes = device
            .read_buffer(buffer.at(offset), MeshAddresses::SIZE)
            .unwrap();
        bytemuck::pod_read_unaligned(&bytes)
    };
    let addresses = read();
    let vertex_address = device
        .buffer_device_address(mesh.vertex_buffer.unwrap())
        .unwrap();
    assert_eq!(
        addresses.normals,
        vertex_address + 12 * mesh.vertex_count as u64
    );
    assert_eq!(
        addresses.texture_coordinates,
        addresses.normals + 28 * mesh.vertex_count as u64
    );
    assert_eq!(
        addresses.indices,
        device
            .buffer_device_address(mesh.index_buffer.unwrap())
            .unwrap()
    );

    h.cache.remove(sphere);
    assert_eq!(read(), MeshAddresses::default());
}

#[test]
fn out_of_memory_publishes_invalid_mesh() {
    let h = harness(16);
    let device = h.add_device(gpu::DeviceDesc {
        memory_budget: Some(1024),
        ..Default::default()
    });
    let baseline = device.stats();
    let cube = h.cache.create_procedural_meshes().cube;

    let received = Received::default();
    h.request(cube, &received, MeshLoadFlags::default())
        .wait();

    let list = received.take();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].1, LoadedMeshFlags::IS_DUMMY);
    let (mesh, flags) = list[1];
    assert!(flags.is_empty());
    assert!(!mesh.is_valid());
    assert_eq!(mesh.index_count, 0);
    assert_eq!(h.cache.find_render_mesh(DEVICE, cube), Some(RenderMesh::INVALID));
    assert!(h.cache.is_mesh_loaded(cube));
    assert_eq!(device.stats().live_buffers, baseline.live_buffers);
}

#[test]
fn clone_copies_master() {
    let h = harness(16);
    let master = h.cache.create_procedural_meshes().cylinder;
    let clone = h.cache.clone_mesh(master, StaticMeshFlags::empty());
    assert_ne!(clone, master);

    let (sender, receiver) = mpsc::channel();
    h.cache
        .try_load_static_mesh(clone, Box::new(move |_, geometry| sender.send(geometry).unwrap()))
        .wait();
    let geometry = receiver.recv().unwrap().unwrap();
    assert_eq!(*geometry, *h.cache.find_mesh(master).unwrap());
    assert!(h.cache.is_mesh_loaded(clone));
    assert_eq!(
        h.cache.mesh_info(clone, |info| (info.flags(), info.master())),
        Some((StaticMeshFlags::IS_CLONE, Some(master)))
    );
}

#[test]
fn clone_of_failed_master_fails() {
    let h = harness(16);
    let master = h.cache.register_asset(AssetGuid::generate());
    let clone = h.cache.clone_mesh(master, StaticMeshFlags::empty());

    let (sender, receiver) = mpsc::channel::<Option<Arc<StaticObject>>>();
    h.cache
        .try_load_static_mesh(clone, Box::new(move |_, geometry| sender.send(geometry).unwrap()))
        .wait();
    assert!(receiver.recv().unwrap().is_none());
    assert!(h.cache.did_loading_fail(master));
    assert!(h.cache.did_loading_fail(clone));
}

#[test]
fn listener_removal() {
    let h = harness(16);
    let _device = h.add_device(gpu::DeviceDesc::default());
    let triangle = h.cache.create_procedural_meshes().triangle;

    let kept = Received::default();
    let dropped = Received::default();
    let (_, first) =
        h.cache
            .try_load_render_mesh(DEVICE, triangle, kept.listener(), MeshLoadFlags::empty());
    let (dropped_id, second) =
        h.cache
            .try_load_render_mesh(DEVICE, triangle, dropped.listener(), MeshLoadFlags::empty());
    assert!(h.cache.remove_render_mesh_listener(DEVICE, triangle, dropped_id));
    assert!(!h.cache.remove_render_mesh_listener(DEVICE, triangle, dropped_id));
    first.merge(second).wait();

    assert_eq!(kept.take().len(), 1);
    assert!(dropped.take().is_empty());
}
