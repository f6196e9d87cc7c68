use crate::job::JobPriority;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::hash_map::{Entry, HashMap},
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

/// Globally unique asset identifier.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AssetGuid(pub u128);

impl AssetGuid {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for AssetGuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for AssetGuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AssetGuid({})", self)
    }
}

impl FromStr for AssetGuid {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(Self)
    }
}

pub type LoadCallback = Box<dyn FnOnce(&[u8]) + Send>;

/// Source of raw asset bytes.
pub trait AssetStore: Send + Sync {
    /// Fetch the bytes of an asset and hand them to `callback`, possibly on
    /// another thread. A missing asset is reported with an empty slice.
    fn load_binary(&self, guid: AssetGuid, priority: JobPriority, callback: LoadCallback);
}

/// Assets stored as `<root>/<guid>.mesh` files.
pub struct DirectoryStore {
    root: PathBuf,
    choir: Arc<choir::Choir>,
}

impl DirectoryStore {
    pub const EXTENSION: &'static str = "mesh";

    pub fn new(root: &Path, choir: &Arc<choir::Choir>) -> io::Result<Self> {
        if !root.is_dir() {
            log::info!("Creating asset directory {}", root.display());
            fs::create_dir_all(root)?;
        }
        log::info!("Serving assets from {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            choir: Arc::clone(choir),
        })
    }

    pub fn path(&self, guid: AssetGuid) -> PathBuf {
        self.root.join(format!("{}.{}", guid, Self::EXTENSION))
    }

    pub fn store(&self, guid: AssetGuid, data: &[u8]) -> io::Result<()> {
        fs::write(self.path(guid), data)
    }
}

impl AssetStore for DirectoryStore {
    fn load_binary(&self, guid: AssetGuid, priority: JobPriority, callback: LoadCallback) {
        let path = self.path(guid);
        let _ = self
            .choir
            .spawn(format!("read {}", guid))
            .init(move |_| {
                profiling::scope!("Read asset");
                log::debug!("Reading {} with {} priority", path.display(), priority.as_ref());
                match fs::read(&path) {
                    Ok(data) => callback(&data),
                    Err(e) => {
                        log::warn!("Unable to read {}: {}", path.display(), e);
                        callback(&[]);
                    }
                }
            })
            .run();
    }
}

/// In-memory assets, answering requests inline.
#[derive(Default)]
pub struct MemoryStore {
    assets: RwLock<HashMap<AssetGuid, Arc<[u8]>>>,
}

impl MemoryStore {
    pub fn insert(&self, guid: AssetGuid, data: Vec<u8>) -> Option<Arc<[u8]>> {
        self.assets.write().insert(guid, data.into())
    }

    pub fn remove(&self, guid: AssetGuid) -> Option<Arc<[u8]>> {
        self.assets.write().remove(&guid)
    }

    pub fn contains(&self, guid: AssetGuid) -> bool {
        self.assets.read().contains_key(&guid)
    }
}

impl AssetStore for MemoryStore {
    fn load_binary(&self, guid: AssetGuid, _priority: JobPriority, callback: LoadCallback) {
        let data = self.assets.read().get(&guid).cloned();
        match data {
            Some(data) => callback(&data),
            None => {
                log::warn!("Asset {} is not in the memory store", guid);
                callback(&[]);
            }
        }
    }
}

/// Maps asset GUIDs to the objects registered for them.
pub struct Registry<T> {
    entries: Mutex<HashMap<AssetGuid, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::default(),
        }
    }
}

impl<T: Copy> Registry<T> {
    pub fn find(&self, guid: AssetGuid) -> Option<T> {
        self.entries.lock().get(&guid).copied()
    }

    /// Returns the existing entry, or registers the one produced by `create`.
    /// The boolean is `true` when `create` was called.
    /// Nothing is inserted when `create` gives up.
    pub fn find_or_try_insert_with(
        &self,
        guid: AssetGuid,
        create: impl FnOnce() -> Option<T>,
    ) -> Option<T> {
        match self.entries.lock().entry(guid) {
            Entry::Occupied(e) => Some(*e.get()),
            Entry::Vacant(e) => create().map(|value| *e.insert(value)),
        }
    }

    pub fn insert(&self, guid: AssetGuid, value: T) -> Option<T> {
        self.entries.lock().insert(guid, value)
    }

    pub fn remove(&self, guid: AssetGuid) -> Option<T> {
        self.entries.lock().remove(&guid)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[test]
fn test_guid_text() {
    let guid = AssetGuid(0x1234_abcd);
    let text = guid.to_string();
    assert_eq!(text.len(), 32);
    assert_eq!(text.parse::<AssetGuid>(), Ok(guid));
    assert!("not a guid".parse::<AssetGuid>().is_err());
}

#[test]
fn test_registry_dedup() {
    let registry = Registry::<u32>::default();
    let guid = AssetGuid::generate();
    assert_eq!(registry.find_or_try_insert_with(guid, || None), None);
    assert!(registry.is_empty());
    assert_eq!(registry.find_or_try_insert_with(guid, || Some(5)), Some(5));
    assert_eq!(registry.find_or_try_insert_with(guid, || Some(6)), Some(5));
    assert_eq!(registry.remove(guid), Some(5));
    assert!(registry.is_empty());
}

#[test]
fn test_memory_store_missing() {
    let store = MemoryStore::default();
    let guid = AssetGuid(7);
    store.insert(guid, vec![1, 2, 3]);
    let (tx, rx) = std::sync::mpsc::channel();
    let tx2 = tx.clone();
    store.load_binary(
        guid,
        JobPriority::LoadMeshData,
        Box::new(move |data| tx.send(data.to_vec()).unwrap()),
    );
    store.load_binary(
        AssetGuid(8),
        JobPriority::LoadMeshData,
        Box::new(move |data| tx2.send(data.to_vec()).unwrap()),
    );
    assert_eq!(rx.recv().unwrap(), [1, 2, 3]);
    assert!(rx.recv().unwrap().is_empty());
}
