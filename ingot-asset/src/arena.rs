use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::{fmt, hash, marker::PhantomData, mem, num::NonZeroU32};

#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Hash, Ord)]
struct Address {
    index: u32,
    generation: NonZeroU32,
}

/// Dense, generation-checked index into an [`Arena`].
///
/// The index is recycled once the slot is freed, but the generation is not,
/// so a handle that outlived its slot never resolves again.
pub struct Handle<T>(Address, PhantomData<fn() -> T>);
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for Handle<T> {}
impl<T> hash::Hash for Handle<T> {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.0.hash(hasher);
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}", self.0.index, self.0.generation)
    }
}

impl<T> Handle<T> {
    /// Handle that never resolves, handed out when an arena is full.
    pub const INVALID: Self = Handle(
        Address {
            index: u32::MAX,
            generation: NonZeroU32::MAX,
        },
        PhantomData,
    );

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Dense slot index, usable to address side tables and bit sets.
    pub fn index(&self) -> usize {
        self.0.index as usize
    }
    pub fn generation(&self) -> u32 {
        self.0.generation.get()
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            value: None,
        }
    }
}

#[derive(Default)]
struct FreeManager {
    free_list: Vec<u32>,
    high_water: u32,
}

/// Fixed-capacity arena with recycled indices.
///
/// Slots are individually locked, so readers of one entry never
/// contend with writers of another.
pub struct Arena<T> {
    slots: Box<[RwLock<Entry<T>>]>,
    freeman: Mutex<FreeManager>,
}

impl<T> Arena<T> {
    pub fn new(capacity: usize) -> Self {
        assert_ne!(capacity, 0);
        assert!(capacity <= u32::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| RwLock::default()).collect(),
            freeman: Mutex::new(FreeManager::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns `None` once every slot is occupied.
    pub fn alloc(&self, value: T) -> Option<Handle<T>> {
        let index = {
            let mut freeman = self.freeman.lock();
            match freeman.free_list.pop() {
                Some(index) => index,
                None if (freeman.high_water as usize) < self.slots.len() => {
                    freeman.high_water += 1;
                    freeman.high_water - 1
                }
                None => return None,
            }
        };
        let mut entry = self.slots[index as usize].write();
        entry.generation = entry.generation.wrapping_add(1).max(1);
        entry.value = Some(value);
        let generation = NonZeroU32::new(entry.generation)?;
        Some(Handle(Address { index, generation }, PhantomData))
    }

    pub fn get(&self, handle: Handle<T>) -> Option<MappedRwLockReadGuard<'_, T>> {
        let entry = self.slots.get(handle.index())?.read();
        if entry.generation != handle.generation() {
            return None;
        }
        RwLockReadGuard::try_map(entry, |entry| entry.value.as_ref()).ok()
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Returns the live handle occupying the given slot index, if any.
    pub fn handle_at(&self, index: usize) -> Option<Handle<T>> {
        let entry = self.slots.get(index)?.read();
        entry.value.as_ref()?;
        let generation = NonZeroU32::new(entry.generation)?;
        Some(Handle(
            Address {
                index: index as u32,
                generation,
            },
            PhantomData,
        ))
    }

    pub fn dealloc(&self, handle: Handle<T>) -> Option<T> {
        let value = {
            let mut entry = self.slots.get(handle.index())?.write();
            if entry.generation != handle.generation() {
                return None;
            }
            entry.value.take()?
        };
        self.freeman.lock().free_list.push(handle.0.index);
        Some(value)
    }

    pub fn for_each(&self, mut fun: impl FnMut(Handle<T>, &T)) {
        let high_water = self.freeman.lock().high_water as usize;
        for (index, slot) in self.slots[..high_water].iter().enumerate() {
            let entry = slot.read();
            if let (Some(value), Some(generation)) =
                (entry.value.as_ref(), NonZeroU32::new(entry.generation))
            {
                let address = Address {
                    index: index as u32,
                    generation,
                };
                fun(Handle(address, PhantomData), value);
            }
        }
    }
}

/// Side table indexed by [`Handle::index`], holding at most one value per slot.
pub struct Table<T> {
    slots: Box<[Mutex<Option<T>>]>,
}

impl<T> Table<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Swap the slot contents, returning the previous value by move.
    pub fn replace(&self, index: usize, value: Option<T>) -> Option<T> {
        mem::replace(&mut *self.slots[index].lock(), value)
    }

    pub fn take(&self, index: usize) -> Option<T> {
        self.slots[index].lock().take()
    }

    /// Take the value out only if `predicate` accepts it.
    pub fn take_if(&self, index: usize, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut slot = self.slots[index].lock();
        match *slot {
            Some(ref value) if predicate(value) => slot.take(),
            _ => None,
        }
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.slots[index].lock().is_some()
    }

    pub fn drain(&self, mut fun: impl FnMut(usize, T)) {
        for (index, slot) in self.slots.iter().enumerate() {
            let value = slot.lock().take();
            if let Some(value) = value {
                fun(index, value);
            }
        }
    }
}

impl<T: Copy> Table<T> {
    pub fn get(&self, index: usize) -> Option<T> {
        *self.slots.get(index)?.lock()
    }
}

// Ensure the `Option<Handle>` doesn't have any overhead
#[cfg(test)]
unsafe fn _test_option_handle<A>(handle: Handle<A>) -> Option<Handle<A>> {
    std::mem::transmute(handle)
}

#[test]
fn test_single_thread() {
    let arena = Arena::<usize>::new(4);
    let a = arena.alloc(3).unwrap();
    let b = arena.alloc(4).unwrap();
    assert_eq!((a.index(), b.index()), (0, 1));
    assert_eq!(*arena.get(b).unwrap(), 4);
    assert_eq!(arena.dealloc(a), Some(3));
    assert!(arena.get(a).is_none());
    let c = arena.alloc(5).unwrap();
    assert_eq!(c.index(), a.index());
    assert_ne!(c, a);
    assert!(arena.dealloc(a).is_none());
    assert_eq!(*arena.get(c).unwrap(), 5);
}

#[test]
fn test_exhausted_capacity() {
    let arena = Arena::<u8>::new(2);
    let a = arena.alloc(0).unwrap();
    assert!(arena.alloc(1).is_some());
    assert!(arena.alloc(2).is_none());
    arena.dealloc(a);
    let c = arena.alloc(3).unwrap();
    assert_eq!(c.index(), a.index());
    assert!(arena.alloc(4).is_none());
    assert!(!Handle::<u8>::INVALID.is_valid());
    assert!(arena.get(Handle::INVALID).is_none());
    assert!(arena.dealloc(Handle::INVALID).is_none());
    assert_eq!(Table::<u8>::new(2).get(Handle::<u8>::INVALID.index()), None);
}

#[test]
fn test_for_each_skips_freed() {
    let arena = Arena::<u8>::new(8);
    let handles = (0..5).map(|i| arena.alloc(i).unwrap()).collect::<Vec<_>>();
    arena.dealloc(handles[1]);
    arena.dealloc(handles[3]);
    let mut seen = Vec::new();
    arena.for_each(|handle, &value| seen.push((handle.index(), value)));
    assert_eq!(seen, [(0, 0), (2, 2), (4, 4)]);
    assert_eq!(arena.handle_at(2), Some(handles[2]));
    assert_eq!(arena.handle_at(3), None);
}

#[test]
fn test_table_replace() {
    let table = Table::<u32>::new(2);
    assert_eq!(table.replace(1, Some(7)), None);
    assert_eq!(table.replace(1, Some(8)), Some(7));
    assert_eq!(table.get(1), Some(8));
    assert_eq!(table.take_if(1, |&value| value == 7), None);
    assert_eq!(table.get(1), Some(8));
    let mut drained = Vec::new();
    table.drain(|index, value| drained.push((index, value)));
    assert_eq!(drained, [(1, 8)]);
    assert!(!table.is_occupied(1));
}
