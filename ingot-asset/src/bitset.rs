use std::sync::atomic::{AtomicU64, Ordering};

const BITS: usize = u64::BITS as usize;

/// Lock-free set of slot indices.
///
/// Each index is claimed and released with a single atomic read-modify-write,
/// which makes it suitable for "at most one in flight" guards.
pub struct AtomicBitSet {
    words: Box<[AtomicU64]>,
}

impl AtomicBitSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: (0..capacity.div_ceil(BITS))
                .map(|_| AtomicU64::new(0))
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len() * BITS
    }

    fn locate(index: usize) -> (usize, u64) {
        (index / BITS, 1 << (index % BITS))
    }

    /// Returns `true` if this call was the one to set the bit.
    pub fn set(&self, index: usize) -> bool {
        let (word, mask) = Self::locate(index);
        self.words[word].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    /// Returns `true` if the bit was set before this call.
    pub fn clear(&self, index: usize) -> bool {
        let (word, mask) = Self::locate(index);
        self.words[word].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    pub fn is_set(&self, index: usize) -> bool {
        let (word, mask) = Self::locate(index);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Snapshot of the indices that are currently set.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, word)| {
                let mut bits = word.load(Ordering::Acquire);
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(word_index * BITS + bit)
                })
            })
    }
}

#[test]
fn test_set_clear() {
    let set = AtomicBitSet::new(100);
    assert_eq!(set.capacity(), 128);
    assert!(set.set(3));
    assert!(!set.set(3));
    assert!(set.set(70));
    assert_eq!(set.iter().collect::<Vec<_>>(), [3, 70]);
    assert!(set.clear(3));
    assert!(!set.clear(3));
    assert!(!set.is_set(3));
    assert!(set.is_set(70));
    set.clear_all();
    assert_eq!(set.iter().count(), 0);
}

#[test]
fn test_single_winner() {
    use std::sync::atomic::AtomicUsize;

    let set = AtomicBitSet::new(64);
    let winners = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                if set.set(17) {
                    winners.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    assert_eq!(winners.load(Ordering::Relaxed), 1);
}
