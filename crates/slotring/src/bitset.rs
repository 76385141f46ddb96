use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-size atomic bitset with one cache line per 64-bit word.
///
/// Used both as a thread-slot registry (a clear bit is a free slot, claimed
/// with bit-level compare-and-swap) and as the "ring buffer has unread
/// entries" hint shared between producers and reader threads. Each word is
/// cache-padded because different threads hammer different words.
pub struct AtomicBitset {
    words: Box<[CachePadded<AtomicU64>]>,
    bits: usize,
}

impl AtomicBitset {
    /// Creates a bitset holding `bits` bits, all clear.
    pub fn new(bits: usize) -> Self {
        let bits = bits.max(1);
        let word_count = bits.div_ceil(64);
        let words = (0..word_count)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { words, bits }
    }

    /// Number of addressable bits.
    #[inline]
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Number of backing 64-bit words.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Relaxed snapshot of one backing word.
    #[inline]
    pub fn word(&self, index: usize) -> u64 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Sets bit `index`; returns true if it was previously clear.
    #[inline]
    pub fn set(&self, index: usize) -> bool {
        let mask = 1u64 << (index % 64);
        let prev = self.words[index / 64].fetch_or(mask, Ordering::AcqRel);
        prev & mask == 0
    }

    /// Clears bit `index`; returns true if it was previously set.
    #[inline]
    pub fn clear(&self, index: usize) -> bool {
        let mask = 1u64 << (index % 64);
        let prev = self.words[index / 64].fetch_and(!mask, Ordering::AcqRel);
        prev & mask != 0
    }

    /// Relaxed test of bit `index`.
    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        let mask = 1u64 << (index % 64);
        self.words[index / 64].load(Ordering::Relaxed) & mask != 0
    }

    /// Claims the first clear bit via bit-level compare-and-swap.
    ///
    /// Returns the claimed bit index, or `None` when every bit is taken.
    pub fn acquire(&self) -> Option<usize> {
        for (word_index, word) in self.words.iter().enumerate() {
            let mut current = word.load(Ordering::Relaxed);
            loop {
                let free = (!current).trailing_zeros() as usize;
                if free >= 64 {
                    break;
                }
                let index = word_index * 64 + free;
                if index >= self.bits {
                    break;
                }
                let mask = 1u64 << free;
                match word.compare_exchange_weak(
                    current,
                    current | mask,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(index),
                    Err(now) => current = now,
                }
            }
        }
        None
    }

    /// Number of set bits (relaxed; a monitoring snapshot, not a fence).
    pub fn count_set(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// True if any bit is set (relaxed).
    pub fn any_set(&self) -> bool {
        self.words.iter().any(|w| w.load(Ordering::Relaxed) != 0)
    }

    /// Invokes `visit` for every set bit within the given word range.
    pub fn for_each_set_in_words<F: FnMut(usize)>(&self, words: std::ops::Range<usize>, mut visit: F) {
        for word_index in words {
            let mut snapshot = self.words[word_index].load(Ordering::Relaxed);
            while snapshot != 0 {
                let bit = snapshot.trailing_zeros() as usize;
                let index = word_index * 64 + bit;
                if index < self.bits {
                    visit(index);
                }
                snapshot &= snapshot - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_clear_is_set() {
        let bits = AtomicBitset::new(130);
        assert_eq!(bits.word_count(), 3);
        assert!(!bits.is_set(129));

        assert!(bits.set(129));
        assert!(bits.is_set(129));
        assert!(!bits.set(129), "second set reports already-set");

        assert!(bits.clear(129));
        assert!(!bits.is_set(129));
        assert!(!bits.clear(129), "second clear reports already-clear");
    }

    #[test]
    fn test_acquire_exhaustion_and_reuse() {
        let bits = AtomicBitset::new(3);
        let a = bits.acquire().unwrap();
        let b = bits.acquire().unwrap();
        let c = bits.acquire().unwrap();
        assert_eq!(
            {
                let mut v = vec![a, b, c];
                v.sort_unstable();
                v
            },
            vec![0, 1, 2]
        );
        assert_eq!(bits.acquire(), None);

        bits.clear(b);
        assert_eq!(bits.acquire(), Some(b), "released slot is reused");
    }

    #[test]
    fn test_concurrent_acquire_is_unique() {
        const SLOTS: usize = 96;
        let bits = Arc::new(AtomicBitset::new(SLOTS));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let bits = Arc::clone(&bits);
            handles.push(thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(slot) = bits.acquire() {
                    mine.push(slot);
                }
                mine
            }));
        }

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), SLOTS, "every slot acquired exactly once");
    }

    #[test]
    fn test_for_each_set_in_words() {
        let bits = AtomicBitset::new(200);
        for i in [0, 63, 64, 127, 199] {
            bits.set(i);
        }
        let mut seen = Vec::new();
        bits.for_each_set_in_words(0..bits.word_count(), |i| seen.push(i));
        assert_eq!(seen, vec![0, 63, 64, 127, 199]);

        let mut first_word_only = Vec::new();
        bits.for_each_set_in_words(0..1, |i| first_word_only.push(i));
        assert_eq!(first_word_only, vec![0, 63]);
    }
}
