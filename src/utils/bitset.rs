//! Fixed-capacity bit vector used for dominance bookkeeping.
//!
//! Every block of a method owns one set for its dominators and one for its dominance
//! frontier, each with one bit per block id. The capacity is fixed at creation; the dominance
//! engine allocates fresh sets whenever the block count changes.
//!
//! # Example
//!
//! ```rust
//! use dexscope::utils::BitSet;
//!
//! let mut doms = BitSet::full(4);
//! let mut pred = BitSet::new(4);
//! pred.insert(0);
//! pred.insert(2);
//!
//! assert!(doms.and(&pred));
//! doms.insert(3);
//! assert_eq!(doms.iter().collect::<Vec<_>>(), vec![0, 2, 3]);
//! assert_eq!(doms.cardinality(), 3);
//! ```

const WORD_BITS: usize = u64::BITS as usize;

/// A dense set of small integers backed by 64-bit words.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    /// Creates an empty set able to hold `capacity` elements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
        }
    }

    /// Creates a set containing every element below `capacity`.
    #[must_use]
    pub fn full(capacity: usize) -> Self {
        let mut set = Self::new(capacity);
        set.fill();
        set
    }

    /// Number of elements this set can hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if no element is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Adds `index` to the set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn insert(&mut self, index: usize) {
        assert!(index < self.capacity, "bit index {index} out of range");
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    /// Removes `index` from the set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.capacity, "bit index {index} out of range");
        self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
    }

    /// Returns `true` if `index` is present. Out-of-range indices are never present.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.capacity && self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Number of elements present.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Smallest element present, if any.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    /// Removes every element.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Adds every element below the capacity.
    pub fn fill(&mut self) {
        self.words.fill(u64::MAX);
        let tail = self.capacity % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1 << tail) - 1;
            }
        }
    }

    /// Intersects with `other` in place. Returns `true` if the set changed.
    pub fn and(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & b)
    }

    /// Unions with `other` in place. Returns `true` if the set changed.
    pub fn or(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a | b)
    }

    /// Removes every element of `other` from this set. Returns `true` if the set changed.
    pub fn and_not(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & !b)
    }

    /// Returns `true` if every element of this set is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter().chain(std::iter::repeat(&0)))
            .all(|(a, b)| a & !b == 0)
    }

    /// Iterates the elements in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn combine(&mut self, other: &Self, op: impl Fn(u64, u64) -> u64) -> bool {
        debug_assert_eq!(self.capacity, other.capacity, "bit set capacity mismatch");
        let mut changed = false;
        for (a, &b) in self.words.iter_mut().zip(&other.words) {
            let next = op(*a, b);
            changed |= next != *a;
            *a = next;
        }
        changed
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let items: Vec<usize> = iter.into_iter().collect();
        let capacity = items.iter().max().map_or(0, |m| m + 1);
        let mut set = Self::new(capacity);
        for item in items {
            set.insert(item);
        }
        set
    }
}

/// Ascending iterator over the elements of a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_index * WORD_BITS + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

impl<'a> IntoIterator for &'a BitSet {
    type Item = usize;
    type IntoIter = BitSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
