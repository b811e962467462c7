//! Write-once balanced lookup map backed by a flat array.
//!
//! Entries are staged, then [`build`](BalancedMap::build) packs them into a
//! complete binary search tree embedded in a `2^d - 1` slot array: no
//! per-node allocation, no pointers, and lookups touch at most `d`
//! cache-friendly slots. The trade-off is that the map cannot be mutated
//! after building without an explicit [`clear`](BalancedMap::clear).

use std::cmp::Ordering;

/// Position in the flat tree, tracked as the `(base, extent)` bit pattern.
///
/// At depth `d` the base is `2^d - 1` and the extent is the node's position
/// within the level, so `base + extent` is the slot index. Descending doubles
/// the base (`base*2 + 1`) and shifts the extent, setting the low bit for a
/// right turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TreeCursor {
    base: usize,
    extent: usize,
}

impl TreeCursor {
    const ROOT: Self = Self { base: 0, extent: 0 };

    fn index(self) -> usize {
        self.base + self.extent
    }

    fn left(self) -> Self {
        Self {
            base: (self.base << 1) | 1,
            extent: self.extent << 1,
        }
    }

    fn right(self) -> Self {
        Self {
            base: (self.base << 1) | 1,
            extent: (self.extent << 1) | 1,
        }
    }
}

/// Lookup of a key absent from a built map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupMiss;

impl std::fmt::Display for LookupMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key not found in balanced map")
    }
}

impl std::error::Error for LookupMiss {}

/// Static, array-backed balanced binary-search-tree built once from a batch
/// of key/value pairs.
///
/// Staging and lookup are distinct phases: [`emplace`](BalancedMap::emplace)
/// is only legal before [`build`](BalancedMap::build), and
/// [`lookup`](BalancedMap::lookup) only after. Crossing either line is a bug
/// in the caller and panics.
pub struct BalancedMap<K, V> {
    staging: Vec<(K, V)>,
    slots: Vec<Option<(K, V)>>,
    len: usize,
    built: bool,
}

impl<K, V> BalancedMap<K, V> {
    /// Create an empty, unbuilt map.
    pub fn new() -> Self {
        Self {
            staging: Vec::new(),
            slots: Vec::new(),
            len: 0,
            built: false,
        }
    }

    /// Stage an entry for the next [`build`](BalancedMap::build).
    ///
    /// # Panics
    /// Panics if the map is already built. Restaging requires
    /// [`clear`](BalancedMap::clear) first.
    pub fn emplace(&mut self, key: K, value: V) {
        assert!(
            !self.built,
            "balanced map is already built; clear() before staging new entries"
        );
        self.staging.push((key, value));
    }

    /// Number of entries (staged before build, stored after).
    pub fn size(&self) -> usize {
        if self.built {
            self.len
        } else {
            self.staging.len()
        }
    }

    /// Length of the backing slot array; the smallest `2^d - 1` holding all
    /// entries. Zero before build.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether [`build`](BalancedMap::build) has run.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Occupied entries in array order (not key order).
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(key, value)| (key, value)))
    }

    /// Mutable variant of [`iter`](BalancedMap::iter).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.as_mut().map(|(key, value)| (&*key, value)))
    }

    /// Drop all entries and return to the unbuilt staging state.
    pub fn clear(&mut self) {
        self.staging.clear();
        self.slots.clear();
        self.len = 0;
        self.built = false;
    }
}

impl<K: Ord, V> BalancedMap<K, V> {
    /// Sort the staged entries and pack them into the flat tree.
    ///
    /// The median of each sorted sub-range lands at the cursor position, so
    /// the tree is as balanced as the entry count allows. Building an empty
    /// map is valid; every lookup then misses.
    pub fn build(&mut self) {
        if self.staging.is_empty() {
            self.built = true;
            return;
        }

        self.staging.sort_by(|left, right| left.0.cmp(&right.0));
        self.len = self.staging.len();

        let mut size = 1;
        while size < self.len {
            size = (size << 1) | 1;
        }

        self.slots.clear();
        self.slots.resize_with(size, || None);

        let mut staged: Vec<Option<(K, V)>> = self.staging.drain(..).map(Some).collect();
        Self::place(&mut self.slots, &mut staged, TreeCursor::ROOT, 0, self.len - 1);

        self.built = true;
    }

    /// Find the value for `key` in at most tree-depth probes.
    ///
    /// # Panics
    /// Panics if the map has not been built.
    pub fn lookup(&self, key: &K) -> Result<&V, LookupMiss> {
        assert!(self.built, "balanced map lookup before build()");

        let mut cursor = TreeCursor::ROOT;
        while cursor.index() < self.slots.len() {
            let Some((stored, value)) = self.slots[cursor.index()].as_ref() else {
                return Err(LookupMiss);
            };
            cursor = match stored.cmp(key) {
                Ordering::Equal => return Ok(value),
                Ordering::Less => cursor.right(),
                Ordering::Greater => cursor.left(),
            };
        }

        Err(LookupMiss)
    }

    /// Mutable variant of [`lookup`](BalancedMap::lookup).
    pub fn lookup_mut(&mut self, key: &K) -> Result<&mut V, LookupMiss> {
        assert!(self.built, "balanced map lookup before build()");

        let mut cursor = TreeCursor::ROOT;
        while cursor.index() < self.slots.len() {
            let Some((stored, _)) = self.slots[cursor.index()].as_ref() else {
                return Err(LookupMiss);
            };
            match stored.cmp(key) {
                Ordering::Equal => {
                    let (_, value) = self.slots[cursor.index()].as_mut().expect("probed above");
                    return Ok(value);
                }
                Ordering::Less => cursor = cursor.right(),
                Ordering::Greater => cursor = cursor.left(),
            }
        }

        Err(LookupMiss)
    }

    fn place(
        slots: &mut [Option<(K, V)>],
        staged: &mut [Option<(K, V)>],
        cursor: TreeCursor,
        start: usize,
        end: usize,
    ) {
        if start == end {
            slots[cursor.index()] = staged[start].take();
            return;
        }

        let mid = start + (end - start) / 2;
        slots[cursor.index()] = staged[mid].take();

        if mid != start {
            Self::place(slots, staged, cursor.left(), start, mid - 1);
        }
        Self::place(slots, staged, cursor.right(), mid + 1, end);
    }
}

impl<K, V> Default for BalancedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
