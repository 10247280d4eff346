//! `ChunkList`: an ordered chunk sequence plus by-address and by-id lookup
//! indices (spec §4.2).

use std::collections::BTreeMap;

/// Monotonically increasing chunk id with rolling (wraparound-tolerant)
/// comparison semantics (spec §3, §9).
///
/// Deliberately does *not* derive `Ord`/`PartialOrd`: chunk-id ordering must
/// always go through [`ChunkId::less_rolling`], never plain `<`, so that
/// porting this type to a narrower width can't silently regress into using
/// unsigned wraparound-unsafe comparison. `Eq`/`Hash` are safe to derive
/// since equality isn't affected by wraparound. `ChunkList`'s internal maps
/// key on the raw `u64` (see Open Question 2 in DESIGN.md) rather than on
/// `ChunkId` itself, so that keying never has to reach for a plain `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(u64);

impl ChunkId {
    /// Wraps a raw id value.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The next id after this one, wrapping at `u64::MAX`.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Rolling comparison: `self` is considered less than `other` iff
    /// `signed(self - other) < 0`. This tolerates wraparound the way plain
    /// `self < other` does not (spec §4.2, §9 Open Question 2).
    #[must_use]
    pub fn less_rolling(self, other: Self) -> bool {
        (self.0.wrapping_sub(other.0) as i64) < 0
    }

    /// Rolling distance from `origin` to `self` (`self - origin`, wrapping).
    /// Used by the compacting by-id lookup, which is consecutive-from-front.
    #[must_use]
    pub fn distance_from(self, origin: Self) -> u64 {
        self.0.wrapping_sub(origin.0)
    }
}

/// A chunk-owning slot plus the auxiliary lookup state `ChunkList` needs.
pub trait Chunk {
    /// This chunk's id.
    fn id(&self) -> ChunkId;
    /// Start address of this chunk's storage range, used as the by-address
    /// index key.
    fn range_begin_addr(&self) -> usize;
}

/// Ordered chunk sequence with O(log n) by-address and by-id lookup.
///
/// Backed by a `BTreeMap<ChunkId, C>` rather than an intrusive linked list:
/// since ids are assigned in strictly increasing order at `emplace_back` and
/// this crate commits (spec §9 Open Question 2) to 64-bit ids that never
/// wrap in practice, plain numeric `BTreeMap` order coincides with
/// chunk-insertion order, giving ordered iteration "for free" while still
/// making by-id lookup O(log n).
#[derive(Debug, Default)]
pub struct ChunkList<C: Chunk> {
    chunks: BTreeMap<u64, C>,
    by_addr: BTreeMap<usize, u64>,
    next_id: ChunkId,
}

impl<C: Chunk> ChunkList<C> {
    /// An empty list whose first chunk will be assigned id 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            by_addr: BTreeMap::new(),
            next_id: ChunkId::new(0),
        }
    }

    /// Number of chunks in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True iff the list holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The id that will be assigned to the next chunk appended via
    /// [`ChunkList::emplace_back`].
    #[must_use]
    pub fn next_id(&self) -> ChunkId {
        self.next_id
    }

    /// Builds a new chunk with `next_id()` via `make` and appends it,
    /// registering it in both indices. Returns a reference to it.
    pub fn emplace_back(&mut self, make: impl FnOnce(ChunkId) -> C) -> &mut C {
        let id = self.next_id;
        self.next_id = id.next();
        let chunk = make(id);
        let addr = chunk.range_begin_addr();
        self.chunks.insert(id.as_u64(), chunk);
        self.by_addr.insert(addr, id.as_u64());
        self.chunks.get_mut(&id.as_u64()).expect("just inserted")
    }

    /// Removes and returns the first chunk, deregistering it from both
    /// indices.
    pub fn pop_front(&mut self) -> Option<C> {
        let &raw = self.chunks.keys().next()?;
        self.remove(ChunkId::new(raw))
    }

    /// Removes and returns the last chunk, deregistering it from both
    /// indices.
    pub fn pop_back(&mut self) -> Option<C> {
        let &raw = self.chunks.keys().next_back()?;
        self.remove(ChunkId::new(raw))
    }

    /// Removes the chunk with the given id, if present.
    pub fn remove(&mut self, id: ChunkId) -> Option<C> {
        let chunk = self.chunks.remove(&id.as_u64())?;
        self.by_addr.remove(&chunk.range_begin_addr());
        Some(chunk)
    }

    /// Removes every chunk for which `pred` returns true.
    pub fn remove_if(&mut self, mut pred: impl FnMut(&C) -> bool) {
        let doomed: Vec<ChunkId> = self
            .chunks
            .iter()
            .filter(|(_, c)| pred(c))
            .map(|(&raw, _)| ChunkId::new(raw))
            .collect();
        for id in doomed {
            self.remove(id);
        }
    }

    /// Looks up the chunk by id.
    #[must_use]
    pub fn find_by_id(&self, id: ChunkId) -> Option<&C> {
        self.chunks.get(&id.as_u64())
    }

    /// Looks up the chunk by id, mutably.
    pub fn find_by_id_mut(&mut self, id: ChunkId) -> Option<&mut C> {
        self.chunks.get_mut(&id.as_u64())
    }

    /// Resolves an arbitrary address to its owning chunk via an
    /// upper-bound walk on the by-address index, stepping back one entry
    /// (spec §4.2). Returns `None` if no chunk's range begins at or before
    /// `addr`.
    #[must_use]
    pub fn chunk_covering(&self, addr: usize) -> Option<&C> {
        let (_, &raw) = self.by_addr.range(..=addr).next_back()?;
        self.chunks.get(&raw)
    }

    /// First chunk in id order.
    #[must_use]
    pub fn front(&self) -> Option<&C> {
        self.chunks.values().next()
    }

    /// First chunk in id order, mutably.
    pub fn front_mut(&mut self) -> Option<&mut C> {
        self.chunks.values_mut().next()
    }

    /// Last chunk in id order.
    #[must_use]
    pub fn back(&self) -> Option<&C> {
        self.chunks.values().next_back()
    }

    /// Last chunk in id order, mutably.
    pub fn back_mut(&mut self) -> Option<&mut C> {
        self.chunks.values_mut().next_back()
    }

    /// Chunks in id (== insertion) order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &C> {
        self.chunks.values()
    }

    /// Chunks in id (== insertion) order, mutably.
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut C> {
        self.chunks.values_mut()
    }

    /// Chunk id range starting from `from` (inclusive), in id order.
    pub fn iter_from(&self, from: ChunkId) -> impl DoubleEndedIterator<Item = &C> {
        self.chunks.range(from.as_u64()..).map(|(_, c)| c)
    }

    /// Chunk id range starting from `from` (inclusive), mutably.
    pub fn iter_from_mut(&mut self, from: ChunkId) -> impl DoubleEndedIterator<Item = &mut C> {
        self.chunks.range_mut(from.as_u64()..).map(|(_, c)| c)
    }
}
