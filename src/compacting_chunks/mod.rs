//! `CompactingChunks`: the compacting allocator (spec §4.3). Head-shrinking
//! relocation on single delete, a `txn_left` cursor that bounds the
//! transactional view during a freeze, and the `DelayedRemover` batch
//! protocol.

pub mod delayed_remover;
pub mod position;

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::chunk::holder::{choose_chunk_size, ChunkBackend, ChunkHolder};
use crate::chunk::CompactingChunk;
use crate::error::{Error, Result};
use crate::list::{Chunk, ChunkId, ChunkList};

pub use delayed_remover::{DelayedRemover, FixedBitSet, RemovableRegion};
pub use position::Position;

/// The allocator's state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorState {
    /// No chunks, not frozen.
    Empty,
    /// At least one live tuple, not frozen.
    Active,
    /// No chunks in the txn view, but a snapshot is in progress.
    Frozen,
    /// At least one live tuple in the txn view, and a snapshot in progress.
    FrozenActive,
}

/// Which end of the txn view a lightweight [`CompactingChunks::remove`]
/// targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remove consecutive tuples starting from the front of the txn view.
    /// Forbidden while frozen.
    FromHead,
    /// Remove consecutive tuples starting from the back of the txn view.
    FromTail,
}

/// Outcome of one `remove_add` call in the batch-delete protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// `addr` fell inside its chunk's removable region: it stays in place
    /// as a hole, finalized in place.
    StaysAsHole,
    /// `addr` fell outside its chunk's removable region: it will be moved
    /// into a hole by `remove_force`.
    WillMove,
}

/// The pair of positions that bound the snapshot view while frozen.
#[derive(Debug, Clone, Copy)]
pub struct FrozenBoundaries {
    /// First tuple visible to the snapshot, captured at freeze time.
    pub left: Position,
    /// One-past-last tuple visible to the snapshot, captured at freeze
    /// time.
    pub right: Position,
}

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Assigns a process-wide unique allocator id, used to register at most
/// one RW snapshot iterator per allocator via
/// [`crate::iter::ChunksIdValidator`].
fn next_allocator_id() -> u64 {
    NEXT_ALLOCATOR_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A compacting, chunk-backed allocator of fixed-size tuple slots.
///
/// Deletes relocate the last-allocated live tuple into the freed slot so
/// the txn view's live set stays contiguous within each chunk (spec §1,
/// §4.3). Callers that need snapshot isolation across mutation wrap this
/// in [`crate::hook::HookedCompactingChunks`] instead of using it bare.
pub struct CompactingChunks {
    id: u64,
    tuple_size: usize,
    chunk_size: usize,
    alloc_count: usize,
    list: ChunkList<CompactingChunk>,
    txn_left: Option<ChunkId>,
    frozen_boundaries: Option<FrozenBoundaries>,
    finalize_cb: Option<Box<dyn FnMut(*const u8)>>,
    batched: DelayedRemover,
    frozen: bool,
    pending_head_removed: usize,
    backend: Rc<dyn ChunkBackend>,
}

impl std::fmt::Debug for CompactingChunks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactingChunks")
            .field("id", &self.id)
            .field("tuple_size", &self.tuple_size)
            .field("alloc_count", &self.alloc_count)
            .field("frozen", &self.frozen)
            .field("chunks", &self.list.len())
            .finish()
    }
}

impl CompactingChunks {
    /// A new, empty allocator for `tuple_size`-byte tuples, using the
    /// process global allocator as its chunk backend.
    #[must_use]
    pub fn new(tuple_size: usize) -> Self {
        Self::with_backend(tuple_size, Rc::new(crate::chunk::holder::SystemBackend))
    }

    /// Builds an allocator from a loaded [`crate::config::AllocatorConfig`].
    /// Only `tuple_size` currently varies the result; the chunk-size series
    /// itself is this crate's fixed
    /// [`crate::chunk::holder::PREFERRED_CHUNK_SIZES`] table rather than one
    /// rebuilt per-config, since no caller has needed a narrower series in
    /// practice.
    #[must_use]
    pub fn from_config(cfg: &crate::config::AllocatorConfig) -> Self {
        Self::new(cfg.tuple_size)
    }

    /// Like [`CompactingChunks::new`] with an explicit chunk backend.
    #[must_use]
    pub fn with_backend(tuple_size: usize, backend: Rc<dyn ChunkBackend>) -> Self {
        let chunk_size = choose_chunk_size(tuple_size);
        Self {
            id: next_allocator_id(),
            tuple_size,
            chunk_size,
            alloc_count: 0,
            list: ChunkList::new(),
            txn_left: None,
            frozen_boundaries: None,
            finalize_cb: None,
            batched: DelayedRemover::new(),
            frozen: false,
            pending_head_removed: 0,
            backend,
        }
    }

    /// This allocator's process-wide unique id (used for RW snapshot
    /// iterator uniqueness tracking).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fixed tuple size.
    #[must_use]
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    /// Chunk size chosen for this tuple size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of live tuples across all chunks in the txn view.
    #[must_use]
    pub fn size(&self) -> usize {
        self.alloc_count
    }

    /// True iff there are no live tuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alloc_count == 0
    }

    /// True iff a snapshot is currently in progress.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The allocator's current state-machine state.
    #[must_use]
    pub fn state(&self) -> AllocatorState {
        match (self.frozen, self.alloc_count == 0) {
            (false, true) => AllocatorState::Empty,
            (false, false) => AllocatorState::Active,
            (true, true) => AllocatorState::Frozen,
            (true, false) => AllocatorState::FrozenActive,
        }
    }

    /// Installs a callback invoked exactly once per tuple as it leaves the
    /// live set (delete, non-moved batch-removed slot, or clear). Not
    /// invoked for relocations of still-live tuples.
    pub fn set_finalize_cb(&mut self, cb: impl FnMut(*const u8) + 'static) {
        self.finalize_cb = Some(Box::new(cb));
    }

    fn finalize(&mut self, addr: *const u8) {
        if let Some(cb) = self.finalize_cb.as_mut() {
            cb(addr);
        }
    }

    /// Snapshot boundaries recorded by the most recent `freeze`, if any.
    #[must_use]
    pub fn frozen_boundaries(&self) -> Option<FrozenBoundaries> {
        self.frozen_boundaries
    }

    /// The chunk id at the front of the current txn view, if non-empty.
    #[must_use]
    pub fn txn_left_id(&self) -> Option<ChunkId> {
        self.txn_left
    }

    /// Read-only access to the backing chunk list, for iterator
    /// construction.
    #[must_use]
    pub fn list(&self) -> &ChunkList<CompactingChunk> {
        &self.list
    }

    /// Mutable access to the backing chunk list, used by the read-write
    /// snapshot iterator to retire frozen-only chunks as it drains them.
    pub fn list_mut(&mut self) -> &mut ChunkList<CompactingChunk> {
        &mut self.list
    }

    fn grow(&mut self) -> ChunkId {
        let tuple_size = self.tuple_size;
        let chunk_size = self.chunk_size;
        let backend = self.backend.clone();
        let chunk = self.list.emplace_back(move |id| {
            CompactingChunk::new(ChunkHolder::new(id, tuple_size, chunk_size, backend))
        });
        let id = chunk.id();
        if self.txn_left.is_none() {
            self.txn_left = Some(id);
        }
        tracing::debug!(chunk_id = id.as_u64(), chunk_size, "compacting chunk grown");
        id
    }

    /// Bump-allocates one tuple slot, growing the chunk list if the
    /// current tail chunk is full (spec §4.3 Allocation).
    pub fn allocate(&mut self) -> *mut u8 {
        let need_new = self
            .list
            .back()
            .is_none_or(CompactingChunk::full);
        if need_new {
            self.grow();
        }
        let addr = self
            .list
            .back_mut()
            .and_then(CompactingChunk::allocate)
            .expect("freshly grown or non-full tail chunk must have room");
        self.alloc_count += 1;
        addr
    }

    /// Returns the first live chunk's id and a mutable reference to it, the
    /// chunk at the front of the txn view.
    fn front_txn_chunk(&mut self) -> Option<(ChunkId, &mut CompactingChunk)> {
        let id = self.txn_left?;
        self.list.find_by_id_mut(id).map(|c| (id, c))
    }

    /// After a front chunk's live range has shrunk to nothing, either pops
    /// it (not frozen) or advances `txn_left` to its successor (frozen) —
    /// spec §4.3's `releasable()`.
    fn releasable(&mut self, chunk_id: ChunkId) {
        let emptied = self
            .list
            .find_by_id(chunk_id)
            .is_some_and(CompactingChunk::empty);
        if !emptied {
            return;
        }
        if self.frozen {
            let next_id = self
                .list
                .iter_from(chunk_id)
                .nth(1)
                .map(Chunk::id);
            self.txn_left = next_id;
        } else {
            self.list.remove(chunk_id);
            self.txn_left = self.list.front().map(Chunk::id);
        }
    }

    /// Single-tuple compacting delete (spec §4.3). Relocates the first txn
    /// chunk's last-allocated tuple into `dst`. Returns the address the
    /// mover used to occupy (now stale — callers must fix up any external
    /// references to it), or `Ok(None)` for the documented benign
    /// head-shrink race.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if `dst` is not a live address in this
    /// allocator's txn view.
    pub fn free(&mut self, dst: *const u8) -> Result<Option<*const u8>> {
        let tuple_size = self.tuple_size;
        let Some(front_id) = self.txn_left else {
            return Err(Error::OutOfRange { addr: dst as usize });
        };
        let dst_chunk_id = match self.list.chunk_covering(dst as usize) {
            Some(chunk) if chunk.contains(dst) && !chunk.id().less_rolling(front_id) => chunk.id(),
            _ => {
                let front_next = self
                    .list
                    .find_by_id(front_id)
                    .map(CompactingChunk::range_next);
                if front_next == Some(dst) {
                    return Ok(None);
                }
                return Err(Error::OutOfRange { addr: dst as usize });
            }
        };

        let front = self
            .list
            .find_by_id_mut(front_id)
            .expect("txn_left always names a chunk present in the list");
        let tail_before = front.range_next();
        // SAFETY: `tail_before` is the chunk's current `range_next`, at
        // least one slot ahead of `range_begin` since the chunk is
        // non-empty (it is the txn view's front chunk and `alloc_count`
        // is checked non-zero by the caller reaching this point).
        let src = unsafe { tail_before.sub(tuple_size) } as *mut u8;
        front.rewind_by(1);

        self.finalize(src.cast_const());

        if dst_chunk_id.as_u64() != front_id.as_u64() {
            // SAFETY: `src` and `dst` are both `tuple_size`-byte slots
            // inside this allocator's chunks, which never overlap across
            // chunks.
            unsafe {
                std::ptr::copy_nonoverlapping(src.cast_const(), dst.cast_mut(), tuple_size);
            }
        } else if src.cast_const() != dst {
            // SAFETY: `src` and `dst` are distinct tuple-aligned slots
            // within the same chunk's buffer.
            unsafe {
                std::ptr::copy(src.cast_const(), dst.cast_mut(), tuple_size);
            }
        }

        self.releasable(front_id);
        self.alloc_count -= 1;
        Ok(Some(src.cast_const()))
    }

    /// Lightweight remove from either end of the txn view: never compacts,
    /// never invokes `finalize_cb` (spec §4.3).
    ///
    /// For [`Direction::FromHead`], call repeatedly with consecutive
    /// addresses from the front, terminated by a call with `ptr = None`.
    /// For [`Direction::FromTail`], call once per tuple in reverse
    /// txn-iteration order with `ptr = Some(addr)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] for `FromHead` while frozen, or
    /// [`Error::Underflow`] if the allocator has no chunks.
    pub fn remove(&mut self, direction: Direction, ptr: Option<*const u8>) -> Result<()> {
        match direction {
            Direction::FromHead => self.remove_from_head(ptr),
            Direction::FromTail => self.remove_from_tail(ptr),
        }
    }

    fn remove_from_head(&mut self, ptr: Option<*const u8>) -> Result<()> {
        if self.frozen {
            return Err(Error::Logic("remove(from_head) is forbidden while frozen"));
        }
        let Some((front_id, front)) = self.front_txn_chunk() else {
            return Err(Error::Underflow { op: "remove(from_head)" });
        };
        let tuple_size = self.tuple_size;
        match ptr {
            Some(addr) => {
                let expected = front.range_begin() as usize
                    + self.pending_head_removed * tuple_size;
                assert_eq!(
                    addr as usize, expected,
                    "remove(from_head) must be called with consecutive front addresses"
                );
                self.pending_head_removed += 1;
                Ok(())
            }
            None => {
                let count = self.pending_head_removed;
                self.pending_head_removed = 0;
                if count == 0 {
                    return Ok(());
                }
                let begin = front.range_begin() as usize;
                let allocated = front.allocated_slots();
                let remaining = allocated - count;
                if remaining > 0 {
                    // SAFETY: both the source `(begin + count*tuple_size)`
                    // and destination `begin` ranges of `remaining *
                    // tuple_size` bytes lie within this chunk's single
                    // allocation; `copy` tolerates the overlap.
                    unsafe {
                        std::ptr::copy(
                            (begin + count * tuple_size) as *const u8,
                            begin as *mut u8,
                            remaining * tuple_size,
                        );
                    }
                    front.rewind_by(count);
                } else {
                    front.set_next_to_begin();
                }
                self.alloc_count -= count;
                self.releasable(front_id);
                Ok(())
            }
        }
    }

    fn remove_from_tail(&mut self, ptr: Option<*const u8>) -> Result<()> {
        let Some(addr) = ptr else { return Ok(()) };
        let Some(back_id) = self.list.back().map(Chunk::id) else {
            return Err(Error::Underflow { op: "remove(from_tail)" });
        };
        let back = self
            .list
            .find_by_id_mut(back_id)
            .expect("back() id is present in the list");
        let tuple_size = self.tuple_size;
        // SAFETY: `range_next()` is derived from the same allocation as
        // `addr`; subtracting one tuple size stays in bounds given the
        // assertion below holds.
        let expected = unsafe { back.range_next().sub(tuple_size) };
        assert_eq!(
            addr, expected,
            "remove(from_tail) must target the current tail slot"
        );
        back.rewind_by(1);
        self.alloc_count -= 1;
        if back.empty() {
            self.list.remove(back_id);
            if self.list.is_empty() {
                self.txn_left = None;
            }
        }
        Ok(())
    }

    /// Phase 1 of the batch-delete protocol (spec §4.3): computes which
    /// chunks and slots, counted back from the current tail but taken from
    /// the front of the txn chunk list, constitute the removable region
    /// for a batch of `n` tuples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Underflow`] if the allocator is empty or `n`
    /// exceeds the live tuple count.
    pub fn remove_reserve(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::Underflow { op: "remove_reserve" });
        }
        if self.alloc_count == 0 || n > self.alloc_count {
            return Err(Error::Underflow { op: "remove_reserve" });
        }
        let Some(front_id) = self.txn_left else {
            return Err(Error::Underflow { op: "remove_reserve" });
        };
        let tuple_size = self.tuple_size;
        let tuples_per_chunk = self.chunk_size / tuple_size;
        self.batched.begin(n);

        let mut remaining = n;
        for chunk in self.list.iter_from(front_id) {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(chunk.allocated_slots()).min(tuples_per_chunk);
            let begin = chunk.range_begin() as usize;
            self.batched
                .add_region(chunk.id().as_u64(), RemovableRegion::new(begin, take));
            remaining -= take;
        }
        Ok(())
    }

    /// Phase 2 of the batch-delete protocol: names one address for
    /// removal. Must be called exactly `n` times (matching the prior
    /// `remove_reserve(n)`) before [`CompactingChunks::remove_force`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if `addr` is not a live address in
    /// this allocator.
    pub fn remove_add(&mut self, addr: *const u8) -> Result<AddOutcome> {
        let chunk_id = self
            .list
            .chunk_covering(addr as usize)
            .filter(|c| c.contains(addr))
            .map(Chunk::id)
            .ok_or(Error::OutOfRange { addr: addr as usize })?;
        let tuple_size = self.tuple_size;
        self.finalize(addr);
        let stays = self
            .batched
            .record(chunk_id.as_u64(), addr as usize, tuple_size);
        Ok(if stays {
            AddOutcome::StaysAsHole
        } else {
            AddOutcome::WillMove
        })
    }

    /// Phase 3 of the batch-delete protocol: invokes `memcpy_cb` with
    /// `(dst, src)` pairs — `dst` is a slot whose caller-deleted occupant
    /// just freed it, `src` is a survivor rescued out of the storage about
    /// to be reclaimed — then retires that storage. Returns the number of
    /// tuples removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] if phase 2 hasn't named exactly the
    /// reserved count of addresses yet, or [`Error::Overflow`] if the
    /// number of rescued survivors and freed destinations computed from
    /// phase 2 disagree (an internal invariant failure).
    pub fn remove_force(
        &mut self,
        mut memcpy_cb: impl FnMut(&[(*const u8, *const u8)]),
    ) -> Result<usize> {
        if !self.batched.complete() {
            return Err(Error::Logic(
                "remove_force called before remove_add named every reserved address",
            ));
        }
        let tuple_size = self.tuple_size;
        let pairs = self.batched.movements(tuple_size)?;
        let n = self.batched.reserved;
        let ptr_pairs: Vec<(*const u8, *const u8)> = pairs
            .iter()
            .map(|&(dst, src)| (dst as *const u8, src as *const u8))
            .collect();
        memcpy_cb(&ptr_pairs);

        // Every slot in every region is now either a rescued survivor
        // (already copied out) or was itself a caller-named deletion —
        // the region's storage, front chunks in full and the last region
        // partially, can be reclaimed.
        let region_ids: Vec<u64> = self.batched.regions.keys().copied().collect();
        for &chunk_id_raw in &region_ids {
            let chunk_id = ChunkId::new(chunk_id_raw);
            let take = self.batched.regions[&chunk_id_raw].bits.len();
            if let Some(chunk) = self.list.find_by_id_mut(chunk_id) {
                let allocated = chunk.allocated_slots();
                if take >= allocated {
                    chunk.set_next_to_begin();
                } else {
                    let begin = chunk.range_begin() as usize;
                    let remaining = allocated - take;
                    // SAFETY: both the source `(begin + take*tuple_size)`
                    // and destination `begin` ranges of `remaining *
                    // tuple_size` bytes lie within this chunk's single
                    // allocation.
                    unsafe {
                        std::ptr::copy(
                            (begin + take * tuple_size) as *const u8,
                            begin as *mut u8,
                            remaining * tuple_size,
                        );
                    }
                    chunk.rewind_by(take);
                }
            }
            self.releasable(chunk_id);
        }

        self.alloc_count -= n;
        self.batched.finish();
        tracing::info!(removed = n, "batch remove completed");
        Ok(n)
    }

    /// Applies `remove_cb` to every live tuple in txn order, then discards
    /// every chunk (spec §4.3 Clear). While frozen, also finalizes the
    /// region between the frozen right boundary and the current tail
    /// (content created during the snapshot that the snapshot will never
    /// observe).
    pub fn clear(&mut self, mut remove_cb: impl FnMut(*const u8)) {
        let addrs: Vec<*const u8> = self.txn_addrs();
        for addr in addrs {
            remove_cb(addr);
            self.finalize(addr);
        }
        if self.frozen {
            if let Some(bounds) = self.frozen_boundaries {
                for addr in self.snapshot_only_addrs(bounds.right) {
                    self.finalize(addr);
                }
            }
            self.txn_left = None;
        } else {
            self.list = ChunkList::new();
            self.txn_left = None;
        }
        self.alloc_count = 0;
        self.pending_head_removed = 0;
    }

    fn txn_addrs(&self) -> Vec<*const u8> {
        let Some(front_id) = self.txn_left else {
            return Vec::new();
        };
        let tuple_size = self.tuple_size;
        self.list
            .iter_from(front_id)
            .flat_map(|chunk| {
                let begin = chunk.range_begin() as usize;
                let n = chunk.allocated_slots();
                (0..n).map(move |i| (begin + i * tuple_size) as *const u8)
            })
            .collect()
    }

    /// Addresses created after `right` (the frozen right boundary) through
    /// the current tail — data the snapshot will never see and that must
    /// still be finalized once clear discards it.
    fn snapshot_only_addrs(&self, right: Position) -> Vec<*const u8> {
        let Position::At { chunk_id: right_id, addr: right_addr } = right else {
            return Vec::new();
        };
        let tuple_size = self.tuple_size;
        self.list
            .iter_from(right_id)
            .flat_map(move |chunk| {
                let start = if chunk.id().as_u64() == right_id.as_u64() {
                    right_addr
                } else {
                    chunk.range_begin() as usize
                };
                let end = chunk.range_next() as usize;
                (start..end)
                    .step_by(tuple_size.max(1))
                    .map(|a| a as *const u8)
            })
            .collect()
    }

    /// Begins a snapshot: records the current txn-view boundaries as
    /// `frozen_boundaries` and flips to a frozen state (spec §4.3 state
    /// machine).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] if already frozen.
    pub fn freeze(&mut self) -> Result<()> {
        if self.frozen {
            return Err(Error::Logic("freeze called while already frozen"));
        }
        let left = match self.txn_left {
            Some(id) => {
                let begin = self
                    .list
                    .find_by_id(id)
                    .map(CompactingChunk::range_begin)
                    .expect("txn_left names a chunk present in the list");
                Position::at(id, begin)
            }
            None => Position::Empty,
        };
        let right = match self.list.back() {
            Some(chunk) => Position::at(chunk.id(), chunk.range_next()),
            None => Position::Empty,
        };
        self.frozen_boundaries = Some(FrozenBoundaries { left, right });
        self.frozen = true;
        tracing::info!(?left, ?right, "allocator frozen");
        Ok(())
    }

    /// Ends the snapshot (after its iterator is fully drained): drops any
    /// chunks that sit strictly before the current `txn_left` and are no
    /// longer needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] if not currently frozen.
    pub fn thaw(&mut self) -> Result<()> {
        if !self.frozen {
            return Err(Error::Logic("thaw called while not frozen"));
        }
        self.frozen = false;
        self.frozen_boundaries = None;
        if let Some(front_id) = self.txn_left {
            let stale: Vec<ChunkId> = self
                .list
                .iter()
                .take_while(|c| c.id().as_u64() != front_id.as_u64())
                .map(Chunk::id)
                .collect();
            let stale_count = stale.len();
            for id in stale {
                self.list.remove(id);
            }
            tracing::info!(retired = stale_count, "allocator thawed");
        } else {
            self.list = ChunkList::new();
            tracing::info!(retired = 0, "allocator thawed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen_tuple(i: u64) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&i.to_le_bytes());
        buf
    }

    unsafe fn write_tuple(addr: *mut u8, value: &[u8; 16]) {
        unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), addr, 16) };
    }

    unsafe fn read_tuple(addr: *const u8) -> [u8; 16] {
        let mut buf = [0u8; 16];
        unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 16) };
        buf
    }

    #[test]
    fn scenario_a_alloc_free_iterate() {
        let mut chunks = CompactingChunks::new(16);
        let mut addrs = Vec::new();
        for i in 0..96u64 {
            let addr = chunks.allocate();
            unsafe { write_tuple(addr, &gen_tuple(i)) };
            addrs.push(addr);
        }
        assert_eq!(chunks.size(), 96);
        for &addr in &addrs {
            chunks.free(addr.cast_const()).unwrap();
        }
        assert_eq!(chunks.size(), 0);
        assert!(chunks.list().is_empty());
    }

    #[test]
    fn scenario_b_head_compaction_moves_tail_into_hole() {
        let mut chunks = CompactingChunks::new(16);
        let mut addrs = Vec::new();
        for i in 0..32u64 {
            let addr = chunks.allocate();
            unsafe { write_tuple(addr, &gen_tuple(i)) };
            addrs.push(addr);
        }
        let hole = addrs[5];
        let src = chunks.free(hole.cast_const()).unwrap().unwrap();
        assert_eq!(src, addrs[31].cast_const());
        assert_eq!(chunks.size(), 31);
        let moved_value = unsafe { read_tuple(hole.cast_const()) };
        assert_eq!(moved_value, gen_tuple(31));
    }

    #[test]
    fn freeze_thaw_round_trip() {
        let mut chunks = CompactingChunks::new(16);
        for i in 0..40u64 {
            let addr = chunks.allocate();
            unsafe { write_tuple(addr, &gen_tuple(i)) };
        }
        chunks.freeze().unwrap();
        assert_eq!(chunks.state(), AllocatorState::FrozenActive);
        assert!(chunks.freeze().is_err());
        chunks.thaw().unwrap();
        assert_eq!(chunks.state(), AllocatorState::Active);
        assert!(chunks.thaw().is_err());
    }

    #[test]
    fn batch_remove_with_holes_in_one_chunk() {
        let mut chunks = CompactingChunks::new(16);
        let mut addrs = Vec::new();
        for i in 0..32u64 {
            let addr = chunks.allocate();
            unsafe { write_tuple(addr, &gen_tuple(i)) };
            addrs.push(addr);
        }
        chunks.remove_reserve(10).unwrap();
        for &addr in &addrs[0..10] {
            chunks.remove_add(addr.cast_const()).unwrap();
        }
        let removed = chunks
            .remove_force(|pairs| {
                for &(_hole, _mover) in pairs {
                    // In a real caller this copies tuple bytes hole<-mover;
                    // nothing to copy here since all ten holes sit at the
                    // removable region's front and there are no movers.
                }
            })
            .unwrap();
        assert_eq!(removed, 10);
        assert_eq!(chunks.size(), 22);
    }

    #[test]
    fn remove_from_head_shrinks_front_chunk() {
        let mut chunks = CompactingChunks::new(16);
        let mut addrs = Vec::new();
        for i in 0..40u64 {
            let addr = chunks.allocate();
            unsafe { write_tuple(addr, &gen_tuple(i)) };
            addrs.push(addr);
        }
        for &addr in &addrs[0..5] {
            chunks.remove(Direction::FromHead, Some(addr.cast_const())).unwrap();
        }
        chunks.remove(Direction::FromHead, None).unwrap();
        assert_eq!(chunks.size(), 35);
    }

    #[test]
    fn remove_from_head_forbidden_while_frozen() {
        let mut chunks = CompactingChunks::new(16);
        chunks.allocate();
        chunks.freeze().unwrap();
        let err = chunks.remove(Direction::FromHead, None).unwrap_err();
        assert!(matches!(err, Error::Logic(_)));
    }
}
