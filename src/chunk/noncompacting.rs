//! Non-relocating chunk variants and the chunk list allocator over them
//! (spec §4.1, §4.5).

use crate::chunk::holder::ChunkHolder;
use crate::list::{Chunk, ChunkId, ChunkList};

/// Number of empty chunks a [`NonCompactingChunks`] tolerates before
/// sweeping them from the list.
pub const EMPTY_CHUNK_SWEEP_THRESHOLD: usize = 64;

/// A non-compacting chunk that can free slots in any order, precisely.
///
/// Grounded on `MemoryPool<T>`'s `free_indices` stack: a free'd slot is
/// pushed onto `freed` and handed back out before the bump pointer advances
/// again, so churn inside one chunk doesn't grow its footprint.
#[derive(Debug)]
pub struct EagerChunk {
    holder: ChunkHolder,
    freed: Vec<*mut u8>,
}

impl EagerChunk {
    /// Wraps a freshly allocated holder.
    #[must_use]
    pub fn new(holder: ChunkHolder) -> Self {
        Self {
            holder,
            freed: Vec::new(),
        }
    }

    /// Allocates a slot: reuses a freed one if available, else bumps.
    pub fn allocate(&mut self) -> Option<*mut u8> {
        self.freed.pop().or_else(|| self.holder.allocate())
    }

    /// Frees a previously allocated slot. Tail slots shrink the bump
    /// pointer directly; interior slots are pushed onto the free stack.
    /// Returns true if the chunk became fully empty as a result.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not within this chunk's allocated range.
    pub fn free(&mut self, addr: *mut u8) -> bool {
        assert!(
            self.holder.contains(addr),
            "free of address not owned by this chunk"
        );
        let tuple_size = self.holder.tuple_size();
        // SAFETY: `range_next()` is derived from the same allocation as
        // `addr` (just asserted contained), so subtracting one tuple_size
        // stays within the allocation.
        let tail = unsafe { self.holder.range_next().sub(tuple_size) } == addr.cast_const();
        if tail {
            self.holder.rewind_by(1);
            while let Some(&last) = self.freed.last() {
                // SAFETY: both pointers are in-bounds for this chunk's
                // allocation; comparing their addresses is always valid.
                let new_tail =
                    unsafe { self.holder.range_next().sub(tuple_size) } == last.cast_const();
                if !new_tail {
                    break;
                }
                self.freed.pop();
                self.holder.rewind_by(1);
            }
        } else {
            self.freed.push(addr);
        }
        self.empty()
    }

    /// True once every allocated slot has been freed.
    #[must_use]
    pub fn empty(&self) -> bool {
        let allocated = self.holder.allocated_slots();
        allocated == 0 || allocated == self.freed.len()
    }

    /// True once the bump pointer has reached the end of storage and no
    /// freed slots remain to reuse.
    #[must_use]
    pub fn full(&self) -> bool {
        self.holder.full() && self.freed.is_empty()
    }
}

impl Chunk for EagerChunk {
    fn id(&self) -> ChunkId {
        self.holder.id()
    }
    fn range_begin_addr(&self) -> usize {
        self.holder.range_begin() as usize
    }
}

/// A non-compacting chunk that tracks only a freed *count*, not individual
/// addresses. Cheaper than [`EagerChunk`] when callers never need to reuse a
/// specific freed slot before the chunk fills — e.g. `TxnPreHook`'s
/// pre-image copy area, where each entry is freed exactly once.
#[derive(Debug)]
pub struct LazyChunk {
    holder: ChunkHolder,
    freed_count: usize,
}

impl LazyChunk {
    /// Wraps a freshly allocated holder.
    #[must_use]
    pub fn new(holder: ChunkHolder) -> Self {
        Self {
            holder,
            freed_count: 0,
        }
    }

    /// Bump-allocates a slot. Unlike `EagerChunk`, freed slots are never
    /// reused within this chunk.
    pub fn allocate(&mut self) -> Option<*mut u8> {
        self.holder.allocate()
    }

    /// Marks one slot as freed. Tail frees shrink the bump pointer;
    /// otherwise the freed count is incremented. Returns true if the chunk
    /// became fully empty as a result.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not within this chunk's allocated range.
    pub fn free(&mut self, addr: *mut u8) -> bool {
        assert!(
            self.holder.contains(addr),
            "free of address not owned by this chunk"
        );
        let tuple_size = self.holder.tuple_size();
        // SAFETY: see `EagerChunk::free`; same allocation, in-bounds.
        let tail = unsafe { self.holder.range_next().sub(tuple_size) } == addr.cast_const();
        if tail {
            self.holder.rewind_by(1);
        } else {
            self.freed_count += 1;
        }
        self.empty()
    }

    /// True once the bump pointer has reached the end of storage. Only the
    /// bump pointer is inspected here: unlike `EagerChunk`, a `LazyChunk`
    /// never reuses freed interior slots, so freed count doesn't affect
    /// fullness.
    #[must_use]
    pub fn full(&self) -> bool {
        self.holder.full()
    }

    /// True once every allocated slot has been freed.
    #[must_use]
    pub fn empty(&self) -> bool {
        let allocated = self.holder.allocated_slots();
        allocated == 0 || allocated == self.freed_count
    }
}

impl Chunk for LazyChunk {
    fn id(&self) -> ChunkId {
        self.holder.id()
    }
    fn range_begin_addr(&self) -> usize {
        self.holder.range_begin() as usize
    }
}

/// A linear-scan chunk-list allocator over non-compacting chunks.
///
/// Grounded on `column_store/vacuum.rs`'s sweep-at-threshold idiom: rather
/// than reclaim an empty chunk's memory the instant it empties (churn-prone
/// when allocate/free alternate near a chunk boundary), empty chunks
/// accumulate up to [`EMPTY_CHUNK_SWEEP_THRESHOLD`] before a sweep pass
/// drops them from the list.
pub struct NonCompactingChunks<C> {
    list: ChunkList<C>,
    tuple_size: usize,
    chunk_size: usize,
    empty_chunks: usize,
    sweep_threshold: usize,
}

impl<C: Chunk> std::fmt::Debug for NonCompactingChunks<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonCompactingChunks")
            .field("tuple_size", &self.tuple_size)
            .field("chunk_size", &self.chunk_size)
            .field("len", &self.list.len())
            .field("empty_chunks", &self.empty_chunks)
            .finish()
    }
}

impl<C: Chunk> NonCompactingChunks<C> {
    /// A new, empty chunk list for `tuple_size`-byte tuples, using the
    /// default [`EMPTY_CHUNK_SWEEP_THRESHOLD`].
    #[must_use]
    pub fn new(tuple_size: usize) -> Self {
        Self::with_sweep_threshold(tuple_size, EMPTY_CHUNK_SWEEP_THRESHOLD)
    }

    /// Like [`NonCompactingChunks::new`] with an explicit sweep threshold
    /// (see [`crate::config::AllocatorConfig::empty_chunk_sweep_threshold`]).
    #[must_use]
    pub fn with_sweep_threshold(tuple_size: usize, sweep_threshold: usize) -> Self {
        let chunk_size = crate::chunk::holder::choose_chunk_size(tuple_size);
        Self {
            list: ChunkList::new(),
            tuple_size,
            chunk_size,
            empty_chunks: 0,
            sweep_threshold,
        }
    }

    /// Number of chunks currently in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True iff the list holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Resolves `addr` to its owning chunk, if any.
    #[must_use]
    pub fn chunk_covering(&self, addr: *const u8) -> Option<&C> {
        self.list.chunk_covering(addr as usize)
    }

    fn grow(&mut self, backend: &std::rc::Rc<dyn crate::chunk::holder::ChunkBackend>)
    where
        C: NonCompactingChunk,
    {
        let tuple_size = self.tuple_size;
        let chunk_size = self.chunk_size;
        let backend = backend.clone();
        self.list.emplace_back(move |id| {
            let holder = ChunkHolder::new(id, tuple_size, chunk_size, backend);
            C::from_holder(holder)
        });
        tracing::debug!(tuple_size, chunk_size, chunks = self.list.len(), "non-compacting chunk grown");
    }

    fn maybe_sweep(&mut self)
    where
        C: NonCompactingChunk,
    {
        if self.empty_chunks < self.sweep_threshold {
            return;
        }
        let before = self.list.len();
        self.list.remove_if(NonCompactingChunk::is_empty);
        tracing::debug!(
            swept = before - self.list.len(),
            remaining = self.list.len(),
            "swept empty non-compacting chunks"
        );
        self.empty_chunks = 0;
    }
}

/// Behaviors [`NonCompactingChunks`] needs from its element type, implemented
/// by both [`EagerChunk`] and [`LazyChunk`].
pub trait NonCompactingChunk: Chunk {
    /// Builds this chunk kind from a freshly allocated holder.
    fn from_holder(holder: ChunkHolder) -> Self;
    /// Allocates a slot from this chunk, if it has room.
    fn allocate_local(&mut self) -> Option<*mut u8>;
    /// True iff this chunk has no room left to allocate.
    fn is_full(&self) -> bool;
    /// True iff this chunk currently holds no live slots.
    fn is_empty(&self) -> bool;
    /// Frees a slot previously allocated from this chunk. Returns true if
    /// the chunk became empty.
    ///
    /// # Panics
    ///
    /// Implementations panic if `addr` was not allocated from this chunk.
    fn free_local(&mut self, addr: *mut u8) -> bool;
}

impl NonCompactingChunk for EagerChunk {
    fn from_holder(holder: ChunkHolder) -> Self {
        EagerChunk::new(holder)
    }
    fn allocate_local(&mut self) -> Option<*mut u8> {
        self.allocate()
    }
    fn is_full(&self) -> bool {
        self.full()
    }
    fn is_empty(&self) -> bool {
        self.empty()
    }
    fn free_local(&mut self, addr: *mut u8) -> bool {
        self.free(addr)
    }
}

impl NonCompactingChunk for LazyChunk {
    fn from_holder(holder: ChunkHolder) -> Self {
        LazyChunk::new(holder)
    }
    fn allocate_local(&mut self) -> Option<*mut u8> {
        self.allocate()
    }
    fn is_full(&self) -> bool {
        self.full()
    }
    fn is_empty(&self) -> bool {
        self.empty()
    }
    fn free_local(&mut self, addr: *mut u8) -> bool {
        self.free(addr)
    }
}

impl<C: NonCompactingChunk> NonCompactingChunks<C> {
    /// Allocates one slot, growing the list with a fresh chunk from
    /// `backend` if every existing chunk is full.
    pub fn allocate(
        &mut self,
        backend: &std::rc::Rc<dyn crate::chunk::holder::ChunkBackend>,
    ) -> *mut u8 {
        if let Some(addr) = self
            .list
            .iter_mut()
            .find_map(NonCompactingChunk::allocate_local)
        {
            return addr;
        }
        self.grow(backend);
        self.list
            .back_mut()
            .and_then(NonCompactingChunk::allocate_local)
            .expect("freshly grown chunk must have room")
    }

    /// Frees the slot at `addr`, locating its owning chunk via the
    /// by-address index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::OutOfRange`] if no chunk in this list
    /// covers `addr`.
    pub fn free(&mut self, addr: *mut u8) -> crate::error::Result<()> {
        let chunk = self
            .list
            .chunk_covering(addr as usize)
            .map(Chunk::id)
            .ok_or(crate::error::Error::OutOfRange { addr: addr as usize })?;
        let chunk = self
            .list
            .find_by_id_mut(chunk)
            .expect("id just resolved from the list");
        if chunk.free_local(addr) {
            self.empty_chunks += 1;
        }
        self.maybe_sweep();
        Ok(())
    }
}
