//! `ChunkHolder`: one fixed-size bump-allocated buffer (spec §4.1).

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::list::ChunkId;

/// Smallest number of tuples a chunk must fit, per spec §3's chunk-size
/// selection rule.
pub const MIN_TUPLES_PER_CHUNK: usize = 32;

/// Preferred chunk-size series spec §3 selects from: 4 KiB doubling up to
/// 16 MiB.
pub const PREFERRED_CHUNK_SIZES: &[usize] = &[
    4 * 1024,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    128 * 1024,
    256 * 1024,
    512 * 1024,
    1024 * 1024,
    2 * 1024 * 1024,
    4 * 1024 * 1024,
    8 * 1024 * 1024,
    16 * 1024 * 1024,
];

/// Picks the smallest preferred chunk size that fits at least
/// [`MIN_TUPLES_PER_CHUNK`] tuples of `tuple_size` bytes, and returns the
/// exact byte size to allocate (`tuples_per_chunk * tuple_size`, which may be
/// smaller than the series entry since chunk size need not divide evenly).
///
/// # Panics
///
/// Panics if `tuple_size` is zero or so large that no series entry (up to
/// 16 MiB) fits 32 tuples — constructing such an allocator is a programming
/// error, not a runtime condition to recover from.
#[must_use]
pub fn choose_chunk_size(tuple_size: usize) -> usize {
    assert!(tuple_size > 0, "tuple_size must be non-zero");
    for &candidate in PREFERRED_CHUNK_SIZES {
        let tuples = candidate / tuple_size;
        if tuples >= MIN_TUPLES_PER_CHUNK {
            return tuples * tuple_size;
        }
    }
    panic!(
        "tuple_size {tuple_size} is too large: no chunk size up to 16 MiB fits {MIN_TUPLES_PER_CHUNK} tuples"
    );
}

/// Backend that supplies and reclaims the raw memory chunks are built from.
///
/// This is the seam spec §1 describes as "thread-local pool infrastructure"
/// and "engine partition-id plumbing": this crate only models the contract,
/// a caller may plug in a pool-backed implementation.
pub trait ChunkBackend {
    /// Allocates `layout.size()` bytes aligned to `layout.align()`. Returns
    /// `None` on allocation failure.
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Frees memory previously returned by `alloc` with the same layout.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `self.alloc(layout)` and not already
    /// freed.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Default backend: the process global allocator.
#[derive(Debug, Default)]
pub struct SystemBackend;

impl ChunkBackend for SystemBackend {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: `alloc` requires a non-zero-sized, well-formed layout.
        // - Condition 1: `layout.size() > 0` is checked above.
        // - Condition 2: `Layout` is constructed by `ChunkHolder::new` from a
        //   valid size/align pair.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: caller contract of `ChunkBackend::dealloc` requires `ptr`
        // to have come from a matching `alloc` call on this backend.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// One fixed-size, contiguous, bump-allocated buffer of tuple slots.
pub struct ChunkHolder {
    id: ChunkId,
    tuple_size: usize,
    begin: NonNull<u8>,
    next: *mut u8,
    end: *mut u8,
    layout: Layout,
    backend: Rc<dyn ChunkBackend>,
}

impl fmt::Debug for ChunkHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkHolder")
            .field("id", &self.id)
            .field("tuple_size", &self.tuple_size)
            .field("begin", &self.begin)
            .field("next", &self.next)
            .field("end", &self.end)
            .finish()
    }
}

impl ChunkHolder {
    /// Allocates a new chunk of `chunk_size` bytes (must be a multiple of
    /// `tuple_size`) from `backend`.
    ///
    /// # Panics
    ///
    /// Panics if the backend fails to allocate, or if `chunk_size` is not a
    /// positive multiple of `tuple_size`.
    pub fn new(
        id: ChunkId,
        tuple_size: usize,
        chunk_size: usize,
        backend: Rc<dyn ChunkBackend>,
    ) -> Self {
        assert!(tuple_size > 0, "tuple_size must be non-zero");
        assert!(
            chunk_size > 0 && chunk_size % tuple_size == 0,
            "chunk_size must be a positive multiple of tuple_size"
        );
        let layout = Layout::from_size_align(chunk_size, std::mem::align_of::<usize>())
            .expect("chunk layout must be valid");
        let begin = backend
            .alloc(layout)
            .unwrap_or_else(|| panic!("chunk allocation of {chunk_size} bytes failed"));
        // SAFETY: `begin` was just allocated by `backend` for exactly
        // `layout.size()` bytes, so `begin.as_ptr().add(chunk_size)` is one
        // past the end of that allocation — a valid (non-dereferenced) end
        // pointer.
        let end = unsafe { begin.as_ptr().add(chunk_size) };
        Self {
            id,
            tuple_size,
            begin,
            next: begin.as_ptr(),
            end,
            layout,
            backend,
        }
    }

    /// This chunk's id.
    #[must_use]
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Fixed tuple size this chunk was constructed with.
    #[must_use]
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    /// Start of this chunk's storage range.
    #[must_use]
    pub fn range_begin(&self) -> *const u8 {
        self.begin.as_ptr()
    }

    /// Current bump pointer: `[range_begin, range_next)` is allocated.
    #[must_use]
    pub fn range_next(&self) -> *const u8 {
        self.next
    }

    /// End of this chunk's storage range.
    #[must_use]
    pub fn range_end(&self) -> *const u8 {
        self.end
    }

    /// True once the bump pointer has reached the end of storage.
    #[must_use]
    pub fn full(&self) -> bool {
        self.next == self.end
    }

    /// True when nothing has been allocated from this chunk yet.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.next == self.begin.as_ptr()
    }

    /// True iff `addr` is an allocated, tuple-aligned slot in this chunk.
    #[must_use]
    pub fn contains(&self, addr: *const u8) -> bool {
        let begin = self.begin.as_ptr() as usize;
        let next = self.next as usize;
        let addr = addr as usize;
        addr >= begin && addr < next && (addr - begin) % self.tuple_size == 0
    }

    /// True iff `addr` lies anywhere in `[range_begin, range_end)`, whether
    /// or not it has been allocated yet. Used by global (non-txn-scoped)
    /// address resolution.
    #[must_use]
    pub fn covers(&self, addr: *const u8) -> bool {
        let begin = self.begin.as_ptr() as usize;
        let end = self.end as usize;
        let addr = addr as usize;
        addr >= begin && addr < end
    }

    /// Bump-allocates one slot, returning its address, or `None` if full.
    pub fn allocate(&mut self) -> Option<*mut u8> {
        if self.full() {
            return None;
        }
        let slot = self.next;
        // SAFETY: `self.next < self.end` (checked by `full()` above) and
        // both are derived from the same allocation, so advancing by one
        // tuple stays within (or exactly at) `end`.
        self.next = unsafe { self.next.add(self.tuple_size) };
        Some(slot)
    }

    /// Rewinds the bump pointer by `n` tuples. Used by `CompactingChunks`
    /// and the batch-delete protocol to shrink a chunk's live range without
    /// touching its bytes.
    ///
    /// # Panics
    ///
    /// Panics if rewinding by `n` tuples would move `next` before `begin`.
    pub fn rewind_by(&mut self, n: usize) {
        let bytes = n * self.tuple_size;
        let begin = self.begin.as_ptr() as usize;
        let next = self.next as usize;
        assert!(next - begin >= bytes, "rewind past chunk begin");
        // SAFETY: just checked `next - bytes >= begin`, staying in bounds.
        self.next = unsafe { self.next.sub(bytes) };
    }

    /// Resets the bump pointer to the start of the chunk, as if nothing had
    /// ever been allocated.
    pub fn reset(&mut self) {
        self.next = self.begin.as_ptr();
    }

    /// Number of slots currently bump-allocated (not necessarily all live —
    /// callers tracking holes must subtract those separately).
    #[must_use]
    pub fn allocated_slots(&self) -> usize {
        (self.next as usize - self.begin.as_ptr() as usize) / self.tuple_size
    }
}

impl Drop for ChunkHolder {
    fn drop(&mut self) {
        // SAFETY: `self.begin`/`self.layout` are exactly the pair returned
        // by `self.backend.alloc` in `new`, and this runs at most once per
        // `ChunkHolder` (ordinary `Drop` semantics).
        unsafe {
            self.backend.dealloc(self.begin, self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_CHUNK_SIZE;

    #[test]
    fn chunk_size_fits_at_least_32_tuples() {
        for tuple_size in [1usize, 8, 16, 100, 4096] {
            let size = choose_chunk_size(tuple_size);
            assert!(size / tuple_size >= MIN_TUPLES_PER_CHUNK);
            assert!(size <= MAX_CHUNK_SIZE);
        }
    }

    #[test]
    #[should_panic(expected = "too large")]
    fn chunk_size_panics_when_nothing_fits() {
        choose_chunk_size(MAX_CHUNK_SIZE);
    }

    #[test]
    fn allocate_bumps_and_fills() {
        let backend: Rc<dyn ChunkBackend> = Rc::new(SystemBackend);
        let mut chunk = ChunkHolder::new(ChunkId::new(0), 16, 16 * 32, backend);
        assert!(chunk.empty());
        let mut addrs = Vec::new();
        for _ in 0..32 {
            addrs.push(chunk.allocate().unwrap());
        }
        assert!(chunk.full());
        assert!(chunk.allocate().is_none());
        for (i, &a) in addrs.iter().enumerate() {
            assert!(chunk.contains(a), "slot {i} should be contained");
        }
    }

    #[test]
    fn rewind_shrinks_allocated_range() {
        let backend: Rc<dyn ChunkBackend> = Rc::new(SystemBackend);
        let mut chunk = ChunkHolder::new(ChunkId::new(0), 16, 16 * 32, backend);
        for _ in 0..10 {
            chunk.allocate().unwrap();
        }
        assert_eq!(chunk.allocated_slots(), 10);
        chunk.rewind_by(3);
        assert_eq!(chunk.allocated_slots(), 7);
    }
}
