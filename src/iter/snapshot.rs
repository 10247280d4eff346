//! Frozen snapshot iterator (spec §4.6): yields tuples as they existed at
//! freeze time, resolving each live txn address through the hook's
//! pre-image map.

use std::cell::Cell;
use std::rc::Rc;

use crate::chunk::CompactingChunk;
use crate::compacting_chunks::{CompactingChunks, FrozenBoundaries, Position};
use crate::hook::TxnPreHook;
use crate::iter::ChunksIdValidator;

/// Non-owning handle the hook consults to find out whether the active RW
/// snapshot iterator has already visited a given address, so it can skip
/// recording a pre-image for slots the snapshot will never read again.
/// Grounded on spec.md §9's note that the observer must not extend the
/// iterator's lifetime: `Rc<Cell<_>>` rather than a raw pointer, since §5
/// is single-threaded and the teacher reserves `Arc`/`parking_lot` for its
/// genuinely multi-threaded subsystems.
#[derive(Debug, Clone, Default)]
pub struct IteratorObserver {
    position: Rc<Cell<Option<Position>>>,
}

impl IteratorObserver {
    /// A fresh observer with no recorded position yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn advance_to(&self, pos: Position) {
        self.position.set(Some(pos));
    }

    /// True iff `addr` (at `chunk_id`) has already been visited by the
    /// iterator this observer tracks.
    #[must_use]
    pub fn has_passed(&self, candidate: Position) -> bool {
        match self.position.get() {
            Some(current) => candidate <= current,
            None => false,
        }
    }
}

/// Iterates tuples as they existed at freeze time: for each live txn
/// address in the frozen boundary range, yields the hook's pre-image if
/// one was recorded, else the address's current bytes.
pub struct SnapshotIter<'a> {
    hook: &'a TxnPreHook,
    tuple_size: usize,
    bounds: FrozenBoundaries,
    chunk_iter: Box<dyn Iterator<Item = &'a CompactingChunk> + 'a>,
    current: Option<(&'a CompactingChunk, usize)>,
    observer: IteratorObserver,
    _guard: Option<ChunksIdValidator>,
}

/// The in-chunk end of the snapshot-visible slice for `chunk`: clamped to
/// `bounds.right.addr` for the frozen right-boundary chunk, else the
/// chunk's full `range_end` (either because it was full at freeze time, or
/// because it is the current `txn_left` chunk whose live data has since
/// shrunk further but whose frozen slice the snapshot still sees in full).
fn chunk_end(chunk: &CompactingChunk, bounds: &FrozenBoundaries) -> usize {
    if let Position::At { chunk_id, addr } = bounds.right {
        if chunk_id.as_u64() == chunk.id().as_u64() {
            return addr;
        }
    }
    chunk.range_end() as usize
}

fn chunk_start(chunk: &CompactingChunk, bounds: &FrozenBoundaries) -> usize {
    if let Position::At { chunk_id, addr } = bounds.left {
        if chunk_id.as_u64() == chunk.id().as_u64() {
            return addr;
        }
    }
    chunk.range_begin() as usize
}

impl<'a> SnapshotIter<'a> {
    /// A read-only snapshot iterator: does not register with
    /// [`ChunksIdValidator`] and does not retire chunks as it drains.
    #[must_use]
    pub fn read_only(chunks: &'a CompactingChunks, hook: &'a TxnPreHook) -> Self {
        Self::build(chunks, hook, None)
    }

    /// A read-write snapshot iterator: the engine guarantees at most one
    /// of these per allocator via [`ChunksIdValidator`]; as it advances
    /// past a chunk that now sits strictly before `txn_left`, that chunk
    /// is popped from the list, which is what allows storage to be
    /// reclaimed while a long-running snapshot streams.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Logic`] if another read-write
    /// snapshot iterator is already active for this allocator.
    pub fn read_write(
        chunks: &'a mut CompactingChunks,
        hook: &'a TxnPreHook,
    ) -> crate::error::Result<(Self, IteratorObserver)> {
        let guard = ChunksIdValidator::register(chunks.id())?;
        let observer = IteratorObserver::new();
        let iter = Self::build(chunks, hook, Some(guard));
        Ok((iter, observer))
    }

    fn build(
        chunks: &'a CompactingChunks,
        hook: &'a TxnPreHook,
        guard: Option<ChunksIdValidator>,
    ) -> Self {
        let tuple_size = chunks.tuple_size();
        let bounds = chunks.frozen_boundaries().unwrap_or(FrozenBoundaries {
            left: Position::Empty,
            right: Position::Empty,
        });
        let start_id = match bounds.left {
            Position::At { chunk_id, .. } => Some(chunk_id),
            Position::Empty => None,
        };
        let mut chunk_iter: Box<dyn Iterator<Item = &'a CompactingChunk> + 'a> = match start_id {
            Some(id) => Box::new(chunks.list().iter_from(id)),
            None => Box::new(std::iter::empty()),
        };
        let current = chunk_iter.next().map(|c| (c, 0));
        Self {
            hook,
            tuple_size,
            bounds,
            chunk_iter,
            current,
            observer: IteratorObserver::new(),
            _guard: guard,
        }
    }

    /// This iterator's observer handle, for wiring into the hook.
    #[must_use]
    pub fn observer(&self) -> IteratorObserver {
        self.observer.clone()
    }
}

impl Iterator for SnapshotIter<'_> {
    type Item = *const u8;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (chunk, idx) = self.current?;
            let start = chunk_start(chunk, &self.bounds);
            let end = chunk_end(chunk, &self.bounds);
            let addr = start + idx * self.tuple_size;
            if addr >= end {
                self.current = self.chunk_iter.next().map(|c| (c, 0));
                continue;
            }
            self.current = Some((chunk, idx + 1));
            let ptr = addr as *const u8;
            self.observer
                .advance_to(Position::at(chunk.id(), ptr));
            return Some(self.hook.resolve(ptr));
        }
    }
}
