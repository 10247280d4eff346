//! Elastic iterator (spec §4.6): a long-lived read-only cursor that
//! self-heals after arbitrary intervening mutations, bounded by a right
//! boundary captured the moment it first finds live data.

use crate::compacting_chunks::{CompactingChunks, Position};
use crate::list::Chunk;

#[derive(Debug, Clone, Copy)]
enum State {
    /// The allocator was empty the last time this iterator looked.
    NotStarted,
    /// Tracking a live position, bounded by `right` (captured once, at
    /// the moment iteration first found live data).
    Active { pos: Position, right: Position },
    /// Iteration has permanently finished.
    Drained,
}

/// Self-healing cursor over a [`CompactingChunks`]' txn view. Unlike
/// [`super::TxnIter`], it does not borrow the allocator for its lifetime:
/// each [`ElasticIter::advance`] call takes a fresh reference, so it
/// tolerates arbitrary mutation (including compaction that invalidates its
/// remembered address) between calls.
#[derive(Debug, Clone, Copy)]
pub struct ElasticIter {
    tuple_size: usize,
    state: State,
}

impl ElasticIter {
    /// A fresh cursor that will initialize itself on its first
    /// [`ElasticIter::advance`] call that finds live data.
    #[must_use]
    pub fn new(tuple_size: usize) -> Self {
        Self {
            tuple_size,
            state: State::NotStarted,
        }
    }

    /// True once this iterator has permanently finished.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        matches!(self.state, State::Drained)
    }

    /// Advances and returns the next live address, self-healing against
    /// compaction/removal that happened since the previous call; `None`
    /// once drained or if the allocator is still empty.
    pub fn advance(&mut self, chunks: &CompactingChunks) -> Option<*const u8> {
        if matches!(self.state, State::Drained) {
            return None;
        }
        if matches!(self.state, State::NotStarted) {
            let front_id = chunks.txn_left_id()?;
            let front = chunks.list().find_by_id(front_id)?;
            let back = chunks.list().back()?;
            let pos = Position::at(front_id, front.range_begin());
            let right = Position::at(back.id(), back.range_next());
            self.state = State::Active { pos, right };
        }
        let State::Active { pos, right } = self.state else {
            unreachable!("just ensured Active above")
        };
        let Position::At {
            mut chunk_id,
            mut addr,
        } = pos
        else {
            self.state = State::Drained;
            return None;
        };

        let Some(txn_left) = chunks.txn_left_id() else {
            self.state = State::Drained;
            return None;
        };
        if chunk_id.as_u64() != txn_left.as_u64() && chunk_id.less_rolling(txn_left) {
            let Some(jumped) = chunks.list().find_by_id(txn_left) else {
                self.state = State::Drained;
                return None;
            };
            chunk_id = txn_left;
            addr = jumped.range_begin() as usize;
        }

        let Some(chunk) = chunks.list().find_by_id(chunk_id) else {
            self.state = State::Drained;
            return None;
        };
        if !chunk.contains(addr as *const u8) {
            match chunks.list().iter_from(chunk_id).nth(1) {
                Some(next_chunk) => {
                    chunk_id = next_chunk.id();
                    addr = next_chunk.range_begin() as usize;
                }
                None => {
                    self.state = State::Drained;
                    return None;
                }
            }
        }

        let current = Position::at(chunk_id, addr as *const u8);
        if !(current < right) {
            self.state = State::Drained;
            return None;
        }

        let next_addr = addr + self.tuple_size;
        self.state = State::Active {
            pos: Position::at(chunk_id, next_addr as *const u8),
            right,
        };
        Some(addr as *const u8)
    }
}
