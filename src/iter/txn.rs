//! Txn iterator (spec §4.6): live tuples in txn-view order, from
//! `txn_left` through the tail chunk, skipping any slot for which `tag`
//! returns false.

use crate::chunk::CompactingChunk;
use crate::compacting_chunks::CompactingChunks;
use crate::iter::Tag;

/// Iterates live addresses in the current txn view, in chunk-list order
/// then ascending address within each chunk.
pub struct TxnIter<'a> {
    tuple_size: usize,
    chunk_iter: Box<dyn DoubleEndedIterator<Item = &'a CompactingChunk> + 'a>,
    current: Option<(&'a CompactingChunk, usize)>,
    tag: Tag<'a>,
}

impl<'a> TxnIter<'a> {
    /// A fresh iterator over `chunks`' current txn view, yielding every
    /// live slot for which `tag` returns true.
    #[must_use]
    pub fn new(chunks: &'a CompactingChunks, tag: Tag<'a>) -> Self {
        let tuple_size = chunks.tuple_size();
        let mut chunk_iter: Box<dyn DoubleEndedIterator<Item = &'a CompactingChunk> + 'a> =
            match chunks.txn_left_id() {
                Some(id) => Box::new(chunks.list().iter_from(id)),
                None => Box::new(std::iter::empty()),
            };
        let current = chunk_iter.next().map(|c| (c, 0));
        Self {
            tuple_size,
            chunk_iter,
            current,
            tag,
        }
    }

    /// Like [`TxnIter::new`] but accepts every slot.
    #[must_use]
    pub fn all(chunks: &'a CompactingChunks) -> Self {
        Self::new(chunks, crate::iter::all_tag())
    }
}

impl Iterator for TxnIter<'_> {
    type Item = *const u8;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (chunk, idx) = self.current?;
            let begin = chunk.range_begin() as usize;
            let next = chunk.range_next() as usize;
            let addr = begin + idx * self.tuple_size;
            if addr >= next {
                self.current = self.chunk_iter.next().map(|c| (c, 0));
                continue;
            }
            self.current = Some((chunk, idx + 1));
            let ptr = addr as *const u8;
            if (self.tag)(ptr) {
                return Some(ptr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn write_u64(addr: *mut u8, v: u64) {
        unsafe { std::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), addr, 8) };
    }

    unsafe fn read_u64(addr: *const u8) -> u64 {
        let mut buf = [0u8; 8];
        unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 8) };
        u64::from_le_bytes(buf)
    }

    #[test]
    fn yields_in_insertion_order() {
        let mut chunks = CompactingChunks::new(16);
        for i in 0..40u64 {
            let addr = chunks.allocate();
            unsafe { write_u64(addr, i) };
        }
        let values: Vec<u64> = TxnIter::all(&chunks)
            .map(|addr| unsafe { read_u64(addr) })
            .collect();
        assert_eq!(values, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn tag_filters_out_marked_slots() {
        let mut chunks = CompactingChunks::new(16);
        let mut addrs = Vec::new();
        for i in 0..10u64 {
            let addr = chunks.allocate();
            unsafe { write_u64(addr, i) };
            addrs.push(addr as usize);
        }
        let skip = addrs[3];
        let tag: Tag<'_> = Box::new(move |addr: *const u8| addr as usize != skip);
        let values: Vec<u64> = TxnIter::new(&chunks, tag)
            .map(|addr| unsafe { read_u64(addr) })
            .collect();
        assert_eq!(values, vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
    }
}
