//! Iterator family over a [`crate::compacting_chunks::CompactingChunks`]
//! (spec §4.6): txn-view, frozen-snapshot, and self-healing elastic
//! cursors, plus the process-wide validator that enforces at most one
//! read-write snapshot iterator per allocator.

pub mod elastic;
pub mod snapshot;
pub mod txn;

use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::Mutex;

pub use elastic::ElasticIter;
pub use snapshot::SnapshotIter;
pub use txn::TxnIter;

/// A predicate that filters which live slots an iterator yields. The
/// typical tag is "always true"; callers that mark logically-dead-but-not-
/// yet-reclaimed tuples (e.g. a reserved bit) supply a narrower one.
pub type Tag<'a> = Box<dyn Fn(*const u8) -> bool + 'a>;

/// A tag that accepts every slot.
#[must_use]
pub fn all_tag<'a>() -> Tag<'a> {
    Box::new(|_| true)
}

fn validator() -> &'static Mutex<HashSet<u64>> {
    static VALIDATOR: OnceLock<Mutex<HashSet<u64>>> = OnceLock::new();
    VALIDATOR.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Process-wide guard against more than one read-write snapshot iterator
/// existing at once for a given allocator id (spec §4.6). Grounded on the
/// teacher's sharded-singleton-behind-a-lock idiom in its concurrent memory
/// pool, scaled down from N shards to one global set: the teacher already
/// reaches for `parking_lot` for exactly this class of shared, rarely
/// contended guard.
#[derive(Debug)]
pub struct ChunksIdValidator {
    allocator_id: u64,
}

impl ChunksIdValidator {
    /// Registers `allocator_id` as having an active RW snapshot iterator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Logic`] if `allocator_id` is already
    /// registered (a second RW snapshot iterator on the same allocator).
    pub fn register(allocator_id: u64) -> crate::error::Result<Self> {
        let mut set = validator().lock();
        if !set.insert(allocator_id) {
            return Err(crate::error::Error::Logic(
                "at most one read-write snapshot iterator may be active per allocator",
            ));
        }
        Ok(Self { allocator_id })
    }
}

impl Drop for ChunksIdValidator {
    fn drop(&mut self) {
        validator().lock().remove(&self.allocator_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_for_same_id_fails() {
        let first = ChunksIdValidator::register(9001).unwrap();
        let err = ChunksIdValidator::register(9001).unwrap_err();
        assert!(matches!(err, crate::error::Error::Logic(_)));
        drop(first);
        assert!(ChunksIdValidator::register(9001).is_ok());
    }
}
