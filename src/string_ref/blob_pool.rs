//! `CompactingBlobPool`: the one concrete [`RelocatablePool`] this crate
//! ships, enough to exercise [`StringRef`] end-to-end against a real
//! compacting allocator (spec §4.7).

use std::collections::HashMap;

use crate::compacting_chunks::CompactingChunks;
use crate::string_ref::RelocatablePool;

/// A fixed-slot relocatable blob pool backed by
/// [`CompactingChunks`]. Each slot holds up to `max_blob_size` payload
/// bytes plus the `[u32 length]` prefix [`crate::string_ref::StringRef`]
/// expects. On `free`, `CompactingChunks::free`'s tail relocation may move
/// another live blob into the freed slot; this pool tracks each blob's
/// owning `StringRef` and rewrites its `ptr` field to the new address.
pub struct CompactingBlobPool {
    chunks: CompactingChunks,
    max_blob_size: usize,
    owners: HashMap<usize, *mut *mut u8>,
}

impl CompactingBlobPool {
    /// A pool whose slots can hold up to `max_blob_size` payload bytes
    /// each (plus the internal length prefix).
    #[must_use]
    pub fn new(max_blob_size: usize) -> Self {
        let tuple_size = max_blob_size + std::mem::size_of::<u32>();
        Self {
            chunks: CompactingChunks::new(tuple_size),
            max_blob_size,
            owners: HashMap::new(),
        }
    }

    /// This pool's fixed slot capacity for payload bytes.
    #[must_use]
    pub fn max_blob_size(&self) -> usize {
        self.max_blob_size
    }

    /// Number of blobs currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.size()
    }

    /// True iff no blobs are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl RelocatablePool for CompactingBlobPool {
    unsafe fn alloc(&mut self, size: usize, owner: *mut *mut u8) -> *mut u8 {
        assert!(
            size <= self.max_blob_size + std::mem::size_of::<u32>(),
            "blob of {size} bytes exceeds this pool's {}-byte slot",
            self.max_blob_size + std::mem::size_of::<u32>()
        );
        let addr = self.chunks.allocate();
        self.owners.insert(addr as usize, owner);
        addr
    }

    fn free(&mut self, ptr: *mut u8) {
        self.owners.remove(&(ptr as usize));
        let Ok(Some(moved_from)) = self.chunks.free(ptr.cast_const()) else {
            return;
        };
        let Some(owner) = self.owners.remove(&(moved_from as usize)) else {
            return;
        };
        // SAFETY: `owner` was registered by a prior `alloc` call and
        // remains valid for the lifetime of its `StringRef`, per this
        // pool's contract with `RelocatablePool::alloc` callers.
        unsafe { *owner = ptr };
        self.owners.insert(ptr as usize, owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_ref::StringRef;

    #[test]
    fn pool_tracks_live_blob_count() {
        let mut pool = CompactingBlobPool::new(32);
        let a = StringRef::create_persistent(&mut pool, b"abc");
        assert_eq!(pool.len(), 1);
        StringRef::destroy_persistent(a, &mut pool);
        assert!(pool.is_empty());
    }

    #[test]
    fn relocation_fixes_up_every_surviving_owner() {
        let mut pool = CompactingBlobPool::new(32);
        let mut refs: Vec<Box<StringRef>> = (0..20)
            .map(|i| StringRef::create_persistent(&mut pool, format!("v{i}").as_bytes()))
            .collect();
        let victim = refs.remove(5);
        StringRef::destroy_persistent(victim, &mut pool);
        for (i, sref) in refs.iter().enumerate() {
            let expected = if i < 5 {
                format!("v{i}")
            } else {
                format!("v{}", i + 1)
            };
            assert_eq!(sref.get_object(), expected.as_bytes());
        }
    }
}
