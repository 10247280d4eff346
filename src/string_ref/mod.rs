//! `StringRef`: stable indirection for non-inlined variable-length values
//! stored in a compacting pool that may relocate their backing bytes
//! (spec §4.7).

pub mod blob_pool;

pub use blob_pool::CompactingBlobPool;

use std::alloc::Layout;
use std::ptr::NonNull;

/// A pool of relocatable blobs: on compaction it rewrites the owning
/// `StringRef`'s `ptr` field in place rather than leaving it dangling.
/// `owner` is the address of that field (`&mut StringRef.ptr`), handed
/// back to the pool at allocation time so it knows what to fix up later.
pub trait RelocatablePool {
    /// Allocates `size` bytes, recording `owner` as the field to rewrite
    /// if this blob is later relocated.
    ///
    /// # Safety
    ///
    /// `owner` must remain valid (point at a live `*mut u8` field) for as
    /// long as the returned blob is live in the pool.
    unsafe fn alloc(&mut self, size: usize, owner: *mut *mut u8) -> *mut u8;

    /// Frees a previously allocated blob, fixing up the owner of whatever
    /// blob the pool relocates into its place, if any.
    fn free(&mut self, ptr: *mut u8);
}

const LENGTH_PREFIX: usize = std::mem::size_of::<u32>();

/// Stable-address header pointing at a length-prefixed byte blob. The
/// persistent variant's blob lives in a [`RelocatablePool`] that may move
/// it; the temp variant's blob is the tail of the same single allocation
/// as the header itself (`ptr == self + 1`, spec.md's own convention for
/// detecting "is this temp").
///
/// This port keeps the header itself at a stable address via `Box`
/// (persistent) or a raw single-allocation pair (temp) rather than
/// building a dedicated non-compacting header pool: a `Box`'s heap address
/// is already stable across moves of the `Box` value itself, which is all
/// this module's invariant ("lifetime of payload ≥ lifetime of any
/// referencing tuple") requires.
#[repr(C)]
pub struct StringRef {
    ptr: *mut u8,
    temp: bool,
}

impl StringRef {
    /// Builds a persistent `StringRef`: copies `bytes` into a
    /// length-prefixed block requested from `pool`, which is told this
    /// ref's `ptr` field address so it can rewrite it on relocation.
    #[must_use]
    pub fn create_persistent(pool: &mut dyn RelocatablePool, bytes: &[u8]) -> Box<Self> {
        let mut sref = Box::new(Self {
            ptr: std::ptr::null_mut(),
            temp: false,
        });
        let owner: *mut *mut u8 = &mut sref.ptr;
        let size = LENGTH_PREFIX + bytes.len();
        // SAFETY: `owner` points at `sref.ptr`, which outlives this blob
        // for as long as `sref` (and this pool registration) is alive.
        let blob = unsafe { pool.alloc(size, owner) };
        write_length_prefixed(blob, bytes);
        sref.ptr = blob;
        sref
    }

    /// Builds a temp `StringRef`: header and length-prefixed payload share
    /// one arena allocation, `ptr` pointing at the payload immediately
    /// after the header. Must be paired with
    /// [`StringRef::destroy_temp`], never [`StringRef::destroy_persistent`].
    #[must_use]
    pub fn create_temp(bytes: &[u8]) -> NonNull<Self> {
        let (layout, payload_offset) = temp_layout(bytes.len());
        // SAFETY: `layout` has non-zero size (header alone is non-zero).
        let raw = unsafe { std::alloc::alloc(layout) };
        assert!(!raw.is_null(), "allocation failure building temp StringRef");
        // SAFETY: `payload_offset` was computed by `Layout::extend` against
        // this same `layout`, so it lands within the allocation.
        let payload = unsafe { raw.add(payload_offset) };
        write_length_prefixed(payload, bytes);
        let header = raw.cast::<Self>();
        // SAFETY: `header` is freshly allocated for exactly
        // `Layout::new::<Self>()`'s size and alignment (the first member
        // of `layout`).
        unsafe {
            header.write(Self {
                ptr: payload,
                temp: true,
            });
        }
        NonNull::new(header).expect("just checked raw is non-null")
    }

    /// True iff this is the temp (single-allocation, arena-local) variant.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.temp
    }

    /// The referenced bytes.
    #[must_use]
    pub fn get_object(&self) -> &[u8] {
        // SAFETY: `self.ptr` always points at a `[u32 length | bytes]`
        // block, either in a `RelocatablePool` blob or this header's own
        // trailing arena allocation.
        unsafe { read_length_prefixed(self.ptr) }
    }

    /// Called by the owning pool during compaction: shifts `ptr` by
    /// `offset` bytes. Not used by [`CompactingBlobPool`], which already
    /// knows the exact destination address and writes it directly; kept
    /// for pools that only know a relative shift.
    pub fn relocate(&mut self, offset: isize) {
        // SAFETY: caller (the pool) guarantees `offset` keeps `ptr`
        // pointing at the still-valid relocated copy of this blob.
        self.ptr = unsafe { self.ptr.offset(offset) };
    }

    /// Destroys a persistent `StringRef`: frees its blob from `pool`, then
    /// drops the header itself.
    pub fn destroy_persistent(sref: Box<Self>, pool: &mut dyn RelocatablePool) {
        pool.free(sref.ptr);
    }

    /// Destroys a temp `StringRef`: deallocates the single header+payload
    /// arena block.
    ///
    /// # Safety
    ///
    /// `sref` must have been produced by [`StringRef::create_temp`] and not
    /// already destroyed.
    pub unsafe fn destroy_temp(sref: NonNull<Self>) {
        // SAFETY: `sref` was built by `create_temp`, so reading `len` via
        // `get_object` and recomputing `temp_layout` reproduces the exact
        // layout `create_temp` allocated with.
        let len = unsafe { sref.as_ref().get_object().len() };
        let (layout, _) = temp_layout(len);
        // SAFETY: `sref.as_ptr()` is the same pointer `std::alloc::alloc`
        // returned in `create_temp`, with the same `layout`.
        unsafe { std::alloc::dealloc(sref.as_ptr().cast(), layout) };
    }
}

fn temp_layout(payload_len: usize) -> (Layout, usize) {
    let header = Layout::new::<StringRef>();
    let payload = Layout::array::<u8>(LENGTH_PREFIX + payload_len).expect("layout overflow");
    header
        .extend(payload)
        .expect("header+payload layout overflow")
}

fn write_length_prefixed(dst: *mut u8, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).expect("blob length exceeds u32");
    // SAFETY: `dst` has room for `LENGTH_PREFIX + bytes.len()` bytes, per
    // every caller of this helper.
    unsafe {
        std::ptr::copy_nonoverlapping(len.to_le_bytes().as_ptr(), dst, LENGTH_PREFIX);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(LENGTH_PREFIX), bytes.len());
    }
}

/// # Safety
///
/// `ptr` must point at a `[u32 length | bytes]` block at least
/// `LENGTH_PREFIX + length` bytes long.
unsafe fn read_length_prefixed<'a>(ptr: *const u8) -> &'a [u8] {
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    // SAFETY: forwarded from this function's own safety contract.
    unsafe { std::ptr::copy_nonoverlapping(ptr, len_bytes.as_mut_ptr(), LENGTH_PREFIX) };
    let len = u32::from_le_bytes(len_bytes) as usize;
    // SAFETY: forwarded from this function's own safety contract.
    unsafe { std::slice::from_raw_parts(ptr.add(LENGTH_PREFIX), len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_round_trips_and_frees() {
        let sref = StringRef::create_temp(b"hello");
        // SAFETY: `sref` is live and not yet destroyed.
        unsafe {
            assert!(sref.as_ref().is_temp());
            assert_eq!(sref.as_ref().get_object(), b"hello");
            StringRef::destroy_temp(sref);
        }
    }

    #[test]
    fn persistent_survives_relocation() {
        let mut pool = CompactingBlobPool::new(64);
        let a = StringRef::create_persistent(&mut pool, b"first");
        let b = StringRef::create_persistent(&mut pool, b"second");
        assert_eq!(b.get_object(), b"second");
        StringRef::destroy_persistent(a, &mut pool);
        // Freeing `a` may have relocated `b`'s blob into `a`'s old slot;
        // `b.ptr` should have been fixed up in place by the pool.
        assert_eq!(b.get_object(), b"second");
    }
}
