//! `HookedCompactingChunks`: binds [`crate::compacting_chunks::CompactingChunks`]
//! and [`TxnPreHook`] together and routes every mutation through the hook
//! while frozen (spec §4.5).

use crate::compacting_chunks::{AddOutcome, CompactingChunks, Direction};
use crate::error::Result;
use crate::hook::{ChangeKind, HookOutcome, RetentionPolicy, TxnPreHook};
use crate::iter::snapshot::IteratorObserver;

/// The allocator plus its pre-image hook, composed exactly as the engine
/// uses them: every mutation that can be observed by a frozen snapshot goes
/// through the hook first.
pub struct HookedCompactingChunks {
    chunks: CompactingChunks,
    hook: TxnPreHook,
    observer: Option<IteratorObserver>,
}

impl HookedCompactingChunks {
    /// A fresh, unfrozen allocator for `tuple_size`-byte tuples.
    #[must_use]
    pub fn new(tuple_size: usize, retain: RetentionPolicy) -> Self {
        Self {
            chunks: CompactingChunks::new(tuple_size),
            hook: TxnPreHook::new(tuple_size, retain),
            observer: None,
        }
    }

    /// Builds a hooked allocator from a loaded
    /// [`crate::config::AllocatorConfig`] (tuple size and hook retention
    /// policy).
    #[must_use]
    pub fn from_config(cfg: &crate::config::AllocatorConfig) -> Self {
        Self::new(cfg.tuple_size, cfg.retention)
    }

    /// Read-only access to the inner allocator, for callers that only need
    /// to inspect state (size, chunk layout) rather than mutate it.
    #[must_use]
    pub fn chunks(&self) -> &CompactingChunks {
        &self.chunks
    }

    /// Read-only access to the pre-image hook, for constructing a
    /// [`crate::iter::SnapshotIter`].
    #[must_use]
    pub fn hook(&self) -> &TxnPreHook {
        &self.hook
    }

    /// True iff the active RW snapshot iterator, if any, has already
    /// visited `addr` — the hook skips recording a pre-image in that case.
    fn observe(&self, addr: *const u8) -> bool {
        let Some(observer) = self.observer.as_ref() else {
            return false;
        };
        let Some(chunk) = self.chunks.list().chunk_covering(addr as usize) else {
            return false;
        };
        let pos = crate::compacting_chunks::Position::at(
            crate::list::Chunk::id(chunk),
            addr,
        );
        observer.has_passed(pos)
    }

    /// Bump-allocates one tuple slot.
    pub fn allocate(&mut self) -> *mut u8 {
        self.chunks.allocate()
    }

    /// Registers an in-place `Update` with the hook ahead of the caller
    /// overwriting `dst`'s bytes; callers must call [`TxnPreHook::copy`]
    /// first if they need the pre-image preserved (the hook itself assumes
    /// bytes are still live at `dst` when this is called).
    pub fn update(&mut self, dst: *const u8) -> HookOutcome {
        let tuple_size = self.chunks.tuple_size();
        // SAFETY: `dst` is a live tuple slot `tuple_size` bytes long, per
        // this method's contract (caller has not yet overwritten it).
        unsafe { self.hook.copy(dst, tuple_size) };
        let observed = self.observe(dst);
        self.hook.add(ChangeKind::Update, dst, tuple_size, |_| observed)
    }

    /// Test-helper single remove: captures a pre-image if frozen, finalizes
    /// `dst`, relocates the tail tuple into it via
    /// [`CompactingChunks::free`], then records the deletion with the hook.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::OutOfRange`] if `dst` is not live.
    pub fn remove(&mut self, dst: *const u8) -> Result<Option<*const u8>> {
        let tuple_size = self.chunks.tuple_size();
        if self.hook.is_recording() {
            // SAFETY: `dst` is asserted live by `CompactingChunks::free`
            // immediately below, which fails with `OutOfRange` otherwise;
            // we copy before that call while the bytes are still valid.
            unsafe { self.hook.copy(dst, tuple_size) };
        }
        let src = self.chunks.free(dst)?;
        let observed = self.observe(dst);
        self.hook
            .add(ChangeKind::Deletion, dst, tuple_size, |_| observed);
        Ok(src)
    }

    /// Phase 1 of batch delete: delegates to
    /// [`CompactingChunks::remove_reserve`].
    ///
    /// # Errors
    ///
    /// See [`CompactingChunks::remove_reserve`].
    pub fn remove_reserve(&mut self, n: usize) -> Result<()> {
        self.chunks.remove_reserve(n)
    }

    /// Phase 2 of batch delete: captures a pre-image and records a
    /// `Deletion` with the hook (while frozen) before delegating to
    /// [`CompactingChunks::remove_add`].
    ///
    /// # Errors
    ///
    /// See [`CompactingChunks::remove_add`].
    pub fn remove_add(&mut self, dst: *const u8) -> Result<AddOutcome> {
        let tuple_size = self.chunks.tuple_size();
        if self.hook.is_recording() {
            // SAFETY: `dst` must be a currently-live address for
            // `CompactingChunks::remove_add` to accept it below; we copy
            // its bytes first while they're still valid.
            unsafe { self.hook.copy(dst, tuple_size) };
        }
        let outcome = self.chunks.remove_add(dst)?;
        let observed = self.observe(dst);
        self.hook
            .add(ChangeKind::Deletion, dst, tuple_size, |_| observed);
        Ok(outcome)
    }

    /// Phase 3 of batch delete: delegates to
    /// [`CompactingChunks::remove_force`].
    ///
    /// # Errors
    ///
    /// See [`CompactingChunks::remove_force`].
    pub fn remove_force(
        &mut self,
        memcpy_cb: impl FnMut(&[(*const u8, *const u8)]),
    ) -> Result<usize> {
        self.chunks.remove_force(memcpy_cb)
    }

    /// Lightweight head/tail remove; forbidden from head while frozen (the
    /// same restriction as the unhooked allocator).
    ///
    /// # Errors
    ///
    /// See [`CompactingChunks::remove`].
    pub fn remove_light(&mut self, direction: Direction, ptr: Option<*const u8>) -> Result<()> {
        self.chunks.remove(direction, ptr)
    }

    /// Discards every live tuple; while frozen, records a `Deletion` with
    /// the hook for each one first.
    pub fn clear(&mut self) {
        let tuple_size = self.chunks.tuple_size();
        let recording = self.hook.is_recording();
        let hook = &mut self.hook;
        let observer = self.observer.clone();
        self.chunks.clear(|addr| {
            if recording {
                // SAFETY: `addr` is a currently-live tuple about to be
                // removed by `clear`'s caller-visible pass, per
                // `CompactingChunks::clear`'s contract.
                unsafe { hook.copy(addr, tuple_size) };
                let observed = observer
                    .as_ref()
                    .is_some_and(|o| o.has_passed(crate::compacting_chunks::Position::Empty));
                hook.add(ChangeKind::Deletion, addr, tuple_size, |_| observed);
            }
        });
    }

    /// Begins a snapshot: freezes the allocator, then the hook, and installs
    /// a fresh iterator observer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Logic`] if already frozen.
    pub fn freeze(&mut self) -> Result<IteratorObserver> {
        self.chunks.freeze()?;
        self.hook.freeze();
        let observer = IteratorObserver::new();
        self.observer = Some(observer.clone());
        Ok(observer)
    }

    /// Ends the snapshot: thaws the hook (discarding all pre-images), then
    /// the allocator, then drops the installed observer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Logic`] if not currently frozen.
    pub fn thaw(&mut self) -> Result<()> {
        self.hook.thaw();
        self.chunks.thaw()?;
        self.observer = None;
        Ok(())
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
    fn remove_while_frozen_preserves_preimage() {
        let mut hc = HookedCompactingChunks::new(16, RetentionPolicy::Never);
        let mut addrs = Vec::new();
        for i in 0..20u64 {
            let addr = hc.allocate();
            unsafe { write_u64(addr, i) };
            addrs.push(addr);
        }
        hc.freeze().unwrap();
        let target = addrs[3];
        hc.remove(target.cast_const()).unwrap();
        let resolved = hc.hook().resolve(target.cast_const());
        assert_eq!(unsafe { read_u64(resolved) }, 3);
    }

    #[test]
    fn allocate_and_thaw_round_trip() {
        let mut hc = HookedCompactingChunks::new(16, RetentionPolicy::Never);
        hc.allocate();
        hc.freeze().unwrap();
        hc.thaw().unwrap();
        assert!(!hc.chunks().is_frozen());
    }

    #[test]
    fn update_captures_preimage_while_frozen() {
        let mut hc = HookedCompactingChunks::new(16, RetentionPolicy::Never);
        let addr = hc.allocate();
        unsafe { write_u64(addr, 7) };
        hc.freeze().unwrap();
        let outcome = hc.update(addr.cast_const());
        assert_eq!(outcome, HookOutcome::Fresh);
        unsafe { write_u64(addr, 999) };
        let resolved = hc.hook().resolve(addr.cast_const());
        assert_eq!(unsafe { read_u64(resolved) }, 7);
    }
}
