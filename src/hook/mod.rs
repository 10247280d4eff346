//! `TxnPreHook`: pre-image capture for frozen snapshots (spec §4.4).

pub mod hooked;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chunk::noncompacting::{LazyChunk, NonCompactingChunks};
use crate::chunk::ChunkBackend;

pub use hooked::HookedCompactingChunks;

/// What kind of mutation triggered a hook recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// An in-place overwrite of a live tuple.
    Update,
    /// A tuple leaving the live set.
    Deletion,
}

/// Outcome of [`TxnPreHook::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook isn't recording (not frozen); nothing was captured.
    NotFrozen,
    /// A pre-image was freshly captured for this address.
    Fresh,
    /// A pre-image already existed for this address (from an earlier
    /// recorded change this freeze).
    Existing(*const u8),
    /// The snapshot iterator has already passed this address; recording
    /// was skipped.
    Ignored,
}

/// How `TxnPreHook` retires entries from `changes` once a caller signals
/// (via [`TxnPreHook::release`]) that it has finished reading a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Never drop proactively; rely entirely on `thaw()` to clear
    /// everything at once.
    Never,
    /// Drop immediately on every `release` call.
    Always,
    /// Buffer released addresses until `n` are queued, then drop them in
    /// one pass.
    Batched(usize),
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Batched(16)
    }
}

/// Records pre-change tuple images so a frozen snapshot view can keep
/// seeing data as it existed at freeze time while the txn view mutates
/// underneath it.
///
/// Grounded on [`crate::chunk::noncompacting::NonCompactingChunks`] as its
/// own change store (a `LazyChunk` list, since each pre-image is freed
/// exactly once, with no need to track holes precisely) and on the
/// initialized-tracking idiom of the teacher's memory pool module
/// (a `HashMap` of addresses with a captured pre-image, mirroring that
/// module's `HashSet` of initialized slots).
pub struct TxnPreHook {
    changes: HashMap<usize, *const u8>,
    change_store: NonCompactingChunks<LazyChunk>,
    recording: bool,
    last: Option<(usize, *const u8)>,
    retain: RetentionPolicy,
    pending_release: Vec<usize>,
    finalize_cb: Option<Box<dyn FnMut(*const u8)>>,
    backend: std::rc::Rc<dyn ChunkBackend>,
}

impl std::fmt::Debug for TxnPreHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnPreHook")
            .field("changes", &self.changes.len())
            .field("recording", &self.recording)
            .field("retain", &self.retain)
            .finish()
    }
}

impl TxnPreHook {
    /// A fresh hook over `tuple_size`-byte tuples, not yet recording.
    #[must_use]
    pub fn new(tuple_size: usize, retain: RetentionPolicy) -> Self {
        Self::with_backend(
            tuple_size,
            retain,
            std::rc::Rc::new(crate::chunk::holder::SystemBackend),
        )
    }

    /// Like [`TxnPreHook::new`] with an explicit chunk backend for the
    /// change store.
    #[must_use]
    pub fn with_backend(
        tuple_size: usize,
        retain: RetentionPolicy,
        backend: std::rc::Rc<dyn ChunkBackend>,
    ) -> Self {
        Self {
            changes: HashMap::new(),
            change_store: NonCompactingChunks::new(tuple_size),
            recording: false,
            last: None,
            retain,
            pending_release: Vec::new(),
            finalize_cb: None,
            backend,
        }
    }

    /// Installs the callback invoked on a copy just before it is freed
    /// from the change store.
    pub fn set_finalize_cb(&mut self, cb: impl FnMut(*const u8) + 'static) {
        self.finalize_cb = Some(Box::new(cb));
    }

    /// True iff the hook is currently recording (mirrors allocator frozen
    /// state).
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begins recording.
    pub fn freeze(&mut self) {
        self.recording = true;
    }

    /// Ends recording, finalizing and discarding every remaining entry in
    /// `changes`.
    pub fn thaw(&mut self) {
        self.recording = false;
        let addrs: Vec<usize> = self.changes.keys().copied().collect();
        for addr in addrs {
            self.drop_entry(addr);
        }
        self.pending_release.clear();
        self.last = None;
    }

    fn drop_entry(&mut self, addr: usize) {
        if let Some(copy) = self.changes.remove(&addr) {
            if let Some(cb) = self.finalize_cb.as_mut() {
                cb(copy);
            }
            let _ = self.change_store.free(copy.cast_mut());
        }
    }

    /// Stashes a deep copy of the bytes currently at `addr` into a scratch
    /// slot, to be consumed by the next [`TxnPreHook::add`] call. Callers
    /// must call this *before* overwriting any recorded tuple. No-op when
    /// `addr` already has a captured pre-image.
    ///
    /// # Safety
    ///
    /// `addr` must point to `tuple_size` readable bytes that remain valid
    /// for the duration of this call.
    pub unsafe fn copy(&mut self, addr: *const u8, tuple_size: usize) {
        if self.changes.contains_key(&(addr as usize)) {
            return;
        }
        let backend = self.backend.clone();
        let slot = self.change_store.allocate(&backend);
        // SAFETY: caller guarantees `addr` has `tuple_size` readable bytes;
        // `slot` was just allocated from the change store for exactly
        // `tuple_size` bytes.
        unsafe { std::ptr::copy_nonoverlapping(addr, slot, tuple_size) };
        self.last = Some((addr as usize, slot.cast_const()));
    }

    /// Records a change to `addr` of the given `kind`, consulting
    /// `observer` to skip tuples the active snapshot iterator has already
    /// passed.
    pub fn add(
        &mut self,
        kind: ChangeKind,
        addr: *const u8,
        tuple_size: usize,
        observer: impl Fn(*const u8) -> bool,
    ) -> HookOutcome {
        if !self.recording {
            return HookOutcome::NotFrozen;
        }
        if observer(addr) {
            return HookOutcome::Ignored;
        }
        if let Some(&existing) = self.changes.get(&(addr as usize)) {
            return HookOutcome::Existing(existing);
        }
        match kind {
            ChangeKind::Update => {
                let backend = self.backend.clone();
                let slot = self.change_store.allocate(&backend);
                // SAFETY: `addr` is the live tuple about to be overwritten
                // by the caller's in-place update; `slot` was just
                // allocated for exactly `tuple_size` bytes.
                unsafe { std::ptr::copy_nonoverlapping(addr, slot, tuple_size) };
                self.changes.insert(addr as usize, slot.cast_const());
            }
            ChangeKind::Deletion => {
                let (copied_addr, copy) = self
                    .last
                    .take()
                    .expect("Deletion must be preceded by TxnPreHook::copy");
                debug_assert_eq!(copied_addr, addr as usize);
                self.changes.insert(addr as usize, copy);
            }
        }
        HookOutcome::Fresh
    }

    /// Maps a snapshot-visible address to the address of its pre-freeze
    /// bytes, if any, else returns `addr` unchanged.
    #[must_use]
    pub fn resolve(&self, addr: *const u8) -> *const u8 {
        self.changes
            .get(&(addr as usize))
            .copied()
            .unwrap_or(addr)
    }

    /// Signals that the caller has finished reading the tuple at `addr`;
    /// the retention policy decides whether to drop its entry now.
    pub fn release(&mut self, addr: *const u8) {
        match self.retain {
            RetentionPolicy::Never => {}
            RetentionPolicy::Always => self.drop_entry(addr as usize),
            RetentionPolicy::Batched(n) => {
                self.pending_release.push(addr as usize);
                if self.pending_release.len() >= n {
                    let batch = std::mem::take(&mut self.pending_release);
                    for a in batch {
                        self.drop_entry(a);
                    }
                }
            }
        }
    }

    /// Number of entries currently held in the change map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True iff the change map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_captures_preimage_and_resolves() {
        let mut hook = TxnPreHook::new(16, RetentionPolicy::Never);
        hook.freeze();
        let mut original = [0u8; 16];
        original[0] = 42;
        let addr = original.as_ptr();
        let outcome = hook.add(ChangeKind::Update, addr, 16, |_| false);
        assert_eq!(outcome, HookOutcome::Fresh);
        let resolved = hook.resolve(addr);
        assert_ne!(resolved, addr);
        // SAFETY: `resolved` was just populated by `add` with 16 readable
        // bytes copied from `original`.
        let byte = unsafe { *resolved };
        assert_eq!(byte, 42);
    }

    #[test]
    fn not_recording_returns_not_frozen() {
        let mut hook = TxnPreHook::new(16, RetentionPolicy::Never);
        let buf = [0u8; 16];
        let outcome = hook.add(ChangeKind::Update, buf.as_ptr(), 16, |_| false);
        assert_eq!(outcome, HookOutcome::NotFrozen);
    }

    #[test]
    fn ignored_when_observer_already_passed() {
        let mut hook = TxnPreHook::new(16, RetentionPolicy::Never);
        hook.freeze();
        let buf = [0u8; 16];
        let outcome = hook.add(ChangeKind::Update, buf.as_ptr(), 16, |_| true);
        assert_eq!(outcome, HookOutcome::Ignored);
    }

    #[test]
    fn thaw_clears_all_entries() {
        let mut hook = TxnPreHook::new(16, RetentionPolicy::Never);
        hook.freeze();
        let buf = [0u8; 16];
        hook.add(ChangeKind::Update, buf.as_ptr(), 16, |_| false);
        assert_eq!(hook.len(), 1);
        hook.thaw();
        assert!(hook.is_empty());
    }
}
