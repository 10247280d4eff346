//! # tuple-chunks
//!
//! A compacting, snapshot-aware fixed-size tuple allocator for an
//! in-memory, single-writer partitioned table engine.
//!
//! Tuples of a fixed size are bump-allocated from heap-backed chunks.
//! Deleting a tuple relocates the last-allocated live tuple into the freed
//! slot, keeping each chunk's live range contiguous without a free list.
//! Wrapping the allocator in [`HookedCompactingChunks`] adds snapshot
//! isolation: while frozen, mutations are routed through a pre-image hook
//! so a concurrently-draining snapshot iterator keeps seeing data as it
//! existed at freeze time.
//!
//! ## Quick start
//!
//! ```rust
//! use tuple_chunks::CompactingChunks;
//!
//! let mut chunks = CompactingChunks::new(16);
//! let a = chunks.allocate();
//! let b = chunks.allocate();
//! assert_eq!(chunks.size(), 2);
//!
//! // Deleting `a` relocates `b`'s slot into it; `b`'s old address is
//! // returned so callers can fix up any external references to it.
//! let vacated = chunks.free(a.cast_const()).unwrap();
//! assert_eq!(vacated, Some(b.cast_const()));
//! assert_eq!(chunks.size(), 1);
//! ```
//!
//! ## Non-goals
//!
//! Crash durability, multi-writer concurrency, and generic (non-fixed)
//! tuple sizing are out of scope — see each module's documentation for
//! what it does carry (structured `tracing` logs, `thiserror` errors,
//! `figment`-backed configuration).

#![warn(missing_docs)]
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::cast_lossless, clippy::doc_markdown)
)]

pub mod chunk;
pub mod compacting_chunks;
pub mod config;
pub mod error;
pub mod hook;
pub mod iter;
pub mod list;
pub mod string_ref;

pub use compacting_chunks::{AddOutcome, AllocatorState, CompactingChunks, Direction, FrozenBoundaries, Position};
pub use config::AllocatorConfig;
pub use error::{Error, Result};
pub use hook::{ChangeKind, HookOutcome, HookedCompactingChunks, RetentionPolicy, TxnPreHook};
pub use iter::{ChunksIdValidator, ElasticIter, SnapshotIter, TxnIter};
pub use string_ref::{CompactingBlobPool, RelocatablePool, StringRef};
