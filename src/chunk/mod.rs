//! Chunk-level building blocks (spec §4.1): a single fixed-size buffer
//! ([`holder::ChunkHolder`]), its non-compacting specializations
//! ([`noncompacting`]), and its compacting specialization ([`compacting`]).

pub mod compacting;
pub mod holder;
pub mod noncompacting;

pub use compacting::CompactingChunk;
pub use holder::{ChunkBackend, ChunkHolder, SystemBackend};
pub use noncompacting::{EagerChunk, LazyChunk, NonCompactingChunk, NonCompactingChunks};
