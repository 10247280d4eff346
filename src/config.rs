//! Allocator configuration.
//!
//! Most callers never need this: `CompactingChunks::new(tuple_size)` picks
//! sane defaults. `AllocatorConfig` exists for callers that want the chunk
//! series, empty-chunk sweep threshold, or pre-hook retention policy
//! overridden from a file or environment, following the same
//! `figment`-backed loading pattern the rest of the engine uses for its own
//! configuration.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hook::RetentionPolicy;

/// Smallest chunk size considered by [`crate::chunk::holder::choose_chunk_size`].
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
/// Largest chunk size considered by [`crate::chunk::holder::choose_chunk_size`].
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
/// Number of empty chunks a [`crate::chunk::noncompacting::NonCompactingChunks`]
/// tolerates before sweeping them from the list.
pub const DEFAULT_EMPTY_CHUNK_SWEEP_THRESHOLD: usize = 64;

/// Errors that can occur while loading an [`AllocatorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The underlying `figment` extraction failed (malformed TOML, type
    /// mismatch, missing required field, ...).
    #[error("failed to load allocator config: {0}")]
    Load(#[from] figment::Error),
}

/// Tunables for a [`crate::compacting_chunks::CompactingChunks`] or
/// [`crate::hooked::HookedCompactingChunks`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Fixed size, in bytes, of each tuple slot this allocator hands out.
    pub tuple_size: usize,
    /// Smallest chunk size (bytes) the size-selection series will consider.
    pub min_chunk_size: usize,
    /// Largest chunk size (bytes) the size-selection series will consider.
    pub max_chunk_size: usize,
    /// How many empty non-compacting chunks accumulate before a sweep.
    pub empty_chunk_sweep_threshold: usize,
    /// How `TxnPreHook` retires entries from its change map.
    pub retention: RetentionPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            tuple_size: 16,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            empty_chunk_sweep_threshold: DEFAULT_EMPTY_CHUNK_SWEEP_THRESHOLD,
            retention: RetentionPolicy::default(),
        }
    }
}

impl AllocatorConfig {
    /// Loads configuration from an optional TOML file merged with
    /// `TUPLE_CHUNKS_`-prefixed environment variables, falling back to
    /// [`AllocatorConfig::default`] for anything neither source sets.
    pub fn load(toml_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            AllocatorConfig::default(),
        ));
        if let Some(path) = toml_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("TUPLE_CHUNKS_"));
        figment.extract().map_err(ConfigError::Load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_figment() {
        let cfg = AllocatorConfig::load(None).unwrap();
        assert_eq!(cfg.tuple_size, 16);
        assert_eq!(cfg.empty_chunk_sweep_threshold, DEFAULT_EMPTY_CHUNK_SWEEP_THRESHOLD);
    }

    #[test]
    fn env_override_wins_over_default() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TUPLE_CHUNKS_TUPLE_SIZE", "64");
            let cfg = AllocatorConfig::load(None).unwrap();
            assert_eq!(cfg.tuple_size, 64);
            Ok(())
        });
    }
}
