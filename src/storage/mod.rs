//! Persistence layer
//!
//! The in-memory [`DatabaseState`] is a cache of the persisted copy. Every
//! mutation made through [`crate::Database`] ends with a full
//! [`Storage::flush`]; the mutation only counts as committed once the flush
//! returns `Ok`.
//!
//! Two backends ship with the crate:
//! - [`MemoryStorage`]: nothing is persisted (test and scratch use)
//! - [`DiskStorage`]: one directory holding the two record tables and a
//!   subdirectory of plot files

mod disk;

pub use disk::{DiskStorage, EXPERIMENTS_FILE, FIGURES_DIR, PLOT_FILE_SEPARATOR, RESULTS_FILE};

use crate::experiment::{AnalysisResultRecord, ExperimentRecord, RecordStore};
use crate::plot::PlotStore;
use crate::Result;

/// Everything a database holds: both record collections and the plot blobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseState {
    /// Experiment collection
    pub experiments: RecordStore<ExperimentRecord>,
    /// Analysis-result collection
    pub analysis_results: RecordStore<AnalysisResultRecord>,
    /// Plot blobs
    pub plots: PlotStore,
}

/// Durable backing for a [`DatabaseState`].
///
/// Implementations must make `flush` all-or-nothing: an `Err` leaves the
/// persisted copy exactly as the previous successful flush wrote it, and the
/// mutation that triggered the flush is rolled back in memory.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Load the persisted state, or an empty state if nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted data exists but cannot be read.
    fn load(&self) -> Result<DatabaseState>;

    /// Write the complete state.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the state could not be written.
    fn flush(&self, state: &DatabaseState) -> Result<()>;
}

/// Storage that keeps nothing: loads empty, flushes are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl Storage for MemoryStorage {
    fn load(&self) -> Result<DatabaseState> {
        Ok(DatabaseState::default())
    }

    fn flush(&self, _state: &DatabaseState) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_loads_empty() {
        let state = MemoryStorage.load().unwrap();
        assert!(state.experiments.is_empty());
        assert!(state.analysis_results.is_empty());
        assert!(state.plots.is_empty());
        assert!(MemoryStorage.flush(&state).is_ok());
    }
}
