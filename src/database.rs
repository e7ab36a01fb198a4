//! Database facade
//!
//! Owns the whole [`DatabaseState`] behind one `RwLock`. List and get calls
//! share the read lock. Every mutation holds the write lock across both the
//! in-memory change and the flush that follows it, so a reader never sees a
//! state the storage does not hold. If the flush fails the change is undone
//! before the lock is released.

use std::fmt;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::experiment::{
    AnalysisResultRecord, AnalysisResultRecordBuilder, AnalysisResultUpdate, ExperimentRecord,
    ExperimentRecordBuilder, ExperimentUpdate,
};
use crate::plot::PlotInfo;
use crate::query::{AnalysisResultQuery, ExperimentQuery};
use crate::storage::{DatabaseState, DiskStorage, MemoryStorage, Storage};
use crate::{Error, Result};

/// Local experiment database instance
pub struct Database {
    state: RwLock<DatabaseState>,
    storage: Box<dyn Storage>,
    flush_on_drop: bool,
}

impl Database {
    /// Create a new database builder
    #[must_use]
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::default()
    }

    /// Open an in-memory database that persists nothing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(DatabaseState::default()),
            storage: Box::new(MemoryStorage),
            flush_on_drop: false,
        }
    }

    /// Clone of the complete current state.
    #[must_use]
    pub fn snapshot(&self) -> DatabaseState {
        self.read().clone()
    }

    /// Write the complete state to storage.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the flush did not complete.
    pub fn flush(&self) -> Result<()> {
        let state = self.read();
        self.storage
            .flush(&state)
            .map_err(|e| Error::persistence(&e))
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    /// List experiments matching `query`, sorted and limited.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the query is unsupported.
    pub fn experiments(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentRecord>> {
        let plan = query.plan()?;
        let state = self.read();
        let records: Vec<ExperimentRecord> = plan
            .execute(state.experiments.scan())
            .into_iter()
            .cloned()
            .collect();
        debug!(count = records.len(), "Listed experiments");
        Ok(records)
    }

    /// Get one experiment.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no experiment has this UUID.
    pub fn experiment(&self, experiment_id: &str) -> Result<ExperimentRecord> {
        self.read().experiments.get(experiment_id).cloned()
    }

    /// Create an experiment, generating its UUID if the payload has none.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` on a UUID collision, or `PersistenceFailure`
    /// if the flush failed (the experiment is then not stored).
    pub fn create_experiment(&self, draft: ExperimentRecordBuilder) -> Result<ExperimentRecord> {
        let record = draft.build();
        let mut state = self.write();
        let created = state.experiments.insert(record)?.clone();
        let uuid = created.uuid().to_string();
        self.commit(&mut state, "create_experiment", created, move |s| {
            s.experiments.delete(&uuid).map(drop)
        })
    }

    /// Merge `update` into an experiment and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no experiment has this UUID, or
    /// `PersistenceFailure` if the flush failed.
    pub fn update_experiment(
        &self,
        experiment_id: &str,
        update: ExperimentUpdate,
    ) -> Result<ExperimentRecord> {
        let mut state = self.write();
        let before = state.experiments.get(experiment_id)?.clone();
        let updated = state
            .experiments
            .update(experiment_id, |record| update.apply_to(record))?
            .clone();
        self.commit(&mut state, "update_experiment", updated, move |s| {
            s.experiments.replace(before).map(drop)
        })
    }

    /// Delete an experiment and return it. Its analysis results and plots
    /// are left in place.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no experiment has this UUID, or
    /// `PersistenceFailure` if the flush failed.
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<ExperimentRecord> {
        let mut state = self.write();
        let (position, removed) = state.experiments.delete(experiment_id)?;
        let deleted = removed.clone();
        self.commit(&mut state, "delete_experiment", deleted, move |s| {
            s.experiments.restore(position, removed)
        })
    }

    // ------------------------------------------------------------------
    // Analysis results
    // ------------------------------------------------------------------

    /// List analysis results matching `query`, sorted and limited.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the query is unsupported.
    pub fn analysis_results(
        &self,
        query: &AnalysisResultQuery,
    ) -> Result<Vec<AnalysisResultRecord>> {
        let plan = query.plan()?;
        let state = self.read();
        let records: Vec<AnalysisResultRecord> = plan
            .execute(state.analysis_results.scan())
            .into_iter()
            .cloned()
            .collect();
        debug!(count = records.len(), "Listed analysis results");
        Ok(records)
    }

    /// Get one analysis result.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no analysis result has this UUID.
    pub fn analysis_result(&self, result_id: &str) -> Result<AnalysisResultRecord> {
        self.read().analysis_results.get(result_id).cloned()
    }

    /// Create an analysis result for an existing experiment.
    ///
    /// The new record's device name is copied from the experiment now and is
    /// not kept in sync afterwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the payload has no experiment UUID or a
    /// non-finite chi-squared value, `NotFound` if that experiment does not
    /// exist, `AlreadyExists` on a UUID collision, or `PersistenceFailure` if
    /// the flush failed.
    pub fn create_analysis_result(
        &self,
        draft: AnalysisResultRecordBuilder,
    ) -> Result<AnalysisResultRecord> {
        let experiment_id = draft
            .referenced_experiment()
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "Cannot create analysis result without experiment id".to_string(),
                )
            })?
            .to_string();

        let mut state = self.write();
        let experiment = state
            .experiments
            .get(&experiment_id)
            .map_err(|_| Error::NotFound(format!("Experiment {experiment_id} not found")))?;
        let record = draft.build_for(experiment)?;
        let created = state.analysis_results.insert(record)?.clone();
        let uuid = created.uuid().to_string();
        self.commit(&mut state, "create_analysis_result", created, move |s| {
            s.analysis_results.delete(&uuid).map(drop)
        })
    }

    /// Merge `update` into an analysis result and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no analysis result has this UUID,
    /// `InvalidArgument` if the new chi-squared value is not finite, or
    /// `PersistenceFailure` if the flush failed.
    pub fn update_analysis_result(
        &self,
        result_id: &str,
        update: AnalysisResultUpdate,
    ) -> Result<AnalysisResultRecord> {
        let mut state = self.write();
        let mut updated = state.analysis_results.get(result_id)?.clone();
        update.apply_to(&mut updated)?;
        let before = state.analysis_results.replace(updated.clone())?;
        self.commit(&mut state, "update_analysis_result", updated, move |s| {
            s.analysis_results.replace(before).map(drop)
        })
    }

    /// Delete an analysis result and return it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no analysis result has this UUID, or
    /// `PersistenceFailure` if the flush failed.
    pub fn delete_analysis_result(&self, result_id: &str) -> Result<AnalysisResultRecord> {
        let mut state = self.write();
        let (position, removed) = state.analysis_results.delete(result_id)?;
        let deleted = removed.clone();
        self.commit(&mut state, "delete_analysis_result", deleted, move |s| {
            s.analysis_results.restore(position, removed)
        })
    }

    // ------------------------------------------------------------------
    // Plots
    // ------------------------------------------------------------------

    /// Store a new plot. The experiment does not have to exist.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the plot already exists, `InvalidArgument` for
    /// an unusable key, or `PersistenceFailure` if the flush failed.
    pub fn upload_plot(&self, experiment_id: &str, plot_name: &str, content: Vec<u8>) -> Result<()> {
        let mut state = self.write();
        state.plots.upload(experiment_id, plot_name, content)?;
        let (experiment_id, plot_name) = (experiment_id.to_string(), plot_name.to_string());
        self.commit(&mut state, "upload_plot", (), move |s| {
            s.plots.delete(&experiment_id, &plot_name).map(drop)
        })
    }

    /// Replace an existing plot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the plot does not exist, or
    /// `PersistenceFailure` if the flush failed.
    pub fn update_plot(
        &self,
        experiment_id: &str,
        plot_name: &str,
        content: Vec<u8>,
    ) -> Result<PlotInfo> {
        let mut state = self.write();
        let size = content.len();
        let previous = state.plots.replace(experiment_id, plot_name, content)?;
        let info = PlotInfo {
            name: plot_name.to_string(),
            size,
        };
        let (experiment_id, plot_name) = (experiment_id.to_string(), plot_name.to_string());
        self.commit(&mut state, "update_plot", info, move |s| {
            s.plots.replace(&experiment_id, &plot_name, previous).map(drop)
        })
    }

    /// Get a plot's content.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the plot does not exist.
    pub fn plot(&self, experiment_id: &str, plot_name: &str) -> Result<Vec<u8>> {
        self.read()
            .plots
            .get(experiment_id, plot_name)
            .map(<[u8]>::to_vec)
    }

    /// Names of the plots stored for an experiment.
    #[must_use]
    pub fn plot_names(&self, experiment_id: &str) -> Vec<String> {
        self.read()
            .plots
            .names(experiment_id)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Delete a plot. The deletion is flushed like any other mutation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the plot does not exist, or
    /// `PersistenceFailure` if the flush failed.
    pub fn delete_plot(&self, experiment_id: &str, plot_name: &str) -> Result<()> {
        let mut state = self.write();
        let content = state.plots.delete(experiment_id, plot_name)?;
        let (experiment_id, plot_name) = (experiment_id.to_string(), plot_name.to_string());
        self.commit(&mut state, "delete_plot", (), move |s| {
            s.plots.upload(&experiment_id, &plot_name, content)
        })
    }

    // ------------------------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, DatabaseState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DatabaseState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flush after a mutation; on failure run `undo` and report the
    /// mutation as failed.
    fn commit<T>(
        &self,
        state: &mut DatabaseState,
        operation: &'static str,
        value: T,
        undo: impl FnOnce(&mut DatabaseState) -> Result<()>,
    ) -> Result<T> {
        match self.storage.flush(state) {
            Ok(()) => {
                debug!(operation, "Committed");
                Ok(value)
            }
            Err(err) => {
                warn!(operation, error = %err, "Flush failed, rolling back");
                if let Err(undo_err) = undo(state) {
                    warn!(operation, error = %undo_err, "Rollback failed");
                }
                Err(Error::persistence(&err))
            }
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Database")
            .field("storage", &self.storage)
            .field("experiments", &state.experiments.len())
            .field("analysis_results", &state.analysis_results.len())
            .field("plots", &state.plots.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.flush_on_drop {
            return;
        }
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = self.storage.flush(state) {
            warn!(error = %err, "Flush on drop failed");
        }
    }
}

/// Database builder
#[derive(Debug)]
pub struct DatabaseBuilder {
    data_dir: Option<PathBuf>,
    storage: Option<Box<dyn Storage>>,
    flush_on_drop: bool,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self {
            data_dir: None,
            storage: None,
            flush_on_drop: true,
        }
    }
}

impl DatabaseBuilder {
    /// Persist to `data_dir` (created if missing).
    #[must_use]
    pub fn data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Persist through a custom storage backend.
    #[must_use]
    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// Whether dropping the database flushes it one last time (default `true`).
    #[must_use]
    pub const fn flush_on_drop(mut self, flush_on_drop: bool) -> Self {
        self.flush_on_drop = flush_on_drop;
        self
    }

    /// Build the database: load persisted state (or start empty), then flush
    /// once so the storage layout exists.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if both a data directory and a custom
    /// storage were given, an error if persisted state cannot be loaded, or
    /// `PersistenceFailure` if the initial flush fails.
    pub fn build(self) -> Result<Database> {
        let storage: Box<dyn Storage> = match (self.storage, self.data_dir) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument(
                    "data_dir and storage are mutually exclusive".to_string(),
                ))
            }
            (Some(storage), None) => storage,
            (None, Some(dir)) => Box::new(DiskStorage::open(dir)?),
            (None, None) => Box::new(MemoryStorage),
        };

        let state = storage.load()?;
        storage.flush(&state).map_err(|e| Error::persistence(&e))?;
        info!(
            experiments = state.experiments.len(),
            analysis_results = state.analysis_results.len(),
            plots = state.plots.len(),
            "Opened database"
        );

        Ok(Database {
            state: RwLock::new(state),
            storage,
            flush_on_drop: self.flush_on_drop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Storage whose flushes fail while `failing` is set.
    #[derive(Debug, Default, Clone)]
    struct FlakyStorage {
        failing: Arc<AtomicBool>,
    }

    impl Storage for FlakyStorage {
        fn load(&self) -> Result<DatabaseState> {
            Ok(DatabaseState::default())
        }

        fn flush(&self, _state: &DatabaseState) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(Error::Io(std::io::Error::other("disk full")))
            } else {
                Ok(())
            }
        }
    }

    fn flaky() -> (Database, Arc<AtomicBool>) {
        let storage = FlakyStorage::default();
        let failing = Arc::clone(&storage.failing);
        let db = Database::builder().storage(storage).build().unwrap();
        (db, failing)
    }

    #[test]
    fn test_in_memory_create_get() {
        let db = Database::in_memory();
        let created = db
            .create_experiment(ExperimentRecord::builder("T1", "dev"))
            .unwrap();
        assert_eq!(db.experiment(created.uuid()).unwrap(), created);
    }

    #[test]
    fn test_failed_flush_rolls_back_create() {
        let (db, failing) = flaky();
        failing.store(true, Ordering::SeqCst);

        let err = db
            .create_experiment(ExperimentRecord::builder("T1", "dev").uuid("e1"))
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure(_)));
        assert!(matches!(db.experiment("e1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failed_flush_rolls_back_update_and_delete() {
        let (db, failing) = flaky();
        db.create_experiment(ExperimentRecord::builder("T1", "dev").uuid("e1"))
            .unwrap();
        let before = db.snapshot();
        failing.store(true, Ordering::SeqCst);

        let update = ExperimentUpdate {
            device_name: Some("other".to_string()),
            ..Default::default()
        };
        assert!(db.update_experiment("e1", update).is_err());
        assert!(db.delete_experiment("e1").is_err());
        assert_eq!(db.snapshot(), before);
    }

    #[test]
    fn test_failed_flush_rolls_back_analysis_result_update() {
        let (db, failing) = flaky();
        db.create_experiment(ExperimentRecord::builder("T1", "dev").uuid("e1"))
            .unwrap();
        db.create_analysis_result(
            AnalysisResultRecord::builder("T1")
                .uuid("r1")
                .experiment_uuid("e1")
                .chisq(1.0),
        )
        .unwrap();
        let before = db.snapshot();
        failing.store(true, Ordering::SeqCst);

        let update = AnalysisResultUpdate {
            chisq: Some(Some(3.0)),
            ..Default::default()
        };
        assert!(matches!(
            db.update_analysis_result("r1", update),
            Err(Error::PersistenceFailure(_))
        ));
        assert_eq!(db.snapshot(), before);
        assert_eq!(db.analysis_result("r1").unwrap().chisq(), Some(1.0));
    }

    #[test]
    fn test_failed_flush_rolls_back_plots() {
        let (db, failing) = flaky();
        db.upload_plot("e1", "a.png", b"v1".to_vec()).unwrap();
        let before = db.snapshot();
        failing.store(true, Ordering::SeqCst);

        assert!(db.upload_plot("e1", "b.png", vec![]).is_err());
        assert!(db.update_plot("e1", "a.png", b"v2".to_vec()).is_err());
        assert!(db.delete_plot("e1", "a.png").is_err());
        assert_eq!(db.snapshot(), before);
        assert_eq!(db.plot("e1", "a.png").unwrap(), b"v1");
    }

    #[test]
    fn test_builder_rejects_two_backends() {
        let err = Database::builder()
            .data_dir("/nonexistent")
            .storage(MemoryStorage)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
