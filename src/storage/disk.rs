//! Directory-backed storage
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/
//! ├── experiments.json      JSON array, insertion order
//! ├── results.json          JSON array, insertion order
//! └── figures/
//!     └── <escaped_experiment_uuid>_<plot_name>   raw bytes, one file per plot
//! ```
//!
//! In the experiment UUID part of a plot file name, `%` and `_` and a leading
//! `.` are percent-escaped, so the first `_` always ends the UUID.
//!
//! A flush runs in three steps:
//! 1. serialize both tables and list the plot files to write or remove;
//!    nothing on disk changes if this fails
//! 2. write every new file to a synced `.<name>.tmp` sibling and hard-link
//!    every file about to be replaced or removed to a `.<name>.bak` sibling
//! 3. rename the temp files into place, remove stale plot files and fsync
//!    both directories
//!
//! If step 3 fails partway, the backups are renamed back so the directory
//! holds the previous flush again. Dot files are never read as plots.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{DatabaseState, Storage};
use crate::experiment::{Record, RecordStore};
use crate::plot::PlotStore;
use crate::Result;

/// Experiment table file name
pub const EXPERIMENTS_FILE: &str = "experiments.json";

/// Analysis-result table file name
pub const RESULTS_FILE: &str = "results.json";

/// Plot subdirectory name
pub const FIGURES_DIR: &str = "figures";

/// Joins experiment UUID and plot name into a plot file name
pub const PLOT_FILE_SEPARATOR: char = '_';

const HIDDEN_PREFIX: char = '.';
const TEMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bak";

/// Storage rooted at one directory.
///
/// Not safe for concurrent use by several processes.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    experiments_file: PathBuf,
    results_file: PathBuf,
    figures_dir: PathBuf,
}

impl DiskStorage {
    /// Open (creating if needed) the directory layout under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let storage = Self {
            experiments_file: root.join(EXPERIMENTS_FILE),
            results_file: root.join(RESULTS_FILE),
            figures_dir: root.join(FIGURES_DIR),
            root,
        };
        fs::create_dir_all(&storage.figures_dir)?;
        Ok(storage)
    }

    /// The data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The plot subdirectory.
    #[must_use]
    pub fn figures_dir(&self) -> &Path {
        &self.figures_dir
    }

    /// File name a plot is stored under.
    ///
    /// ```
    /// use labtrack_db::storage::DiskStorage;
    ///
    /// assert_eq!(DiskStorage::plot_file_name("e1", "fit.png"), "e1_fit.png");
    /// assert_eq!(DiskStorage::plot_file_name("run_1", "a_b.png"), "run%5F1_a_b.png");
    /// ```
    #[must_use]
    pub fn plot_file_name(experiment_id: &str, plot_name: &str) -> String {
        format!(
            "{}{PLOT_FILE_SEPARATOR}{plot_name}",
            escape_experiment_id(experiment_id)
        )
    }

    fn load_table<R>(path: &Path) -> Result<RecordStore<R>>
    where
        R: Record + DeserializeOwned,
    {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RecordStore::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<R> = serde_json::from_slice(&bytes)?;
        RecordStore::from_records(records)
    }

    fn load_plots(&self) -> Result<PlotStore> {
        let mut plots = PlotStore::new();
        let entries = match fs::read_dir(&self.figures_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(plots),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "Skipping plot file with non UTF-8 name");
                continue;
            };
            if file_name.starts_with(HIDDEN_PREFIX) {
                continue;
            }
            let Some((experiment_id, plot_name)) = split_plot_file_name(&file_name) else {
                warn!(file = %file_name, "Skipping plot file without experiment prefix");
                continue;
            };
            let content = fs::read(entry.path())?;
            if let Err(e) = plots.upload(&experiment_id, plot_name, content) {
                warn!(file = %file_name, error = %e, "Skipping unusable plot file");
            }
        }
        Ok(plots)
    }

    /// Every visible file in the figures directory that no stored plot maps to.
    fn stale_plot_files(&self, expected: &BTreeMap<String, &[u8]>) -> Result<Vec<PathBuf>> {
        let mut stale = Vec::new();
        for entry in fs::read_dir(&self.figures_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let keep = entry.file_name().to_str().is_some_and(|name| {
                name.starts_with(HIDDEN_PREFIX) || expected.contains_key(name)
            });
            if !keep {
                stale.push(entry.path());
            }
        }
        Ok(stale)
    }

    fn stage(
        &self,
        flush: &mut FlushTransaction,
        tables: [(&Path, &[u8]); 2],
        plot_files: &BTreeMap<String, &[u8]>,
        stale: Vec<PathBuf>,
    ) -> Result<()> {
        for (path, bytes) in tables {
            flush.stage_write(path.to_path_buf(), bytes)?;
        }
        for (file_name, content) in plot_files {
            flush.stage_write(self.figures_dir.join(file_name), content)?;
        }
        for path in stale {
            flush.stage_removal(path);
        }
        flush.back_up()
    }
}

impl Storage for DiskStorage {
    fn load(&self) -> Result<DatabaseState> {
        let experiments = Self::load_table(&self.experiments_file)?;
        let analysis_results = Self::load_table(&self.results_file)?;
        let plots = self.load_plots()?;

        info!(
            root = %self.root.display(),
            experiments = experiments.len(),
            analysis_results = analysis_results.len(),
            plots = plots.len(),
            "Loaded datastore"
        );
        Ok(DatabaseState {
            experiments,
            analysis_results,
            plots,
        })
    }

    fn flush(&self, state: &DatabaseState) -> Result<()> {
        fs::create_dir_all(&self.figures_dir)?;
        let experiments = serde_json::to_vec_pretty(state.experiments.scan())?;
        let results = serde_json::to_vec_pretty(state.analysis_results.scan())?;
        let plot_files: BTreeMap<String, &[u8]> = state
            .plots
            .iter()
            .map(|(experiment_id, plot_name, content)| {
                (Self::plot_file_name(experiment_id, plot_name), content)
            })
            .collect();
        let stale = self.stale_plot_files(&plot_files)?;

        let mut flush = FlushTransaction::default();
        let dirs = [self.figures_dir.as_path(), self.root.as_path()];
        let tables = [
            (self.experiments_file.as_path(), experiments.as_slice()),
            (self.results_file.as_path(), results.as_slice()),
        ];
        let outcome = self
            .stage(&mut flush, tables, &plot_files, stale)
            .and_then(|()| flush.commit(&dirs));
        if let Err(err) = &outcome {
            warn!(root = %self.root.display(), error = %err, "Flush failed, restoring previous files");
            flush.roll_back(&dirs);
        }
        flush.clean_up();
        outcome?;

        debug!(
            root = %self.root.display(),
            experiments = state.experiments.len(),
            analysis_results = state.analysis_results.len(),
            plots = state.plots.len(),
            "Flushed datastore"
        );
        Ok(())
    }
}

/// One file a flush replaces or removes.
#[derive(Debug)]
struct FileChange {
    target: PathBuf,
    /// Synced new content; `None` removes the target
    staged: Option<PathBuf>,
    /// Hard link to the content being replaced, if the target was a file
    backup: Option<PathBuf>,
}

/// The file changes of one flush, applied in order.
#[derive(Debug, Default)]
struct FlushTransaction {
    changes: Vec<FileChange>,
    committed: usize,
}

impl FlushTransaction {
    fn stage_write(&mut self, target: PathBuf, bytes: &[u8]) -> Result<()> {
        let staged = hidden_sibling(&target, TEMP_SUFFIX);
        // Registered first so a half-written temp file is cleaned up
        self.changes.push(FileChange {
            target,
            staged: Some(staged.clone()),
            backup: None,
        });
        let mut file = File::create(&staged)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn stage_removal(&mut self, target: PathBuf) {
        self.changes.push(FileChange {
            target,
            staged: None,
            backup: None,
        });
    }

    fn back_up(&mut self) -> Result<()> {
        for change in &mut self.changes {
            match fs::symlink_metadata(&change.target) {
                Ok(meta) if meta.is_file() => {
                    let backup = hidden_sibling(&change.target, BACKUP_SUFFIX);
                    remove_if_present(&backup)?;
                    fs::hard_link(&change.target, &backup)?;
                    change.backup = Some(backup);
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn commit(&mut self, dirs: &[&Path]) -> Result<()> {
        for change in &self.changes {
            match &change.staged {
                Some(staged) => fs::rename(staged, &change.target)?,
                None => fs::remove_file(&change.target)?,
            }
            self.committed += 1;
        }
        for dir in dirs {
            sync_dir(dir)?;
        }
        Ok(())
    }

    /// Put back every committed change, newest first.
    fn roll_back(&self, dirs: &[&Path]) {
        for change in self.changes[..self.committed].iter().rev() {
            let restored = match &change.backup {
                Some(backup) => fs::rename(backup, &change.target),
                None => remove_if_present(&change.target),
            };
            if let Err(e) = restored {
                warn!(path = %change.target.display(), error = %e, "Could not restore file");
            }
        }
        for dir in dirs {
            if let Err(e) = sync_dir(dir) {
                warn!(path = %dir.display(), error = %e, "Could not sync directory");
            }
        }
    }

    fn clean_up(&self) {
        for change in &self.changes {
            for path in change.staged.iter().chain(&change.backup) {
                if let Err(e) = remove_if_present(path) {
                    warn!(path = %path.display(), error = %e, "Could not remove flush leftover");
                }
            }
        }
    }
}

fn escape_experiment_id(experiment_id: &str) -> String {
    let mut escaped = String::with_capacity(experiment_id.len());
    for (i, c) in experiment_id.char_indices() {
        match c {
            '%' => escaped.push_str("%25"),
            PLOT_FILE_SEPARATOR => escaped.push_str("%5F"),
            HIDDEN_PREFIX if i == 0 => escaped.push_str("%2E"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_experiment_id(escaped: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(escaped.len());
    let mut rest = escaped.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let hex = tail.get(..2)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            bytes.push(u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

fn split_plot_file_name(file_name: &str) -> Option<(String, &str)> {
    let (escaped, plot_name) = file_name.split_once(PLOT_FILE_SEPARATOR)?;
    if escaped.is_empty() || plot_name.is_empty() {
        return None;
    }
    Some((unescape_experiment_id(escaped)?, plot_name))
}

fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    path.with_file_name(format!("{HIDDEN_PREFIX}{name}{suffix}"))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    // Directory handles cannot be opened for syncing here
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentRecord;
    use crate::Error;
    use tempfile::TempDir;

    fn hidden_leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
            .filter(|name| name.starts_with(HIDDEN_PREFIX))
            .collect()
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("db");
        let storage = DiskStorage::open(&root).unwrap();

        assert!(storage.figures_dir().is_dir());
        assert_eq!(storage.root(), root);
    }

    #[test]
    fn test_load_missing_files_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();

        let state = storage.load().unwrap();
        assert_eq!(state, DatabaseState::default());
    }

    #[test]
    fn test_flush_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();

        let mut state = DatabaseState::default();
        state
            .experiments
            .insert(ExperimentRecord::builder("T1", "dev").uuid("e1").build())
            .unwrap();
        state.plots.upload("e1", "fit_curve.png", b"png".to_vec()).unwrap();
        storage.flush(&state).unwrap();

        assert!(dir.path().join(EXPERIMENTS_FILE).is_file());
        assert!(dir.path().join(FIGURES_DIR).join("e1_fit_curve.png").is_file());
        assert_eq!(storage.load().unwrap(), state);
        assert!(hidden_leftovers(dir.path()).is_empty());
        assert!(hidden_leftovers(storage.figures_dir()).is_empty());
    }

    #[test]
    fn test_flush_removes_deleted_plots() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();

        let mut state = DatabaseState::default();
        state.plots.upload("e1", "a.png", b"a".to_vec()).unwrap();
        storage.flush(&state).unwrap();
        state.plots.delete("e1", "a.png").unwrap();
        storage.flush(&state).unwrap();

        assert!(!storage.figures_dir().join("e1_a.png").exists());
        assert!(storage.load().unwrap().plots.is_empty());
    }

    #[test]
    fn test_experiment_id_escaping() {
        assert_eq!(escape_experiment_id("e1"), "e1");
        assert_eq!(escape_experiment_id("a_b"), "a%5Fb");
        assert_eq!(escape_experiment_id("50%"), "50%25");
        assert_eq!(escape_experiment_id(".hidden.v2"), "%2Ehidden.v2");

        for id in ["e1", "a_b", "50%", ".hidden.v2", "%5F", "ü_ñ"] {
            assert_eq!(unescape_experiment_id(&escape_experiment_id(id)).as_deref(), Some(id));
        }
        assert_eq!(unescape_experiment_id("bad%zz"), None);
        assert_eq!(unescape_experiment_id("cut%5"), None);
    }

    #[test]
    fn test_split_stops_at_first_separator() {
        assert_eq!(
            split_plot_file_name("run%5F1_fig.png"),
            Some(("run_1".to_string(), "fig.png"))
        );
        assert_eq!(
            split_plot_file_name("a_b_c.png"),
            Some(("a".to_string(), "b_c.png"))
        );
        assert_eq!(split_plot_file_name("noseparator"), None);
        assert_eq!(split_plot_file_name("_plot"), None);
        assert_eq!(split_plot_file_name("e1_"), None);
    }

    #[test]
    fn test_overlapping_plot_keys_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();

        let mut state = DatabaseState::default();
        state.plots.upload("a_b", "c", vec![1]).unwrap();
        state.plots.upload("a", "b_c", vec![2]).unwrap();
        state.plots.upload(".dot", "d", vec![3]).unwrap();
        storage.flush(&state).unwrap();

        assert_eq!(storage.load().unwrap(), state);
    }

    #[test]
    fn test_failed_rename_restores_previous_files() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();

        let mut state = DatabaseState::default();
        state
            .experiments
            .insert(ExperimentRecord::builder("T1", "dev").uuid("e0").build())
            .unwrap();
        state.plots.upload("e0", "old.png", b"old".to_vec()).unwrap();
        storage.flush(&state).unwrap();
        let experiments_before = fs::read(dir.path().join(EXPERIMENTS_FILE)).unwrap();

        // A directory in place of the results table makes its rename fail
        // after experiments.json has already been replaced
        let results = dir.path().join(RESULTS_FILE);
        fs::remove_file(&results).unwrap();
        fs::create_dir(&results).unwrap();
        fs::write(results.join("blocker"), b"x").unwrap();

        let mut next = state.clone();
        next.experiments
            .insert(ExperimentRecord::builder("T1", "dev").uuid("e1").build())
            .unwrap();
        next.plots.delete("e0", "old.png").unwrap();
        next.plots.upload("e1", "new.png", b"new".to_vec()).unwrap();
        assert!(matches!(storage.flush(&next), Err(Error::Io(_))));

        assert_eq!(
            fs::read(dir.path().join(EXPERIMENTS_FILE)).unwrap(),
            experiments_before
        );
        assert_eq!(fs::read(storage.figures_dir().join("e0_old.png")).unwrap(), b"old");
        assert!(!storage.figures_dir().join("e1_new.png").exists());
        assert!(hidden_leftovers(dir.path()).is_empty());
        assert!(hidden_leftovers(storage.figures_dir()).is_empty());

        fs::remove_dir_all(&results).unwrap();
        assert_eq!(storage.load().unwrap(), state);
    }

    #[test]
    fn test_leftover_dot_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();
        fs::write(storage.figures_dir().join(".e1_a.png.tmp"), b"partial").unwrap();
        fs::write(storage.figures_dir().join(".e1_a.png.bak"), b"old").unwrap();

        assert!(storage.load().unwrap().plots.is_empty());
    }

    #[test]
    fn test_corrupt_table_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).unwrap();
        fs::write(dir.path().join(EXPERIMENTS_FILE), b"{not json").unwrap();

        assert!(matches!(storage.load(), Err(Error::Json(_))));
    }
}
