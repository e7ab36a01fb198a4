//! # labtrack-db: Local Experiment Tracking Store
//!
//! labtrack-db is a single-process, file-backed stand-in for a remote
//! experiment-tracking service. It stores experiments, analysis results and
//! plot blobs, and answers list queries (filter, sort, limit) with the same
//! semantics as the service it replaces, so offline runs and tests see the
//! same results.
//!
//! ## Design Principles
//!
//! - **Durable before done**: every mutation is flushed in full before the
//!   call returns; a failed flush rolls the mutation back
//! - **Deterministic order**: sorts break timestamp ties by ascending UUID
//! - **Fail fast**: unsupported filters and sorts are rejected, never ignored
//! - **Weak references**: analysis results and parent links never cascade
//!
//! ## Example Usage
//!
//! ```rust
//! use labtrack_db::experiment::{AnalysisResultRecord, ExperimentRecord};
//! use labtrack_db::query::ExperimentQuery;
//! use labtrack_db::Database;
//!
//! # fn main() -> labtrack_db::Result<()> {
//! let db = Database::in_memory();
//!
//! let experiment = db.create_experiment(
//!     ExperimentRecord::builder("T1", "ibmq_lima").tags(["calibration"]),
//! )?;
//! let result = db.create_analysis_result(
//!     AnalysisResultRecord::builder("T1").experiment_uuid(experiment.uuid()),
//! )?;
//! assert_eq!(result.device_name(), "ibmq_lima");
//!
//! let query = ExperimentQuery {
//!     tags: Some(vec!["calibration".to_string()]),
//!     ..Default::default()
//! };
//! assert_eq!(db.experiments(&query)?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod database;
pub mod error;
pub mod experiment;
pub mod plot;
pub mod query;
pub mod storage;

pub use database::{Database, DatabaseBuilder};
pub use error::{Error, Result};
