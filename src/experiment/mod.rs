//! Experiment Tracking Schema
//!
//! Record types for the two collections held by a [`crate::Database`],
//! plus the generic in-memory [`RecordStore`] that owns them.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< AnalysisResultRecord (N)   [experiment_uuid, weak]
//!        │
//!        └── parent_experiment_uuid ──> ExperimentRecord   [weak, optional]
//! ```
//!
//! Both references are weak: deleting an experiment never cascades, and an
//! analysis result keeps its `experiment_uuid` after the parent is gone.
//!
//! ## Usage
//!
//! ```rust
//! use labtrack_db::experiment::{AnalysisResultRecord, ExperimentRecord, RecordStore};
//!
//! let mut experiments = RecordStore::new();
//! let experiment = ExperimentRecord::builder("T1", "ibmq_lima")
//!     .uuid("exp-001")
//!     .tags(["calibration"])
//!     .build();
//! experiments.insert(experiment).unwrap();
//!
//! let parent = experiments.get("exp-001").unwrap();
//! let result = AnalysisResultRecord::builder("T1")
//!     .experiment_uuid(parent.uuid())
//!     .build_for(parent)
//!     .unwrap();
//! assert_eq!(result.device_name(), "ibmq_lima");
//! ```

mod analysis_result_record;
mod experiment_record;
mod store;

pub use analysis_result_record::{
    AnalysisResultRecord, AnalysisResultRecordBuilder, AnalysisResultUpdate,
};
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder, ExperimentUpdate};
pub use store::{Record, RecordStore};

use serde::{Deserialize, Deserializer};

/// Distinguishes an absent key (`None`) from an explicit `null`
/// (`Some(None)`) in partial-update payloads.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
