//! Experiment Record - root entity for experiment tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::Record;
use crate::{Error, Result};

/// Experiment Record represents a tracked experiment.
///
/// This is the root entity in the experiment tracking schema. The
/// `parent_experiment_uuid` is a weak self-reference: it is never validated
/// and never owns the parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    uuid: String,
    #[serde(rename = "type")]
    experiment_type: String,
    device_name: String,
    #[serde(default)]
    extra: Option<serde_json::Value>,
    #[serde(default)]
    parent_experiment_uuid: Option<String>,
    #[serde(default)]
    hub_id: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    experiment_id: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    jobs: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ExperimentRecord {
    /// Create a builder for an experiment of the given type run on the given device.
    #[must_use]
    pub fn builder(
        experiment_type: impl Into<String>,
        device_name: impl Into<String>,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_type, device_name)
    }

    /// Get the experiment UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Get the experiment type.
    #[must_use]
    pub fn experiment_type(&self) -> &str {
        &self.experiment_type
    }

    /// Get the device (backend) name.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Get the free-form extra metadata, if any.
    #[must_use]
    pub const fn extra(&self) -> Option<&serde_json::Value> {
        self.extra.as_ref()
    }

    /// Get the parent experiment UUID, if any.
    #[must_use]
    pub fn parent_experiment_uuid(&self) -> Option<&str> {
        self.parent_experiment_uuid.as_deref()
    }

    /// Get the hub identifier, if any.
    #[must_use]
    pub fn hub_id(&self) -> Option<&str> {
        self.hub_id.as_deref()
    }

    /// Get the group identifier, if any.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Get the project identifier, if any.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Get the external experiment identifier, if any. Unrelated to the UUID.
    #[must_use]
    pub fn experiment_id(&self) -> Option<&str> {
        self.experiment_id.as_deref()
    }

    /// Get the share level, if any.
    #[must_use]
    pub fn visibility(&self) -> Option<&str> {
        self.visibility.as_deref()
    }

    /// Get the tags, in insertion order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Get the job references.
    #[must_use]
    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    /// Get the notes, if any.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Get the start timestamp, if any.
    #[must_use]
    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Get the end timestamp, if any.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Get the last-updated timestamp, if any.
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Record for ExperimentRecord {
    const KIND: &'static str = "Experiment";

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn sort_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }
}

/// Builder for `ExperimentRecord`.
///
/// This is also the creation payload accepted by
/// [`crate::Database::create_experiment`]; a UUID is generated at build time
/// when none was supplied.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentRecordBuilder {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(rename = "type")]
    experiment_type: String,
    device_name: String,
    #[serde(default)]
    extra: Option<serde_json::Value>,
    #[serde(default)]
    parent_experiment_uuid: Option<String>,
    #[serde(default)]
    hub_id: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    experiment_id: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    jobs: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_type: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            uuid: None,
            experiment_type: experiment_type.into(),
            device_name: device_name.into(),
            extra: None,
            parent_experiment_uuid: None,
            hub_id: None,
            group_id: None,
            project_id: None,
            experiment_id: None,
            visibility: None,
            tags: Vec::new(),
            jobs: Vec::new(),
            notes: None,
            start_time: None,
            end_time: None,
            updated_at: None,
        }
    }

    /// Parse a creation payload. Unknown keys are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the JSON is malformed, misses a required
    /// field, or carries an unrecognized key.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_options(&e))
    }

    /// Set an explicit UUID instead of generating one.
    #[must_use]
    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Set the free-form extra metadata.
    #[must_use]
    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Set the parent experiment UUID.
    #[must_use]
    pub fn parent_experiment_uuid(mut self, parent: impl Into<String>) -> Self {
        self.parent_experiment_uuid = Some(parent.into());
        self
    }

    /// Set the hub, group and project identifiers.
    #[must_use]
    pub fn provider(
        mut self,
        hub_id: impl Into<String>,
        group_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        self.hub_id = Some(hub_id.into());
        self.group_id = Some(group_id.into());
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the external experiment identifier.
    #[must_use]
    pub fn experiment_id(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = Some(experiment_id.into());
        self
    }

    /// Set the share level.
    #[must_use]
    pub fn visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = Some(visibility.into());
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the job references.
    #[must_use]
    pub fn jobs<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jobs = jobs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the notes.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Set the end timestamp.
    #[must_use]
    pub const fn end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Set the last-updated timestamp.
    #[must_use]
    pub const fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Build the `ExperimentRecord`, generating a UUID if none was set.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            uuid: self.uuid.unwrap_or_else(super::generate_uuid),
            experiment_type: self.experiment_type,
            device_name: self.device_name,
            extra: self.extra,
            parent_experiment_uuid: self.parent_experiment_uuid,
            hub_id: self.hub_id,
            group_id: self.group_id,
            project_id: self.project_id,
            experiment_id: self.experiment_id,
            visibility: self.visibility,
            tags: self.tags,
            jobs: self.jobs,
            notes: self.notes,
            start_time: self.start_time,
            end_time: self.end_time,
            updated_at: self.updated_at,
        }
    }
}

/// Partial update for an `ExperimentRecord`.
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears
/// the value and `Some(Some(v))` overwrites it. The UUID is not updatable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::option_option)]
pub struct ExperimentUpdate {
    /// New experiment type
    #[serde(default, rename = "type")]
    pub experiment_type: Option<String>,
    /// New device name
    #[serde(default)]
    pub device_name: Option<String>,
    /// New extra metadata
    #[serde(default, deserialize_with = "super::double_option")]
    pub extra: Option<Option<serde_json::Value>>,
    /// New parent experiment UUID
    #[serde(default, deserialize_with = "super::double_option")]
    pub parent_experiment_uuid: Option<Option<String>>,
    /// New hub identifier
    #[serde(default, deserialize_with = "super::double_option")]
    pub hub_id: Option<Option<String>>,
    /// New group identifier
    #[serde(default, deserialize_with = "super::double_option")]
    pub group_id: Option<Option<String>>,
    /// New project identifier
    #[serde(default, deserialize_with = "super::double_option")]
    pub project_id: Option<Option<String>>,
    /// New external experiment identifier
    #[serde(default, deserialize_with = "super::double_option")]
    pub experiment_id: Option<Option<String>>,
    /// New share level
    #[serde(default, deserialize_with = "super::double_option")]
    pub visibility: Option<Option<String>>,
    /// Replacement tag list
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Replacement job list
    #[serde(default)]
    pub jobs: Option<Vec<String>>,
    /// New notes
    #[serde(default, deserialize_with = "super::double_option")]
    pub notes: Option<Option<String>>,
    /// New start timestamp
    #[serde(default, deserialize_with = "super::double_option")]
    pub start_time: Option<Option<DateTime<Utc>>>,
    /// New end timestamp
    #[serde(default, deserialize_with = "super::double_option")]
    pub end_time: Option<Option<DateTime<Utc>>>,
    /// New last-updated timestamp
    #[serde(default, deserialize_with = "super::double_option")]
    pub updated_at: Option<Option<DateTime<Utc>>>,
}

impl ExperimentUpdate {
    /// Parse an update payload. Unknown keys (including `uuid`) are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the JSON is malformed or carries an
    /// unrecognized key.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_options(&e))
    }

    /// Merge every supplied field into `record`, leaving the rest untouched.
    pub fn apply_to(self, record: &mut ExperimentRecord) {
        if let Some(v) = self.experiment_type {
            record.experiment_type = v;
        }
        if let Some(v) = self.device_name {
            record.device_name = v;
        }
        if let Some(v) = self.extra {
            record.extra = v;
        }
        if let Some(v) = self.parent_experiment_uuid {
            record.parent_experiment_uuid = v;
        }
        if let Some(v) = self.hub_id {
            record.hub_id = v;
        }
        if let Some(v) = self.group_id {
            record.group_id = v;
        }
        if let Some(v) = self.project_id {
            record.project_id = v;
        }
        if let Some(v) = self.experiment_id {
            record.experiment_id = v;
        }
        if let Some(v) = self.visibility {
            record.visibility = v;
        }
        if let Some(v) = self.tags {
            record.tags = v;
        }
        if let Some(v) = self.jobs {
            record.jobs = v;
        }
        if let Some(v) = self.notes {
            record.notes = v;
        }
        if let Some(v) = self.start_time {
            record.start_time = v;
        }
        if let Some(v) = self.end_time {
            record.end_time = v;
        }
        if let Some(v) = self.updated_at {
            record.updated_at = v;
        }
    }
}
