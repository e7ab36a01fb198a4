//! Analysis Result Record - fitted outcome attached to an experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::Record;
use super::ExperimentRecord;
use crate::{Error, Result};

/// Analysis Result Record represents one analysis outcome of an experiment.
///
/// `experiment_uuid` is fixed at creation and is not required to stay valid:
/// deleting the experiment leaves its results in place. `device_name` is a
/// snapshot of the experiment's device at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResultRecord {
    uuid: String,
    experiment_uuid: String,
    #[serde(default)]
    device_components: Vec<String>,
    #[serde(default)]
    fit: Option<serde_json::Value>,
    #[serde(rename = "type")]
    result_type: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    chisq: Option<f64>,
    device_name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl AnalysisResultRecord {
    /// Create a builder for a result of the given type.
    #[must_use]
    pub fn builder(result_type: impl Into<String>) -> AnalysisResultRecordBuilder {
        AnalysisResultRecordBuilder::new(result_type)
    }

    /// Get the result UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Get the UUID of the experiment this result was created for.
    #[must_use]
    pub fn experiment_uuid(&self) -> &str {
        &self.experiment_uuid
    }

    /// Get the device components the result refers to.
    #[must_use]
    pub fn device_components(&self) -> &[String] {
        &self.device_components
    }

    /// Get the fit data, if any.
    #[must_use]
    pub const fn fit(&self) -> Option<&serde_json::Value> {
        self.fit.as_ref()
    }

    /// Get the result type.
    #[must_use]
    pub fn result_type(&self) -> &str {
        &self.result_type
    }

    /// Get the tags, in insertion order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Get the quality label, if any.
    #[must_use]
    pub fn quality(&self) -> Option<&str> {
        self.quality.as_deref()
    }

    /// Whether the result has been verified.
    #[must_use]
    pub const fn verified(&self) -> bool {
        self.verified
    }

    /// Get the chi-squared value, if any.
    #[must_use]
    pub const fn chisq(&self) -> Option<f64> {
        self.chisq
    }

    /// Get the device name copied from the experiment at creation.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last-updated timestamp, if any.
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Record for AnalysisResultRecord {
    const KIND: &'static str = "Analysis result";

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn sort_time(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

/// Builder for `AnalysisResultRecord`, and the creation payload accepted by
/// [`crate::Database::create_analysis_result`].
///
/// There is no device name field: it is always copied from the
/// referenced experiment.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResultRecordBuilder {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    experiment_uuid: Option<String>,
    #[serde(default)]
    device_components: Vec<String>,
    #[serde(default)]
    fit: Option<serde_json::Value>,
    #[serde(rename = "type")]
    result_type: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    chisq: Option<f64>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl AnalysisResultRecordBuilder {
    /// Create a new builder; the creation timestamp defaults to now.
    #[must_use]
    pub fn new(result_type: impl Into<String>) -> Self {
        Self {
            uuid: None,
            experiment_uuid: None,
            device_components: Vec::new(),
            fit: None,
            result_type: result_type.into(),
            tags: Vec::new(),
            quality: None,
            verified: false,
            chisq: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Parse a creation payload. Unknown keys are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the JSON is malformed, misses the result
    /// type, or carries an unrecognized key.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_options(&e))
    }

    /// The experiment UUID this payload refers to, if set.
    #[must_use]
    pub fn referenced_experiment(&self) -> Option<&str> {
        self.experiment_uuid.as_deref()
    }

    /// Set an explicit UUID instead of generating one.
    #[must_use]
    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Set the experiment this result belongs to.
    #[must_use]
    pub fn experiment_uuid(mut self, experiment_uuid: impl Into<String>) -> Self {
        self.experiment_uuid = Some(experiment_uuid.into());
        self
    }

    /// Set the device components.
    #[must_use]
    pub fn device_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.device_components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Set the fit data.
    #[must_use]
    pub fn fit(mut self, fit: serde_json::Value) -> Self {
        self.fit = Some(fit);
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

    /// Set the quality label.
    #[must_use]
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// Set the verified flag.
    #[must_use]
    pub const fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    /// Set the chi-squared value. It must be finite by the time the record
    /// is built.
    #[must_use]
    pub const fn chisq(mut self, chisq: f64) -> Self {
        self.chisq = Some(chisq);
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the last-updated timestamp.
    #[must_use]
    pub const fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Build the record against its parent experiment, copying the parent's
    /// device name and generating a UUID if none was set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no experiment UUID was set, if it does
    /// not name `experiment`, or if the chi-squared value is NaN or infinite.
    pub fn build_for(self, experiment: &ExperimentRecord) -> Result<AnalysisResultRecord> {
        let experiment_uuid = self.experiment_uuid.ok_or_else(|| {
            Error::InvalidArgument(
                "Cannot create analysis result without experiment id".to_string(),
            )
        })?;
        if experiment_uuid != experiment.uuid() {
            return Err(Error::InvalidArgument(format!(
                "Analysis result references experiment {experiment_uuid}, not {}",
                experiment.uuid()
            )));
        }
        check_chisq(self.chisq)?;

        Ok(AnalysisResultRecord {
            uuid: self.uuid.unwrap_or_else(super::generate_uuid),
            experiment_uuid,
            device_components: self.device_components,
            fit: self.fit,
            result_type: self.result_type,
            tags: self.tags,
            quality: self.quality,
            verified: self.verified,
            chisq: self.chisq,
            device_name: experiment.device_name().to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Partial update for an `AnalysisResultRecord`.
///
/// Neither the UUID nor the experiment UUID is updatable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::option_option)]
pub struct AnalysisResultUpdate {
    /// Replacement device component list
    #[serde(default)]
    pub device_components: Option<Vec<String>>,
    /// New fit data
    #[serde(default, deserialize_with = "super::double_option")]
    pub fit: Option<Option<serde_json::Value>>,
    /// New result type
    #[serde(default, rename = "type")]
    pub result_type: Option<String>,
    /// Replacement tag list
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// New quality label
    #[serde(default, deserialize_with = "super::double_option")]
    pub quality: Option<Option<String>>,
    /// New verified flag
    #[serde(default)]
    pub verified: Option<bool>,
    /// New chi-squared value
    #[serde(default, deserialize_with = "super::double_option")]
    pub chisq: Option<Option<f64>>,
    /// New device name
    #[serde(default)]
    pub device_name: Option<String>,
    /// New creation timestamp
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// New last-updated timestamp
    #[serde(default, deserialize_with = "super::double_option")]
    pub updated_at: Option<Option<DateTime<Utc>>>,
}

impl AnalysisResultUpdate {
    /// Parse an update payload. Unknown keys are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the JSON is malformed or carries an
    /// unrecognized key (including `uuid` and `experiment_uuid`).
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_options(&e))
    }

    /// Merge every supplied field into `record`, leaving the rest untouched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the new chi-squared value is NaN or
    /// infinite. `record` is not modified in that case.
    pub fn apply_to(self, record: &mut AnalysisResultRecord) -> Result<()> {
        check_chisq(self.chisq.flatten())?;
        if let Some(v) = self.device_components {
            record.device_components = v;
        }
        if let Some(v) = self.fit {
            record.fit = v;
        }
        if let Some(v) = self.result_type {
            record.result_type = v;
        }
        if let Some(v) = self.tags {
            record.tags = v;
        }
        if let Some(v) = self.quality {
            record.quality = v;
        }
        if let Some(v) = self.verified {
            record.verified = v;
        }
        if let Some(v) = self.chisq {
            record.chisq = v;
        }
        if let Some(v) = self.device_name {
            record.device_name = v;
        }
        if let Some(v) = self.created_at {
            record.created_at = v;
        }
        if let Some(v) = self.updated_at {
            record.updated_at = v;
        }
        Ok(())
    }
}

/// JSON has no encoding for NaN or infinity, so such a value would come back
/// as null after a restart.
fn check_chisq(chisq: Option<f64>) -> Result<()> {
    match chisq {
        Some(value) if !value.is_finite() => Err(Error::InvalidArgument(format!(
            "chisq must be a finite number, got {value}"
        ))),
        _ => Ok(()),
    }
}
