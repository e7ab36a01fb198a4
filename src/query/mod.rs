//! List queries: filter, sort, limit
//!
//! ## Supported options
//!
//! Each collection has a closed configuration struct listing every option a
//! list call understands. Parsing one from JSON rejects unknown keys, so an
//! unsupported option fails with `InvalidArgument` instead of being ignored.
//!
//! - Text filters (`experiment_type`, `result_type`) match exactly, or by
//!   substring when prefixed with `like:`
//! - `tags` + `tags_operator` (`OR` default, or `AND`)
//! - Exact filters: `backend_name`, `parent_id`, `experiment_uuid`,
//!   `quality`, `verified`
//! - Inclusive timestamp bounds (`*_after` is `>=`, `*_before` is `<=`)
//! - `sort_by`: one `"field:asc|desc"` token on the collection's timestamp
//! - `limit`: prefix cut after sorting
//! - `device_components` is recognized but always rejected
//!
//! ## Example
//!
//! ```
//! use labtrack_db::query::ExperimentQuery;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let query = ExperimentQuery::from_json(
//!     r#"{"tags": ["x"], "tags_operator": "AND", "sort_by": "start_datetime:asc", "limit": 5}"#,
//! )?;
//! let plan = query.plan()?;
//! assert_eq!(plan.limit, Some(5));
//! # Ok(())
//! # }
//! ```

pub mod predicate;
pub mod sort;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::experiment::Record;
use crate::{Error, Result};
use predicate::{
    reject_device_components, tag_filter, AnalysisResultFilter, ExperimentFilter, Predicate,
    TextMatch, TimeRange,
};
pub use predicate::{TagFilter, TagsOperator};
pub use sort::{SortBy, SortSpec};

/// Sortable field of the experiment collection.
pub const EXPERIMENT_SORT_FIELD: &str = "start_datetime";

/// Sortable field of the analysis-result collection.
pub const ANALYSIS_RESULT_SORT_FIELD: &str = "creation_datetime";

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (oldest first)
    Asc,
    /// Descending order (newest first)
    Desc,
}

/// Validated filter, order and limit for one list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan<F> {
    /// Conjunction of all requested predicates
    pub filter: F,
    /// Sort order
    pub sort: SortSpec,
    /// LIMIT count (optional)
    pub limit: Option<usize>,
}

impl<F> QueryPlan<F> {
    /// Run the plan over a collection scan.
    pub fn execute<'a, R>(&self, records: &'a [R]) -> Vec<&'a R>
    where
        R: Record,
        F: Predicate<R>,
    {
        let matched: Vec<&R> = records.iter().filter(|r| self.filter.matches(r)).collect();
        sort::sort_and_limit(matched, self.sort, self.limit)
    }
}

/// Options for listing experiments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentQuery {
    /// Maximum number of experiments returned; absent means unlimited
    #[serde(default)]
    pub limit: Option<usize>,
    /// Not supported; any value fails
    #[serde(default)]
    pub device_components: Option<Vec<String>>,
    /// Exact type, or `like:`-prefixed substring
    #[serde(default)]
    pub experiment_type: Option<String>,
    /// Exact device name
    #[serde(default)]
    pub backend_name: Option<String>,
    /// Tags to look for
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Exact parent experiment UUID
    #[serde(default)]
    pub parent_id: Option<String>,
    /// `"OR"` (default) or `"AND"`
    #[serde(default)]
    pub tags_operator: Option<String>,
    /// Inclusive lower bound on start time
    #[serde(default)]
    pub start_datetime_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on start time
    #[serde(default)]
    pub start_datetime_before: Option<DateTime<Utc>>,
    /// `"start_datetime:asc"` or `"start_datetime:desc"` (default)
    #[serde(default)]
    pub sort_by: Option<SortBy>,
}

impl ExperimentQuery {
    /// Parse list options from JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on malformed JSON or an unrecognized option.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_options(&e))
    }

    /// Validate the options into an executable plan.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for device-component filters, an unknown
    /// tags operator, or an unsupported sort specification.
    pub fn plan(&self) -> Result<QueryPlan<ExperimentFilter>> {
        reject_device_components(self.device_components.as_ref())?;
        let filter = ExperimentFilter {
            experiment_type: self.experiment_type.as_deref().map(TextMatch::parse),
            backend_name: self.backend_name.clone(),
            parent_id: self.parent_id.clone(),
            tags: tag_filter(self.tags.as_ref(), self.tags_operator.as_deref())?,
            start_time: TimeRange::new(self.start_datetime_after, self.start_datetime_before),
        };
        Ok(QueryPlan {
            filter,
            sort: SortSpec::parse(self.sort_by.as_ref(), EXPERIMENT_SORT_FIELD)?,
            limit: self.limit,
        })
    }
}

/// Options for listing analysis results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResultQuery {
    /// Maximum number of results returned; absent means unlimited
    #[serde(default)]
    pub limit: Option<usize>,
    /// Not supported; any value fails
    #[serde(default)]
    pub device_components: Option<Vec<String>>,
    /// Exact experiment UUID
    #[serde(default)]
    pub experiment_uuid: Option<String>,
    /// Exact type, or `like:`-prefixed substring
    #[serde(default)]
    pub result_type: Option<String>,
    /// Exact device name (as copied from the experiment)
    #[serde(default)]
    pub backend_name: Option<String>,
    /// Exact quality label
    #[serde(default)]
    pub quality: Option<String>,
    /// Exact verified flag
    #[serde(default)]
    pub verified: Option<bool>,
    /// Tags to look for
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// `"OR"` (default) or `"AND"`
    #[serde(default)]
    pub tags_operator: Option<String>,
    /// Inclusive lower bound on creation time
    #[serde(default)]
    pub created_datetime_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time
    #[serde(default)]
    pub created_datetime_before: Option<DateTime<Utc>>,
    /// `"creation_datetime:asc"` or `"creation_datetime:desc"` (default)
    #[serde(default)]
    pub sort_by: Option<SortBy>,
}

impl AnalysisResultQuery {
    /// Parse list options from JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on malformed JSON or an unrecognized option.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_options(&e))
    }

    /// Validate the options into an executable plan.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for device-component filters, an unknown
    /// tags operator, or an unsupported sort specification.
    pub fn plan(&self) -> Result<QueryPlan<AnalysisResultFilter>> {
        reject_device_components(self.device_components.as_ref())?;
        let filter = AnalysisResultFilter {
            experiment_uuid: self.experiment_uuid.clone(),
            result_type: self.result_type.as_deref().map(TextMatch::parse),
            backend_name: self.backend_name.clone(),
            quality: self.quality.clone(),
            verified: self.verified,
            tags: tag_filter(self.tags.as_ref(), self.tags_operator.as_deref())?,
            created_at: TimeRange::new(self.created_datetime_after, self.created_datetime_before),
        };
        Ok(QueryPlan {
            filter,
            sort: SortSpec::parse(self.sort_by.as_ref(), ANALYSIS_RESULT_SORT_FIELD)?,
            limit: self.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_query_default_plan() {
        let plan = ExperimentQuery::default().plan().unwrap();
        assert_eq!(plan.sort, SortSpec::default_for(EXPERIMENT_SORT_FIELD));
        assert_eq!(plan.limit, None);
        assert_eq!(plan.filter, ExperimentFilter::default());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = ExperimentQuery::from_json(r#"{"hub": "h"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = AnalysisResultQuery::from_json(r#"{"marker": "m"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_device_components_rejected() {
        let query = ExperimentQuery {
            device_components: Some(vec!["Q0".to_string()]),
            ..Default::default()
        };
        assert!(matches!(query.plan(), Err(Error::InvalidArgument(_))));

        let query = AnalysisResultQuery {
            device_components: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(query.plan(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_tags_operator_rejected() {
        let query = ExperimentQuery {
            tags: Some(vec!["a".to_string()]),
            tags_operator: Some("any".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.plan(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_sort_field_is_per_collection() {
        let query = AnalysisResultQuery {
            sort_by: Some("start_datetime:asc".into()),
            ..Default::default()
        };
        assert!(matches!(query.plan(), Err(Error::InvalidArgument(_))));

        let query = AnalysisResultQuery {
            sort_by: Some("creation_datetime:asc".into()),
            ..Default::default()
        };
        assert_eq!(query.plan().unwrap().sort.direction(), OrderDirection::Asc);
    }

    #[test]
    fn test_from_json_sort_by_list() {
        let query =
            ExperimentQuery::from_json(r#"{"sort_by": ["start_datetime:asc", "x:desc"]}"#).unwrap();
        assert!(matches!(query.plan(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_from_json_explicit_zero_limit() {
        let query = ExperimentQuery::from_json(r#"{"limit": 0}"#).unwrap();
        assert_eq!(query.limit, Some(0));
        assert_eq!(ExperimentQuery::from_json("{}").unwrap().limit, None);
    }
}
