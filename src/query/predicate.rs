//! Predicate engine
//!
//! Each list query compiles into one filter struct whose predicates are
//! ANDed together. Only a tag predicate carries its own OR/AND operator.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::experiment::{AnalysisResultRecord, ExperimentRecord};
use crate::{Error, Result};

/// Prefix that turns a text filter into an unanchored substring match.
pub const LIKE_PREFIX: &str = "like:";

/// A predicate over one record type.
pub trait Predicate<R> {
    /// Whether `record` satisfies the predicate.
    fn matches(&self, record: &R) -> bool;
}

/// Exact or `like:`-prefixed substring match on a text field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Field equals the value
    Exact(String),
    /// Field contains the value anywhere
    Contains(String),
}

impl TextMatch {
    /// Interpret a filter value: `"like:xyz"` becomes `Contains("xyz")`,
    /// anything else is an exact match.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        value.strip_prefix(LIKE_PREFIX).map_or_else(
            || Self::Exact(value.to_string()),
            |needle| Self::Contains(needle.to_string()),
        )
    }

    /// Test a field value.
    #[must_use]
    pub fn matches(&self, field: &str) -> bool {
        match self {
            Self::Exact(value) => field == value,
            Self::Contains(needle) => field.contains(needle.as_str()),
        }
    }
}

/// How a tag filter combines its required tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagsOperator {
    /// At least one required tag is present
    #[default]
    Or,
    /// Every required tag is present
    And,
}

impl FromStr for TagsOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OR" => Ok(Self::Or),
            "AND" => Ok(Self::And),
            other => Err(Error::InvalidArgument(format!(
                "Unrecognized tags operator {other}, expected OR or AND"
            ))),
        }
    }
}

/// Tag-set membership predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    required: Vec<String>,
    operator: TagsOperator,
}

impl TagFilter {
    /// Create a tag filter.
    #[must_use]
    pub const fn new(required: Vec<String>, operator: TagsOperator) -> Self {
        Self { required, operator }
    }

    /// Test a record's tag list.
    ///
    /// An empty required set matches nothing under `OR` and everything under `AND`.
    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        let present = |tag: &String| tags.contains(tag);
        match self.operator {
            TagsOperator::Or => self.required.iter().any(present),
            TagsOperator::And => self.required.iter().all(present),
        }
    }
}

/// Inclusive bounds on a timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Create a range; `after` is the inclusive lower bound, `before` the
    /// inclusive upper bound.
    #[must_use]
    pub const fn new(after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        Self { after, before }
    }

    /// Whether neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }

    /// Test a timestamp. A missing timestamp never satisfies a bound.
    #[must_use]
    pub fn matches(&self, value: Option<DateTime<Utc>>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        self.after.map_or(true, |after| value >= after)
            && self.before.map_or(true, |before| value <= before)
    }
}

/// Reject any device-component filter: there is no predicate for it.
pub(crate) fn reject_device_components(device_components: Option<&Vec<String>>) -> Result<()> {
    if device_components.is_some() {
        return Err(Error::InvalidArgument(
            "Filtering on device components is not supported by the local store".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn tag_filter(
    tags: Option<&Vec<String>>,
    operator: Option<&str>,
) -> Result<Option<TagFilter>> {
    let operator = operator.map_or(Ok(TagsOperator::Or), TagsOperator::from_str)?;
    Ok(tags.map(|tags| TagFilter::new(tags.clone(), operator)))
}

/// Compiled experiment filter.
///
/// Note: `parent_id` is an exact match only. There is no way to ask for
/// experiments whose parent is absent (root experiments).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentFilter {
    pub(crate) experiment_type: Option<TextMatch>,
    pub(crate) backend_name: Option<String>,
    pub(crate) parent_id: Option<String>,
    pub(crate) tags: Option<TagFilter>,
    pub(crate) start_time: TimeRange,
}

impl Predicate<ExperimentRecord> for ExperimentFilter {
    fn matches(&self, record: &ExperimentRecord) -> bool {
        self.experiment_type
            .as_ref()
            .map_or(true, |m| m.matches(record.experiment_type()))
            && self
                .backend_name
                .as_deref()
                .map_or(true, |name| record.device_name() == name)
            && self
                .parent_id
                .as_deref()
                .map_or(true, |parent| record.parent_experiment_uuid() == Some(parent))
            && self.tags.as_ref().map_or(true, |t| t.matches(record.tags()))
            && self.start_time.matches(record.start_time())
    }
}

/// Compiled analysis-result filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResultFilter {
    pub(crate) experiment_uuid: Option<String>,
    pub(crate) result_type: Option<TextMatch>,
    pub(crate) backend_name: Option<String>,
    pub(crate) quality: Option<String>,
    pub(crate) verified: Option<bool>,
    pub(crate) tags: Option<TagFilter>,
    pub(crate) created_at: TimeRange,
}

impl Predicate<AnalysisResultRecord> for AnalysisResultFilter {
    fn matches(&self, record: &AnalysisResultRecord) -> bool {
        self.experiment_uuid
            .as_deref()
            .map_or(true, |id| record.experiment_uuid() == id)
            && self
                .result_type
                .as_ref()
                .map_or(true, |m| m.matches(record.result_type()))
            && self
                .backend_name
                .as_deref()
                .map_or(true, |name| record.device_name() == name)
            && self
                .quality
                .as_deref()
                .map_or(true, |q| record.quality() == Some(q))
            && self.verified.map_or(true, |v| record.verified() == v)
            && self.tags.as_ref().map_or(true, |t| t.matches(record.tags()))
            && self.created_at.matches(Some(record.created_at()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_text_match_like_prefix() {
        let m = TextMatch::parse("like:Rabi");
        assert_eq!(m, TextMatch::Contains("Rabi".to_string()));
        assert!(m.matches("FineRabiCal"));
        assert!(!m.matches("T1"));
    }

    #[test]
    fn test_text_match_exact() {
        let m = TextMatch::parse("Rabi");
        assert!(m.matches("Rabi"));
        assert!(!m.matches("FineRabiCal"));
    }

    #[test]
    fn test_text_match_like_keeps_colons() {
        let m = TextMatch::parse("like:a:b");
        assert!(m.matches("xa:by"));
    }

    #[test]
    fn test_tags_operator_parse() {
        assert_eq!("OR".parse::<TagsOperator>().unwrap(), TagsOperator::Or);
        assert_eq!("AND".parse::<TagsOperator>().unwrap(), TagsOperator::And);
        assert!(matches!(
            "XOR".parse::<TagsOperator>(),
            Err(Error::InvalidArgument(_))
        ));
        assert!("or".parse::<TagsOperator>().is_err());
    }

    #[test]
    fn test_tag_filter_or_and() {
        let or = TagFilter::new(tags(&["a", "b"]), TagsOperator::Or);
        let and = TagFilter::new(tags(&["a", "b"]), TagsOperator::And);

        assert!(or.matches(&tags(&["b", "c"])));
        assert!(!or.matches(&tags(&["c"])));
        assert!(and.matches(&tags(&["b", "a", "c"])));
        assert!(!and.matches(&tags(&["a"])));
    }

    #[test]
    fn test_tag_filter_empty_required() {
        assert!(!TagFilter::new(vec![], TagsOperator::Or).matches(&tags(&["a"])));
        assert!(TagFilter::new(vec![], TagsOperator::And).matches(&tags(&["a"])));
    }

    #[test]
    fn test_time_range_inclusive() {
        let t = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        let range = TimeRange::new(Some(t(1)), Some(t(3)));

        assert!(range.matches(Some(t(1))));
        assert!(range.matches(Some(t(3))));
        assert!(!range.matches(Some(t(0))));
        assert!(!range.matches(Some(t(4))));
        assert!(!range.matches(None));
        assert!(TimeRange::default().matches(None));
    }

    #[test]
    fn test_parent_filter_is_exact() {
        let child = ExperimentRecord::builder("T1", "dev")
            .uuid("c")
            .parent_experiment_uuid("p")
            .build();
        let root = ExperimentRecord::builder("T1", "dev").uuid("r").build();
        let filter = ExperimentFilter {
            parent_id: Some("p".to_string()),
            ..Default::default()
        };

        assert!(filter.matches(&child));
        assert!(!filter.matches(&root));
    }

    #[test]
    fn test_reject_device_components() {
        assert!(reject_device_components(None).is_ok());
        let components = vec!["Q0".to_string()];
        assert!(matches!(
            reject_device_components(Some(&components)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
