//! Sort and limit
//!
//! Each collection allow-lists exactly one sortable field. The total order is
//! the sort timestamp in the requested direction, then ascending UUID, so
//! repeated queries over the same data always return the same sequence.
//!
//! When a limit smaller than the match count is requested, the first K
//! entries are partitioned out in O(N) before sorting only that prefix, which
//! yields the same prefix a full sort would.

use std::cmp::Ordering;

use serde::Deserialize;

use super::OrderDirection;
use crate::experiment::Record;
use crate::{Error, Result};

/// Raw `sort_by` option: a single `"field:direction"` token or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SortBy {
    /// One token
    Single(String),
    /// A list of tokens; only a list of exactly one is accepted
    Many(Vec<String>),
}

impl SortBy {
    fn tokens(&self) -> &[String] {
        match self {
            Self::Single(token) => std::slice::from_ref(token),
            Self::Many(tokens) => tokens,
        }
    }
}

impl From<&str> for SortBy {
    fn from(token: &str) -> Self {
        Self::Single(token.to_string())
    }
}

/// Validated sort specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    field: &'static str,
    direction: OrderDirection,
}

impl SortSpec {
    /// Default order for a collection: descending by its sort field.
    #[must_use]
    pub const fn default_for(field: &'static str) -> Self {
        Self {
            field,
            direction: OrderDirection::Desc,
        }
    }

    /// Validate a `sort_by` option against the collection's single
    /// allow-listed field.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless the option is exactly one
    /// `"<field>:asc"` or `"<field>:desc"` token.
    pub fn parse(sort_by: Option<&SortBy>, field: &'static str) -> Result<Self> {
        let Some(sort_by) = sort_by else {
            return Ok(Self::default_for(field));
        };
        let unsupported = || {
            Error::InvalidArgument(format!(
                "Only sorting by {field} is supported, which can be either asc or desc"
            ))
        };

        let [token] = sort_by.tokens() else {
            return Err(unsupported());
        };
        let mut parts = token.split(':');
        let (Some(name), Some(direction), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(unsupported());
        };
        if name != field {
            return Err(unsupported());
        }
        let direction = match direction {
            "asc" => OrderDirection::Asc,
            "desc" => OrderDirection::Desc,
            _ => return Err(unsupported()),
        };
        Ok(Self { field, direction })
    }

    /// The allow-listed field this spec sorts by.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        self.field
    }

    /// The sort direction.
    #[must_use]
    pub const fn direction(&self) -> OrderDirection {
        self.direction
    }

    /// Total order over records: timestamp in `direction` (missing
    /// timestamps last either way), then ascending UUID.
    pub fn compare<R: Record>(&self, a: &R, b: &R) -> Ordering {
        let by_time = match (a.sort_time(), b.sort_time()) {
            (Some(x), Some(y)) => match self.direction {
                OrderDirection::Asc => x.cmp(&y),
                OrderDirection::Desc => y.cmp(&x),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_time.then_with(|| a.uuid().cmp(b.uuid()))
    }
}

/// Sort `records` by `spec` and keep the first `limit` entries.
///
/// `None` means no truncation; `Some(0)` yields an empty vector.
pub fn sort_and_limit<R: Record>(
    mut records: Vec<&R>,
    spec: SortSpec,
    limit: Option<usize>,
) -> Vec<&R> {
    let cmp = |a: &&R, b: &&R| spec.compare(*a, *b);
    match limit {
        Some(0) => return Vec::new(),
        Some(k) if k < records.len() => {
            records.select_nth_unstable_by(k - 1, cmp);
            records.truncate(k);
        }
        _ => {}
    }
    records.sort_unstable_by(cmp);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentRecord;
    use chrono::{TimeZone, Utc};

    const FIELD: &str = "start_datetime";

    fn exp(uuid: &str, hour: Option<u32>) -> ExperimentRecord {
        let builder = ExperimentRecord::builder("T1", "dev").uuid(uuid);
        match hour {
            Some(h) => builder
                .start_time(Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap())
                .build(),
            None => builder.build(),
        }
    }

    fn ids<'a>(records: &[&'a ExperimentRecord]) -> Vec<&'a str> {
        records.iter().map(|r| r.uuid()).collect()
    }

    #[test]
    fn test_parse_default_is_desc() {
        let spec = SortSpec::parse(None, FIELD).unwrap();
        assert_eq!(spec.direction(), OrderDirection::Desc);
        assert_eq!(spec.field(), FIELD);
    }

    #[test]
    fn test_parse_valid_tokens() {
        let asc = SortSpec::parse(Some(&"start_datetime:asc".into()), FIELD).unwrap();
        assert_eq!(asc.direction(), OrderDirection::Asc);

        let single_list = SortBy::Many(vec!["start_datetime:desc".to_string()]);
        let desc = SortSpec::parse(Some(&single_list), FIELD).unwrap();
        assert_eq!(desc.direction(), OrderDirection::Desc);
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        let bad: Vec<SortBy> = vec![
            "experiment_type:asc".into(),
            "start_datetime:up".into(),
            "start_datetime".into(),
            "start_datetime:asc:x".into(),
            SortBy::Many(vec![]),
            SortBy::Many(vec![
                "start_datetime:asc".to_string(),
                "start_datetime:desc".to_string(),
            ]),
        ];
        for sort_by in &bad {
            assert!(
                matches!(SortSpec::parse(Some(sort_by), FIELD), Err(Error::InvalidArgument(_))),
                "{sort_by:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_ties_break_by_ascending_uuid() {
        let records = [exp("b", Some(1)), exp("a", Some(1)), exp("c", Some(2))];
        let refs: Vec<_> = records.iter().collect();

        let desc = sort_and_limit(refs.clone(), SortSpec::default_for(FIELD), None);
        assert_eq!(ids(&desc), ["c", "a", "b"]);

        let asc = SortSpec::parse(Some(&"start_datetime:asc".into()), FIELD).unwrap();
        assert_eq!(ids(&sort_and_limit(refs, asc, None)), ["a", "b", "c"]);
    }

    #[test]
    fn test_missing_timestamps_sort_last() {
        let records = [exp("z", None), exp("a", None), exp("m", Some(5))];
        let refs: Vec<_> = records.iter().collect();

        let desc = sort_and_limit(refs.clone(), SortSpec::default_for(FIELD), None);
        assert_eq!(ids(&desc), ["m", "a", "z"]);

        let asc = SortSpec::parse(Some(&"start_datetime:asc".into()), FIELD).unwrap();
        assert_eq!(ids(&sort_and_limit(refs, asc, None)), ["m", "a", "z"]);
    }

    #[test]
    fn test_limit_prefix_and_zero() {
        let records: Vec<_> = (0..10).map(|h| exp(&format!("e{h}"), Some(h))).collect();
        let refs: Vec<_> = records.iter().collect();
        let spec = SortSpec::default_for(FIELD);

        let full = sort_and_limit(refs.clone(), spec, None);
        let top3 = sort_and_limit(refs.clone(), spec, Some(3));
        assert_eq!(ids(&top3), ids(&full[..3]));
        assert!(sort_and_limit(refs.clone(), spec, Some(0)).is_empty());
        assert_eq!(sort_and_limit(refs, spec, Some(50)).len(), 10);
    }
}
