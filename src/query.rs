//! Read-side helpers: combine stored datasets into one view and filter it.

use crate::models::{Dataset, Record, Source};
use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::BTreeMap;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%B %d, %Y", "%b %d, %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Best-effort parse of a record's `published_date`.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| dt.date())
        })
}

/// All records across sources, newest published date first. Records whose
/// date cannot be parsed go last, in their stored order.
pub fn combine(datasets: BTreeMap<Source, Dataset>) -> Vec<Record> {
    datasets
        .into_values()
        .flat_map(Dataset::into_records)
        .sorted_by_key(|r| match parse_record_date(&r.published_date) {
            Some(date) => (false, Reverse(Some(date))),
            None => (true, Reverse(None)),
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source: Option<Source>,
    /// Case-insensitive substring of title or content.
    pub search: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    fn has_date_bound(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.source.is_some_and(|s| s != record.source) {
            return false;
        }
        if let Some(needle) = self.search.as_deref().map(str::to_lowercase).filter(|n| !n.is_empty()) {
            let hit = record.title.to_lowercase().contains(&needle)
                || record.content.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        if !self.has_date_bound() {
            return true;
        }
        let Some(date) = parse_record_date(&record.published_date) else {
            return false;
        };
        self.date_from.is_none_or(|from| date >= from) && self.date_to.is_none_or(|to| date <= to)
    }
}

/// Records matching every supplied criterion, in input order. Date bounds
/// are inclusive.
///
/// # Arguments
///
/// * `records` - Usually the output of [`combine`]
/// * `criteria` - Unset fields match everything
///
/// # Returns
///
/// Clones of the matching records. With a date bound set, records whose
/// date cannot be parsed are left out.
///
/// # Examples
///
/// ```ignore
/// let criteria = RecordFilter {
///     search: Some("rupee".into()),
///     date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
///     ..RecordFilter::default()
/// };
/// let hits = filter(&all, &criteria);
/// ```
pub fn filter<'a, I>(records: I, criteria: &RecordFilter) -> Vec<Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .filter(|r| criteria.matches(r))
        .cloned()
        .collect()
}
