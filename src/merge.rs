//! Deduplicating merge of freshly fetched records into a stored dataset.
//!
//! `url` is the only identity. Two policies are available:
//!
//! - [`MergePolicy::LastWriteWins`] (default): an incoming record replaces
//!   the stored one with the same URL, in place. A replacement that is
//!   identical apart from `scraped_at` keeps the stored record untouched,
//!   so merging the same batch twice changes nothing.
//! - [`MergePolicy::KeepExisting`]: incoming records whose URL is already
//!   known are dropped.
//!
//! Within one batch the same rule applies to repeats: the later record wins
//! under last-write-wins, the first one under keep-existing. Either way a
//! URL counts as new at most once.

use crate::models::{Dataset, Record};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    LastWriteWins,
    KeepExisting,
}

impl MergePolicy {
    fn later_wins(self) -> bool {
        self == MergePolicy::LastWriteWins
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub dataset: Dataset,
    /// URLs that were absent from the stored dataset.
    pub new_records: usize,
    /// Stored records superseded by different incoming content.
    pub replaced: usize,
    /// Incoming records that changed nothing.
    pub skipped: usize,
}

/// Collapse repeated URLs, keeping the position of the first occurrence.
/// Returns the collapsed records and how many were folded away.
fn collapse(records: Vec<Record>, later_wins: bool) -> (Vec<Record>, usize) {
    let mut out: Vec<Record> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut folded = 0;
    for record in records {
        match index.get(&record.url) {
            Some(&i) => {
                folded += 1;
                if later_wins {
                    out[i] = record;
                }
            }
            None => {
                index.insert(record.url.clone(), out.len());
                out.push(record);
            }
        }
    }
    (out, folded)
}

/// Merge `incoming` into `existing` (`None` on first run), stamping every
/// record that ends up stored with `now`.
///
/// # Arguments
///
/// * `existing` - The stored dataset, or `None` when nothing is stored yet
/// * `incoming` - Freshly fetched records; blank URLs are dropped
/// * `policy` - What to do when an incoming URL is already stored
/// * `now` - Stamp for new and replaced records
///
/// # Returns
///
/// A [`MergeOutcome`] with the deduplicated dataset (stored order first,
/// new records appended) and counts of new, replaced and skipped records.
///
/// # Examples
///
/// ```ignore
/// let out = merge(None, vec![a.clone(), a], MergePolicy::LastWriteWins, now);
/// assert_eq!(out.new_records, 1);
/// let again = merge(Some(out.dataset), vec![a], MergePolicy::LastWriteWins, now);
/// assert_eq!(again.new_records, 0);
/// ```
pub fn merge<I>(
    existing: Option<Dataset>,
    incoming: I,
    policy: MergePolicy,
    now: NaiveDateTime,
) -> MergeOutcome
where
    I: IntoIterator<Item = Record>,
{
    let later_wins = policy.later_wins();

    let (mut records, legacy_dupes) =
        collapse(existing.map(Dataset::into_records).unwrap_or_default(), later_wins);
    if legacy_dupes > 0 {
        warn!(duplicates = legacy_dupes, "Stored dataset had repeated URLs; normalised");
    }

    let (batch, batch_dupes) = collapse(
        incoming
            .into_iter()
            .filter(|r| !r.url.trim().is_empty())
            .collect(),
        later_wins,
    );

    let mut index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.url.clone(), i))
        .collect();

    let mut new_records = 0;
    let mut replaced = 0;
    let mut skipped = batch_dupes;

    for mut record in batch {
        match index.get(&record.url) {
            Some(&i) => {
                if !later_wins || records[i].same_article(&record) {
                    skipped += 1;
                    continue;
                }
                record.scraped_at = Some(now);
                records[i] = record;
                replaced += 1;
            }
            None => {
                record.scraped_at = Some(now);
                index.insert(record.url.clone(), records.len());
                records.push(record);
                new_records += 1;
            }
        }
    }

    debug!(new_records, replaced, skipped, total = records.len(), ?policy, "Merged batch");
    MergeOutcome {
        dataset: Dataset::new(records),
        new_records,
        replaced,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn rec(url: &str, title: &str) -> Record {
        Record::new(Source::MoneyControl, title, url, "2024-01-15", format!("{title} body"))
    }

    fn titles(d: &Dataset) -> Vec<(&str, &str)> {
        d.iter().map(|r| (r.url.as_str(), r.title.as_str())).collect()
    }

    fn url_set(d: &Dataset) -> BTreeSet<String> {
        d.iter().map(|r| r.url.clone()).collect()
    }

    #[test]
    fn test_conflict_replaces_in_place_under_last_write_wins() {
        let existing = merge(None, vec![rec("a", "A1")], MergePolicy::LastWriteWins, at(6)).dataset;
        let out = merge(
            Some(existing),
            vec![rec("a", "A2"), rec("b", "B1")],
            MergePolicy::LastWriteWins,
            at(7),
        );
        assert_eq!(titles(&out.dataset), vec![("a", "A2"), ("b", "B1")]);
        assert_eq!(out.new_records, 1);
        assert_eq!(out.replaced, 1);
        assert!(out.dataset.iter().all(|r| r.scraped_at == Some(at(7))));
    }

    #[test]
    fn test_first_run_accepts_everything() {
        let out = merge(
            None,
            vec![rec("a", "A"), rec("b", "B"), rec("c", "C")],
            MergePolicy::LastWriteWins,
            at(7),
        );
        assert_eq!(out.dataset.len(), 3);
        assert_eq!(out.new_records, 3);
        assert_eq!(out.skipped, 0);
    }

    #[test]
    fn test_keep_existing_drops_known_urls() {
        let existing = merge(None, vec![rec("a", "A1")], MergePolicy::KeepExisting, at(6)).dataset;
        let out = merge(
            Some(existing),
            vec![rec("a", "A2"), rec("b", "B1")],
            MergePolicy::KeepExisting,
            at(7),
        );
        assert_eq!(titles(&out.dataset), vec![("a", "A1"), ("b", "B1")]);
        assert_eq!(out.dataset.records()[0].scraped_at, Some(at(6)));
        assert_eq!((out.new_records, out.replaced, out.skipped), (1, 0, 1));
    }

    #[test]
    fn test_repeats_within_batch_count_once() {
        let batch = vec![rec("a", "first"), rec("b", "B"), rec("a", "second")];
        let lww = merge(None, batch.clone(), MergePolicy::LastWriteWins, at(7));
        assert_eq!(titles(&lww.dataset), vec![("a", "second"), ("b", "B")]);
        assert_eq!(lww.new_records, 2);
        assert_eq!(lww.skipped, 1);

        let keep = merge(None, batch, MergePolicy::KeepExisting, at(7));
        assert_eq!(titles(&keep.dataset), vec![("a", "first"), ("b", "B")]);
        assert_eq!(keep.new_records, 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batches = [
            vec![rec("a", "A"), rec("b", "B")],
            vec![rec("a", "A'"), rec("a", "A''"), rec("c", "C")],
            vec![],
            vec![rec("d", "D"), rec("b", "B"), rec("d", "D2")],
        ];
        let seed = merge(None, vec![rec("a", "A0"), rec("z", "Z")], MergePolicy::LastWriteWins, at(5)).dataset;
        for policy in [MergePolicy::LastWriteWins, MergePolicy::KeepExisting] {
            for batch in &batches {
                for existing in [None, Some(seed.clone())] {
                    let once = merge(existing, batch.clone(), policy, at(7));
                    let twice = merge(Some(once.dataset.clone()), batch.clone(), policy, at(8));
                    assert_eq!(twice.dataset, once.dataset, "{policy:?} {batch:?}");
                    assert_eq!(twice.new_records, 0);
                    assert_eq!(twice.replaced, 0);
                }
            }
        }
    }

    #[test]
    fn test_merged_datasets_are_unique() {
        let legacy = Dataset::new(vec![rec("a", "old"), rec("b", "B"), rec("a", "newer")]);
        assert!(!legacy.is_unique());
        let out = merge(
            Some(legacy),
            vec![rec("b", "B2"), rec("c", "C"), rec("c", "C2")],
            MergePolicy::LastWriteWins,
            at(7),
        );
        assert!(out.dataset.is_unique());
        assert_eq!(titles(&out.dataset), vec![("a", "newer"), ("b", "B2"), ("c", "C2")]);
    }

    #[test]
    fn test_url_membership_is_order_independent() {
        let b1 = vec![rec("a", "A1"), rec("b", "B1")];
        let b2 = vec![rec("b", "B2"), rec("c", "C2")];
        for policy in [MergePolicy::LastWriteWins, MergePolicy::KeepExisting] {
            let one = merge(None, b1.clone(), policy, at(7)).dataset;
            let forward = merge(Some(one), b2.clone(), policy, at(8)).dataset;
            let two = merge(None, b2.clone(), policy, at(7)).dataset;
            let backward = merge(Some(two), b1.clone(), policy, at(8)).dataset;
            assert_eq!(url_set(&forward), url_set(&backward));
        }
    }

    #[test]
    fn test_identical_refetch_keeps_original_stamp() {
        let existing = merge(None, vec![rec("a", "A")], MergePolicy::LastWriteWins, at(6)).dataset;
        let out = merge(Some(existing), vec![rec("a", "A")], MergePolicy::LastWriteWins, at(9));
        assert_eq!(out.dataset.records()[0].scraped_at, Some(at(6)));
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_blank_urls_are_ignored() {
        let out = merge(None, vec![rec("  ", "blank"), rec("a", "A")], MergePolicy::LastWriteWins, at(7));
        assert_eq!(out.dataset.len(), 1);
        assert_eq!(out.new_records, 1);
    }
}
