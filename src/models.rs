//! Data models for scraped articles and the datasets they are stored in.
//!
//! - [`Source`]: the news sites the pipeline knows how to scrape
//! - [`Record`]: one scraped article, the unit of deduplication
//! - [`Dataset`]: the full persisted collection of records for one source
//!
//! Records are serialized as CSV rows with the column order
//! `title,url,date,content,source,scraped_at`, which is also the on-disk
//! layout used by every storage backend.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
#[cfg(test)]
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used for `scraped_at` in stored CSV files.
pub const SCRAPED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A news site the pipeline scrapes.
///
/// Stored as its lowercase slug (`moneycontrol`); the display name
/// (`MoneyControl`) is accepted when reading older files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "moneycontrol", alias = "MoneyControl", alias = "Moneycontrol")]
    MoneyControl,
    #[serde(rename = "livemint", alias = "LiveMint", alias = "Livemint")]
    LiveMint,
    #[serde(
        rename = "financialexpress",
        alias = "FinancialExpress",
        alias = "Financialexpress"
    )]
    FinancialExpress,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::MoneyControl, Source::LiveMint, Source::FinancialExpress];

    /// Lowercase identifier used in file names, keys and CSV rows.
    pub fn slug(&self) -> &'static str {
        match self {
            Source::MoneyControl => "moneycontrol",
            Source::LiveMint => "livemint",
            Source::FinancialExpress => "financialexpress",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Source::MoneyControl => "MoneyControl",
            Source::LiveMint => "LiveMint",
            Source::FinancialExpress => "FinancialExpress",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Source::ALL
            .into_iter()
            .find(|src| src.slug() == normalized)
            .ok_or_else(|| format!("unknown source `{s}` (expected moneycontrol, livemint or financialexpress)"))
    }
}

/// One scraped article.
///
/// `url` is the sole identity of a record. `scraped_at` is `None` while the
/// record travels from the fetcher to the merge engine, which stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub url: String,
    /// Best-effort publication date as found on the page, free-form.
    #[serde(rename = "date", default)]
    pub published_date: String,
    #[serde(default)]
    pub content: String,
    pub source: Source,
    #[serde(
        default,
        serialize_with = "serialize_scraped_at",
        deserialize_with = "deserialize_scraped_at"
    )]
    pub scraped_at: Option<NaiveDateTime>,
}

impl Record {
    /// A freshly fetched record, not yet stamped by a merge.
    pub fn new(
        source: Source,
        title: impl Into<String>,
        url: impl Into<String>,
        published_date: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            published_date: published_date.into(),
            content: content.into(),
            source,
            scraped_at: None,
        }
    }

    /// True when both records describe the same article text, ignoring
    /// `scraped_at`.
    pub fn same_article(&self, other: &Record) -> bool {
        self.url == other.url
            && self.title == other.title
            && self.published_date == other.published_date
            && self.content == other.content
            && self.source == other.source
    }
}

fn serialize_scraped_at<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&ts.format(SCRAPED_AT_FORMAT).to_string()),
        None => serializer.serialize_str(""),
    }
}

fn deserialize_scraped_at<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else { return Ok(None) };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    // pandas and older exports wrote ISO timestamps with a `T` and fractions
    for fmt in [SCRAPED_AT_FORMAT, "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Some(ts));
        }
    }
    Err(serde::de::Error::custom(format!("unparsable scraped_at `{raw}`")))
}

/// The full collection of records persisted for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    #[cfg(test)]
    pub fn urls(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.url.as_str()).collect()
    }

    /// Whether every URL appears at most once.
    #[cfg(test)]
    pub fn is_unique(&self) -> bool {
        self.urls().len() == self.records.len()
    }
}

impl From<Vec<Record>> for Dataset {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
