//! Tabular export of records for people, not for storage.
//!
//! Columns are fixed: `Title, URL, Source, Date, Scraped-At, Content`.
//! Content may be shortened with `truncate`; stored datasets never are.

use crate::models::{Record, SCRAPED_AT_FORMAT};
use std::io::Write;

pub const HEADER: [&str; 6] = ["Title", "URL", "Source", "Date", "Scraped-At", "Content"];

/// Cut `content` to at most `max` characters, marking the cut with `...`.
fn shorten(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

/// Write `records` as CSV to `out`.
///
/// # Arguments
///
/// * `out` - Any writer; wrap files in a `BufWriter`
/// * `records` - Rows in output order
/// * `truncate` - Cut Content to this many characters
///
/// # Returns
///
/// The number of data rows written, header excluded.
///
/// # Errors
///
/// Fails on the first write or flush error from `out`.
pub fn write_csv<'a, W, I>(out: W, records: I, truncate: Option<usize>) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'a Record>,
{
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(HEADER)?;
    let mut rows = 0;
    for record in records {
        let scraped_at = record
            .scraped_at
            .map(|t| t.format(SCRAPED_AT_FORMAT).to_string())
            .unwrap_or_default();
        let content = match truncate {
            Some(max) => shorten(&record.content, max),
            None => record.content.clone(),
        };
        writer.write_record([
            record.title.as_str(),
            record.url.as_str(),
            record.source.display_name(),
            record.published_date.as_str(),
            scraped_at.as_str(),
            content.as_str(),
        ])?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}
