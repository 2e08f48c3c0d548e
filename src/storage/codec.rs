//! CSV encoding of datasets, shared by every backend.

use crate::errors::StorageError;
use crate::models::{Dataset, Record};
use crate::storage::StorageLocator;
use itertools::Itertools;
use tracing::warn;

/// Serialize a dataset with a header row. An empty dataset still gets the
/// header so the file is self-describing.
pub fn encode(dataset: &Dataset) -> Result<Vec<u8>, StorageError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if dataset.is_empty() {
        writer
            .write_record(["title", "url", "date", "content", "source", "scraped_at"])
            .map_err(|e| StorageError::Backend(format!("csv encode: {e}")))?;
    }
    for record in dataset {
        writer
            .serialize(record)
            .map_err(|e| StorageError::Backend(format!("csv encode: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| StorageError::Backend(format!("csv flush: {e}")))
}

/// Parse a stored payload. Any malformed row makes the whole payload
/// `Corrupt`; a partial dataset is never returned.
pub fn decode(bytes: &[u8], locator: &StorageLocator) -> Result<Dataset, StorageError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Dataset::default());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader.headers().map_err(|e| StorageError::Corrupt {
        locator: locator.clone(),
        reason: e.to_string(),
    })?;
    if !headers.iter().any(|h| h == "url") {
        return Err(StorageError::Corrupt {
            locator: locator.clone(),
            reason: format!("missing `url` column (found: {})", headers.iter().join(", ")),
        });
    }

    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<Record>().enumerate() {
        let record = result.map_err(|e| StorageError::Corrupt {
            locator: locator.clone(),
            reason: format!("row {}: {e}", row + 1),
        })?;
        if record.url.trim().is_empty() {
            warn!(%locator, row = row + 1, "Dropping stored row without URL");
            continue;
        }
        records.push(record);
    }
    Ok(Dataset::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use crate::storage::Version;
    use chrono::NaiveDate;

    fn locator() -> StorageLocator {
        StorageLocator::new(Source::MoneyControl, Version::Latest, "moneycontrol_news_data.csv")
    }

    #[test]
    fn test_encode_writes_header_and_column_order() {
        let mut record = Record::new(
            Source::MoneyControl,
            "Sensex, Nifty rally",
            "https://www.moneycontrol.com/news/a.html",
            "2024-01-15",
            "Line one\n\nLine two",
        );
        record.scraped_at = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(7, 30, 0);
        let bytes = encode(&Dataset::new(vec![record])).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("title,url,date,content,source,scraped_at\n"));
        assert!(text.contains("\"Sensex, Nifty rally\""));
        assert!(text.contains("moneycontrol,2024-01-15 07:30:00"));
    }

    #[test]
    fn test_empty_dataset_round_trips_to_empty() {
        let bytes = encode(&Dataset::default()).unwrap();
        assert_eq!(decode(&bytes, &locator()).unwrap().len(), 0);
        assert_eq!(decode(b"", &locator()).unwrap().len(), 0);
    }

    #[test]
    fn test_decode_accepts_pandas_style_file() {
        let csv = "title,url,date,content,source,scraped_at\n\
                   A,https://x/a,2024-01-15,,MoneyControl,2024-01-15 07:00:00\n\
                   B,https://x/b,2024-01-16,body,moneycontrol,\n";
        let dataset = decode(csv.as_bytes(), &locator()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[0].content, "");
        assert!(dataset.records()[1].scraped_at.is_none());
    }

    #[test]
    fn test_decode_missing_url_column_is_corrupt() {
        let err = decode(b"title,link\nA,b\n", &locator()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_ragged_row_is_corrupt() {
        let csv = "title,url,date,content,source,scraped_at\nA,https://x/a\n";
        let err = decode(csv.as_bytes(), &locator()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_unknown_source_is_corrupt() {
        let csv = "title,url,date,content,source,scraped_at\nA,https://x/a,,,cnbc,\n";
        assert!(matches!(
            decode(csv.as_bytes(), &locator()),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
