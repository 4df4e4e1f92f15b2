use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lf_types::{SourceId, Timestamp, TransactionRecord};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::error::AdapterError;

/// One item read from a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceItem {
    Record(TransactionRecord),
    /// The source promises no further record below this timestamp.
    Watermark(Timestamp),
    /// The source is exhausted.
    Closed,
}

/// A lazy, possibly infinite sequence of records from one source.
#[async_trait]
pub trait SourceAdapter: Send {
    fn source_id(&self) -> &SourceId;

    /// Read the next item. After `Closed` has been returned, every further
    /// call returns `Closed` again.
    async fn next(&mut self) -> Result<SourceItem, AdapterError>;
}

/// Adapter over a fixed list of items, used for tests and embedding.
pub struct VecAdapter {
    source: SourceId,
    items: VecDeque<Result<SourceItem, AdapterError>>,
}

impl VecAdapter {
    pub fn new(source: impl Into<SourceId>, items: Vec<Result<SourceItem, AdapterError>>) -> Self {
        Self {
            source: source.into(),
            items: items.into(),
        }
    }

    /// Emit `records` stamped with the source id, then close.
    pub fn from_records(source: impl Into<SourceId>, records: Vec<TransactionRecord>) -> Self {
        let source = source.into();
        let items = records
            .into_iter()
            .map(|record| Ok(SourceItem::Record(record.with_source(source.clone()))))
            .chain(std::iter::once(Ok(SourceItem::Closed)))
            .collect();
        Self { source, items }
    }
}

#[async_trait]
impl SourceAdapter for VecAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source
    }

    async fn next(&mut self) -> Result<SourceItem, AdapterError> {
        match self.items.pop_front() {
            Some(Ok(SourceItem::Record(record))) => {
                Ok(SourceItem::Record(record.with_source(self.source.clone())))
            }
            Some(item) => item,
            None => Ok(SourceItem::Closed),
        }
    }
}

/// A line of a JSON-lines source: either a record or a watermark marker
/// such as `{"watermark": 1700000000000}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceLine {
    Watermark { watermark: Timestamp },
    Record(TransactionRecord),
}

/// Reads newline-delimited JSON records from a file.
///
/// Blank lines are ignored. A line that does not decode is reported as
/// [`AdapterError::Malformed`] and reading continues with the next line.
/// Every record is stamped with this adapter's source id.
pub struct JsonLinesAdapter {
    source: SourceId,
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
    closed: bool,
}

impl JsonLinesAdapter {
    pub async fn open(source: impl Into<SourceId>, path: &Path) -> Result<Self, AdapterError> {
        let file = File::open(path)
            .await
            .map_err(|e| AdapterError::Permanent(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            source: source.into(),
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceAdapter for JsonLinesAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source
    }

    async fn next(&mut self) -> Result<SourceItem, AdapterError> {
        if self.closed {
            return Ok(SourceItem::Closed);
        }
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.closed = true;
                    return Ok(SourceItem::Closed);
                }
                Err(e) => return Err(AdapterError::Transient(e.to_string())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str::<SourceLine>(&line) {
                Ok(SourceLine::Watermark { watermark }) => Ok(SourceItem::Watermark(watermark)),
                Ok(SourceLine::Record(record)) => {
                    Ok(SourceItem::Record(record.with_source(self.source.clone())))
                }
                Err(e) => Err(AdapterError::Malformed {
                    location: format!("{}:{}", self.path.display(), self.line_no),
                    reason: e.to_string(),
                }),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_types::Decimal;
    use std::io::Write;

    #[tokio::test]
    async fn vec_adapter_stamps_source_and_closes() {
        let mut adapter = VecAdapter::from_records(
            "S1",
            vec![TransactionRecord::credit("X", 1, "A", Decimal::new(1, 0), "USD")],
        );
        let SourceItem::Record(record) = adapter.next().await.unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(record.source_id, SourceId::new("S1"));
        assert_eq!(adapter.next().await.unwrap(), SourceItem::Closed);
        assert_eq!(adapter.next().await.unwrap(), SourceItem::Closed);
    }

    #[tokio::test]
    async fn vec_adapter_replays_errors() {
        let mut adapter = VecAdapter::new(
            "S1",
            vec![
                Err(AdapterError::Transient("busy".into())),
                Ok(SourceItem::Watermark(Timestamp::new(9))),
            ],
        );
        assert!(adapter.next().await.is_err());
        assert_eq!(
            adapter.next().await.unwrap(),
            SourceItem::Watermark(Timestamp::new(9))
        );
    }

    #[tokio::test]
    async fn json_lines_adapter_reads_records_watermarks_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"identity":"X","timestamp":10,"account":"A","amount":"100.50","direction":"credit","currency":"USD"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"watermark":15}}"#).unwrap();
        writeln!(
            file,
            r#"{{"identity":"Y","timestamp":12,"account":"A","amount":"20","direction":"debit","currency":"USD","amendment_of":"X","source_id":"other"}}"#
        )
        .unwrap();
        drop(file);

        let mut adapter = JsonLinesAdapter::open("bank", &path).await.unwrap();
        let SourceItem::Record(x) = adapter.next().await.unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(x.amount, Decimal::new(10050, 2));
        assert_eq!(x.source_id, SourceId::new("bank"));

        let err = adapter.next().await.unwrap_err();
        assert!(matches!(err, AdapterError::Malformed { ref location, .. } if location.ends_with(":3")));

        assert_eq!(
            adapter.next().await.unwrap(),
            SourceItem::Watermark(Timestamp::new(15))
        );
        let SourceItem::Record(y) = adapter.next().await.unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(y.amendment_of, Some("X".into()));
        assert_eq!(y.source_id, SourceId::new("bank"));
        assert_eq!(adapter.next().await.unwrap(), SourceItem::Closed);
        assert_eq!(adapter.next().await.unwrap(), SourceItem::Closed);
    }

    #[tokio::test]
    async fn missing_file_is_a_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonLinesAdapter::open("bank", &dir.path().join("none.jsonl"))
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
