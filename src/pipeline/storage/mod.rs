// Output sinks for ranked and page-history documents

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

use crate::constants::{DAILY_OUTPUT, MONTHLY_OUTPUT, PAGE_HISTORY_OUTPUT, WEEKLY_OUTPUT, YEARLY_OUTPUT};
use crate::domain::Granularity;
use crate::error::Result;
use crate::pipeline::processing::{PageHistoryDocument, RankedDocument};

/// Which output stream a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKind {
    Ranked(Granularity),
    PageHistory,
}

impl DocumentKind {
    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKind::Ranked(Granularity::Day) => DAILY_OUTPUT,
            DocumentKind::Ranked(Granularity::Week) => WEEKLY_OUTPUT,
            DocumentKind::Ranked(Granularity::Month) => MONTHLY_OUTPUT,
            DocumentKind::Ranked(Granularity::Year) => YEARLY_OUTPUT,
            DocumentKind::PageHistory => PAGE_HISTORY_OUTPUT,
        }
    }
}

/// Receives serialized JSON documents, one per call, in emission order.
pub trait DocumentSink {
    fn write(&mut self, kind: DocumentKind, json: &str) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each stream to `<dir>/<stream>.jsonl`, one document per line.
///
/// Files are created on first write, so disabled streams leave no file behind.
pub struct JsonLinesSink {
    dir: PathBuf,
    writers: BTreeMap<DocumentKind, BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writers: BTreeMap::new(),
        })
    }
}

impl DocumentSink for JsonLinesSink {
    fn write(&mut self, kind: DocumentKind, json: &str) -> Result<()> {
        let writer = match self.writers.entry(kind) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                let file = File::create(self.dir.join(kind.file_name()))?;
                e.insert(BufWriter::new(file))
            }
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for (kind, writer) in self.writers.iter_mut() {
            writer.flush()?;
            info!("wrote {}", self.dir.join(kind.file_name()).display());
        }
        Ok(())
    }
}

/// Keeps documents in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySink {
    documents: BTreeMap<DocumentKind, Vec<String>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, kind: DocumentKind) -> &[String] {
        self.documents.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ranked(&self, granularity: Granularity) -> Result<Vec<RankedDocument>> {
        self.raw(DocumentKind::Ranked(granularity))
            .iter()
            .map(|s| serde_json::from_str(s).map_err(Into::into))
            .collect()
    }

    pub fn page_histories(&self) -> Result<Vec<PageHistoryDocument>> {
        self.raw(DocumentKind::PageHistory)
            .iter()
            .map(|s| serde_json::from_str(s).map_err(Into::into))
            .collect()
    }
}

impl DocumentSink for InMemorySink {
    fn write(&mut self, kind: DocumentKind, json: &str) -> Result<()> {
        self.documents.entry(kind).or_default().push(json.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_sink_writes_one_file_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::create(dir.path().join("out")).unwrap();
        sink.write(DocumentKind::Ranked(Granularity::Day), r#"{"interval":"20160701","topPages":[]}"#)
            .unwrap();
        sink.write(DocumentKind::Ranked(Granularity::Day), r#"{"interval":"20160702","topPages":[]}"#)
            .unwrap();
        sink.finish().unwrap();

        let daily = fs::read_to_string(dir.path().join("out").join(DAILY_OUTPUT)).unwrap();
        assert_eq!(daily.lines().count(), 2);
        assert!(!dir.path().join("out").join(YEARLY_OUTPUT).exists());
    }

    #[test]
    fn in_memory_sink_round_trips_documents() {
        let mut sink = InMemorySink::new();
        sink.write(DocumentKind::Ranked(Granularity::Year), r#"{"interval":"2016","topPages":[]}"#)
            .unwrap();
        let docs = sink.ranked(Granularity::Year).unwrap();
        assert_eq!(docs[0].interval, "2016");
        assert!(sink.ranked(Granularity::Day).unwrap().is_empty());
    }
}
