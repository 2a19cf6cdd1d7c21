// Pipeline ingestion: line sources and source discovery

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::SourceContext;
use crate::error::Result;
use crate::metrics::IngestMetrics;

/// What reading one source produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Raw lines read, including undecodable ones.
    pub lines: u64,
    /// Lines that were not valid UTF-8 and never reached `visit`.
    pub undecodable: u64,
}

/// A finite, ordered stream of raw lines that all describe the same hour.
///
/// The pipeline treats each source as one input partition. How the lines were
/// obtained (local file, download, decompression) is the implementor's concern.
pub trait LineSource: Send + Sync {
    fn context(&self) -> &SourceContext;

    /// Call `visit` with every decodable line, in order, with its 1-based
    /// line number.
    fn for_each_line(&self, visit: &mut dyn FnMut(u64, &str) -> Result<()>) -> Result<ReadStats>;
}

/// A newline-delimited hourly dump on local disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    context: SourceContext,
}

impl FileSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let context = SourceContext::from_source_name(&name)?;
        Ok(Self { path, context })
    }
}

impl LineSource for FileSource {
    fn context(&self) -> &SourceContext {
        &self.context
    }

    fn for_each_line(&self, visit: &mut dyn FnMut(u64, &str) -> Result<()>) -> Result<ReadStats> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut buf = Vec::new();
        let mut stats = ReadStats::default();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            stats.lines += 1;
            let mut end = buf.len();
            while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
                end -= 1;
            }
            // Lines that are not UTF-8 are skipped and counted, never decoded lossily.
            match std::str::from_utf8(&buf[..end]) {
                Ok(text) => visit(stats.lines, text)?,
                Err(e) => {
                    stats.undecodable += 1;
                    debug!(source = %self.context.source_name, line = stats.lines, "skipping undecodable line: {}", e);
                }
            }
        }
        IngestMetrics::record_source_read(stats.lines);
        if stats.undecodable > 0 {
            IngestMetrics::record_undecodable(stats.undecodable);
            warn!(
                "{}: skipped {} lines that are not valid UTF-8",
                self.path.display(),
                stats.undecodable
            );
        }
        debug!("read {} lines from {}", stats.lines, self.path.display());
        Ok(stats)
    }
}

/// Lines held in memory, for injected sources and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    context: SourceContext,
    lines: Vec<String>,
}

impl MemorySource {
    pub fn new<I, S>(context: SourceContext, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            context,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineSource for MemorySource {
    fn context(&self) -> &SourceContext {
        &self.context
    }

    fn for_each_line(&self, visit: &mut dyn FnMut(u64, &str) -> Result<()>) -> Result<ReadStats> {
        for (line_number, line) in (1u64..).zip(&self.lines) {
            visit(line_number, line)?;
        }
        let lines = self.lines.len() as u64;
        IngestMetrics::record_source_read(lines);
        Ok(ReadStats {
            lines,
            undecodable: 0,
        })
    }
}

/// Every hourly dump directly inside `dir`, sorted by file name. Hidden files
/// and names without an embedded timestamp are skipped with a warning.
pub fn discover_sources(dir: &Path) -> Result<Vec<FileSource>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if hidden {
            continue;
        }
        match FileSource::open(&path) {
            Ok(source) => sources.push(source),
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                IngestMetrics::record_source_skipped();
            }
        }
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use chrono::NaiveDate;
    use std::io::Write;

    #[test]
    fn discovers_timestamped_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["pageviews-20160702-000000", "pageviews-20160701-230000", "notes.txt", ".hidden"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let sources = discover_sources(dir.path()).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| &*s.context().source_name).collect();
        assert_eq!(names, vec!["pageviews-20160701-230000", "pageviews-20160702-000000"]);
        assert_eq!(sources[0].context().hour, 23);
    }

    #[test]
    fn listing_errors_are_returned() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_sources(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn file_lines_are_numbered_and_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pageviews-20160701-000000");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"en A 1 0\r\nen B 2 0\n\xffen C 3 0").unwrap();
        drop(f);

        let source = FileSource::open(&path).unwrap();
        let mut seen = Vec::new();
        let stats = source
            .for_each_line(&mut |n, line| {
                seen.push((n, line.to_string()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![(1, "en A 1 0".to_string()), (2, "en B 2 0".to_string())]
        );
        assert_eq!(stats, ReadStats { lines: 3, undecodable: 1 });
    }

    #[test]
    fn undecodable_titles_are_skipped_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pageviews-20160701-000000");
        fs::write(&path, b"en Caf\xff 150 0\nen Caf\xfe 150 0\nen Caf\xc3\xa9 150 0\n").unwrap();

        let mut seen = Vec::new();
        let stats = FileSource::open(&path)
            .unwrap()
            .for_each_line(&mut |n, line| {
                seen.push((n, line.to_string()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(3, "en Caf\u{e9} 150 0".to_string())]);
        assert_eq!(stats.undecodable, 2);
    }

    #[test]
    fn memory_source_keeps_context() {
        let ctx = SourceContext::new("mem", NaiveDate::from_ymd_opt(2016, 7, 1).unwrap(), 4);
        let source = MemorySource::new(ctx.clone(), ["en A 1 0"]);
        assert_eq!(source.context(), &ctx);
        let mut count = 0;
        source
            .for_each_line(&mut |_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
