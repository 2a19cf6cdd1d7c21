// Rollup pipeline: ingestion, processing, storage, and the run that ties them together

pub mod ingestion;
pub mod processing;
pub mod runner;
pub mod storage;

// Re-export the types a caller needs to assemble a run
pub use ingestion::{discover_sources, FileSource, LineSource, MemorySource};
pub use runner::{LevelSummary, RollupPipeline, RunSummary, ValidationReport};
pub use storage::{DocumentKind, DocumentSink, InMemorySink, JsonLinesSink};
