//! Produces a lazy, finite sequence of raw log lines from a file.

mod decode;
mod file_reader;

pub use decode::{ByteSequenceMatcher, DecodedLine, EndLineMatcher, LineDecoder, NewlineMatcher};
pub use file_reader::FileReader;

/// One raw line read from the source, annotated with its origin and the
/// wall-clock time it was ingested. Immutable once created.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub content: Vec<u8>,
    pub origin: String,
    pub ingestion_ts_ns: i64,
}

impl RawMessage {
    pub fn new(content: Vec<u8>, origin: String, ingestion_ts_ns: i64) -> Self {
        Self {
            content,
            origin,
            ingestion_ts_ns,
        }
    }
}

/// Maximum line length the reader will buffer before treating the line as
/// too long to continue.
pub const MAX_LINE_LEN: usize = 256_000;
