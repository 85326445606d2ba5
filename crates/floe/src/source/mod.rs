//! Streaming record reader.
//!
//! Turns a source document (a JSON array of objects, or NDJSON) into a lazy
//! sequence of [`SourceItem`]s. Each item is either a decoded record or a
//! malformed element that the pipeline skips and reports.

mod reader;
mod scanner;

pub use reader::{RecordStream, SourceFormat};
pub use scanner::{ElementScanner, LineSplitter};

use crate::record::Record;

/// One element of a source document.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    /// A well-formed object.
    Record {
        /// Position of the element in the document.
        index: u64,
        /// Byte offset where the element starts.
        offset: u64,
        record: Record,
    },
    /// A delimited element that is not valid JSON or not an object.
    Malformed {
        index: u64,
        offset: u64,
        reason: String,
        /// Leading bytes of the raw element, lossily decoded.
        snippet: String,
    },
}

impl SourceItem {
    pub fn index(&self) -> u64 {
        match self {
            SourceItem::Record { index, .. } | SourceItem::Malformed { index, .. } => *index,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            SourceItem::Record { offset, .. } | SourceItem::Malformed { offset, .. } => *offset,
        }
    }
}
