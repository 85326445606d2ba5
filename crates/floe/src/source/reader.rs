//! Lazy element stream over a source document.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use object_store::path::Path;
use serde_json::value::RawValue;
use snafu::prelude::*;
use tracing::debug;

use floe_core::StorageProvider;
use floe_core::storage::ByteStream;

use crate::error::{ReaderError, SourceReadSnafu};

use super::SourceItem;
use super::scanner::{ElementScanner, LineSplitter, decode_element};

fn is_ws(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

/// Document layout, detected from the first non-whitespace byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// A single top-level array of objects.
    JsonArray,
    /// One object per line.
    Ndjson,
}

enum Decoder {
    /// No significant byte seen yet; counts skipped whitespace.
    Detecting { skipped: u64 },
    Array(ElementScanner),
    Lines(LineSplitter),
}

impl Decoder {
    fn push(&mut self, chunk: &[u8], out: &mut VecDeque<SourceItem>) -> Result<(), ReaderError> {
        if let Decoder::Detecting { skipped } = self {
            let Some(start) = chunk.iter().position(|&b| !is_ws(b)) else {
                *skipped += chunk.len() as u64;
                return Ok(());
            };
            let offset = *skipped + start as u64;
            *self = if chunk[start] == b'[' {
                Decoder::Array(ElementScanner::starting_at(offset))
            } else {
                Decoder::Lines(LineSplitter::starting_at(offset))
            };
            return self.push(&chunk[start..], out);
        }

        match self {
            Decoder::Array(scanner) => scanner.push(chunk, out),
            Decoder::Lines(splitter) => {
                splitter.push(chunk, out);
                Ok(())
            }
            Decoder::Detecting { .. } => Ok(()),
        }
    }

    fn finish(&mut self, out: &mut VecDeque<SourceItem>) -> Result<(), ReaderError> {
        match self {
            Decoder::Detecting { .. } => Err(ReaderError::EmptySource),
            Decoder::Array(scanner) => scanner.finish(),
            Decoder::Lines(splitter) => splitter.finish(out),
        }
    }

    fn format(&self) -> Option<SourceFormat> {
        match self {
            Decoder::Detecting { .. } => None,
            Decoder::Array(_) => Some(SourceFormat::JsonArray),
            Decoder::Lines(_) => Some(SourceFormat::Ndjson),
        }
    }
}

enum Mode {
    /// Every item was decoded up front.
    Buffered { format: Option<SourceFormat> },
    /// Items are decoded as chunks arrive.
    Streaming {
        chunks: BoxStream<'static, Result<Bytes, ReaderError>>,
        decoder: Decoder,
        chunk_size: usize,
    },
}

/// Finite, non-restartable sequence of the elements of one source document.
///
/// Small documents are parsed whole; documents at or above the streaming
/// threshold are decoded one element at a time. Both paths yield the same
/// items for the same bytes. Items decoded before a fatal error are always
/// yielded before the error itself.
pub struct RecordStream {
    mode: Mode,
    ready: VecDeque<SourceItem>,
    pending_error: Option<ReaderError>,
    exhausted: bool,
}

impl RecordStream {
    /// Open an object, choosing whole-document or streaming decoding by size.
    pub async fn open(
        storage: &StorageProvider,
        path: &Path,
        streaming_threshold: u64,
        chunk_size: usize,
    ) -> Result<Self, ReaderError> {
        let size = storage.size(path).await.context(SourceReadSnafu)?;
        if size == 0 {
            return Err(ReaderError::EmptySource);
        }

        if size < streaming_threshold {
            debug!(size, "Parsing source as a whole document");
            let bytes = storage.get(path).await.context(SourceReadSnafu)?;
            return Ok(Self::from_bytes(bytes));
        }

        debug!(size, chunk_size, "Streaming source document");
        let chunks: ByteStream = storage.get_stream(path).await.context(SourceReadSnafu)?;
        Ok(Self::from_chunks(
            chunks.map(|chunk| chunk.context(SourceReadSnafu)).boxed(),
            chunk_size,
        ))
    }

    /// Parse an in-memory document as a whole.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let mut ready = VecDeque::new();
        let (format, pending_error) = match decode_whole(&bytes, &mut ready) {
            Ok(format) => (Some(format), None),
            Err((format, e)) => (format, Some(e)),
        };
        Self {
            mode: Mode::Buffered { format },
            ready,
            pending_error,
            exhausted: true,
        }
    }

    /// Decode a document incrementally from a stream of chunks.
    ///
    /// Incoming chunks larger than `chunk_size` are fed to the decoder in
    /// `chunk_size` slices.
    pub fn from_chunks(
        chunks: BoxStream<'static, Result<Bytes, ReaderError>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            mode: Mode::Streaming {
                chunks,
                decoder: Decoder::Detecting { skipped: 0 },
                chunk_size: chunk_size.max(1),
            },
            ready: VecDeque::new(),
            pending_error: None,
            exhausted: false,
        }
    }

    /// Detected document layout, once known.
    pub fn format(&self) -> Option<SourceFormat> {
        match &self.mode {
            Mode::Buffered { format } => *format,
            Mode::Streaming { decoder, .. } => decoder.format(),
        }
    }

    /// Next element, `None` once the document is exhausted.
    pub async fn next(&mut self) -> Option<Result<SourceItem, ReaderError>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return self.pending_error.take().map(Err);
            }

            let Mode::Streaming {
                chunks,
                decoder,
                chunk_size,
            } = &mut self.mode
            else {
                self.exhausted = true;
                continue;
            };

            let result = match chunks.next().await {
                Some(Ok(chunk)) => chunk
                    .chunks(*chunk_size)
                    .try_for_each(|slice| decoder.push(slice, &mut self.ready)),
                Some(Err(e)) => Err(e),
                None => {
                    self.exhausted = true;
                    decoder.finish(&mut self.ready)
                }
            };

            if let Err(e) = result {
                self.exhausted = true;
                self.pending_error = Some(e);
            }
        }
    }
}

/// Decode a complete document held in memory.
///
/// Arrays are parsed in one pass; if that fails, the element scanner runs
/// over the same bytes so that malformed elements and structural errors are
/// reported exactly as the streaming path reports them.
fn decode_whole(
    bytes: &[u8],
    out: &mut VecDeque<SourceItem>,
) -> Result<SourceFormat, (Option<SourceFormat>, ReaderError)> {
    let Some(start) = bytes.iter().position(|&b| !is_ws(b)) else {
        return Err((None, ReaderError::EmptySource));
    };

    if bytes[start] != b'[' {
        let mut splitter = LineSplitter::new();
        splitter.push(bytes, out);
        return splitter
            .finish(out)
            .map(|()| SourceFormat::Ndjson)
            .map_err(|e| (Some(SourceFormat::Ndjson), e));
    }

    let parsed = std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| serde_json::from_str::<Vec<&RawValue>>(text).ok().map(|v| (text, v)));

    match parsed {
        Some((text, elements)) => {
            let base = text.as_ptr() as usize;
            for (index, raw) in elements.iter().enumerate() {
                let offset = (raw.get().as_ptr() as usize - base) as u64;
                out.push_back(decode_element(index as u64, offset, raw.get().as_bytes()));
            }
            Ok(SourceFormat::JsonArray)
        }
        None => {
            let mut scanner = ElementScanner::new();
            scanner
                .push(bytes, out)
                .and_then(|()| scanner.finish())
                .map(|()| SourceFormat::JsonArray)
                .map_err(|e| (Some(SourceFormat::JsonArray), e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunked(doc: &[u8], size: usize) -> RecordStream {
        let chunks: Vec<Result<Bytes, ReaderError>> = doc
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        RecordStream::from_chunks(stream::iter(chunks).boxed(), 64 * 1024)
    }

    async fn drain(mut stream: RecordStream) -> (Vec<SourceItem>, Option<ReaderError>) {
        let mut items = Vec::new();
        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => items.push(item),
                Err(e) => return (items, Some(e)),
            }
        }
        (items, None)
    }

    fn document(n: usize) -> String {
        let elements: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"id":{i},"note":"line {i}, with [brackets] and \"quotes\"","tags":["a","b"],"nested":{{"k":{i}}}}}"#))
            .collect();
        format!("[\n  {}\n]\n", elements.join(",\n  "))
    }

    #[tokio::test]
    async fn test_whole_and_streaming_paths_agree() {
        let doc = document(25);
        let (whole, whole_err) = drain(RecordStream::from_bytes(Bytes::from(doc.clone()))).await;
        assert!(whole_err.is_none());
        assert_eq!(whole.len(), 25);

        for size in [1, 2, 3, 7, 64, 1000, doc.len()] {
            let (streamed, err) = drain(chunked(doc.as_bytes(), size)).await;
            assert!(err.is_none(), "chunk size {size}: {err:?}");
            assert_eq!(streamed, whole, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn test_truncation_after_ten_of_fifteen() {
        let doc = document(15);
        let cut = doc.find(r#"{"id":10,"#).unwrap() + 12;
        let (items, err) = drain(chunked(&doc.as_bytes()[..cut], 9)).await;

        assert_eq!(items.len(), 10);
        match err {
            Some(ReaderError::TruncatedInput { offset, complete }) => {
                assert_eq!(complete, 10);
                assert_eq!(offset as usize, doc.find(r#"{"id":10,"#).unwrap());
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_whole_path_reports_truncation_too() {
        let doc = document(3);
        let cut = doc.rfind(']').unwrap();
        let (items, err) = drain(RecordStream::from_bytes(Bytes::from(doc[..cut].to_string()))).await;
        assert_eq!(items.len(), 3);
        assert!(matches!(
            err,
            Some(ReaderError::TruncatedInput { complete: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_sources_rejected() {
        let (items, err) = drain(RecordStream::from_bytes(Bytes::from_static(b" \n "))).await;
        assert!(items.is_empty());
        assert!(matches!(err, Some(ReaderError::EmptySource)));

        let (_, err) = drain(chunked(b"   ", 1)).await;
        assert!(matches!(err, Some(ReaderError::EmptySource)));
    }

    #[tokio::test]
    async fn test_empty_array_is_valid() {
        let (items, err) = drain(RecordStream::from_bytes(Bytes::from_static(b"[]"))).await;
        assert!(items.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_ndjson_detected() {
        let doc = b"\n{\"id\":1}\n{\"id\":2}\n";
        let stream = RecordStream::from_bytes(Bytes::from_static(doc));
        assert_eq!(stream.format(), Some(SourceFormat::Ndjson));
        let (items, err) = drain(stream).await;
        assert!(err.is_none());
        assert_eq!(items.len(), 2);

        let (streamed, err) = drain(chunked(doc, 4)).await;
        assert!(err.is_none());
        assert_eq!(streamed, items);
    }

    #[tokio::test]
    async fn test_malformed_element_parity() {
        let doc = br#"[{"id":1},{"id":},{"id":3}]"#;
        let (whole, err) = drain(RecordStream::from_bytes(Bytes::from_static(doc))).await;
        assert!(err.is_none());
        let (streamed, err) = drain(chunked(doc, 5)).await;
        assert!(err.is_none());
        assert_eq!(whole, streamed);
        assert!(matches!(whole[1], SourceItem::Malformed { index: 1, offset: 10, .. }));
    }

    #[tokio::test]
    async fn test_open_from_storage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("jobs.json");
        std::fs::write(&file, document(5)).unwrap();
        let storage =
            StorageProvider::for_object_url(file.to_str().unwrap(), Default::default())
                .await
                .unwrap();
        let path = StorageProvider::object_path();

        let (whole, _) = drain(RecordStream::open(&storage, &path, u64::MAX, 16).await.unwrap()).await;
        let (streamed, _) = drain(RecordStream::open(&storage, &path, 0, 16).await.unwrap()).await;
        assert_eq!(whole.len(), 5);
        assert_eq!(whole, streamed);
    }

    #[tokio::test]
    async fn test_open_rejects_zero_byte_object() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty.json");
        std::fs::write(&file, b"").unwrap();
        let storage =
            StorageProvider::for_object_url(file.to_str().unwrap(), Default::default())
                .await
                .unwrap();

        let result = RecordStream::open(&storage, &StorageProvider::object_path(), 0, 16).await;
        assert!(matches!(result, Err(ReaderError::EmptySource)));
    }
}
