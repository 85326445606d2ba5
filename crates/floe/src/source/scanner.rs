//! Incremental element boundary detection.
//!
//! [`ElementScanner`] locates the elements of a top-level JSON array and
//! [`LineSplitter`] the lines of an NDJSON document. Both accept input in
//! chunks of any size, including chunks that end inside a string, an escape
//! sequence or a multi-byte UTF-8 character, and neither ever holds more than
//! the element currently being assembled.

use std::collections::VecDeque;

use crate::error::ReaderError;

use super::SourceItem;

/// Longest raw snippet kept for a malformed element.
const SNIPPET_LIMIT: usize = 256;

fn is_ws(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

/// Decode one delimited element into a record or a malformed item.
pub(crate) fn decode_element(index: u64, offset: u64, bytes: &[u8]) -> SourceItem {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Object(record)) => SourceItem::Record {
            index,
            offset,
            record,
        },
        Ok(other) => SourceItem::Malformed {
            index,
            offset,
            reason: format!("expected a JSON object, found {}", kind(&other)),
            snippet: snippet(bytes),
        },
        Err(e) => SourceItem::Malformed {
            index,
            offset,
            reason: e.to_string(),
            snippet: snippet(bytes),
        },
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn snippet(bytes: &[u8]) -> String {
    let end = bytes.len().min(SNIPPET_LIMIT);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening `[`.
    Start,
    /// After `[`, expecting an element or `]`.
    FirstElement,
    /// After `,`, expecting an element.
    NextElement,
    /// Inside an element.
    InElement,
    /// After a complete element, expecting `,` or `]`.
    AfterElement,
    /// After the closing `]`.
    Done,
}

/// Byte-level state machine splitting a JSON array into its elements.
///
/// Tracks string state, escapes and a stack of open brackets so that
/// separators inside strings or nested values are never mistaken for element
/// boundaries.
#[derive(Debug)]
pub struct ElementScanner {
    state: State,
    in_string: bool,
    escaped: bool,
    stack: Vec<u8>,
    buf: Vec<u8>,
    element_start: u64,
    offset: u64,
    complete: u64,
}

impl Default for ElementScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementScanner {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a scanner whose first byte sits at `offset` in the document.
    pub fn starting_at(offset: u64) -> Self {
        Self {
            state: State::Start,
            in_string: false,
            escaped: false,
            stack: Vec::new(),
            buf: Vec::new(),
            element_start: offset,
            offset,
            complete: 0,
        }
    }

    /// Number of elements delimited so far.
    pub fn complete(&self) -> u64 {
        self.complete
    }

    /// Feed the next chunk, appending every element it completes to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut VecDeque<SourceItem>) -> Result<(), ReaderError> {
        for &byte in chunk {
            self.step(byte, out)?;
            self.offset += 1;
        }
        Ok(())
    }

    /// Signal end of input.
    pub fn finish(&mut self) -> Result<(), ReaderError> {
        match self.state {
            State::Done => Ok(()),
            State::Start => Err(ReaderError::EmptySource),
            State::InElement => Err(ReaderError::TruncatedInput {
                offset: self.element_start,
                complete: self.complete,
            }),
            State::FirstElement | State::NextElement | State::AfterElement => {
                Err(ReaderError::TruncatedInput {
                    offset: self.offset,
                    complete: self.complete,
                })
            }
        }
    }

    fn structural(&self, message: impl Into<String>) -> ReaderError {
        ReaderError::Structural {
            offset: self.offset,
            message: message.into(),
        }
    }

    fn step(&mut self, byte: u8, out: &mut VecDeque<SourceItem>) -> Result<(), ReaderError> {
        match self.state {
            State::Start => {
                if is_ws(byte) {
                    Ok(())
                } else if byte == b'[' {
                    self.state = State::FirstElement;
                    Ok(())
                } else {
                    Err(self.structural("expected '[' at start of document"))
                }
            }
            State::FirstElement | State::NextElement => {
                if is_ws(byte) {
                    return Ok(());
                }
                if byte == b']' {
                    if self.state == State::FirstElement {
                        self.state = State::Done;
                        return Ok(());
                    }
                    return Err(self.structural("expected an element after ','"));
                }
                self.state = State::InElement;
                self.element_start = self.offset;
                self.buf.clear();
                self.step_element(byte, out)
            }
            State::InElement => self.step_element(byte, out),
            State::AfterElement => match byte {
                b',' => {
                    self.state = State::NextElement;
                    Ok(())
                }
                b']' => {
                    self.state = State::Done;
                    Ok(())
                }
                _ if is_ws(byte) => Ok(()),
                _ => Err(self.structural("expected ',' or ']' after element")),
            },
            State::Done => {
                if is_ws(byte) {
                    Ok(())
                } else {
                    Err(ReaderError::TrailingData {
                        offset: self.offset,
                    })
                }
            }
        }
    }

    fn step_element(&mut self, byte: u8, out: &mut VecDeque<SourceItem>) -> Result<(), ReaderError> {
        if self.in_string {
            self.buf.push(byte);
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
                if self.stack.is_empty() {
                    self.emit(out, State::AfterElement);
                }
            }
            return Ok(());
        }

        match byte {
            b'"' => {
                self.buf.push(byte);
                self.in_string = true;
            }
            b'{' | b'[' => {
                self.buf.push(byte);
                self.stack.push(byte);
            }
            b'}' | b']' => match self.stack.pop() {
                Some(open) if (open == b'{') == (byte == b'}') => {
                    self.buf.push(byte);
                    if self.stack.is_empty() {
                        self.emit(out, State::AfterElement);
                    }
                }
                Some(_) => {
                    return Err(self.structural(format!("mismatched '{}'", byte as char)));
                }
                None if byte == b']' => self.emit(out, State::Done),
                None => return Err(self.structural("unexpected '}'")),
            },
            b',' if self.stack.is_empty() => self.emit(out, State::NextElement),
            _ if is_ws(byte) && self.stack.is_empty() => self.emit(out, State::AfterElement),
            _ => self.buf.push(byte),
        }
        Ok(())
    }

    fn emit(&mut self, out: &mut VecDeque<SourceItem>, next: State) {
        out.push_back(decode_element(self.complete, self.element_start, &self.buf));
        self.complete += 1;
        self.buf.clear();
        self.state = next;
    }
}

/// Splits newline-delimited JSON into one element per non-blank line.
#[derive(Debug)]
pub struct LineSplitter {
    line: Vec<u8>,
    line_start: u64,
    offset: u64,
    complete: u64,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a splitter whose first byte sits at `offset` in the document.
    pub fn starting_at(offset: u64) -> Self {
        Self {
            line: Vec::new(),
            line_start: offset,
            offset,
            complete: 0,
        }
    }

    /// Number of lines delimited so far.
    pub fn complete(&self) -> u64 {
        self.complete
    }

    /// Feed the next chunk, appending every complete line to `out`.
    pub fn push(&mut self, mut chunk: &[u8], out: &mut VecDeque<SourceItem>) {
        while let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            self.line.extend_from_slice(&chunk[..pos]);
            self.offset += pos as u64 + 1;
            if let Some((offset, bytes)) = self.trimmed() {
                out.push_back(decode_element(self.complete, offset, bytes));
                self.complete += 1;
            }
            self.line.clear();
            self.line_start = self.offset;
            chunk = &chunk[pos + 1..];
        }
        self.line.extend_from_slice(chunk);
        self.offset += chunk.len() as u64;
    }

    /// Signal end of input.
    ///
    /// A last line without a terminating newline is accepted when it parses;
    /// otherwise the document was cut off mid-record.
    pub fn finish(&mut self, out: &mut VecDeque<SourceItem>) -> Result<(), ReaderError> {
        let Some((offset, bytes)) = self.trimmed() else {
            return Ok(());
        };
        if serde_json::from_slice::<serde_json::Value>(bytes).is_err() {
            return Err(ReaderError::TruncatedInput {
                offset,
                complete: self.complete,
            });
        }
        out.push_back(decode_element(self.complete, offset, bytes));
        self.complete += 1;
        self.line.clear();
        Ok(())
    }

    fn trimmed(&self) -> Option<(u64, &[u8])> {
        let start = self.line.iter().position(|&b| !is_ws(b))?;
        let end = self.line.iter().rposition(|&b| !is_ws(b))? + 1;
        Some((self.line_start + start as u64, &self.line[start..end]))
    }
}
