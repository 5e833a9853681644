//! Append-only run log.

use std::sync::{Arc, PoisonError, RwLock};

/// Ordered text chunks forming one growing document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    chunks: Vec<String>,
    len: usize,
}

impl RunLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.len += text.len();
        self.chunks.push(text.to_string());
    }

    /// Append `line` on a line of its own.
    pub fn append_line(&mut self, line: &str) {
        if !self.is_empty() && !self.ends_with_newline() {
            self.append("\n");
        }
        self.append(line);
        self.append("\n");
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// The whole document.
    #[must_use]
    pub fn content(&self) -> String {
        self.chunks.concat()
    }

    #[must_use]
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Length of the document in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn ends_with_newline(&self) -> bool {
        self.chunks.last().is_some_and(|c| c.ends_with('\n'))
    }
}

/// Read-only view of a runner's log, cheap to clone.
///
/// Only the owning runner writes through it.
#[derive(Debug, Clone, Default)]
pub struct LogReader {
    inner: Arc<RwLock<RunLog>>,
}

impl LogReader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The whole document.
    #[must_use]
    pub fn content(&self) -> String {
        self.read(RunLog::content)
    }

    /// Length of the document in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(RunLog::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read(RunLog::is_empty)
    }

    /// Copy of the current log.
    #[must_use]
    pub fn snapshot(&self) -> RunLog {
        self.read(Clone::clone)
    }

    /// Run `f` against the log under the read lock.
    pub fn read<T>(&self, f: impl FnOnce(&RunLog) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut RunLog) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Incremental UTF-8 decoder for one output stream.
///
/// Multi-byte sequences split across reads are held back until complete.
/// Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, returning all text that is complete so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        loop {
            let input = &self.pending[consumed..];
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&input[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        None => {
                            // incomplete sequence at the end
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flush whatever is held back, lossily.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
