//! JSON-lines decoding of event streams.

use crate::source::types::Event;
use std::io::BufRead;

/// Errors raised while decoding an event stream.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Iterator over events encoded one JSON object per line.
///
/// Blank lines are skipped. Decoding stops being useful after the first
/// IO error, but parse errors are per line and the caller may continue.
pub struct JsonLinesReader<R> {
    inner: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            buf: String::new(),
        }
    }

    /// Number of lines consumed so far.
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<Event, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.inner.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    let trimmed = self.buf.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(trimmed).map_err(|source| {
                        SourceError::Parse {
                            line: self.line,
                            source,
                        }
                    }));
                }
                Err(e) => return Some(Err(SourceError::Io(e))),
            }
        }
    }
}
