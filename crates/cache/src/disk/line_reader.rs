//! Line reader for journal replay.
//!
//! Journal lines end in `\n`; a trailing `\r` is tolerated so journals
//! written by other implementations replay cleanly. A final line with no
//! terminator marks a write that was cut off mid-line; the caller must
//! treat the journal as needing a rebuild.

use std::io::{self, BufRead};

pub(crate) struct LineReader<R: BufRead> {
    inner: R,
    unterminated: bool,
}

impl<R: BufRead> LineReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            unterminated: false,
        }
    }

    /// Reads the next terminated line, without its terminator.
    ///
    /// Returns `Ok(None)` at end of input. An unterminated final line is
    /// discarded (its content was never durably written) and recorded;
    /// see [`has_unterminated_line`](Self::has_unterminated_line).
    pub(crate) fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let read = self.inner.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            self.unterminated = true;
            return Ok(None);
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let line = String::from_utf8(buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "journal line is not UTF-8"))?;
        Ok(Some(line))
    }

    /// Whether the input ended in the middle of a line.
    pub(crate) fn has_unterminated_line(&self) -> bool {
        self.unterminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: &[u8]) -> LineReader<Cursor<Vec<u8>>> {
        LineReader::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn test_reads_lf_lines() {
        let mut reader = reader(b"one\ntwo\n");
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(reader.read_line().unwrap(), None);
        assert!(!reader.has_unterminated_line());
    }

    #[test]
    fn test_tolerates_crlf() {
        let mut reader = reader(b"one\r\ntwo\n");
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_empty_line() {
        let mut reader = reader(b"\nafter\n");
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("after"));
    }

    #[test]
    fn test_detects_unterminated_final_line() {
        let mut reader = reader(b"one\ntruncat");
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.read_line().unwrap(), None);
        assert!(reader.has_unterminated_line());
    }

    #[test]
    fn test_rejects_non_utf8() {
        let mut reader = reader(b"\xff\xfe\n");
        assert!(reader.read_line().is_err());
    }
}
