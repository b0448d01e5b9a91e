//! Per-key bookkeeping for the disk cache.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// The committed file for value slot `index` of `key`: `<key>.<index>`.
pub(crate) fn clean_path(directory: &Path, key: &str, index: usize) -> PathBuf {
    directory.join(format!("{key}.{index}"))
}

/// The in-progress file for value slot `index` of `key`:
/// `<key>.<index>.tmp`.
pub(crate) fn dirty_path(directory: &Path, key: &str, index: usize) -> PathBuf {
    directory.join(format!("{key}.{index}.tmp"))
}

/// In-memory record for one cache key.
///
/// `readable` is true once the entry has committed at least once; all of
/// its committed files then exist with sizes matching `lengths`. While an
/// edit is open, `editing` holds that editor's id so stale handles can be
/// told apart from the live one.
pub(crate) struct Entry {
    pub(crate) key: String,
    /// Byte lengths of the committed value files.
    pub(crate) lengths: Vec<u64>,
    pub(crate) readable: bool,
    /// Id of the open editor, if an edit is in progress.
    pub(crate) editing: Option<u64>,
    /// Bumped on every successful commit; snapshots carry the value they
    /// observed so a later edit can detect staleness.
    pub(crate) sequence_number: u64,
}

impl Entry {
    pub(crate) fn new(key: String, value_count: usize) -> Self {
        Self {
            key,
            lengths: vec![0; value_count],
            readable: false,
            editing: None,
            sequence_number: 0,
        }
    }

    /// The committed file for value slot `index`: `<key>.<index>`.
    pub(crate) fn clean_file(&self, directory: &Path, index: usize) -> PathBuf {
        clean_path(directory, &self.key, index)
    }

    /// The in-progress file for value slot `index`: `<key>.<index>.tmp`.
    pub(crate) fn dirty_file(&self, directory: &Path, index: usize) -> PathBuf {
        dirty_path(directory, &self.key, index)
    }

    /// Space-prefixed lengths as written after `CLEAN <key>` in the
    /// journal.
    pub(crate) fn lengths_line(&self) -> String {
        let mut result = String::new();
        for length in &self.lengths {
            let _ = write!(result, " {length}");
        }
        result
    }

    /// Parses the length fields of a `CLEAN` journal line. Any deviation
    /// from one decimal number per value slot means the journal is
    /// corrupt.
    pub(crate) fn set_lengths(&mut self, fields: &[&str]) -> Result<(), ()> {
        if fields.len() != self.lengths.len() {
            return Err(());
        }
        for (slot, field) in self.lengths.iter_mut().zip(fields) {
            *slot = field.parse().map_err(|_| ())?;
        }
        Ok(())
    }
}
