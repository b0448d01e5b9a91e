//! Journaled, crash-safe disk cache.
//!
//! Each key maps to a fixed number of value files on disk. Mutations are
//! recorded in an append-only journal named `journal`:
//!
//! ```text
//! libcore.io.DiskLruCache
//! 1
//! 100
//! 2
//!
//! CLEAN 3400330d1dfc7f3f7f4b8d4d803dfcf6 832 21054
//! DIRTY 335c4c6028171cfddfbaae1a9c313c52
//! CLEAN 335c4c6028171cfddfbaae1a9c313c52 3934 2342
//! REMOVE 335c4c6028171cfddfbaae1a9c313c52
//! READ 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! ```
//!
//! The header records the format version, the caller's application
//! version, and the number of value files per entry. Each body line is one
//! operation: `DIRTY` marks an entry as being created or updated (it must
//! be followed by `CLEAN` or `REMOVE`, otherwise the entry's files are
//! invalid and deleted on open), `CLEAN` publishes an entry with its value
//! file sizes, `REMOVE` deletes it, and `READ` tracks accesses so LRU
//! order survives a restart.
//!
//! Replaying the journal on open reconstructs the cache. The journal is
//! compacted in the background once it accumulates enough redundant
//! lines; `journal.tmp` is the compaction scratch file and `journal.bkp`
//! the safety copy while the new journal is swapped into place.

mod entry;
mod line_reader;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use log::warn;
use lru::LruCache as LruMap;

use entry::{clean_path, dirty_path, Entry};
use line_reader::LineReader;

const JOURNAL_FILE: &str = "journal";
const JOURNAL_FILE_TMP: &str = "journal.tmp";
const JOURNAL_FILE_BACKUP: &str = "journal.bkp";
const MAGIC: &str = "libcore.io.DiskLruCache";
const VERSION: &str = "1";
const CLEAN: &str = "CLEAN";
const DIRTY: &str = "DIRTY";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

/// A rebuild must eliminate at least this many redundant ops (and at
/// least halve the journal) to be worth the I/O.
const REDUNDANT_OP_COMPACT_THRESHOLD: usize = 2000;

/// Errors surfaced by [`DiskLruCache`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DiskCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The cache was closed before the operation ran.
    #[error("cache is closed")]
    Closed,
    /// The editor's entry has been aborted or the cache reopened; the
    /// handle can only be discarded.
    #[error("editor is no longer valid")]
    StaleEditor,
    /// A first-time commit left a value slot unwritten. The entry has
    /// been aborted.
    #[error("newly created entry did not write a value for slot {index}")]
    IncompleteEntry { index: usize },
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn delete_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn delete_directory_contents(directory: &Path) -> io::Result<()> {
    for dir_entry in fs::read_dir(directory)? {
        let dir_entry = dir_entry?;
        if dir_entry.file_type()?.is_dir() {
            fs::remove_dir_all(dir_entry.path())?;
        } else {
            fs::remove_file(dir_entry.path())?;
        }
    }
    Ok(())
}

/// Keys become file names and journal fields, so they are restricted to a
/// charset that is safe for both.
fn validate_key(key: &str) {
    assert!(
        !key.is_empty() && key.len() <= 120,
        "key must be 1..=120 characters: {key:?}"
    );
    assert!(
        key.bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-')),
        "key must match [a-z0-9_-]+: {key:?}"
    );
}

/// All mutable cache state, guarded by one mutex.
struct CacheState {
    directory: PathBuf,
    app_version: u32,
    value_count: usize,
    max_size: u64,
    /// Bytes used by committed value files. May transiently exceed
    /// `max_size` until the background trim runs.
    size: u64,
    /// `None` once the cache is closed.
    journal_writer: Option<BufWriter<File>>,
    /// Access-ordered so the eldest entry is the eviction victim, as in
    /// the journal replay order.
    entries: LruMap<String, Entry>,
    /// Journal lines that carry no live state; drives compaction.
    redundant_op_count: usize,
    next_sequence_number: u64,
    next_editor_id: u64,
}

impl CacheState {
    fn new(directory: PathBuf, app_version: u32, value_count: usize, max_size: u64) -> Self {
        Self {
            directory,
            app_version,
            value_count,
            max_size,
            size: 0,
            journal_writer: None,
            entries: LruMap::unbounded(),
            redundant_op_count: 0,
            next_sequence_number: 0,
            next_editor_id: 1,
        }
    }

    fn journal_file(&self) -> PathBuf {
        self.directory.join(JOURNAL_FILE)
    }

    fn is_closed(&self) -> bool {
        self.journal_writer.is_none()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, DiskCacheError> {
        self.journal_writer.as_mut().ok_or(DiskCacheError::Closed)
    }

    fn rebuild_required(&self) -> bool {
        self.redundant_op_count >= REDUNDANT_OP_COMPACT_THRESHOLD
            && self.redundant_op_count >= self.entries.len()
    }

    fn read_journal(&mut self) -> io::Result<()> {
        let file = File::open(self.journal_file())?;
        let mut reader = LineReader::new(BufReader::new(file));

        let mut header = || {
            reader
                .read_line()
                .and_then(|line| line.ok_or_else(|| invalid_data("truncated journal header".into())))
        };
        let magic = header()?;
        let version = header()?;
        let app_version = header()?;
        let value_count = header()?;
        let blank = header()?;
        if magic != MAGIC
            || version != VERSION
            || app_version != self.app_version.to_string()
            || value_count != self.value_count.to_string()
            || !blank.is_empty()
        {
            return Err(invalid_data(format!(
                "unexpected journal header: [{magic}, {version}, {app_version}, {value_count}]"
            )));
        }

        let mut line_count = 0usize;
        while let Some(line) = reader.read_line()? {
            self.read_journal_line(&line)?;
            line_count += 1;
        }
        self.redundant_op_count = line_count.saturating_sub(self.entries.len());

        if reader.has_unterminated_line() {
            // The last write was cut off; start from a clean journal.
            self.rebuild_journal()?;
        } else {
            let file = OpenOptions::new().append(true).open(self.journal_file())?;
            self.journal_writer = Some(BufWriter::new(file));
        }
        Ok(())
    }

    fn read_journal_line(&mut self, line: &str) -> io::Result<()> {
        let mut fields = line.split(' ');
        let op = fields.next().unwrap_or("");
        let key = fields
            .next()
            .ok_or_else(|| invalid_data(format!("unexpected journal line: {line}")))?;
        let rest: Vec<&str> = fields.collect();

        if op == REMOVE && rest.is_empty() {
            self.entries.pop(key);
            return Ok(());
        }

        // Reading an existing entry promotes it, which is exactly how
        // replayed lines restore LRU order.
        if self.entries.get_mut(key).is_none() {
            let value_count = self.value_count;
            self.entries
                .put(key.to_string(), Entry::new(key.to_string(), value_count));
        }
        let entry = self.entries.get_mut(key).expect("entry just inserted");

        match op {
            CLEAN => {
                entry
                    .set_lengths(&rest)
                    .map_err(|()| invalid_data(format!("unexpected journal line: {line}")))?;
                entry.readable = true;
                entry.editing = None;
            }
            // Id 0 is reserved for replayed markers; live editors start
            // at 1. These entries are swept by process_journal.
            DIRTY if rest.is_empty() => entry.editing = Some(0),
            READ if rest.is_empty() => {}
            _ => return Err(invalid_data(format!("unexpected journal line: {line}"))),
        }
        Ok(())
    }

    /// Computes the initial size and collects garbage as part of opening
    /// the cache. Entries still marked dirty never saw a matching CLEAN
    /// and are assumed inconsistent: they are dropped and their files
    /// deleted.
    fn process_journal(&mut self) -> io::Result<()> {
        delete_if_exists(&self.directory.join(JOURNAL_FILE_TMP))?;

        let keys: Vec<String> = self.entries.iter().map(|(key, _)| key.clone()).collect();
        for key in keys {
            let editing = self
                .entries
                .peek(&key)
                .map(|entry| entry.editing.is_some())
                .unwrap_or(false);
            if editing {
                let entry = self.entries.pop(&key).expect("entry disappeared");
                for index in 0..self.value_count {
                    delete_if_exists(&entry.clean_file(&self.directory, index))?;
                    delete_if_exists(&entry.dirty_file(&self.directory, index))?;
                }
            } else if let Some(entry) = self.entries.peek(&key) {
                self.size += entry.lengths.iter().sum::<u64>();
            }
        }
        Ok(())
    }

    /// Creates a new journal that omits redundant information. This
    /// replaces the current journal if it exists.
    fn rebuild_journal(&mut self) -> io::Result<()> {
        let tmp = self.directory.join(JOURNAL_FILE_TMP);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writeln!(writer, "{MAGIC}")?;
            writeln!(writer, "{VERSION}")?;
            writeln!(writer, "{}", self.app_version)?;
            writeln!(writer, "{}", self.value_count)?;
            writeln!(writer)?;

            let lines: Vec<String> = self
                .entries
                .iter()
                .map(|(key, entry)| {
                    if entry.editing.is_some() {
                        format!("{DIRTY} {key}")
                    } else {
                        format!("{CLEAN} {key}{}", entry.lengths_line())
                    }
                })
                .collect();
            // iter() walks most-recent first; the journal stores the
            // eldest entry first so replay restores the same order.
            for line in lines.iter().rev() {
                writeln!(writer, "{line}")?;
            }
            writer.flush()?;
        }

        // Swap the fresh journal in, keeping a backup so an interruption
        // between the two renames is recoverable on the next open.
        self.journal_writer = None;
        let journal = self.journal_file();
        let backup = self.directory.join(JOURNAL_FILE_BACKUP);
        if journal.exists() {
            delete_if_exists(&backup)?;
            fs::rename(&journal, &backup)?;
        }
        fs::rename(&tmp, &journal)?;
        delete_if_exists(&backup)?;

        let file = OpenOptions::new().append(true).open(&journal)?;
        self.journal_writer = Some(BufWriter::new(file));
        self.redundant_op_count = 0;
        Ok(())
    }

    /// Starts an edit, returning the new editor's id, or `None` if
    /// another edit is open or the snapshot precondition failed.
    fn edit_locked(
        &mut self,
        key: &str,
        expected_sequence_number: Option<u64>,
    ) -> Result<Option<u64>, DiskCacheError> {
        if self.is_closed() {
            return Err(DiskCacheError::Closed);
        }
        if let Some(expected) = expected_sequence_number {
            match self.entries.peek(key) {
                Some(entry) if entry.sequence_number == expected => {}
                _ => return Ok(None), // snapshot is stale
            }
        }
        if self.entries.get_mut(key).is_none() {
            let value_count = self.value_count;
            self.entries
                .put(key.to_string(), Entry::new(key.to_string(), value_count));
        }

        let id = self.next_editor_id;
        let entry = self.entries.get_mut(key).expect("entry just inserted");
        if entry.editing.is_some() {
            return Ok(None); // another edit is in progress
        }
        entry.editing = Some(id);
        self.next_editor_id += 1;

        // Flush the DIRTY record before the editor creates files, so a
        // crash from here on leaves a self-describing journal: an
        // orphaned DIRTY is discarded on the next open.
        let writer = self.writer()?;
        writeln!(writer, "{DIRTY} {key}")?;
        writer.flush()?;
        Ok(Some(id))
    }

    fn complete_edit(
        &mut self,
        key: &str,
        editor_id: u64,
        written: &[bool],
        success: bool,
    ) -> Result<(), DiskCacheError> {
        if self.is_closed() {
            // Aborting after close is a no-op (close already aborted the
            // entry); committing is an error.
            return if success {
                Err(DiskCacheError::Closed)
            } else {
                Ok(())
            };
        }
        let (readable, live) = match self.entries.peek(key) {
            Some(entry) => (entry.readable, entry.editing == Some(editor_id)),
            None => (false, false),
        };
        if !live {
            return if success {
                Err(DiskCacheError::StaleEditor)
            } else {
                Ok(())
            };
        }

        // A first-time commit must have written every slot; anything less
        // becomes an abort.
        let mut success = success;
        let mut missing_slot = None;
        if success && !readable {
            for index in 0..self.value_count {
                if !written[index] {
                    success = false;
                    missing_slot = Some(index);
                    break;
                }
                if !dirty_path(&self.directory, key, index).exists() {
                    success = false;
                    break;
                }
            }
        }

        for index in 0..self.value_count {
            let dirty = dirty_path(&self.directory, key, index);
            if success {
                if dirty.exists() {
                    let clean = clean_path(&self.directory, key, index);
                    fs::rename(&dirty, &clean)?;
                    let new_length = fs::metadata(&clean)?.len();
                    let old_length;
                    {
                        let entry = self.entries.peek_mut(key).expect("entry disappeared");
                        old_length = entry.lengths[index];
                        entry.lengths[index] = new_length;
                    }
                    self.size = self.size - old_length + new_length;
                }
            } else {
                delete_if_exists(&dirty)?;
            }
        }

        self.redundant_op_count += 1;
        let next_sequence_number = self.next_sequence_number;
        let (line, removed) = {
            let entry = self.entries.peek_mut(key).expect("entry disappeared");
            entry.editing = None;
            if entry.readable || success {
                entry.readable = true;
                if success {
                    entry.sequence_number = next_sequence_number;
                }
                (format!("{CLEAN} {key}{}", entry.lengths_line()), false)
            } else {
                // First-time edit failed with nothing previously
                // readable: the entry never existed.
                (format!("{REMOVE} {key}"), true)
            }
        };
        if success {
            self.next_sequence_number += 1;
        }
        if removed {
            self.entries.pop(key);
        }
        let writer = self.writer()?;
        writeln!(writer, "{line}")?;
        writer.flush()?;

        if let Some(index) = missing_slot {
            return Err(DiskCacheError::IncompleteEntry { index });
        }
        Ok(())
    }

    /// Snapshot data for `key` if the entry is readable and all of its
    /// files still exist, promoting the entry and journaling the read.
    #[allow(clippy::type_complexity)]
    fn get_locked(
        &mut self,
        key: &str,
    ) -> Result<Option<(u64, Vec<PathBuf>, Vec<u64>)>, DiskCacheError> {
        if self.is_closed() {
            return Ok(None);
        }
        let (sequence_number, lengths) = match self.entries.get_mut(key) {
            Some(entry) if entry.readable => (entry.sequence_number, entry.lengths.clone()),
            _ => return Ok(None),
        };

        // Re-check the files; something outside the cache may have
        // deleted them since the commit.
        let mut files = Vec::with_capacity(self.value_count);
        for index in 0..self.value_count {
            let file = clean_path(&self.directory, key, index);
            if !file.exists() {
                return Ok(None);
            }
            files.push(file);
        }

        self.redundant_op_count += 1;
        let writer = self.writer()?;
        writeln!(writer, "{READ} {key}")?;
        Ok(Some((sequence_number, files, lengths)))
    }

    /// Removes `key` unless an edit is open on it. Shared by the public
    /// remove and by eviction, which are deliberately the same path.
    fn remove_entry(&mut self, key: &str) -> Result<bool, DiskCacheError> {
        let lengths = match self.entries.peek(key) {
            None => return Ok(false),
            Some(entry) if entry.editing.is_some() => return Ok(false),
            Some(entry) => entry.lengths.clone(),
        };
        for index in 0..self.value_count {
            delete_if_exists(&clean_path(&self.directory, key, index))?;
        }
        self.entries.pop(key).expect("entry disappeared");
        self.size -= lengths.iter().sum::<u64>();
        self.redundant_op_count += 1;
        let writer = self.writer()?;
        writeln!(writer, "{REMOVE} {key}")?;
        Ok(true)
    }

    fn trim_to_size(&mut self) -> Result<(), DiskCacheError> {
        while self.size > self.max_size {
            // Eldest entry first; entries mid-edit cannot be removed.
            let victim = self
                .entries
                .iter()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .find(|(_, entry)| entry.editing.is_none())
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                break;
            };
            self.remove_entry(&key)?;
        }
        Ok(())
    }

    fn close_locked(&mut self) -> Result<(), DiskCacheError> {
        if self.is_closed() {
            return Ok(()); // already closed
        }
        let editing: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| entry.editing.map(|id| (key.clone(), id)))
            .collect();
        let written = vec![false; self.value_count];
        for (key, id) in editing {
            self.complete_edit(&key, id, &written, false)?;
        }
        self.trim_to_size()?;
        if let Some(mut writer) = self.journal_writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

struct Shared {
    state: Mutex<CacheState>,
    cleanup_tx: Sender<()>,
}

/// Background worker: trims to the byte budget and compacts the journal.
/// One thread per cache, so at most one cleanup runs at a time; it
/// silently does nothing if the cache was closed before it ran.
fn cleanup_loop(shared: Weak<Shared>, work_rx: Receiver<()>) {
    while work_rx.recv().is_ok() {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        if state.is_closed() {
            continue;
        }
        if let Err(e) = state.trim_to_size() {
            warn!("background disk cache trim failed: {e}");
        }
        if state.rebuild_required() {
            if let Err(e) = state.rebuild_journal() {
                warn!("journal rebuild failed: {e}");
            }
        }
    }
}

/// Journaled LRU cache of named binary values on disk.
///
/// Each entry holds a fixed number of value files (`value_count`, chosen
/// at open). Writers go through an [`Editor`] obtained from
/// [`edit`](Self::edit); at most one editor is open per key. Readers get
/// an immutable [`Snapshot`] from [`get`](Self::get). The cache survives
/// process restarts by replaying its journal, and a crash mid-write is
/// rolled back on the next open.
///
/// Handles are cheap to clone and share one underlying cache.
#[derive(Clone)]
pub struct DiskLruCache {
    shared: Arc<Shared>,
}

impl DiskLruCache {
    /// Opens the cache in `directory`, creating it if none exists.
    ///
    /// `app_version` is recorded in the journal header; opening a
    /// directory written by a different version finds a mismatching
    /// header, which counts as corruption and wipes the cache. A corrupt
    /// or truncated journal is likewise discarded and the cache rebuilt
    /// empty; entries are reconstructible from their source.
    ///
    /// # Panics
    ///
    /// Panics if `value_count` is zero or `max_size` is zero.
    pub fn open(
        directory: impl AsRef<Path>,
        app_version: u32,
        value_count: usize,
        max_size: u64,
    ) -> Result<Self, DiskCacheError> {
        assert!(max_size > 0, "max_size must be greater than 0");
        assert!(value_count > 0, "value_count must be greater than 0");
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        // A backup journal means a rebuild was interrupted after the old
        // journal was moved aside but before the new one was installed.
        let backup = directory.join(JOURNAL_FILE_BACKUP);
        if backup.exists() {
            let journal = directory.join(JOURNAL_FILE);
            if journal.exists() {
                fs::remove_file(&backup)?;
            } else {
                fs::rename(&backup, &journal)?;
            }
        }

        // Prefer to pick up where we left off.
        let mut state = CacheState::new(directory.clone(), app_version, value_count, max_size);
        if state.journal_file().exists() {
            match state
                .read_journal()
                .and_then(|()| state.process_journal())
            {
                Ok(()) => return Ok(Self::launch(state)),
                Err(e) => {
                    warn!(
                        "disk cache {} is corrupt: {e}, removing",
                        directory.display()
                    );
                    state.journal_writer = None;
                    delete_directory_contents(&directory)?;
                }
            }
        }

        // Create a new empty cache.
        let mut state = CacheState::new(directory, app_version, value_count, max_size);
        state.rebuild_journal()?;
        Ok(Self::launch(state))
    }

    fn launch(state: CacheState) -> Self {
        let (cleanup_tx, work_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            cleanup_tx,
        });
        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("imgpipe-disk-cache-cleanup".to_string())
            .spawn(move || cleanup_loop(weak, work_rx))
            .expect("failed to spawn disk cache cleanup thread");
        Self { shared }
    }

    fn request_cleanup(&self) {
        let _ = self.shared.cleanup_tx.send(());
    }

    /// Returns a snapshot of the entry named `key`, or `None` if the key
    /// is absent, not yet readable, or the cache is closed. A returned
    /// snapshot promotes the entry to most recently used.
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>, DiskCacheError> {
        validate_key(key);
        let mut state = self.shared.state.lock().unwrap();
        let Some((sequence_number, files, lengths)) = state.get_locked(key)? else {
            return Ok(None);
        };
        let needs_cleanup = state.rebuild_required();
        drop(state);
        if needs_cleanup {
            self.request_cleanup();
        }
        Ok(Some(Snapshot {
            cache: self.clone(),
            key: key.to_string(),
            sequence_number,
            files,
            lengths,
        }))
    }

    /// Returns an editor for the entry named `key`, or `None` if another
    /// edit is in progress on it.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>, DiskCacheError> {
        validate_key(key);
        self.edit_with(key, None)
    }

    fn edit_with(
        &self,
        key: &str,
        expected_sequence_number: Option<u64>,
    ) -> Result<Option<Editor>, DiskCacheError> {
        let mut state = self.shared.state.lock().unwrap();
        let Some(id) = state.edit_locked(key, expected_sequence_number)? else {
            return Ok(None);
        };
        let value_count = state.value_count;
        drop(state);
        Ok(Some(Editor {
            cache: self.clone(),
            key: key.to_string(),
            id,
            written: vec![false; value_count],
            completed: false,
        }))
    }

    fn complete_edit(
        &self,
        key: &str,
        editor_id: u64,
        written: &[bool],
        success: bool,
    ) -> Result<(), DiskCacheError> {
        let mut state = self.shared.state.lock().unwrap();
        let result = state.complete_edit(key, editor_id, written, success);
        let needs_cleanup =
            !state.is_closed() && (state.size > state.max_size || state.rebuild_required());
        drop(state);
        if needs_cleanup {
            self.request_cleanup();
        }
        result
    }

    /// Drops the entry for `key` if it exists and can be removed; entries
    /// actively being edited cannot be. Returns whether an entry was
    /// removed.
    pub fn remove(&self, key: &str) -> Result<bool, DiskCacheError> {
        validate_key(key);
        let mut state = self.shared.state.lock().unwrap();
        if state.is_closed() {
            return Err(DiskCacheError::Closed);
        }
        let removed = state.remove_entry(key)?;
        let needs_cleanup = state.rebuild_required();
        drop(state);
        if needs_cleanup {
            self.request_cleanup();
        }
        Ok(removed)
    }

    /// Bytes currently used to store values. May exceed the budget while
    /// a background trim is pending.
    pub fn size(&self) -> u64 {
        let state = self.shared.state.lock().unwrap();
        state.size
    }

    /// The cache's byte budget.
    pub fn max_size(&self) -> u64 {
        let state = self.shared.state.lock().unwrap();
        state.max_size
    }

    /// Changes the byte budget and queues a trim down to it.
    pub fn set_max_size(&self, max_size: u64) {
        let mut state = self.shared.state.lock().unwrap();
        state.max_size = max_size;
        drop(state);
        self.request_cleanup();
    }

    pub fn is_closed(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.is_closed()
    }

    /// Forces buffered journal writes to the filesystem, trimming to the
    /// byte budget first.
    pub fn flush(&self) -> Result<(), DiskCacheError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.is_closed() {
            return Err(DiskCacheError::Closed);
        }
        state.trim_to_size()?;
        state.writer()?.flush()?;
        Ok(())
    }

    /// Closes the cache. Open editors are aborted and a final trim runs;
    /// stored values remain on the filesystem. Closing an already-closed
    /// cache is a no-op.
    pub fn close(&self) -> Result<(), DiskCacheError> {
        let mut state = self.shared.state.lock().unwrap();
        state.close_locked()
    }

    /// Closes the cache and deletes everything it stored, including any
    /// stray files in the cache directory that it did not create.
    pub fn delete(&self) -> Result<(), DiskCacheError> {
        self.close()?;
        let state = self.shared.state.lock().unwrap();
        delete_directory_contents(&state.directory)?;
        Ok(())
    }
}

/// An in-progress write to one entry.
///
/// Value data goes to per-slot temporary files (via [`set`](Self::set) or
/// by writing to [`file`](Self::file)) and becomes visible atomically on
/// [`commit`](Self::commit). Dropping an editor without committing aborts
/// the edit and cleans up its temporary files, so a bailed-out writer
/// never blocks the key.
pub struct Editor {
    cache: DiskLruCache,
    key: String,
    id: u64,
    written: Vec<bool>,
    completed: bool,
}

impl Editor {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the temporary file for value slot `index`. The caller
    /// writes the slot's data there; on commit it is renamed over the
    /// committed file. Marks the slot as written.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range for the cache's value count.
    pub fn file(&mut self, index: usize) -> Result<PathBuf, DiskCacheError> {
        assert!(index < self.written.len(), "value index out of range");
        let state = self.cache.shared.state.lock().unwrap();
        let live = matches!(
            state.entries.peek(&self.key),
            Some(entry) if entry.editing == Some(self.id)
        );
        if !live {
            return Err(DiskCacheError::StaleEditor);
        }
        fs::create_dir_all(&state.directory)?;
        self.written[index] = true;
        Ok(dirty_path(&state.directory, &self.key, index))
    }

    /// Writes `value` as the data for slot `index`.
    pub fn set(&mut self, index: usize, value: &[u8]) -> Result<(), DiskCacheError> {
        let path = self.file(index)?;
        fs::write(path, value)?;
        Ok(())
    }

    /// Commits this edit so it is visible to readers, releasing the edit
    /// lock on the key.
    ///
    /// The first commit of a new entry must have written every value
    /// slot; otherwise the edit is aborted and
    /// [`DiskCacheError::IncompleteEntry`] returned.
    pub fn commit(mut self) -> Result<(), DiskCacheError> {
        self.completed = true;
        self.cache
            .complete_edit(&self.key, self.id, &self.written, true)
    }

    /// Aborts this edit, releasing the edit lock on the key.
    pub fn abort(mut self) -> Result<(), DiskCacheError> {
        self.completed = true;
        self.cache
            .complete_edit(&self.key, self.id, &self.written, false)
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self
                .cache
                .complete_edit(&self.key, self.id, &self.written, false);
        }
    }
}

/// An immutable view of an entry's committed values as of the moment of
/// [`DiskLruCache::get`].
pub struct Snapshot {
    cache: DiskLruCache,
    key: String,
    sequence_number: u64,
    files: Vec<PathBuf>,
    lengths: Vec<u64>,
}

impl Snapshot {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the committed file for value slot `index`.
    pub fn file(&self, index: usize) -> &Path {
        &self.files[index]
    }

    /// Byte length of the value for slot `index`.
    pub fn length(&self, index: usize) -> u64 {
        self.lengths[index]
    }

    /// Reads the full value for slot `index`.
    pub fn read(&self, index: usize) -> io::Result<Vec<u8>> {
        fs::read(&self.files[index])
    }

    /// Returns an editor for this snapshot's entry, or `None` if the
    /// entry has been committed again since this snapshot was taken or
    /// another edit is in progress. This guards against overwriting a
    /// concurrent writer's work on the basis of stale data.
    pub fn edit(&self) -> Result<Option<Editor>, DiskCacheError> {
        self.cache.edit_with(&self.key, Some(self.sequence_number))
    }
}
