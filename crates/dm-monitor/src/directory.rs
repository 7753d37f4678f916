//! Directory handles with overlapped-read semantics over `notify`.
//!
//! The OS backend (`notify::RecommendedWatcher`: inotify, FSEvents,
//! `ReadDirectoryChangesW`) pushes events from its own thread. A
//! [`DirectoryHandle`] turns that push stream into the read model the engine
//! is built on:
//!
//! 1. The backend callback translates each event into raw change records,
//!    keeps those whose change class intersects the read's filter mask, and
//!    appends them to the handle's journal.
//! 2. [`DirectoryHandle::read_changes`] arms one read with a buffer and a
//!    completion signal. If records are already journaled it completes
//!    immediately; otherwise the next journaled record completes it.
//! 3. Completing a read encodes as many journaled records as fit into the
//!    buffer, parks the buffer as the handle's completion, and sets the
//!    signal. Records that do not fit wait for the next read.
//! 4. [`DirectoryHandle::take_completion`] hands the buffer back.
//!
//! While a read is armed or completed-but-unretrieved, the buffer belongs to
//! the handle and a second read is refused.
//!
//! # Change classes
//!
//! ```text
//! notify event kind                      action        class
//! ─────────────────────────────────────  ────────────  ─────────────────────
//! Create(File) / Create(Folder)          added         FILE_NAME / DIR_NAME
//! Remove(File) / Remove(Folder)          removed       FILE_NAME / DIR_NAME
//! Modify(Name(From)) / Modify(Name(To))  renamed_*     FILE_NAME | DIR_NAME
//! Modify(Data(Size))                     modified      SIZE
//! Modify(Data(Content))                  modified      LAST_WRITE
//! Modify(Metadata(WriteTime))            modified      LAST_WRITE
//! Modify(Metadata(AccessTime))           modified      LAST_ACCESS
//! Modify(Metadata(Permissions|Owner))    modified      SECURITY
//! Modify(Metadata(other))                modified      ATTRIBUTES
//! Access(_)                              modified      LAST_ACCESS
//! ```
//!
//! `Modify(Name(Both))` is skipped: backends that emit it have already
//! emitted the `From` and `To` halves. No notify event carries creation-time
//! changes, so `CREATION` never matches.
//!
//! # Overflow and errors
//!
//! A journal that outgrows its capacity, and a backend event flagged
//! `Rescan` (inotify queue overflow, FSEvents `MustScanSubDirs`), both drop
//! the pending records and complete the next read with zero bytes.
//!
//! A backend error completes a read as failed only once the records journaled
//! before it have been handed out.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use dm_core::{ChangeAction, ChangeFilter, WatchHandle};
use notify::event::{
    CreateKind, DataChange, Event, EventKind, MetadataKind, ModifyKind, RemoveKind, RenameMode,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::codec::RecordWriter;
use crate::completion::CompletionSignal;
use crate::error::WatchError;

/// The outcome of polling a handle for its read.
#[derive(Debug)]
pub(crate) enum ReadCompletion {
    /// No read has completed; the wake-up was spurious.
    Incomplete,
    /// The read finished with `bytes` valid bytes at the front of `buffer`.
    /// Zero bytes means the journal overflowed and changes were lost.
    Done { buffer: Vec<u8>, bytes: usize },
    /// The read failed. Its buffer has been released.
    Failed(io::Error),
}

#[derive(Debug)]
struct ArmedRead {
    buffer: Vec<u8>,
    signal: Arc<CompletionSignal>,
}

type RawChange = (ChangeAction, String);

#[derive(Debug)]
struct Journal {
    handle: WatchHandle,
    root: PathBuf,
    filter: ChangeFilter,
    capacity: usize,
    pending: VecDeque<RawChange>,
    overflowed: bool,
    failure: Option<io::Error>,
    armed: Option<ArmedRead>,
    completed: Option<ReadCompletion>,
    closed: bool,
}

impl Journal {
    fn has_output(&self) -> bool {
        !self.pending.is_empty() || self.overflowed || self.failure.is_some()
    }

    fn push(&mut self, change: RawChange) {
        if self.overflowed {
            return;
        }
        if self.pending.len() >= self.capacity {
            tracing::warn!(
                handle = %self.handle,
                capacity = self.capacity,
                "Change journal overflowed, discarding pending changes"
            );
            self.overflow();
            return;
        }
        self.pending.push_back(change);
    }

    fn overflow(&mut self) {
        self.pending.clear();
        self.overflowed = true;
    }

    /// Completes the armed read, if any, from the journal.
    fn complete_armed(&mut self) {
        let Some(ArmedRead { mut buffer, signal }) = self.armed.take() else {
            return;
        };

        // Records journaled ahead of a backend error are handed out first.
        let failure = if self.overflowed || !self.pending.is_empty() {
            None
        } else {
            self.failure.take()
        };
        let completion = if self.overflowed {
            self.overflowed = false;
            ReadCompletion::Done { buffer, bytes: 0 }
        } else if let Some(err) = failure {
            ReadCompletion::Failed(err)
        } else {
            let capacity = buffer.len();
            let mut writer = RecordWriter::new(&mut buffer);
            while let Some((action, name)) = self.pending.front() {
                if writer.push(*action, name) {
                    self.pending.pop_front();
                } else if writer.is_empty() {
                    tracing::warn!(
                        handle = %self.handle,
                        path = %name,
                        capacity,
                        "Change record larger than read buffer, dropping"
                    );
                    self.pending.pop_front();
                } else {
                    break;
                }
            }
            let bytes = writer.finish();
            ReadCompletion::Done { buffer, bytes }
        };

        self.completed = Some(completion);
        signal.set();
    }

    fn abort_armed(&mut self) -> bool {
        let Some(ArmedRead { signal, .. }) = self.armed.take() else {
            return false;
        };
        self.completed = Some(ReadCompletion::Failed(io::Error::new(
            io::ErrorKind::Interrupted,
            "directory watch aborted",
        )));
        signal.set();
        true
    }
}

/// An open directory with at most one asynchronous read in flight.
pub(crate) struct DirectoryHandle {
    handle: WatchHandle,
    root: Utf8PathBuf,
    watcher: Option<RecommendedWatcher>,
    watching: bool,
    journal: Arc<Mutex<Journal>>,
}

impl std::fmt::Debug for DirectoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryHandle")
            .field("handle", &self.handle)
            .field("root", &self.root)
            .field("watching", &self.watching)
            .finish_non_exhaustive()
    }
}

impl DirectoryHandle {
    /// Opens `path` for change notification.
    ///
    /// No changes are recorded until the first [`read_changes`](Self::read_changes).
    pub(crate) fn open(
        handle: WatchHandle,
        path: &Utf8Path,
        max_pending_changes: usize,
    ) -> Result<Self, WatchError> {
        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }
        if !path.is_dir() {
            return Err(WatchError::NotADirectory(path.to_owned()));
        }
        let root = path.canonicalize_utf8()?;

        let journal = Arc::new(Mutex::new(Journal {
            handle,
            root: root.clone().into_std_path_buf(),
            filter: ChangeFilter::empty(),
            capacity: max_pending_changes.max(1),
            pending: VecDeque::new(),
            overflowed: false,
            failure: None,
            armed: None,
            completed: None,
            closed: false,
        }));

        let sink = Arc::clone(&journal);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            record_event(&sink, res);
        })?;

        tracing::debug!(%handle, path = %root, "Opened directory handle");

        Ok(Self {
            handle,
            root,
            watcher: Some(watcher),
            watching: false,
            journal,
        })
    }

    /// Returns the canonical root being watched.
    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Issues an asynchronous read into `buffer`.
    ///
    /// Returns `Ok` both when the read completed on the spot and when it is
    /// pending; either way `signal` is set exactly once when it finishes.
    pub(crate) fn read_changes(
        &mut self,
        buffer: Vec<u8>,
        include_subtree: bool,
        filter: ChangeFilter,
        signal: Arc<CompletionSignal>,
    ) -> io::Result<()> {
        {
            let mut journal = self.journal.lock();
            if journal.closed {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "directory handle is closed",
                ));
            }
            if journal.armed.is_some() || journal.completed.is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::ResourceBusy,
                    "a read is already outstanding on this handle",
                ));
            }
            journal.filter = filter;
        }

        // The backend may deliver events while `watch` runs, so the journal
        // lock must not be held here.
        if !self.watching {
            let watcher = self.watcher.as_mut().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "directory handle is closed")
            })?;
            let mode = if include_subtree {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(self.root.as_std_path(), mode)
                .map_err(notify_to_io)?;
            self.watching = true;
            tracing::debug!(handle = %self.handle, include_subtree, "Recording changes");
        }

        let mut journal = self.journal.lock();
        journal.armed = Some(ArmedRead { buffer, signal });
        if journal.has_output() {
            journal.complete_armed();
        }
        Ok(())
    }

    /// Retrieves the read's result, returning its buffer to the caller.
    pub(crate) fn take_completion(&self) -> ReadCompletion {
        self.journal
            .lock()
            .completed
            .take()
            .unwrap_or(ReadCompletion::Incomplete)
    }

    /// Stops change recording. Idempotent.
    ///
    /// An armed read completes with an `Interrupted` error and its signal is
    /// set. Returns `true` if that happened.
    pub(crate) fn close(&mut self) -> bool {
        // Dropping the watcher joins the backend's event thread on some
        // platforms, and that thread takes the journal lock.
        drop(self.watcher.take());
        let mut journal = self.journal.lock();
        if journal.closed {
            return false;
        }
        journal.closed = true;
        journal.pending.clear();
        let aborted = journal.abort_armed();
        tracing::debug!(handle = %self.handle, aborted, "Closed directory handle");
        aborted
    }
}

impl Drop for DirectoryHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn notify_to_io(err: notify::Error) -> io::Error {
    match err.kind {
        notify::ErrorKind::Io(io_err) => io_err,
        notify::ErrorKind::PathNotFound => {
            io::Error::new(io::ErrorKind::NotFound, "watched path not found")
        }
        other => io::Error::other(format!("{other:?}")),
    }
}

/// Backend callback: journal an event and complete an armed read.
fn record_event(journal: &Mutex<Journal>, res: notify::Result<Event>) {
    let mut journal = journal.lock();
    if journal.closed {
        return;
    }

    match res {
        Ok(event) if event.need_rescan() => {
            tracing::warn!(
                handle = %journal.handle,
                kind = ?event.kind,
                "Change backend lost events, discarding pending changes"
            );
            journal.overflow();
        }
        Ok(event) => {
            for change in translate(&event, &journal.root, journal.filter) {
                journal.push(change);
            }
        }
        Err(err) => {
            tracing::warn!(handle = %journal.handle, error = %err, "Change backend error");
            journal.failure = Some(notify_to_io(err));
        }
    }

    if journal.armed.is_some() && journal.has_output() {
        journal.complete_armed();
    }
}

/// Converts one backend event into the records a watch with `filter` sees.
fn translate(event: &Event, root: &Path, filter: ChangeFilter) -> SmallVec<[RawChange; 2]> {
    const NAMES: ChangeFilter = ChangeFilter::FILE_NAME.union(ChangeFilter::DIR_NAME);

    let name_class = |file: bool, folder: bool| match (file, folder) {
        (true, _) => ChangeFilter::FILE_NAME,
        (_, true) => ChangeFilter::DIR_NAME,
        _ => NAMES,
    };

    let mut out = SmallVec::new();
    let first = event.paths.first();

    let (action, class) = match &event.kind {
        EventKind::Create(kind) => (
            ChangeAction::Added,
            name_class(*kind == CreateKind::File, *kind == CreateKind::Folder),
        ),
        EventKind::Remove(kind) => (
            ChangeAction::Removed,
            name_class(*kind == RemoveKind::File, *kind == RemoveKind::Folder),
        ),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => (ChangeAction::RenamedFrom, NAMES),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => (ChangeAction::RenamedTo, NAMES),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            tracing::trace!(paths = ?event.paths, "Skipping paired rename event");
            return out;
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            let exists = first.is_some_and(|p| p.exists());
            let action = if exists {
                ChangeAction::RenamedTo
            } else {
                ChangeAction::RenamedFrom
            };
            (action, NAMES)
        }
        EventKind::Modify(ModifyKind::Data(DataChange::Size)) => {
            (ChangeAction::Modified, ChangeFilter::SIZE)
        }
        EventKind::Modify(ModifyKind::Data(DataChange::Content)) => {
            (ChangeAction::Modified, ChangeFilter::LAST_WRITE)
        }
        EventKind::Modify(ModifyKind::Data(_)) => (
            ChangeAction::Modified,
            ChangeFilter::LAST_WRITE | ChangeFilter::SIZE,
        ),
        EventKind::Modify(ModifyKind::Metadata(kind)) => {
            let class = match kind {
                MetadataKind::WriteTime => ChangeFilter::LAST_WRITE,
                MetadataKind::AccessTime => ChangeFilter::LAST_ACCESS,
                MetadataKind::Permissions | MetadataKind::Ownership => ChangeFilter::SECURITY,
                _ => ChangeFilter::ATTRIBUTES,
            };
            (ChangeAction::Modified, class)
        }
        EventKind::Modify(_) => (
            ChangeAction::Modified,
            ChangeFilter::LAST_WRITE | ChangeFilter::SIZE | ChangeFilter::ATTRIBUTES,
        ),
        EventKind::Access(_) => (ChangeAction::Modified, ChangeFilter::LAST_ACCESS),
        EventKind::Any | EventKind::Other => {
            tracing::trace!(kind = ?event.kind, "Skipping unclassified event");
            return out;
        }
    };

    if !filter.intersects(class) {
        return out;
    }
    if let Some(name) = first.and_then(|p| relative_name(root, p)) {
        out.push((action, name));
    }
    out
}

/// Returns `path` relative to `root`, `/`-separated, or `None` for the root
/// itself and paths outside it.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_translate_create_and_remove() {
        let root = Path::new("/w");
        let all = ChangeFilter::all();

        let out = translate(&event(EventKind::Create(CreateKind::File), "/w/a.txt"), root, all);
        assert_eq!(out.as_slice(), &[(ChangeAction::Added, "a.txt".to_owned())]);

        let out = translate(&event(EventKind::Remove(RemoveKind::Folder), "/w/d/e"), root, all);
        assert_eq!(out.as_slice(), &[(ChangeAction::Removed, "d/e".to_owned())]);
    }

    #[test]
    fn test_translate_applies_filter_mask() {
        let root = Path::new("/w");
        let create_dir = event(EventKind::Create(CreateKind::Folder), "/w/sub");
        assert!(translate(&create_dir, root, ChangeFilter::FILE_NAME).is_empty());
        assert_eq!(translate(&create_dir, root, ChangeFilter::DIR_NAME).len(), 1);

        let access = event(
            EventKind::Access(notify::event::AccessKind::Any),
            "/w/a.txt",
        );
        assert!(translate(&access, root, ChangeFilter::default()).is_empty());
    }

    #[test]
    fn test_translate_renames() {
        let root = Path::new("/w");
        let all = ChangeFilter::all();
        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), "/w/old");
        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/w/new");
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/old"))
            .add_path(PathBuf::from("/w/new"));

        assert_eq!(translate(&from, root, all)[0].0, ChangeAction::RenamedFrom);
        assert_eq!(translate(&to, root, all)[0].0, ChangeAction::RenamedTo);
        assert!(translate(&both, root, all).is_empty());
    }

    #[test]
    fn test_translate_skips_root_and_outside_paths() {
        let root = Path::new("/w");
        let all = ChangeFilter::all();
        assert!(translate(&event(EventKind::Modify(ModifyKind::Any), "/w"), root, all).is_empty());
        assert!(
            translate(&event(EventKind::Create(CreateKind::File), "/elsewhere/x"), root, all)
                .is_empty()
        );
    }

    fn test_journal(capacity: usize) -> Journal {
        Journal {
            handle: WatchHandle::new(1),
            root: PathBuf::from("/w"),
            filter: ChangeFilter::all(),
            capacity,
            pending: VecDeque::new(),
            overflowed: false,
            failure: None,
            armed: None,
            completed: None,
            closed: false,
        }
    }

    #[test]
    fn test_journal_fills_buffer_and_keeps_remainder() {
        let mut journal = test_journal(16);
        for name in ["aaaa", "bbbb", "cccc"] {
            journal.push((ChangeAction::Added, name.to_owned()));
        }
        let signal = Arc::new(CompletionSignal::new());
        // Room for exactly two 20-byte records.
        journal.armed = Some(ArmedRead {
            buffer: vec![0; 40],
            signal: Arc::clone(&signal),
        });
        journal.complete_armed();

        assert!(signal.wait_timeout(Duration::ZERO));
        let Some(ReadCompletion::Done { buffer, bytes }) = journal.completed.take() else {
            panic!("expected a completed read");
        };
        let names: Vec<_> = decode(&buffer, bytes)
            .into_iter()
            .map(|c| c.path.into_string())
            .collect();
        assert_eq!(names, vec!["aaaa", "bbbb"]);
        assert_eq!(journal.pending.len(), 1);
    }

    #[test]
    fn test_journal_overflow_completes_with_zero_bytes() {
        let mut journal = test_journal(2);
        for name in ["a", "b", "c", "d"] {
            journal.push((ChangeAction::Modified, name.to_owned()));
        }
        assert!(journal.overflowed);
        assert!(journal.pending.is_empty());

        journal.armed = Some(ArmedRead {
            buffer: vec![0; 64],
            signal: Arc::new(CompletionSignal::new()),
        });
        journal.complete_armed();
        assert!(matches!(
            journal.completed,
            Some(ReadCompletion::Done { bytes: 0, .. })
        ));
        assert!(!journal.overflowed);
    }

    fn arm(journal: &mut Journal) -> Arc<CompletionSignal> {
        let signal = Arc::new(CompletionSignal::new());
        journal.armed = Some(ArmedRead {
            buffer: vec![0; 256],
            signal: Arc::clone(&signal),
        });
        if journal.has_output() {
            journal.complete_armed();
        }
        signal
    }

    #[test]
    fn test_rescan_event_discards_pending_changes() {
        let journal = Mutex::new(test_journal(16));
        record_event(
            &journal,
            Ok(event(EventKind::Create(CreateKind::File), "/w/a.txt")),
        );
        assert_eq!(journal.lock().pending.len(), 1);

        record_event(
            &journal,
            Ok(Event::new(EventKind::Other).set_flag(notify::event::Flag::Rescan)),
        );
        let mut journal = journal.into_inner();
        assert!(journal.overflowed);
        assert!(journal.pending.is_empty());

        let signal = arm(&mut journal);
        assert!(signal.wait_timeout(Duration::ZERO));
        assert!(matches!(
            journal.completed,
            Some(ReadCompletion::Done { bytes: 0, .. })
        ));
    }

    #[test]
    fn test_backend_error_follows_journaled_changes() {
        let journal = Mutex::new(test_journal(16));
        record_event(
            &journal,
            Ok(event(EventKind::Create(CreateKind::File), "/w/a.txt")),
        );
        record_event(&journal, Err(notify::Error::generic("backend gone")));
        let mut journal = journal.into_inner();

        arm(&mut journal);
        let Some(ReadCompletion::Done { buffer, bytes }) = journal.completed.take() else {
            panic!("expected the journaled change first");
        };
        let names: Vec<_> = decode(&buffer, bytes)
            .into_iter()
            .map(|c| c.path.into_string())
            .collect();
        assert_eq!(names, vec!["a.txt"]);
        assert!(journal.failure.is_some());

        arm(&mut journal);
        match journal.completed.take() {
            Some(ReadCompletion::Failed(err)) => assert_eq!(err.kind(), io::ErrorKind::Other),
            other => panic!("expected the backend error, got {other:?}"),
        }
    }

    #[test]
    fn test_open_rejects_missing_and_file_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let missing = DirectoryHandle::open(WatchHandle::allocate(), &root.join("nope"), 16);
        assert!(matches!(missing, Err(WatchError::PathNotFound(_))));

        std::fs::write(root.join("file.txt"), "x").unwrap();
        let file = DirectoryHandle::open(WatchHandle::allocate(), &root.join("file.txt"), 16);
        assert!(matches!(file, Err(WatchError::NotADirectory(_))));
    }

    #[test]
    fn test_close_aborts_outstanding_read() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let mut handle = DirectoryHandle::open(WatchHandle::allocate(), &root, 16).unwrap();
        let signal = Arc::new(CompletionSignal::new());

        handle
            .read_changes(vec![0; 256], true, ChangeFilter::default(), Arc::clone(&signal))
            .unwrap();
        let second = handle.read_changes(
            vec![0; 256],
            true,
            ChangeFilter::default(),
            Arc::clone(&signal),
        );
        assert_eq!(second.unwrap_err().kind(), io::ErrorKind::ResourceBusy);

        assert!(handle.close());
        assert!(signal.wait_timeout(Duration::from_secs(1)));
        match handle.take_completion() {
            ReadCompletion::Failed(err) => assert_eq!(err.kind(), io::ErrorKind::Interrupted),
            other => panic!("expected aborted read, got {other:?}"),
        }
        assert!(!handle.close());
    }

    #[test]
    fn test_read_completes_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let mut handle = DirectoryHandle::open(WatchHandle::allocate(), &root, 64).unwrap();
        let signal = Arc::new(CompletionSignal::new());

        handle
            .read_changes(vec![0; 4096], true, ChangeFilter::default(), Arc::clone(&signal))
            .unwrap();
        std::fs::write(root.join("hello.txt"), "hi").unwrap();

        assert!(signal.wait_timeout(Duration::from_secs(5)));
        let ReadCompletion::Done { buffer, bytes } = handle.take_completion() else {
            panic!("expected a completed read");
        };
        let changes = decode(&buffer, bytes);
        assert!(changes.iter().any(|c| c.path.as_str() == "hello.txt"));
    }
}
