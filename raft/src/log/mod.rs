//! The replicated log: a page-structured on-disk sequence of [`LogEntry`] values, and the
//! `append_entries` reconciliation algorithm that keeps two logs in sync.

mod page;

pub use page::{LogEntry, PageStore};
use page::Page;

use crate::error::StorageError;
use std::path::Path;

/// An ordered, page-backed sequence of [`LogEntry`] values.
///
/// Indices are contiguous from `0` (invariant L1); entries at or below `commit_index` are
/// never mutated in place (invariant L2, enforced by callers — `Log` itself has no notion of
/// commit index). Logical indexing (`entry`, `slice_from`) walks the page list rather than
/// materializing the whole log, per the design note that a paged container must expose an
/// efficient logical index.
pub struct Log {
    store: PageStore,
    pages: Vec<Page>,
}

impl Log {
    /// Opens (or creates) the log file at `path`, rebuilding the in-memory page list from
    /// whatever is already on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_page_size(path, PageStore::DEFAULT_PAGE_SIZE)
    }

    pub fn open_with_page_size(path: impl AsRef<Path>, page_size: usize) -> Result<Self, StorageError> {
        let mut store = PageStore::open(path, page_size)?;
        let mut pages = store.load_all()?;
        if pages.is_empty() {
            pages.push(Page::empty(0, page_size));
        }
        Ok(Self { store, pages })
    }

    /// The maximum serialized entry size (header + item bytes) that fits on one page.
    pub fn page_capacity(&self) -> usize {
        self.store.page_size() - page::PAGE_HEADER_LEN
    }

    /// Appends `entry` to the tail of the log, persisting exactly the page(s) it touches.
    pub fn append(&mut self, entry: LogEntry) -> Result<(), StorageError> {
        let capacity = self.page_capacity();
        let serialized_len = entry.to_bytes().len();
        if serialized_len > capacity {
            return Err(StorageError::EntryTooLarge {
                size: serialized_len,
                capacity,
            });
        }

        let tail_num = self.pages.last().expect("pages always has at least page 0").num;
        let tail = self.pages.last_mut().unwrap();
        match page::try_append(tail, entry) {
            Ok(()) => {
                self.store.write(self.pages.last().unwrap())?;
            }
            Err(entry) => {
                let mut fresh = Page::empty(tail_num + 1, self.store.page_size());
                page::try_append(&mut fresh, entry)
                    .expect("entry already validated to fit in a fresh page");
                self.store.write(&fresh)?;
                self.pages.push(fresh);
            }
        }
        Ok(())
    }

    /// Removes and returns the last entry in the log, or `None` if the log is empty.
    ///
    /// If removing the entry leaves a non-zero page empty, that page is truncated off the
    /// file immediately — an empty trailing page is never left behind except page 0.
    pub fn pop(&mut self) -> Result<Option<LogEntry>, StorageError> {
        let tail = self.pages.last_mut().expect("pages always has at least page 0");
        let popped = match page::try_pop(tail) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let tail_num = tail.num;
        let tail_is_empty = tail.is_empty();
        if tail_is_empty && tail_num != 0 {
            self.store.truncate_from(tail_num)?;
            self.pages.pop();
        } else {
            self.store.write(self.pages.last().unwrap())?;
        }
        Ok(Some(popped))
    }

    /// The number of entries in the log.
    pub fn len(&self) -> i64 {
        self.pages.iter().map(|p| p.entries.len() as i64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry at logical index `i`, or `None` if out of range.
    pub fn entry(&self, i: i64) -> Option<&LogEntry> {
        if i < 0 {
            return None;
        }
        let mut remaining = i;
        for page in &self.pages {
            let page_len = page.entries.len() as i64;
            if remaining < page_len {
                return Some(&page.entries[remaining as usize]);
            }
            remaining -= page_len;
        }
        None
    }

    /// The last entry's term, or `-1` if the log is empty (the `-1` sentinel used throughout
    /// the protocol for "no entry").
    pub fn last_term(&self) -> i32 {
        match self.entry(self.len() - 1) {
            Some(e) => e.term as i32,
            None => -1,
        }
    }

    /// A clone of every entry at or after logical index `i` (`log[i:]`).
    pub fn slice_from(&self, i: i64) -> Vec<LogEntry> {
        if i < 0 {
            return self.iter().cloned().collect();
        }
        let mut remaining = i;
        let mut out = Vec::new();
        for page in &self.pages {
            let page_len = page.entries.len() as i64;
            if remaining >= page_len {
                remaining -= page_len;
                continue;
            }
            out.extend(page.entries[remaining.max(0) as usize..].iter().cloned());
            remaining = 0;
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.pages.iter().flat_map(|p| p.entries.iter())
    }
}

/// Applies the Raft log-matching rule: does `log` agree with the leader at `prev_index`?
///
/// Returns `Ok(false)` (a rejection, not an error) when the follower's log doesn't yet reach
/// `prev_index`. Returns `Err` only for genuine storage failures while truncating or
/// appending, which are fatal to the owning node.
///
/// See §4.C: the suffix past `prev_index` is always truncated before the new entries are
/// appended, whenever there is a suffix to drop. This is simpler than, and compatible with,
/// the paper's same-index-different-term conflict rule, and is a no-op (hence idempotent)
/// when `len(log) == prev_index + 1`.
pub fn append_entries(
    log: &mut Log,
    prev_index: i64,
    prev_term: i32,
    entries: Vec<LogEntry>,
) -> Result<bool, StorageError> {
    let len = log.len();

    // No holes in the log.
    if prev_index >= len {
        return Ok(false);
    }

    if prev_index == -1 {
        apply_all_entries(log, prev_index, entries)?;
        return Ok(true);
    }

    if log.entry(prev_index).unwrap().term as i32 == prev_term {
        apply_all_entries(log, prev_index, entries)?;
        return Ok(true);
    }

    Ok(false)
}

fn apply_all_entries(log: &mut Log, prev_index: i64, entries: Vec<LogEntry>) -> Result<(), StorageError> {
    if log.len() > prev_index + 1 {
        clear_upto(log, prev_index + 1)?;
    }
    for entry in entries {
        log.append(entry)?;
    }
    Ok(())
}

fn clear_upto(log: &mut Log, upto: i64) -> Result<(), StorageError> {
    while log.len() > upto {
        log.pop()?;
    }
    Ok(())
}
