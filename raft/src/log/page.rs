//! Page-level encoding for the paged log store.
//!
//! A page is a fixed-size chunk of a log file:
//!
//! ```text
//! offset  bytes  field
//! 0       2      remaining free bytes on page (big-endian u16)
//! 2..     N      packed entries: [term:u32 BE][item_len:u32 BE][item_bytes:item_len]
//! tail    rem    zero padding
//! ```
//!
//! Only the last page of a log may be partially filled.

use crate::error::StorageError;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::path::Path;

/// An entry in the replicated log: a term and an opaque, JSON-encodable command payload.
///
/// Two entries are equal iff both fields are equal. Entries are immutable once their index
/// is at or below `commit_index`.
///
/// Serializes as a two-element array `[term, item]`, matching the wire shape the source
/// protocol builds with `[e.term, e.item]` rather than a `{term, item}` object.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub term: u32,
    pub item: Value,
}

impl Serialize for LogEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.term)?;
        tup.serialize_element(&self.item)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for LogEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (term, item) = <(u32, Value)>::deserialize(deserializer)?;
        Ok(LogEntry { term, item })
    }
}

impl LogEntry {
    pub fn new(term: u32, item: Value) -> Self {
        Self { term, item }
    }

    /// Serializes this entry as `term:u32 BE ++ item_len:u32 BE ++ json(item)`, using
    /// canonical compact JSON (no whitespace).
    pub fn to_bytes(&self) -> Vec<u8> {
        let item_json = serde_json::to_vec(&self.item).expect("Value always serializes");
        let mut buf = Vec::with_capacity(8 + item_json.len());
        buf.extend_from_slice(&self.term.to_be_bytes());
        buf.extend_from_slice(&(item_json.len() as u32).to_be_bytes());
        buf.extend_from_slice(&item_json);
        buf
    }

    /// Parses one entry from the front of `buf`, returning the entry and the number of
    /// bytes consumed.
    fn from_bytes(buf: &[u8], path: &Path) -> Result<(Self, usize), StorageError> {
        if buf.len() < 8 {
            return Err(StorageError::Corrupt {
                path: path.to_path_buf(),
                reason: "truncated entry header".into(),
            });
        }
        let term = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let item_len = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        let end = 8 + item_len;
        if buf.len() < end {
            return Err(StorageError::Corrupt {
                path: path.to_path_buf(),
                reason: "truncated entry body".into(),
            });
        }
        let item: Value = serde_json::from_slice(&buf[8..end]).map_err(|err| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("entry item is not valid JSON: {}", err),
        })?;
        Ok((LogEntry { term, item }, end))
    }
}

/// The number of header bytes on every page (the `remaining` field).
pub const PAGE_HEADER_LEN: usize = 2;

/// One page of the log file, decoded into its constituent entries.
///
/// `data` holds the packed bytes of the currently-loaded entries so that `append`/`pop` can
/// mutate it without re-encoding the whole page.
#[derive(Debug, Clone)]
pub struct Page {
    pub num: u32,
    pub remaining: u16,
    data: Vec<u8>,
    pub entries: Vec<LogEntry>,
}

impl Page {
    /// Creates a new, empty page with the full entry budget (`page_size - PAGE_HEADER_LEN`)
    /// available.
    pub fn empty(num: u32, page_size: usize) -> Self {
        Self {
            num,
            remaining: (page_size - PAGE_HEADER_LEN) as u16,
            data: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Decodes a page from its on-disk representation: the `remaining` field plus the
    /// `page_size - PAGE_HEADER_LEN` bytes that followed it, zero-padded past the live data.
    fn decode(num: u32, remaining: u16, body: &[u8], path: &Path) -> Result<Self, StorageError> {
        let live_len = body.len() - remaining as usize;
        let data = body[..live_len].to_vec();

        let mut entries = Vec::new();
        let mut cursor = 0;
        while cursor < data.len() {
            let (entry, consumed) = LogEntry::from_bytes(&data[cursor..], path)?;
            entries.push(entry);
            cursor += consumed;
        }

        Ok(Self {
            num,
            remaining,
            data,
            entries,
        })
    }

    /// Encodes this page into exactly `page_size` bytes: header, live data, zero padding.
    fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(page_size);
        buf.extend_from_slice(&self.remaining.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf.resize(page_size, 0);
        buf
    }

    /// Appends `entry` to this page if it fits, returning the serialized bytes on overflow
    /// so the caller can start a fresh page with them instead.
    fn try_append(&mut self, entry: LogEntry) -> Result<(), LogEntry> {
        let serialized = entry.to_bytes();
        if serialized.len() > self.remaining as usize {
            return Err(entry);
        }
        self.remaining -= serialized.len() as u16;
        self.data.extend_from_slice(&serialized);
        self.entries.push(entry);
        Ok(())
    }

    /// Removes and returns the last entry on this page, or `None` if the page has no
    /// entries left to pop.
    fn try_pop(&mut self) -> Option<LogEntry> {
        let entry = self.entries.pop()?;
        let serialized = entry.to_bytes();
        let new_len = self.data.len() - serialized.len();
        self.data.truncate(new_len);
        self.remaining += serialized.len() as u16;
        Some(entry)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-backed storage for a sequence of fixed-size pages.
///
/// `PageStore` owns the raw file handle; `Log` (in [`super`]) owns the in-memory `Vec<Page>`
/// and drives reads/writes/truncation through this type.
pub struct PageStore {
    path: std::path::PathBuf,
    file: std::fs::File,
    page_size: usize,
}

impl PageStore {
    pub const DEFAULT_PAGE_SIZE: usize = 2048;

    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        let len = file.metadata().map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })? .len() as usize;

        // A trailing partial page is corrupt (a crash mid page-write); drop it.
        let whole_pages_len = (len / page_size) * page_size;
        if whole_pages_len != len {
            file.set_len(whole_pages_len as u64).map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        }

        Ok(Self { path, file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Loads all pages currently on disk, in order.
    pub fn load_all(&mut self) -> Result<Vec<Page>, StorageError> {
        use std::io::{Read, Seek, SeekFrom};

        self.file.seek(SeekFrom::Start(0)).map_err(|source| self.io_err(source))?;
        let mut pages = Vec::new();
        let mut buf = vec![0u8; self.page_size];
        let mut num = 0u32;
        loop {
            let mut read = 0;
            while read < buf.len() {
                let n = self.file.read(&mut buf[read..]).map_err(|source| self.io_err(source))?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            if read == 0 {
                break;
            }
            if read < buf.len() {
                // Shouldn't happen after the open()-time truncation, but guard anyway.
                break;
            }
            let remaining = u16::from_be_bytes([buf[0], buf[1]]);
            let page = Page::decode(num, remaining, &buf[PAGE_HEADER_LEN..], &self.path)?;
            pages.push(page);
            num += 1;
        }
        Ok(pages)
    }

    /// Writes a single page to its slot in the file, fsyncing before returning.
    pub fn write(&mut self, page: &Page) -> Result<(), StorageError> {
        use std::io::{Seek, SeekFrom, Write};

        let offset = page.num as u64 * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset)).map_err(|source| self.io_err(source))?;
        let encoded = page.encode(self.page_size);
        self.file.write_all(&encoded).map_err(|source| self.io_err(source))?;
        self.file.sync_data().map_err(|source| self.io_err(source))?;
        Ok(())
    }

    /// Truncates the file so that `page_num` and every page after it is removed.
    pub fn truncate_from(&mut self, page_num: u32) -> Result<(), StorageError> {
        let offset = page_num as u64 * self.page_size as u64;
        self.file.set_len(offset).map_err(|source| self.io_err(source))?;
        self.file.sync_data().map_err(|source| self.io_err(source))?;
        Ok(())
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

pub(super) fn try_append(page: &mut Page, entry: LogEntry) -> Result<(), LogEntry> {
    page.try_append(entry)
}

pub(super) fn try_pop(page: &mut Page) -> Option<LogEntry> {
    page.try_pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_as_a_two_element_array() {
        let entry = LogEntry::new(3, serde_json::json!({"op": "set"}));
        let encoded = serde_json::to_string(&entry).unwrap();
        assert_eq!(encoded, r#"[3,{"op":"set"}]"#);
        let decoded: LogEntry = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, entry);
    }
}
