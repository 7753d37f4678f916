//! Encoding and decoding of raw change buffers.
//!
//! A completed read leaves a run of change records back to back in the
//! watch's scratch buffer. Each record is laid out little-endian:
//!
//! ```text
//! offset  size  field
//!      0     4  next-entry offset (bytes from this record; 0 = last)
//!      4     4  action code (see ChangeAction::from_code)
//!      8     4  name length in bytes
//!     12     n  UTF-16LE name, relative to the watch root, not terminated
//! ```
//!
//! Records start on 4-byte boundaries. Decoding never fails: a malformed
//! record (zero or odd name length, a length or next-entry offset that runs
//! past the buffer, a next-entry offset pointing back inside the record)
//! ends the walk and the records before it are kept.

use camino::Utf8PathBuf;
use dm_core::ChangeAction;

use crate::events::DecodedChange;
use crate::pattern::PatternSet;

/// Size of the fixed record header.
pub const RECORD_HEADER_LEN: usize = 12;

const RECORD_ALIGN: usize = 4;

#[inline]
const fn align_up(n: usize) -> usize {
    (n + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// One record as stored in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// The raw action code.
    pub action: u32,
    /// The decoded name; unpaired surrogates become U+FFFD.
    pub name: String,
}

/// Iterator over the well-formed prefix of a change buffer.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Records<'a> {
    /// Walks the first `byte_count` bytes of `buffer`.
    ///
    /// `byte_count` is clamped to the buffer length.
    #[must_use]
    pub fn new(buffer: &'a [u8], byte_count: usize) -> Self {
        let len = byte_count.min(buffer.len());
        Self {
            buf: &buffer[..len],
            offset: 0,
            done: len == 0,
        }
    }

    fn truncate(&mut self, reason: &'static str) -> Option<RawRecord> {
        tracing::warn!(
            offset = self.offset,
            len = self.buf.len(),
            reason,
            "Truncating malformed change buffer"
        );
        self.done = true;
        None
    }
}

impl Iterator for Records<'_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        if self.done {
            return None;
        }

        let at = self.offset;
        let (Some(next), Some(action), Some(name_len)) = (
            read_u32(self.buf, at),
            at.checked_add(4).and_then(|i| read_u32(self.buf, i)),
            at.checked_add(8).and_then(|i| read_u32(self.buf, i)),
        ) else {
            return self.truncate("header overruns buffer");
        };
        let next = next as usize;
        let name_len = name_len as usize;

        if name_len == 0 {
            return self.truncate("zero-length name");
        }
        if name_len % 2 != 0 {
            return self.truncate("odd name length");
        }
        let Some(name_bytes) = at
            .checked_add(RECORD_HEADER_LEN)
            .and_then(|start| Some(start..start.checked_add(name_len)?))
            .and_then(|range| self.buf.get(range))
        else {
            return self.truncate("name overruns buffer");
        };
        if next != 0 && next < RECORD_HEADER_LEN + name_len {
            return self.truncate("next entry overlaps record");
        }

        let units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let name = String::from_utf16_lossy(&units);

        match at.checked_add(next) {
            Some(offset) if next != 0 => self.offset = offset,
            Some(_) => self.done = true,
            None => {
                self.truncate("next entry offset overflows");
            }
        }

        Some(RawRecord { action, name })
    }
}

/// Decodes every well-formed record in the first `byte_count` bytes.
///
/// # Examples
///
/// ```
/// use dm_core::ChangeAction;
/// use dm_monitor::codec::{RecordWriter, decode};
///
/// let mut buf = vec![0u8; 256];
/// let mut writer = RecordWriter::new(&mut buf);
/// assert!(writer.push(ChangeAction::Added, "f1"));
/// assert!(writer.push(ChangeAction::Removed, "f2"));
/// let len = writer.finish();
///
/// let changes = decode(&buf, len);
/// assert_eq!(changes.len(), 2);
/// assert_eq!(changes[1].path.as_str(), "f2");
/// ```
#[must_use]
pub fn decode(buffer: &[u8], byte_count: usize) -> Vec<DecodedChange> {
    Records::new(buffer, byte_count)
        .map(|record| DecodedChange {
            action: ChangeAction::from_code(record.action),
            path: Utf8PathBuf::from(record.name),
        })
        .collect()
}

/// Decodes records and keeps those the pattern set admits.
#[must_use]
pub fn decode_filtered(
    buffer: &[u8],
    byte_count: usize,
    patterns: &PatternSet,
) -> Vec<DecodedChange> {
    Records::new(buffer, byte_count)
        .filter(|record| {
            let keep = patterns.should_process(&record.name);
            if !keep {
                tracing::trace!(path = %record.name, "Filtered out change record");
            }
            keep
        })
        .map(|record| DecodedChange {
            action: ChangeAction::from_code(record.action),
            path: Utf8PathBuf::from(record.name),
        })
        .collect()
}

/// Appends records to a fixed-size buffer.
///
/// Used by the directory handle to fill an armed read's buffer.
#[derive(Debug)]
pub struct RecordWriter<'a> {
    buf: &'a mut [u8],
    /// Start of the last record written.
    last: Option<usize>,
    /// End of the last record written, before alignment padding.
    end: usize,
}

impl<'a> RecordWriter<'a> {
    /// Starts writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            last: None,
            end: 0,
        }
    }

    /// Appends one record. Returns `false`, writing nothing, if it does not fit
    /// or the name is empty.
    pub fn push(&mut self, action: ChangeAction, name: &str) -> bool {
        let name_len = name.encode_utf16().count() * 2;
        if name_len == 0 {
            return false;
        }
        let start = if self.last.is_some() { align_up(self.end) } else { 0 };
        let end = start + RECORD_HEADER_LEN + name_len;
        if end > self.buf.len() {
            return false;
        }
        let Ok(name_len_u32) = u32::try_from(name_len) else {
            return false;
        };

        if let Some(prev) = self.last {
            let Ok(delta) = u32::try_from(start - prev) else {
                return false;
            };
            self.buf[prev..prev + 4].copy_from_slice(&delta.to_le_bytes());
        }

        self.buf[start..start + 4].copy_from_slice(&0u32.to_le_bytes());
        self.buf[start + 4..start + 8].copy_from_slice(&action.code().to_le_bytes());
        self.buf[start + 8..start + 12].copy_from_slice(&name_len_u32.to_le_bytes());
        for (i, unit) in name.encode_utf16().enumerate() {
            let at = start + RECORD_HEADER_LEN + i * 2;
            self.buf[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }

        self.last = Some(start);
        self.end = end;
        true
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Finishes writing and returns the number of bytes used.
    #[must_use]
    pub fn finish(self) -> usize {
        self.end
    }
}
