//! Segment file management: newline-delimited JSON, rolled by record count,
//! byte budget, or wall-clock age.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::record::Event;

/// Default records-per-segment cap (`spec.md` §3).
pub const DEFAULT_SEGMENT_RECORDS: u64 = 100_000;

/// Errors from segment I/O.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying filesystem operation failed.
    #[error("segment io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be serialized.
    #[error("segment encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rotation policy for a single stream's segments.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    /// Maximum records before rolling to a new segment.
    pub max_records: u64,
    /// Maximum bytes before rolling to a new segment.
    pub max_bytes: u64,
    /// Maximum segment age before rolling, regardless of size.
    pub max_age_secs: Option<u64>,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_SEGMENT_RECORDS,
            max_bytes: 128 * 1024 * 1024,
            max_age_secs: None,
        }
    }
}

/// A single open (currently written) segment.
pub struct Segment {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
    bytes: u64,
    first_ts: Option<u64>,
    last_ts: Option<u64>,
    opened_at: std::time::Instant,
    policy: RotationPolicy,
}

impl Segment {
    /// Create a new segment file under `dir`, named `events_YYYYMMDD_HHMMSS.jsonl`.
    pub fn create(dir: &Path, policy: RotationPolicy) -> Result<Self, SegmentError> {
        std::fs::create_dir_all(dir)?;
        let name = format!("events_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S%3f"));
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
            bytes: 0,
            first_ts: None,
            last_ts: None,
            opened_at: std::time::Instant::now(),
            policy,
        })
    }

    /// Append one record as a newline-delimited JSON line.
    ///
    /// Caller must uphold the per-segment invariant that timestamps are
    /// non-decreasing (P5); this does not re-sort.
    pub fn append(&mut self, event: &Event) -> Result<(), SegmentError> {
        let line = event.to_line()?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.bytes += line.len() as u64 + 1;
        self.records += 1;
        self.first_ts.get_or_insert(event.timestamp);
        self.last_ts = Some(event.timestamp);
        Ok(())
    }

    /// Flush buffered writes to disk.
    pub fn flush(&mut self) -> Result<(), SegmentError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Whether this segment should roll before accepting another record.
    #[must_use]
    pub fn should_rotate(&self) -> bool {
        if self.records >= self.policy.max_records {
            return true;
        }
        if self.bytes >= self.policy.max_bytes {
            return true;
        }
        if let Some(max_age) = self.policy.max_age_secs {
            if self.opened_at.elapsed().as_secs() >= max_age {
                return true;
            }
        }
        false
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.records
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn byte_count(&self) -> u64 {
        self.bytes
    }

    /// `(first_ts, last_ts)` seen in this segment, if any records were written.
    #[must_use]
    pub const fn ts_range(&self) -> Option<(u64, u64)> {
        match (self.first_ts, self.last_ts) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Close the segment, flushing any buffered data.
    pub fn close(mut self) -> Result<PathBuf, SegmentError> {
        self.flush()?;
        debug!(path = %self.path.display(), records = self.records, "closed journal segment");
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;

    fn event(ts: u64) -> Event {
        Event { kind: EventKind::Trade, venue: "v".into(), symbol: "BTC/USDT".into(), timestamp: ts, data: serde_json::Value::Null }
    }

    #[test]
    fn rotates_on_record_count() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RotationPolicy { max_records: 3, ..RotationPolicy::default() };
        let mut seg = Segment::create(dir.path(), policy).unwrap();
        for ts in 0..3 {
            seg.append(&event(ts)).unwrap();
        }
        assert!(seg.should_rotate());
    }

    #[test]
    fn tracks_ts_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = Segment::create(dir.path(), RotationPolicy::default()).unwrap();
        seg.append(&event(10)).unwrap();
        seg.append(&event(20)).unwrap();
        assert_eq!(seg.ts_range(), Some((10, 20)));
    }
}
