//! Startup index: maps each closed segment file to the timestamp range it
//! covers, so range reads can skip segments that can't overlap.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::record::Event;
use crate::segment::SegmentError;

/// One entry in a stream's on-disk index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Path to the segment file (`.jsonl` or `.jsonl.gz`).
    pub path: PathBuf,
    /// Timestamp of the first record in the segment.
    pub first_ts: u64,
    /// Timestamp of the last record in the segment.
    pub last_ts: u64,
    /// Number of records in the segment.
    pub count: u64,
}

impl IndexEntry {
    /// Whether `[t_start, t_end]` can possibly overlap this segment.
    #[must_use]
    pub const fn overlaps(&self, t_start: u64, t_end: u64) -> bool {
        self.first_ts <= t_end && self.last_ts >= t_start
    }
}

/// Sorted (by `first_ts`) index of a stream's segments.
#[derive(Debug, Default, Clone)]
pub struct StreamIndex {
    entries: Vec<IndexEntry>,
}

impl StreamIndex {
    /// Build an index by scanning every `.jsonl` and `.jsonl.gz` file in `dir`.
    ///
    /// Files that cannot be parsed (empty, truncated) are skipped rather than
    /// failing the whole scan; a corrupt tail segment shouldn't hide history.
    pub fn scan(dir: &Path) -> Result<Self, SegmentError> {
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(Self { entries });
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !(name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")) {
                continue;
            }
            if let Some(indexed) = index_one(&path)? {
                entries.push(indexed);
            }
        }
        entries.sort_by_key(|e| e.first_ts);
        Ok(Self { entries })
    }

    /// Segments that might contain records in `[t_start, t_end]`.
    #[must_use]
    pub fn candidates(&self, t_start: u64, t_end: u64) -> Vec<&IndexEntry> {
        self.entries.iter().filter(|e| e.overlaps(t_start, t_end)).collect()
    }

    /// All known entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Insert or replace the entry for `path`, keeping entries sorted.
    pub fn upsert(&mut self, entry: IndexEntry) {
        self.entries.retain(|e| e.path != entry.path);
        self.entries.push(entry);
        self.entries.sort_by_key(|e| e.first_ts);
    }
}

fn index_one(path: &Path) -> Result<Option<IndexEntry>, SegmentError> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::new(flate2::read::GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut first_ts = None;
    let mut last_ts = None;
    let mut count = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let Ok(event) = Event::from_line(&line) else { continue };
        first_ts.get_or_insert(event.timestamp);
        last_ts = Some(event.timestamp);
        count += 1;
    }

    match (first_ts, last_ts) {
        (Some(first_ts), Some(last_ts)) => {
            Ok(Some(IndexEntry { path: path.to_path_buf(), first_ts, last_ts, count }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;

    fn write_segment(dir: &Path, name: &str, timestamps: &[u64]) {
        use std::io::Write as _;
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for ts in timestamps {
            let event = Event {
                kind: EventKind::Trade,
                venue: "v".into(),
                symbol: "BTC/USDT".into(),
                timestamp: *ts,
                data: serde_json::Value::Null,
            };
            writeln!(file, "{}", event.to_line().unwrap()).unwrap();
        }
    }

    #[test]
    fn scan_orders_by_first_ts() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), "events_b.jsonl", &[50, 60]);
        write_segment(dir.path(), "events_a.jsonl", &[10, 20]);
        let index = StreamIndex::scan(dir.path()).unwrap();
        assert_eq!(index.entries().len(), 2);
        assert_eq!(index.entries()[0].first_ts, 10);
        assert_eq!(index.entries()[1].first_ts, 50);
    }

    #[test]
    fn candidates_filters_non_overlapping() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), "events_a.jsonl", &[10, 20]);
        write_segment(dir.path(), "events_b.jsonl", &[100, 200]);
        let index = StreamIndex::scan(dir.path()).unwrap();
        let hits = index.candidates(15, 25);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].first_ts, 10);
    }

    #[test]
    fn empty_dir_yields_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = StreamIndex::scan(dir.path()).unwrap();
        assert!(index.entries().is_empty());
    }
}
