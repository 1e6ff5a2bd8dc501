//! Reading Store Module
//!
//! Append-only sled database holding every accepted probe reading,
//! plus the small query surface the analysis tooling reads from.

use crate::domain::models::{GridPosition, SensorReading};
use std::path::Path;
use thiserror::Error;

const READINGS_TREE: &str = "readings";
const POSITIONS_TREE: &str = "positions";

/// Failure in the persistence sink. The affected reading is lost; the
/// session continues.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("corrupt reading record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Handle to the reading database. Clones share the same underlying
/// store and are cheap to pass across threads.
#[derive(Clone)]
pub struct ReadingStore {
    db: sled::Db,
}

impl ReadingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory store that disappears on drop.
    pub fn temporary() -> Result<Self, PersistenceError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Appends a reading. Existing rows are never modified.
    pub fn append(&self, reading: &SensorReading) -> Result<(), PersistenceError> {
        let tree = self.db.open_tree(READINGS_TREE)?;
        let id = self.db.generate_id()?;

        // Key sorts by position, then timestamp, then insertion order,
        // so per-position scans come back in capture order.
        let key = format!(
            "{},{}|{}|{:020}",
            reading.x, reading.y, reading.timestamp, id
        );
        let value = serde_json::to_vec(reading)?;
        tree.insert(key.as_bytes(), value)?;

        let positions = self.db.open_tree(POSITIONS_TREE)?;
        positions.insert(position_key(reading.x, reading.y), &[] as &[u8])?;

        tree.flush()?;
        Ok(())
    }

    /// Every grid position with at least one stored reading, in
    /// ascending (x, y) order.
    pub fn distinct_positions(&self) -> Result<Vec<GridPosition>, PersistenceError> {
        let tree = self.db.open_tree(POSITIONS_TREE)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (key, _) = entry?;
            if let Some(position) = decode_position_key(&key) {
                out.push(position);
            }
        }
        out.sort_by_key(|p| (p.x, p.y));
        Ok(out)
    }

    /// All readings captured at `position`, oldest first.
    pub fn readings_at(
        &self,
        position: GridPosition,
    ) -> Result<Vec<SensorReading>, PersistenceError> {
        let tree = self.db.open_tree(READINGS_TREE)?;
        let prefix = format!("{},{}|", position.x, position.y);
        let mut out = Vec::new();
        for entry in tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}

fn position_key(x: i32, y: i32) -> String {
    format!("{x},{y}")
}

fn decode_position_key(key: &[u8]) -> Option<GridPosition> {
    let text = std::str::from_utf8(key).ok()?;
    let (x, y) = text.split_once(',')?;
    Some(GridPosition {
        x: x.parse().ok()?,
        y: y.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(x: i32, y: i32, timestamp: &str, measurement: f64) -> SensorReading {
        SensorReading {
            timestamp: timestamp.to_string(),
            x,
            y,
            measurement,
            angle: 20.25,
        }
    }

    fn cell(x: i32, y: i32) -> GridPosition {
        GridPosition::new(x, y).unwrap()
    }

    #[test]
    fn append_and_read_back_in_capture_order() {
        let store = ReadingStore::temporary().unwrap();
        store
            .append(&reading(1, 1, "2026-08-21 10:00:00.000", 1.0))
            .unwrap();
        store
            .append(&reading(1, 1, "2026-08-21 10:00:01.500", 2.0))
            .unwrap();
        store
            .append(&reading(1, 1, "2026-08-21 10:00:02.250", 3.0))
            .unwrap();

        let readings = store.readings_at(cell(1, 1)).unwrap();
        let measurements: Vec<f64> = readings.iter().map(|r| r.measurement).collect();
        assert_eq!(measurements, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn identical_timestamps_keep_insertion_order() {
        let store = ReadingStore::temporary().unwrap();
        store
            .append(&reading(2, 3, "2026-08-21 10:00:00.000", 1.0))
            .unwrap();
        store
            .append(&reading(2, 3, "2026-08-21 10:00:00.000", 2.0))
            .unwrap();

        let readings = store.readings_at(cell(2, 3)).unwrap();
        let measurements: Vec<f64> = readings.iter().map(|r| r.measurement).collect();
        assert_eq!(measurements, vec![1.0, 2.0]);
    }

    #[test]
    fn readings_are_scoped_to_their_position() {
        let store = ReadingStore::temporary().unwrap();
        store
            .append(&reading(0, 0, "2026-08-21 10:00:00.000", 1.0))
            .unwrap();
        store
            .append(&reading(0, 1, "2026-08-21 10:00:01.000", 2.0))
            .unwrap();

        assert_eq!(store.readings_at(cell(0, 0)).unwrap().len(), 1);
        assert_eq!(store.readings_at(cell(0, 1)).unwrap().len(), 1);
        assert!(store.readings_at(cell(5, 5)).unwrap().is_empty());
    }

    #[test]
    fn distinct_positions_are_sorted_and_deduplicated() {
        let store = ReadingStore::temporary().unwrap();
        store
            .append(&reading(3, 2, "2026-08-21 10:00:00.000", 1.0))
            .unwrap();
        store
            .append(&reading(0, 5, "2026-08-21 10:00:01.000", 2.0))
            .unwrap();
        store
            .append(&reading(3, 2, "2026-08-21 10:00:02.000", 3.0))
            .unwrap();
        store
            .append(&reading(1, 1, "2026-08-21 10:00:03.000", 4.0))
            .unwrap();

        let positions = store.distinct_positions().unwrap();
        assert_eq!(positions, vec![cell(0, 5), cell(1, 1), cell(3, 2)]);

        // Reads do not change the answer.
        assert_eq!(store.distinct_positions().unwrap(), positions);
    }

    #[test]
    fn empty_store_has_no_positions() {
        let store = ReadingStore::temporary().unwrap();
        assert!(store.distinct_positions().unwrap().is_empty());
    }
}
