//! Structural-damage detection tests for `Table::open`.

#[cfg(test)]
mod tests {
    use crate::sstable::{Table, TableBuilder, TableError};
    use std::fs;
    use tempfile::TempDir;

    fn write_valid_table(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("1.sst");
        let mut builder = TableBuilder::new(1);
        builder.add(10, b"alpha");
        builder.add(20, b"beta");
        builder.write_to(&path).unwrap();
        path
    }

    #[test]
    fn opens_valid_table() {
        let tmp = TempDir::new().unwrap();
        let path = write_valid_table(&tmp);
        assert!(Table::open(&path).is_ok());
    }

    #[test]
    fn rejects_file_smaller_than_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tiny.sst");
        fs::write(&path, [0u8; 64]).unwrap();

        match Table::open(&path) {
            Err(TableError::Corruption(_)) => {}
            other => panic!("expected Corruption, got {other:?}", other = other.err()),
        }
    }

    #[test]
    fn rejects_truncated_data_blob() {
        let tmp = TempDir::new().unwrap();
        let path = write_valid_table(&tmp);

        let bytes = fs::read(&path).unwrap();
        // Drop the last 3 bytes of the data blob: the final end offset
        // no longer matches the file length.
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        match Table::open(&path) {
            Err(TableError::Corruption(_)) => {}
            other => panic!("expected Corruption, got {other:?}", other = other.err()),
        }
    }

    #[test]
    fn rejects_header_index_range_mismatch() {
        let tmp = TempDir::new().unwrap();
        let path = write_valid_table(&tmp);

        let mut bytes = fs::read(&path).unwrap();
        // Header min_key lives at offset 16; flip it to a wrong value.
        bytes[16..24].copy_from_slice(&999u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        match Table::open(&path) {
            Err(TableError::Corruption(_)) => {}
            other => panic!("expected Corruption, got {other:?}", other = other.err()),
        }
    }

    #[test]
    fn rejects_count_beyond_file_length() {
        let tmp = TempDir::new().unwrap();
        let path = write_valid_table(&tmp);

        let mut bytes = fs::read(&path).unwrap();
        // Header count lives at offset 8; claim far more entries than fit.
        bytes[8..16].copy_from_slice(&1_000_000u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        match Table::open(&path) {
            Err(TableError::Corruption(_)) => {}
            other => panic!("expected Corruption, got {other:?}", other = other.err()),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        match Table::open(tmp.path().join("absent.sst")) {
            Err(TableError::Io(_)) => {}
            other => panic!("expected Io, got {other:?}", other = other.err()),
        }
    }
}
