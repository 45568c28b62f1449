//! Destination writers for the recovered secrets.
//!
//! The key/value store is a capability: [`SecretsStore`] accepts ASCII keys
//! and opaque byte values, and [`write_records`] drives it from the encoded
//! records. The on-disk format of a real Samba TDB is out of scope here;
//! [`RecordFileStore`] is a minimal length-framed stand-in so the pipeline
//! has a concrete sink.
//
// TODO: add a libtdb-backed SecretsStore so the output is directly usable
// as /var/lib/samba/private/secrets.tdb.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::encode::SecretsRecords;
use crate::error::JoinResult;
use crate::extract::SecretsBundle;

/// Ordered key/value sink for the encoded secrets records.
pub trait SecretsStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> JoinResult<()>;
}

/// Write every record into the store, in order. Text values receive their
/// NUL terminator here.
pub fn write_records<S: SecretsStore + ?Sized>(
    store: &mut S,
    records: &SecretsRecords,
) -> JoinResult<()> {
    for (key, value) in records {
        debug!("storing record '{key}'");
        store.put(key.as_bytes(), &value.to_store_bytes())?;
    }
    Ok(())
}

/// Length-framed flat-file store: each record is
/// `u32 key_len | u32 value_len | key | value`, little-endian, appended in
/// insertion order.
pub struct RecordFileStore {
    writer: BufWriter<File>,
}

impl RecordFileStore {
    pub fn create(path: &Path) -> JoinResult<Self> {
        let file = File::create(path)?;
        Ok(RecordFileStore {
            writer: BufWriter::new(file),
        })
    }

    /// Flush buffered records to disk.
    pub fn finish(mut self) -> JoinResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl SecretsStore for RecordFileStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> JoinResult<()> {
        self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
        self.writer.write_all(&(value.len() as u32).to_le_bytes())?;
        self.writer.write_all(key)?;
        self.writer.write_all(value)?;
        Ok(())
    }
}

/// Write the bundle as a pretty-printed JSON file (the `--json` output).
pub fn write_secrets_json(path: &Path, bundle: &SecretsBundle) -> JoinResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, bundle)
        .map_err(|e| crate::error::JoinError::StoreWrite(std::io::Error::other(e)))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::RecordValue;

    /// In-memory store used to observe what the writer hands over.
    #[derive(Default)]
    struct MemStore {
        records: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl SecretsStore for MemStore {
        fn put(&mut self, key: &[u8], value: &[u8]) -> JoinResult<()> {
            self.records.push((key.to_vec(), value.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn records_reach_the_store_in_order_with_terminators() {
        let records: SecretsRecords = vec![
            ("SECRETS/A".into(), RecordValue::Bytes(vec![1, 2, 3])),
            ("SECRETS/B".into(), RecordValue::Text("pw".into())),
        ];
        let mut store = MemStore::default();
        write_records(&mut store, &records).unwrap();

        assert_eq!(store.records.len(), 2);
        assert_eq!(store.records[0], (b"SECRETS/A".to_vec(), vec![1, 2, 3]));
        // Text values are stored NUL-terminated.
        assert_eq!(store.records[1], (b"SECRETS/B".to_vec(), b"pw\0".to_vec()));
    }

    #[test]
    fn record_file_framing() {
        let dir = std::env::temp_dir().join("hivejoin-store-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("secrets.db");

        let mut store = RecordFileStore::create(&path).unwrap();
        store.put(b"key", b"value").unwrap();
        store.finish().unwrap();

        let data = std::fs::read(&path).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(&5u32.to_le_bytes());
        expected.extend_from_slice(b"keyvalue");
        assert_eq!(data, expected);

        std::fs::remove_file(&path).ok();
    }
}
