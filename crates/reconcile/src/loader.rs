//! Actual-state extraction from a host store

use crate::error::Result;
use crate::record::{RecordSchema, RecordSet, Validation};
use crate::store::{SectionPath, StoreDocument, StoreFormat};
use crate::transport::{HostRef, Transport};
use std::sync::Arc;

/// Everything read from a host in one pass.
///
/// The raw bytes and their digest are kept so a later apply can prove the
/// backup matches exactly what the plan was derived from.
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub host: HostRef,
    pub raw: Vec<u8>,
    pub digest: blake3::Hash,
    pub document: StoreDocument,
    pub records: RecordSet,
}

/// Reads a host's store and normalizes the managed section into records
#[derive(Clone)]
pub struct StateLoader {
    transport: Arc<dyn Transport>,
    schema: Arc<RecordSchema>,
    section: SectionPath,
}

impl StateLoader {
    pub fn new(
        transport: Arc<dyn Transport>,
        schema: Arc<RecordSchema>,
        section: SectionPath,
    ) -> Self {
        Self {
            transport,
            schema,
            section,
        }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn section(&self) -> &SectionPath {
        &self.section
    }

    /// Load the actual record set for a host
    pub fn load(&self, host: &HostRef) -> Result<RecordSet> {
        Ok(self.snapshot(host)?.records)
    }

    /// Read and parse the store, keeping the document for patching
    pub fn snapshot(&self, host: &HostRef) -> Result<HostSnapshot> {
        let raw = self.transport.read_store(host)?;
        let digest = blake3::hash(&raw);
        let format = StoreFormat::from_path(&host.store);
        let document = StoreDocument::parse(&raw, format, &host.name)?;
        let records = document.extract(&self.schema, &self.section, Validation::Lenient)?;

        log::debug!(
            "{}: loaded {} record(s) from {}",
            host.name,
            records.len(),
            host.store.display()
        );

        Ok(HostSnapshot {
            host: host.clone(),
            raw,
            digest,
            document,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::LocalTransport;
    use std::fs;
    use tempfile::TempDir;

    fn loader() -> StateLoader {
        StateLoader::new(
            Arc::new(LocalTransport::new()),
            Arc::new(RecordSchema::safe_controls()),
            SectionPath::parse("configuration.SafeControls").unwrap(),
        )
    }

    #[test]
    fn test_load_records() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(
            &store,
            r#"{"configuration": {"SafeControls": [
                {"Assembly": "A", "Namespace": "N", "TypeName": "*", "Safe": "True"}
            ]}}"#,
        )
        .unwrap();

        let set = loader().load(&HostRef::new("web01", &store)).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.name(), "web01");
    }

    #[test]
    fn test_empty_store_section() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, r#"{"configuration": {"SafeControls": []}}"#).unwrap();

        let set = loader().load(&HostRef::new("web01", &store)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_snapshot_digest_matches_raw() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, r#"{"configuration": {}}"#).unwrap();

        let snapshot = loader().snapshot(&HostRef::new("web01", &store)).unwrap();
        assert_eq!(snapshot.digest, blake3::hash(&snapshot.raw));
    }

    #[test]
    fn test_malformed_store_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, "{\"configuration\": ").unwrap();

        let err = loader().load(&HostRef::new("web01", &store)).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
