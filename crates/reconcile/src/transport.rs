//! Host transport abstraction
//!
//! The engine only needs four capabilities on a host: read the store, copy it
//! verbatim to a backup path, read a file back, and replace the store
//! atomically. [`LocalTransport`] implements them on the local filesystem,
//! optionally under a per-host mirror root; remote transports live with the
//! caller.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// A managed host and the path of its configuration store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostRef {
    pub name: String,
    pub store: PathBuf,
}

impl HostRef {
    pub fn new(name: impl Into<String>, store: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            store: store.into(),
        }
    }
}

impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Capabilities required on a host
pub trait Transport: Send + Sync {
    /// Read the full store contents
    fn read_store(&self, host: &HostRef) -> Result<Vec<u8>>;

    /// Copy the store byte-for-byte to `destination` on the same host
    fn copy_store(&self, host: &HostRef, destination: &Path) -> Result<()>;

    /// Read an arbitrary file on the host
    fn read_file(&self, host: &HostRef, path: &Path) -> Result<Vec<u8>>;

    /// Replace the store with `contents`, all-or-nothing
    fn replace_store(&self, host: &HostRef, contents: &[u8]) -> Result<()>;
}

/// Backup path next to the store: `<name>.<YYYYMMDDTHHMMSSmmmZ>.bak`
pub fn backup_path(store: &Path, at: DateTime<Utc>) -> PathBuf {
    let name = store
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let stamp = at.format("%Y%m%dT%H%M%S%3fZ");
    store.with_file_name(format!("{name}.{stamp}.bak"))
}

/// Filesystem transport.
///
/// Without a root, store paths are used as-is. With a root, each host's store
/// resolves to `<root>/<host>/<store path>`, which suits fleets mirrored onto
/// mounted shares.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    root: Option<PathBuf>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Resolve a host path to a local path
    pub fn resolve(&self, host: &HostRef, path: &Path) -> PathBuf {
        match &self.root {
            None => path.to_path_buf(),
            Some(root) => {
                let relative: PathBuf = path
                    .components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .collect();
                root.join(&host.name).join(relative)
            }
        }
    }

    fn read(&self, host: &HostRef, path: &Path) -> Result<Vec<u8>> {
        let local = self.resolve(host, path);
        fs::read(&local).map_err(|e| io_error(host, &local, &e))
    }
}

fn io_error(host: &HostRef, path: &Path, err: &io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => {
            Error::not_found(format!("{} on {}", path.display(), host.name))
        }
        _ => Error::transport(&host.name, format!("{}: {err}", path.display())),
    }
}

impl Transport for LocalTransport {
    fn read_store(&self, host: &HostRef) -> Result<Vec<u8>> {
        self.read(host, &host.store)
    }

    fn copy_store(&self, host: &HostRef, destination: &Path) -> Result<()> {
        let source = self.resolve(host, &host.store);
        let target = self.resolve(host, destination);

        let mut reader = fs::File::open(&source).map_err(|e| io_error(host, &source, &e))?;
        // Never clobber an existing backup
        let mut writer = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| io_error(host, &target, &e))?;
        io::copy(&mut reader, &mut writer)
            .and_then(|_| reader.metadata())
            .and_then(|meta| writer.set_permissions(meta.permissions()))
            .and_then(|()| writer.sync_all())
            .map_err(|e| io_error(host, &target, &e))?;
        Ok(())
    }

    fn read_file(&self, host: &HostRef, path: &Path) -> Result<Vec<u8>> {
        self.read(host, path)
    }

    fn replace_store(&self, host: &HostRef, contents: &[u8]) -> Result<()> {
        let target = self.resolve(host, &host.store);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        let staging = target.with_file_name(format!(
            ".{file_name}.{}.{}.{}.tmp",
            host.name.replace(|c: char| !c.is_ascii_alphanumeric() && c != '-', "_"),
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let result = (|| -> io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)?;
            file.write_all(contents)?;
            if let Ok(meta) = fs::metadata(&target) {
                file.set_permissions(meta.permissions())?;
            }
            file.sync_all()?;
            fs::rename(&staging, &target)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&staging);
            return Err(io_error(host, &target, &e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_backup_path_is_sortable_and_adjacent() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = backup_path(Path::new("/etc/app/web.json"), at);
        assert_eq!(
            path,
            PathBuf::from("/etc/app/web.json.20240309T140507000Z.bak")
        );
    }

    #[test]
    fn test_read_missing_store_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let host = HostRef::new("web01", tmp.path().join("missing.json"));
        let err = LocalTransport::new().read_store(&host).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_rooted_resolution() {
        let transport = LocalTransport::with_root("/srv/mirror");
        let host = HostRef::new("web01", "/etc/app/web.json");
        assert_eq!(
            transport.resolve(&host, &host.store),
            PathBuf::from("/srv/mirror/web01/etc/app/web.json")
        );
    }

    #[test]
    fn test_copy_and_replace() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, b"{\"a\": 1}").unwrap();
        let host = HostRef::new("web01", &store);
        let transport = LocalTransport::new();

        let backup = tmp.path().join("web.json.bak");
        transport.copy_store(&host, &backup).unwrap();
        transport.replace_store(&host, b"{\"a\": 2}").unwrap();

        assert_eq!(fs::read(&backup).unwrap(), b"{\"a\": 1}");
        assert_eq!(fs::read(&store).unwrap(), b"{\"a\": 2}");
        // No staging file left behind
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_copy_keeps_existing_backup() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, b"{\"a\": 2}").unwrap();
        let backup = tmp.path().join("web.json.bak");
        fs::write(&backup, b"{\"a\": 1}").unwrap();
        let host = HostRef::new("web01", &store);

        let err = LocalTransport::new().copy_store(&host, &backup).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(fs::read(&backup).unwrap(), b"{\"a\": 1}");
    }

    #[cfg(unix)]
    #[test]
    fn test_replace_keeps_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, b"{}").unwrap();
        fs::set_permissions(&store, fs::Permissions::from_mode(0o600)).unwrap();
        let host = HostRef::new("web01", &store);

        LocalTransport::new()
            .replace_store(&host, b"{\"a\": 1}")
            .unwrap();

        let mode = fs::metadata(&store).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&store).unwrap(), b"{\"a\": 1}");
    }

    #[test]
    fn test_concurrent_replace_of_shared_store() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("web.json");
        fs::write(&store, b"{}").unwrap();
        let transport = LocalTransport::new();

        std::thread::scope(|scope| {
            for name in ["web01", "web02", "web03"] {
                let host = HostRef::new(name, &store);
                let transport = &transport;
                scope.spawn(move || {
                    transport.replace_store(&host, name.as_bytes()).unwrap();
                });
            }
        });

        let written = fs::read_to_string(&store).unwrap();
        assert!(["web01", "web02", "web03"].contains(&written.as_str()));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}
