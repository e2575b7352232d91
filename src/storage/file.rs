use super::CredentialStore;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// All slots in one JSON object file. Every write rewrites the file through a
/// temporary sibling and a rename, so readers never see a half-written object.
/// On unix the file is readable by its owner only.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(Error::Storage(format!(
                    "{}: {err}",
                    self.path.display()
                )))
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }

        serde_json::from_slice(&raw)
            .map_err(|err| Error::Storage(format!("{}: {err}", self.path.display())))
    }

    fn write_all(&self, slots: &BTreeMap<String, String>) -> Result<()> {
        let storage_err = |err: std::io::Error| Error::Storage(format!("{}: {err}", self.path.display()));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }

        let payload = serde_json::to_vec_pretty(slots)
            .map_err(|err| Error::Storage(format!("Failed to encode storage: {err}")))?;

        // unique per write, so handles in other processes never share a temporary
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", ulid::Ulid::new()));
        let written = write_private(&tmp, &payload).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(storage_err(err));
        }

        debug!("storage written: {}", self.path.display());

        Ok(())
    }

    fn modify(&self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Storage("file store lock poisoned".to_string()))?;

        let mut slots = self.read_all()?;
        if apply(&mut slots) {
            self.write_all(&slots)?;
        }
        Ok(())
    }
}

fn write_private(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Storage("file store lock poisoned".to_string()))?;

        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|slots| {
            slots.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.modify(|slots| slots.remove(key).is_some())
    }
}
