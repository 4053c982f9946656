//! Standalone fragment store.
//!
//! A fragment lives in `<dir>/<key>` and never changes once written. Who
//! owns it lives next to it in `<dir>/<key>.owners`, a json document:
//!
//! ```text
//! {
//!   "owners": { "<nodeIdHex>": { "<label>": "<base64url meta>", .. }, .. },
//!   "lastAccess": <unix seconds>
//! }
//! ```
//!
//! The fragment is deleted together with its record once the last owner
//! is removed.

use crate::*;
use base64::prelude::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Metadata one owner attached to a fragment, by label.
pub type OwnerMeta = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerRecord {
    owners: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    last_access: u64,
}

impl OwnerRecord {
    /// Add `owner` with its metadata. An existing owner keeps what it
    /// has. Returns true if the record changed.
    fn add(&mut self, owner: &NodeId, meta: Option<(&str, &[u8])>) -> bool {
        let hex = owner.to_hex();
        if self.owners.contains_key(&hex) {
            return false;
        }
        let mut labels = BTreeMap::new();
        if let Some((label, content)) = meta {
            labels.insert(
                label.to_string(),
                BASE64_URL_SAFE_NO_PAD.encode(content),
            );
        }
        self.owners.insert(hex, labels);
        true
    }

    /// Set one metadata entry, adding `owner` if needed. Returns true if
    /// the record changed.
    fn set(&mut self, owner: &NodeId, label: &str, content: &[u8]) -> bool {
        let labels = self.owners.entry(owner.to_hex()).or_default();
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(content);
        if labels.get(label) == Some(&encoded) {
            return false;
        }
        labels.insert(label.to_string(), encoded);
        true
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Reference counted standalone fragments.
#[derive(Debug)]
pub struct FragmentStore {
    dir: PathBuf,
    locks: Arc<EditLocks>,
}

impl FragmentStore {
    /// Store fragments in `dir`. Ownership edits lock the fragment path
    /// in `locks`.
    pub fn new(dir: impl Into<PathBuf>, locks: Arc<EditLocks>) -> Self {
        Self {
            dir: dir.into(),
            locks,
        }
    }

    /// Content path of a fragment.
    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.owners"))
    }

    /// True if the fragment is stored.
    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    /// Open the content for reading.
    pub fn open(&self, key: &str) -> std::io::Result<std::fs::File> {
        std::fs::File::open(self.path(key))
    }

    /// Metadata attached by `owner`, or `None` if it is not an owner.
    pub fn meta(
        &self,
        key: &str,
        owner: &NodeId,
    ) -> std::io::Result<Option<OwnerMeta>> {
        let rec = self.read_record(key)?;
        let labels = match rec.owners.get(&owner.to_hex()) {
            None => return Ok(None),
            Some(labels) => labels,
        };
        let mut out = OwnerMeta::new();
        for (label, b64) in labels {
            let content = BASE64_URL_SAFE_NO_PAD
                .decode(b64)
                .map_err(std::io::Error::other)?;
            out.insert(label.clone(), content);
        }
        Ok(Some(out))
    }

    /// Move `content` into place as a new fragment owned by `owner`, or,
    /// if the fragment already exists, discard `content` and add `owner`
    /// to it. Returns true if the fragment was created.
    pub fn create_or_add_owner(
        &self,
        key: &str,
        content: tempfile::NamedTempFile,
        owner: &NodeId,
        meta: Option<(&str, &[u8])>,
    ) -> std::io::Result<bool> {
        let path = self.path(key);
        let _g = self.locks.lock(&path);

        let mut rec = self.read_record(key)?;
        let created = if path.is_file() {
            drop(content);
            false
        } else {
            content.as_file().sync_all()?;
            content.persist(&path).map_err(|err| err.error)?;
            rec.last_access = unix_now();
            true
        };

        if rec.add(owner, meta) || created {
            self.write_record(key, &rec)?;
        }

        tracing::debug!(key, %owner, created, "fragment owner recorded");
        Ok(created)
    }

    /// Add `owner` (and optionally one metadata entry) to an existing
    /// fragment. An owner storing the fragment again changes nothing.
    pub fn add_owner(
        &self,
        key: &str,
        owner: &NodeId,
        meta: Option<(&str, &[u8])>,
    ) -> std::io::Result<()> {
        let path = self.path(key);
        let _g = self.locks.lock(&path);

        if !path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("fragment {key}"),
            ));
        }

        let mut rec = self.read_record(key)?;
        if rec.add(owner, meta) {
            self.write_record(key, &rec)?;
        }
        Ok(())
    }

    /// Set one metadata entry of `owner`, recording it as an owner if it
    /// was not one. Nothing is written if the stored value is already
    /// equal. Returns true if the record was rewritten.
    pub fn set_meta(
        &self,
        key: &str,
        owner: &NodeId,
        label: &str,
        content: &[u8],
    ) -> std::io::Result<bool> {
        let path = self.path(key);
        let _g = self.locks.lock(&path);

        if !path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("fragment {key}"),
            ));
        }

        let mut rec = self.read_record(key)?;
        if !rec.set(owner, label, content) {
            return Ok(false);
        }

        self.write_record(key, &rec)?;
        Ok(true)
    }

    /// Drop the `label` entry of `owner`. The owner goes once it has no
    /// entries left, and the fragment goes with its last owner. Nothing
    /// changes if `owner` is not recorded as an owner.
    ///
    /// Returns true if the fragment was deleted.
    pub fn remove_owner(
        &self,
        key: &str,
        owner: &NodeId,
        label: &str,
    ) -> std::io::Result<bool> {
        let path = self.path(key);
        let _g = self.locks.lock(&path);

        let mut rec = self.read_record(key)?;
        let hex = owner.to_hex();

        let labels = match rec.owners.get_mut(&hex) {
            None => return Ok(false),
            Some(labels) => labels,
        };
        labels.remove(label);
        if labels.is_empty() {
            rec.owners.remove(&hex);
        }

        if rec.owners.is_empty() {
            remove_if_present(&path)?;
            remove_if_present(&self.record_path(key))?;
            tracing::info!(key, "last owner removed, fragment deleted");
            return Ok(true);
        }

        self.write_record(key, &rec)?;
        Ok(false)
    }

    /// Record a retrieval.
    pub fn touch(&self, key: &str) -> std::io::Result<()> {
        let path = self.path(key);
        let _g = self.locks.lock(&path);

        if !path.is_file() {
            return Ok(());
        }

        let mut rec = self.read_record(key)?;
        rec.last_access = unix_now();
        self.write_record(key, &rec)
    }

    fn read_record(&self, key: &str) -> std::io::Result<OwnerRecord> {
        match std::fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(OwnerRecord::default())
            }
            Err(err) => Err(err),
        }
    }

    fn write_record(
        &self,
        key: &str,
        rec: &OwnerRecord,
    ) -> std::io::Result<()> {
        let mut file = fragstore_archive::new_temp_file(&self.dir)?;
        serde_json::to_writer(&mut file, rec)?;
        file.flush()?;
        file.as_file().sync_all()?;
        file.persist(self.record_path(key))
            .map_err(|err| err.error)?;
        Ok(())
    }
}

fn remove_if_present(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
