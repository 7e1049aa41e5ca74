/// Durable, atomic persistence of the document to a single shared path.
///
/// Writes go through a temp-file-then-rename sequence with fsync, so a
/// concurrent reader never observes a partially written document and a
/// failed write leaves the previous content intact. Loading runs a
/// versionless normalization pass over the raw JSON before typed decoding,
/// which keeps documents written by older versions loadable without a
/// schema version tag.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde_json::Value;

use crate::types::{now, Document, TIMESTAMP_FORMAT};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(PathBuf),

    #[error("document is corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct NoteStore;

impl NoteStore {
    /// Load and normalize the document at `path`.
    pub fn load(path: &Path) -> Result<Document, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut value: Value =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        normalize(&mut value)?;
        serde_json::from_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Atomically replace the document at `path` with `document`.
    pub fn save(document: &Document, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(document).map_err(std::io::Error::other)?;
        atomic_write(path, &json)?;
        log::debug!(
            "[pinnote.store] Saved {} notes to {:?}",
            document.notes.len(),
            path
        );
        Ok(())
    }

    /// Copy an unreadable document aside before resetting it, so user data
    /// is never silently discarded. Returns the backup path.
    pub fn backup_corrupt(path: &Path) -> Result<PathBuf, StoreError> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let backup = path.with_extension(format!("corrupt-{}", timestamp));
        fs::copy(path, &backup)?;
        Ok(backup)
    }
}

/// Versionless schema upgrade: fill in whatever an older document is
/// missing so the typed decode below always sees the canonical shape.
/// Kept separate from parsing on purpose.
pub(crate) fn normalize(value: &mut Value) -> Result<(), StoreError> {
    let root = value
        .as_object_mut()
        .ok_or_else(|| StoreError::Corrupt("top-level value is not an object".into()))?;

    root.entry("notes").or_insert_with(|| Value::Array(Vec::new()));
    root.entry("categories")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    root.entry("properties")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));

    if let Some(notes) = root.get_mut("notes").and_then(Value::as_array_mut) {
        for note in notes {
            if let Some(note) = note.as_object_mut() {
                // Pre-timestamp documents get "edited now": anything they
                // contain is at least as new as anything we know about.
                note.entry("last_modified").or_insert_with(|| {
                    Value::String(now().format(TIMESTAMP_FORMAT).to_string())
                });
            }
        }
    }
    Ok(())
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomic write: write to a temp file, fsync, rename into place, fsync the
/// directory for rename durability.
///
/// The temp name is unique per writer (pid + sequence): a delegated
/// append and an owner save run in separate processes against the same
/// document path, and a shared temp path would let one writer rename
/// another's truncated file into place.
fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));
    let mut file = fs::File::create(&tmp_path)?;
    if let Err(e) = file.write_all(content.as_bytes()).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path)?;

    if let Some(dir) = path.parent() {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}
