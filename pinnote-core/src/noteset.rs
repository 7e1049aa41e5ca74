/// The live in-memory document held by the owning instance, plus the
/// contract consumed by the rendering layer: create, update, delete, save,
/// reload-and-reconcile, visibility and the category registry.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use uuid::Uuid;

use crate::merge::{merge_into, MergeOutcome};
use crate::store::{NoteStore, StoreError};
use crate::types::{Category, Document, Note};

pub struct NoteSet {
    doc: Document,
    path: PathBuf,
}

impl NoteSet {
    /// Open the document at `path` without any recovery.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let doc = NoteStore::load(path)?;
        Ok(Self {
            doc,
            path: path.to_path_buf(),
        })
    }

    /// Open the document, recovering from the two startup failure modes:
    /// a missing document becomes an empty one with a single fresh note,
    /// and a corrupt document is backed up next to itself before being
    /// reset the same way. User data is never discarded without a backup.
    pub fn open_or_recover(path: &Path) -> Result<Self, StoreError> {
        match NoteStore::load(path) {
            Ok(doc) => Ok(Self {
                doc,
                path: path.to_path_buf(),
            }),
            Err(StoreError::NotFound(_)) => {
                log::info!(
                    "[pinnote.store] No document at {:?}, starting fresh",
                    path
                );
                Ok(Self::fresh(path))
            }
            Err(StoreError::Corrupt(reason)) => {
                let backup = NoteStore::backup_corrupt(path)?;
                log::warn!(
                    "[pinnote.store] Document at {:?} is corrupt ({}), backed up to {:?}",
                    path,
                    reason,
                    backup
                );
                Ok(Self::fresh(path))
            }
            Err(e) => Err(e),
        }
    }

    fn fresh(path: &Path) -> Self {
        let mut doc = Document::default();
        doc.notes.push(Note::new());
        Self {
            doc,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn notes(&self) -> &[Note] {
        &self.doc.notes
    }

    pub fn note_mut(&mut self, uuid: &str) -> Option<&mut Note> {
        self.doc.note_mut(uuid)
    }

    /// Create a new empty note at the end of the set (creation order is
    /// display order). The uuid is assigned at first save.
    pub fn new_note(&mut self) -> &mut Note {
        let index = self.doc.notes.len();
        self.doc.notes.push(Note::new());
        &mut self.doc.notes[index]
    }

    /// Remove a note and immediately persist the document. There is no
    /// soft-delete or undo. Returns whether the note existed.
    pub fn delete(&mut self, uuid: &str) -> Result<bool, StoreError> {
        let Some(index) = self
            .doc
            .notes
            .iter()
            .position(|n| n.uuid.as_deref() == Some(uuid))
        else {
            return Ok(false);
        };
        self.doc.notes.remove(index);
        self.save()?;
        Ok(true)
    }

    /// Persist the full document, assigning uuids to notes being saved for
    /// the first time.
    pub fn save(&mut self) -> Result<(), StoreError> {
        for note in &mut self.doc.notes {
            if note.uuid.is_none() {
                note.uuid = Some(Uuid::new_v4().to_string());
            }
        }
        NoteStore::save(&self.doc, &self.path)
    }

    /// Re-read the shared document and reconcile it into the live state.
    pub fn reload(&mut self) -> Result<MergeOutcome, StoreError> {
        let incoming = NoteStore::load(&self.path)?;
        Ok(merge_into(&mut self.doc, incoming))
    }

    pub fn all_visible(&self) -> bool {
        self.doc.properties.all_visible
    }

    pub fn show_all(&mut self) {
        self.doc.properties.all_visible = true;
    }

    /// Hiding saves first, so nothing is lost if the session ends while
    /// the notes are out of sight.
    pub fn hide_all(&mut self) -> Result<(), StoreError> {
        self.save()?;
        self.doc.properties.all_visible = false;
        Ok(())
    }

    /// Set the locked display property on every note and persist.
    pub fn lock_all(&mut self, locked: bool) -> Result<(), StoreError> {
        for note in &mut self.doc.notes {
            note.properties
                .insert("locked".to_string(), Value::Bool(locked));
        }
        self.save()
    }

    pub fn categories(&self) -> &BTreeMap<String, Category> {
        &self.doc.categories
    }

    pub fn categories_mut(&mut self) -> &mut BTreeMap<String, Category> {
        &mut self.doc.categories
    }

    /// Remove a category, reassigning its notes to the default, and
    /// persist in the same operation.
    pub fn delete_category(&mut self, id: &str) -> Result<usize, StoreError> {
        let reassigned = self.doc.delete_category(id);
        self.save()?;
        Ok(reassigned)
    }
}

/// The delegated append path: load the shared document (or synthesize an
/// empty one), append a note with the given body, save, and return the new
/// note's uuid. Runs entirely in the non-owning process; the owner picks
/// the note up on its next reload. Two racing appends are only as safe as
/// the atomic rename underneath them: the later save wins the file.
pub fn create_note_at(path: &Path, body: &str) -> Result<String, StoreError> {
    let mut doc = match NoteStore::load(path) {
        Ok(doc) => doc,
        Err(StoreError::NotFound(_)) => Document::default(),
        Err(e) => return Err(e),
    };

    let mut note = Note::with_body(body);
    let id = Uuid::new_v4().to_string();
    note.uuid = Some(id.clone());
    doc.notes.push(note);
    NoteStore::save(&doc, path)?;
    log::info!("[pinnote.store] Appended note {} to {:?}", id, path);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_open_or_recover_missing_synthesizes_one_note() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let set = NoteSet::open_or_recover(&path).unwrap();
        assert_eq!(set.notes().len(), 1);
        assert_eq!(set.notes()[0].body, "");
        assert!(set.notes()[0].uuid.is_none());
        // Nothing is written until the first save.
        assert!(!path.exists());
    }

    #[test]
    fn test_open_or_recover_corrupt_backs_up_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, "{ definitely broken").unwrap();

        let set = NoteSet::open_or_recover(&path).unwrap();
        assert_eq!(set.notes().len(), 1);

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("notes.corrupt-")
            })
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            fs::read_to_string(backups[0].path()).unwrap(),
            "{ definitely broken"
        );
    }

    #[test]
    fn test_save_assigns_uuid_exactly_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let mut set = NoteSet::open_or_recover(&path).unwrap();
        set.new_note().update("hello");
        set.save().unwrap();

        let first_ids: Vec<_> = set.notes().iter().map(|n| n.uuid.clone()).collect();
        assert!(first_ids.iter().all(|id| id.is_some()));

        set.save().unwrap();
        let second_ids: Vec<_> = set.notes().iter().map(|n| n.uuid.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_delete_removes_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let mut set = NoteSet::open_or_recover(&path).unwrap();
        set.save().unwrap();
        let id = set.notes()[0].uuid.clone().unwrap();

        assert!(set.delete(&id).unwrap());
        assert!(set.notes().is_empty());
        assert!(!set.delete(&id).unwrap());

        let on_disk = NoteStore::load(&path).unwrap();
        assert!(on_disk.notes.is_empty());
    }

    #[test]
    fn test_hide_all_saves_before_flipping_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let mut set = NoteSet::open_or_recover(&path).unwrap();
        set.doc.notes[0].update("draft");
        set.hide_all().unwrap();
        assert!(!set.all_visible());

        // The save ran before the flag flipped, so the disk copy still has
        // all_visible = true from the pre-hide state.
        let on_disk = NoteStore::load(&path).unwrap();
        assert_eq!(on_disk.notes[0].body, "draft");
        assert!(on_disk.properties.all_visible);

        set.show_all();
        assert!(set.all_visible());
    }

    #[test]
    fn test_open_preserves_persisted_visibility() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let mut set = NoteSet::open_or_recover(&path).unwrap();
        set.hide_all().unwrap();
        set.save().unwrap();

        // A restart sees the hidden state as-is; nothing forces the flag
        // back to visible. Showing is an explicit intent.
        let reopened = NoteSet::open(&path).unwrap();
        assert!(!reopened.all_visible());
    }

    #[test]
    fn test_lock_all_sets_property_on_every_note() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let mut set = NoteSet::open_or_recover(&path).unwrap();
        set.new_note();
        set.lock_all(true).unwrap();
        assert!(set
            .notes()
            .iter()
            .all(|n| n.properties["locked"] == Value::Bool(true)));

        set.lock_all(false).unwrap();
        assert!(set
            .notes()
            .iter()
            .all(|n| n.properties["locked"] == Value::Bool(false)));
    }

    #[test]
    fn test_create_note_at_missing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");

        let id = create_note_at(&path, "buy milk").unwrap();
        let doc = NoteStore::load(&path).unwrap();
        assert_eq!(doc.notes.len(), 1);
        assert_eq!(doc.notes[0].body, "buy milk");
        assert_eq!(doc.notes[0].uuid.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_create_note_at_corrupt_path_refuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, "broken").unwrap();

        assert!(matches!(
            create_note_at(&path, "x"),
            Err(StoreError::Corrupt(_))
        ));
        // The delegated path never resets a corrupt document.
        assert_eq!(fs::read_to_string(&path).unwrap(), "broken");
    }
}
