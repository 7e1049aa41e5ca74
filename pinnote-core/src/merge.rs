/// Reconciliation of an externally-produced document into the live one.
///
/// The merge is strictly additive and updating, matched by note uuid:
/// - Incoming note unknown to the live document -> appended as a new note.
///   (This is how a note appended by a non-owning invocation becomes
///   visible in the running instance.)
/// - Incoming note already live -> body and last_modified are taken only
///   when the incoming timestamp is strictly newer (last writer wins).
///   Display properties are never taken from the incoming side: they are
///   owned by the live rendering layer and would clobber in-progress
///   window geometry.
/// - A live note absent from the incoming document is kept. Deletions
///   travel only through the explicit delete operation, never through
///   document diffing, so a concurrent instance can never silently
///   destroy notes it does not know about.
/// - Categories union by id; the live definition wins on collision.
/// - Global properties stay with the live instance.
///
/// Incoming notes without a uuid have never been persisted anywhere and
/// cannot be matched by id; they are skipped.
use crate::types::Document;

/// Counters describing what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub notes_added: usize,
    pub notes_updated: usize,
    pub categories_added: usize,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.notes_added == 0 && self.notes_updated == 0 && self.categories_added == 0
    }
}

/// Fold `incoming` into `live`. Idempotent: applying the same incoming
/// document twice has the same effect as applying it once.
pub fn merge_into(live: &mut Document, incoming: Document) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for note in incoming.notes {
        let Some(id) = note.uuid.clone() else {
            log::debug!("[pinnote.merge] Skipping incoming note without uuid");
            continue;
        };

        let position = live
            .notes
            .iter()
            .position(|n| n.uuid.as_deref() == Some(id.as_str()));
        match position {
            None => {
                live.notes.push(note);
                outcome.notes_added += 1;
            }
            Some(index) => {
                let existing = &mut live.notes[index];
                if note.last_modified > existing.last_modified {
                    existing.body = note.body;
                    existing.last_modified = note.last_modified;
                    outcome.notes_updated += 1;
                }
            }
        }
    }

    for (id, category) in incoming.categories {
        if !live.categories.contains_key(&id) {
            live.categories.insert(id, category);
            outcome.categories_added += 1;
        }
    }

    if !outcome.is_noop() {
        log::info!(
            "[pinnote.merge] Merged incoming document: {} added, {} updated, {} categories added",
            outcome.notes_added,
            outcome.notes_updated,
            outcome.categories_added
        );
    }
    outcome
}
