//! pinnote-core: the persistence, reconciliation and single-instance
//! engine behind the sticky-notes desktop shell. The rendering layer
//! consumes `NoteSet` and never touches the store or the coordinator
//! directly.

pub mod instance;
pub mod merge;
pub mod noteset;
pub mod store;
pub mod types;

pub use instance::{acquire, process_alive, send_intent, Intent, InstanceError, OwnerLock, Ownership};
pub use merge::{merge_into, MergeOutcome};
pub use noteset::{create_note_at, NoteSet};
pub use store::{NoteStore, StoreError};
pub use types::{Category, Document, GlobalProperties, Note};
