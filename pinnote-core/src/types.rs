/// Core data model: notes, categories, and the persisted document.
///
/// Serialized field names are the on-disk format and must not change:
/// notes carry `uuid`, `body`, `last_modified`, `cat` and an opaque
/// `properties` bag; categories carry `name`, `bgcolor_hsv`, `textcolor`,
/// `font` and `shadow`. The document is a single JSON object with `notes`,
/// `categories` and `properties` at the top level.
use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed textual timestamp format used on disk.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current wall-clock time, truncated to whole seconds so a value survives
/// a serialize/deserialize cycle unchanged.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

mod stamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(stamp: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&stamp.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// A single editable note.
///
/// `uuid` is assigned on first persistence and never reassigned afterwards.
/// `properties` is owned by the rendering layer (position, size, locked
/// state) and is round-tripped verbatim; the core never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(with = "stamp_format")]
    pub last_modified: NaiveDateTime,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cat: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Note {
    /// Create a new, empty, unsaved note.
    pub fn new() -> Self {
        Self {
            uuid: None,
            body: String::new(),
            last_modified: now(),
            cat: String::new(),
            properties: Map::new(),
        }
    }

    pub fn with_body(body: impl Into<String>) -> Self {
        let mut note = Self::new();
        note.body = body.into();
        note
    }

    /// Replace the body, bumping `last_modified` only when the body
    /// actually changed.
    pub fn update(&mut self, body: &str) {
        if self.body != body {
            self.body = body.to_string();
            self.last_modified = now();
        }
    }

    /// Hand the display properties to the rendering layer.
    pub fn extract_properties(&self) -> Map<String, Value> {
        self.properties.clone()
    }

    /// Take display properties back from the rendering layer. Does not
    /// touch `last_modified`: moving or resizing a note is not an edit.
    pub fn apply_properties(&mut self, properties: Map<String, Value>) {
        self.properties = properties;
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_bgcolor() -> [f64; 3] {
    [48.0 / 360.0, 1.0, 1.0]
}

fn fallback_textcolor() -> [f64; 3] {
    [32.0 / 255.0, 32.0 / 255.0, 32.0 / 255.0]
}

fn fallback_shadow() -> f64 {
    60.0
}

/// A named style group referenced (never embedded) by notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub name: String,
    #[serde(default = "fallback_bgcolor")]
    pub bgcolor_hsv: [f64; 3],
    #[serde(default = "fallback_textcolor")]
    pub textcolor: [f64; 3],
    #[serde(default)]
    pub font: String,
    #[serde(default = "fallback_shadow")]
    pub shadow: f64,
}

impl Default for Category {
    fn default() -> Self {
        Self {
            name: String::new(),
            bgcolor_hsv: fallback_bgcolor(),
            textcolor: fallback_textcolor(),
            font: String::new(),
            shadow: fallback_shadow(),
        }
    }
}

static FALLBACK_CATEGORY: LazyLock<Category> = LazyLock::new(Category::default);

fn default_true() -> bool {
    true
}

/// Global flags owned by the running instance. Unknown keys written by
/// other versions are kept in `extra` and round-tripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalProperties {
    #[serde(default = "default_true")]
    pub all_visible: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_cat: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GlobalProperties {
    fn default() -> Self {
        Self {
            all_visible: true,
            default_cat: String::new(),
            extra: Map::new(),
        }
    }
}

/// The complete persisted state: ordered notes, the category registry and
/// the global property bag. Note order is creation order and is never
/// re-sorted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub categories: BTreeMap<String, Category>,
    #[serde(default)]
    pub properties: GlobalProperties,
}

impl Document {
    pub fn note(&self, uuid: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.uuid.as_deref() == Some(uuid))
    }

    pub fn note_mut(&mut self, uuid: &str) -> Option<&mut Note> {
        self.notes
            .iter_mut()
            .find(|n| n.uuid.as_deref() == Some(uuid))
    }

    /// Resolve the style for a note. An empty or unresolved `cat` falls
    /// back to the default category; a missing default falls back to the
    /// built-in style values. Never an error.
    pub fn style_for(&self, note: &Note) -> &Category {
        if !note.cat.is_empty() {
            if let Some(cat) = self.categories.get(&note.cat) {
                return cat;
            }
        }
        self.default_category()
    }

    /// The currently designated default category, or the built-in fallback
    /// when none is registered.
    pub fn default_category(&self) -> &Category {
        self.categories
            .get(&self.properties.default_cat)
            .unwrap_or(&FALLBACK_CATEGORY)
    }

    /// Remove a category and reassign every note referencing it to the
    /// default (empty `cat` means "use default"). Returns the number of
    /// notes reassigned. Removing the current default clears the
    /// `default_cat` property as well, so no dangling reference survives.
    pub fn delete_category(&mut self, id: &str) -> usize {
        if self.categories.remove(id).is_none() {
            return 0;
        }
        let mut reassigned = 0;
        for note in &mut self.notes {
            if note.cat == id {
                note.cat.clear();
                reassigned += 1;
            }
        }
        if self.properties.default_cat == id {
            self.properties.default_cat.clear();
        }
        reassigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bumps_timestamp_only_on_change() {
        let mut note = Note::with_body("original");
        let stamp = note.last_modified;

        note.update("original");
        assert_eq!(note.last_modified, stamp);

        std::thread::sleep(std::time::Duration::from_millis(1100));
        note.update("edited");
        assert!(note.last_modified > stamp);
        assert_eq!(note.body, "edited");
    }

    #[test]
    fn test_apply_properties_does_not_touch_timestamp() {
        let mut note = Note::with_body("text");
        let stamp = note.last_modified;

        let mut props = Map::new();
        props.insert("position".into(), serde_json::json!([10, 20]));
        props.insert("locked".into(), Value::Bool(true));
        note.apply_properties(props.clone());

        assert_eq!(note.last_modified, stamp);
        assert_eq!(note.extract_properties(), props);
    }

    #[test]
    fn test_style_resolution_falls_back() {
        let mut doc = Document::default();
        let mut work = Category::default();
        work.name = "Work".into();
        work.shadow = 10.0;
        doc.categories.insert("work".into(), work);

        let mut note = Note::new();
        note.cat = "work".into();
        assert_eq!(doc.style_for(&note).name, "Work");

        // Unresolved reference uses the built-in fallback, never errors.
        note.cat = "gone".into();
        assert_eq!(doc.style_for(&note).shadow, fallback_shadow());

        // With a default registered, unresolved references use it.
        doc.properties.default_cat = "work".into();
        assert_eq!(doc.style_for(&note).name, "Work");
    }

    #[test]
    fn test_delete_category_reassigns_notes() {
        let mut doc = Document::default();
        doc.categories.insert("work".into(), Category::default());
        doc.categories.insert("home".into(), Category::default());
        doc.properties.default_cat = "home".into();

        let mut a = Note::with_body("a");
        a.cat = "work".into();
        let mut b = Note::with_body("b");
        b.cat = "home".into();
        doc.notes.push(a);
        doc.notes.push(b);

        assert_eq!(doc.delete_category("work"), 1);
        assert_eq!(doc.notes[0].cat, "");
        assert_eq!(doc.notes[1].cat, "home");
        assert!(!doc.categories.contains_key("work"));

        // Deleting the default clears the default_cat property too.
        assert_eq!(doc.delete_category("home"), 1);
        assert_eq!(doc.properties.default_cat, "");
        assert_eq!(doc.delete_category("home"), 0);
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let note = Note::with_body("x");
        let json = serde_json::to_string(&note).unwrap();
        let back: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_modified, note.last_modified);
        assert!(json.contains("last_modified"));
    }
}
