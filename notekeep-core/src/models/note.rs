use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The primary content unit.
///
/// A note always belongs to one user and optionally sits in one notebook.
/// Tags attach through [`super::NoteTag`] records.
///
/// # Soft deletion
/// `deleted_at` marks a note as trashed. The store keeps returning trashed
/// notes from every query; hiding or purging them is up to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Note {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Cleared automatically when the notebook is deleted.
    pub notebook_id: Option<Uuid>,
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    pub is_favorite: bool,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// How the note body is interpreted.
///
/// - `Text`: free-form text (the default)
/// - `Checklist`: one checklist item per line
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    #[default]
    Text,
    Checklist,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Checklist => "checklist",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "checklist" => Some(Self::Checklist),
            _ => None,
        }
    }
}

/// Input for creating a note. The owner is passed separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CreateNoteInput {
    /// Notebook to file the note in. `None` leaves it unfiled.
    pub notebook_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Defaults to `Text` if not specified.
    pub note_type: Option<NoteType>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_pinned: bool,
}

/// Input for updating a note. All fields are optional for partial updates.
///
/// Moving a note between notebooks goes through `Database::move_note`, which
/// can also clear the notebook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UpdateNoteInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub note_type: Option<NoteType>,
    pub is_favorite: Option<bool>,
    pub is_pinned: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_type_defaults_to_text() {
        assert_eq!(NoteType::default(), NoteType::Text);
        assert_eq!(NoteType::default().as_str(), "text");
    }

    #[test]
    fn test_note_type_rejects_unknown_values() {
        assert_eq!(NoteType::from_str("checklist"), Some(NoteType::Checklist));
        assert_eq!(NoteType::from_str("markdown"), None);
        assert_eq!(NoteType::from_str("Text"), None);
    }
}
