use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access to a note granted by its owner to another user.
///
/// At most one share exists per (note, user) pair. The permission is only
/// recorded here; enforcing it belongs to the request layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NoteShare {
    pub id: Uuid,
    pub note_id: Uuid,
    /// The grantee.
    pub user_id: Uuid,
    pub permission: SharePermission,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    Read,
    Write,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateNoteShareInput {
    /// The user receiving access.
    pub user_id: Uuid,
    pub permission: SharePermission,
}
