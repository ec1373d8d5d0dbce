use std::fmt;

use serde::Serialize;

/// What happens to a referencing row when the row it points at is deleted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Delete the referencing row as well.
    Cascade,
    /// Keep the referencing row and clear its reference.
    SetNull,
}

impl OnDelete {
    /// The action as SQLite spells it in DDL and `PRAGMA foreign_key_list`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
        }
    }

    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "CASCADE" => Some(Self::Cascade),
            "SET NULL" => Some(Self::SetNull),
            _ => None,
        }
    }
}

/// A foreign key from `table.column` to `references.id`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Relation {
    pub table: &'static str,
    pub column: &'static str,
    pub references: &'static str,
    pub on_delete: OnDelete,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {} (ON DELETE {})",
            self.table,
            self.column,
            self.references,
            self.on_delete.as_sql()
        )
    }
}

const fn relation(
    table: &'static str,
    column: &'static str,
    references: &'static str,
    on_delete: OnDelete,
) -> Relation {
    Relation {
        table,
        column,
        references,
        on_delete,
    }
}

/// Every foreign key in the schema with its delete policy.
///
/// The migrations must declare exactly these; `Database::check_relations`
/// compares them against what SQLite reports.
pub const RELATIONS: &[Relation] = &[
    relation("notebooks", "user_id", "users", OnDelete::Cascade),
    relation("notes", "user_id", "users", OnDelete::Cascade),
    relation("notes", "notebook_id", "notebooks", OnDelete::SetNull),
    relation("tags", "user_id", "users", OnDelete::Cascade),
    relation("note_tags", "note_id", "notes", OnDelete::Cascade),
    relation("note_tags", "tag_id", "tags", OnDelete::Cascade),
    relation("note_versions", "note_id", "notes", OnDelete::Cascade),
    relation("note_shares", "note_id", "notes", OnDelete::Cascade),
    relation("note_shares", "user_id", "users", OnDelete::Cascade),
];

/// Relations whose parent is `table`, i.e. the rows affected when a row of
/// `table` is deleted.
pub fn relations_referencing(table: &str) -> impl Iterator<Item = &'static Relation> + '_ {
    RELATIONS.iter().filter(move |r| r.references == table)
}
