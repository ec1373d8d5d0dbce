mod schema;

pub use schema::TABLES;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;

const APP_NAME: &str = "notekeep";
const DATABASE_FILE: &str = "notekeep.db";

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, is_verified, is_active, profile_picture, bio, date_joined";
const NOTEBOOK_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const NOTE_COLUMNS: &str = "id, user_id, notebook_id, title, content, note_type, is_favorite, is_pinned, created_at, updated_at, deleted_at";
const TAG_COLUMNS: &str = "id, user_id, name, color";
const VERSION_COLUMNS: &str = "id, note_id, content, created_at";
const SHARE_COLUMNS: &str = "id, note_id, user_id, permission, created_at";

/// Location of the database when no path is configured.
pub fn default_database_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME).ok_or(Error::DataDirUnavailable)?;
    Ok(dirs.data_dir().join(DATABASE_FILE))
}

/// Handle to the note store. Clones share one connection.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        configure(&conn)?;
        tracing::debug!("Opened database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_database_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        schema::run_migrations(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Deletes one row by id inside a transaction, logging how many rows of
    /// each dependent table the delete policy is about to touch.
    fn delete_with_dependents(&self, table: &'static str, id: Uuid) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        log_dependents(&tx, table, id)?;
        let rows = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?", table),
            [id.to_string()],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }

    // ============================================================
    // User operations
    // ============================================================

    pub fn get_all_users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY username",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.find_user("id", id.to_string())
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user("email", normalize_email(email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_user("username", username.to_string())
    }

    fn find_user(&self, column: &'static str, value: String) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column),
                [value],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Registers a user. Fails with a unique constraint violation when the
    /// username or email is taken.
    pub fn create_user(&self, input: CreateUserInput) -> Result<User> {
        let conn = self.lock()?;
        let id = Uuid::new_v4();
        let now = now();
        let email = normalize_email(&input.email);

        conn.execute(
            "INSERT INTO users (id, username, email, first_name, last_name, is_verified, is_active, profile_picture, bio, date_joined)
             VALUES (?, ?, ?, ?, ?, 0, 1, ?, ?, ?)",
            (
                id.to_string(),
                &input.username,
                &email,
                &input.first_name,
                &input.last_name,
                &input.profile_picture,
                &input.bio,
                timestamp(now),
            ),
        )?;

        tracing::debug!("Created user {} ({})", input.username, id);

        Ok(User {
            id,
            username: input.username,
            email,
            first_name: input.first_name,
            last_name: input.last_name,
            is_verified: false,
            is_active: true,
            profile_picture: input.profile_picture,
            bio: input.bio,
            date_joined: now,
        })
    }

    pub fn update_user(&self, id: Uuid, input: UpdateUserInput) -> Result<Option<User>> {
        self.modify_user(id, |user| {
            if let Some(username) = input.username {
                user.username = username;
            }
            if let Some(email) = input.email {
                user.email = normalize_email(&email);
            }
            if let Some(first_name) = input.first_name {
                user.first_name = first_name;
            }
            if let Some(last_name) = input.last_name {
                user.last_name = last_name;
            }
            if let Some(bio) = input.bio {
                user.bio = bio;
            }
            if let Some(is_verified) = input.is_verified {
                user.is_verified = is_verified;
            }
            if let Some(is_active) = input.is_active {
                user.is_active = is_active;
            }
        })
    }

    /// Sets or clears the profile picture reference.
    pub fn set_profile_picture(&self, id: Uuid, picture: Option<String>) -> Result<Option<User>> {
        self.modify_user(id, |user| user.profile_picture = picture)
    }

    /// Reads, changes and writes back a user row under one lock and transaction.
    fn modify_user(&self, id: Uuid, change: impl FnOnce(&mut User)) -> Result<Option<User>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut user) = fetch_by_id(&tx, "users", USER_COLUMNS, id, user_from_row)? else {
            return Ok(None);
        };
        change(&mut user);

        let rows = tx.execute(
            "UPDATE users SET username = ?, email = ?, first_name = ?, last_name = ?, is_verified = ?,
                 is_active = ?, profile_picture = ?, bio = ?
             WHERE id = ?",
            (
                &user.username,
                &user.email,
                &user.first_name,
                &user.last_name,
                user.is_verified,
                user.is_active,
                &user.profile_picture,
                &user.bio,
                id.to_string(),
            ),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        tx.commit()?;
        Ok(Some(user))
    }

    /// Deletes a user together with everything they own: notebooks, notes
    /// (and through them versions, shares and tag links), tags, and shares
    /// granted to them.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.delete_with_dependents("users", id)
    }

    // ============================================================
    // Notebook operations
    // ============================================================

    pub fn get_notebook(&self, id: Uuid) -> Result<Option<Notebook>> {
        let conn = self.lock()?;
        fetch_by_id(&conn, "notebooks", NOTEBOOK_COLUMNS, id, notebook_from_row)
    }

    pub fn get_notebooks_by_user(&self, user_id: Uuid) -> Result<Vec<Notebook>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notebooks WHERE user_id = ? ORDER BY title",
            NOTEBOOK_COLUMNS
        ))?;
        let notebooks = stmt
            .query_map([user_id.to_string()], notebook_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notebooks)
    }

    pub fn create_notebook(&self, user_id: Uuid, input: CreateNotebookInput) -> Result<Notebook> {
        let conn = self.lock()?;
        let id = Uuid::new_v4();
        let now = now();

        conn.execute(
            "INSERT INTO notebooks (id, user_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                id.to_string(),
                user_id.to_string(),
                &input.title,
                timestamp(now),
                timestamp(now),
            ),
        )?;

        Ok(Notebook {
            id,
            user_id,
            title: input.title,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> Result<Option<Notebook>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut notebook) = fetch_by_id(&tx, "notebooks", NOTEBOOK_COLUMNS, id, notebook_from_row)?
        else {
            return Ok(None);
        };
        if let Some(title) = input.title {
            notebook.title = title;
        }
        notebook.updated_at = now();

        let rows = tx.execute(
            "UPDATE notebooks SET title = ?, updated_at = ? WHERE id = ?",
            (&notebook.title, timestamp(notebook.updated_at), id.to_string()),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        tx.commit()?;
        Ok(Some(notebook))
    }

    /// Deletes a notebook. Its notes survive with `notebook_id` cleared.
    pub fn delete_notebook(&self, id: Uuid) -> Result<bool> {
        self.delete_with_dependents("notebooks", id)
    }

    // ============================================================
    // Note operations
    // ============================================================

    pub fn get_note(&self, id: Uuid) -> Result<Option<Note>> {
        let conn = self.lock()?;
        fetch_by_id(&conn, "notes", NOTE_COLUMNS, id, note_from_row)
    }

    /// All notes owned by a user, trashed ones included. Pinned notes come
    /// first, then the most recently updated.
    pub fn get_notes_by_user(&self, user_id: Uuid) -> Result<Vec<Note>> {
        self.query_notes("user_id = ?", user_id)
    }

    pub fn get_notes_by_notebook(&self, notebook_id: Uuid) -> Result<Vec<Note>> {
        self.query_notes("notebook_id = ?", notebook_id)
    }

    pub fn get_notes_by_tag(&self, tag_id: Uuid) -> Result<Vec<Note>> {
        self.query_notes(
            "id IN (SELECT note_id FROM note_tags WHERE tag_id = ?)",
            tag_id,
        )
    }

    fn query_notes(&self, filter: &str, id: Uuid) -> Result<Vec<Note>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notes WHERE {} ORDER BY is_pinned DESC, updated_at DESC, title",
            NOTE_COLUMNS, filter
        ))?;
        let notes = stmt
            .query_map([id.to_string()], note_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Creates a note owned by `user_id`. A `notebook_id` that does not exist
    /// fails with a foreign key violation.
    pub fn create_note(&self, user_id: Uuid, input: CreateNoteInput) -> Result<Note> {
        let conn = self.lock()?;
        let id = Uuid::new_v4();
        let now = now();
        let note_type = input.note_type.unwrap_or_default();

        conn.execute(
            "INSERT INTO notes (id, user_id, notebook_id, title, content, note_type, is_favorite, is_pinned, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                user_id.to_string(),
                input.notebook_id.map(|u| u.to_string()),
                &input.title,
                &input.content,
                note_type.as_str(),
                input.is_favorite,
                input.is_pinned,
                timestamp(now),
                timestamp(now),
            ),
        )?;

        Ok(Note {
            id,
            user_id,
            notebook_id: input.notebook_id,
            title: input.title,
            content: input.content,
            note_type,
            is_favorite: input.is_favorite,
            is_pinned: input.is_pinned,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> Result<Option<Note>> {
        self.modify_note(id, |note| {
            if let Some(title) = input.title {
                note.title = title;
            }
            if let Some(content) = input.content {
                note.content = content;
            }
            if let Some(note_type) = input.note_type {
                note.note_type = note_type;
            }
            if let Some(is_favorite) = input.is_favorite {
                note.is_favorite = is_favorite;
            }
            if let Some(is_pinned) = input.is_pinned {
                note.is_pinned = is_pinned;
            }
        })
    }

    /// Files the note in `notebook_id`, or takes it out of any notebook with `None`.
    pub fn move_note(&self, id: Uuid, notebook_id: Option<Uuid>) -> Result<Option<Note>> {
        self.modify_note(id, |note| note.notebook_id = notebook_id)
    }

    /// Marks a note as trashed. Trashing an already trashed note keeps the
    /// original `deleted_at`.
    pub fn soft_delete_note(&self, id: Uuid) -> Result<Option<Note>> {
        let deleted_at = now();
        self.modify_note(id, |note| {
            note.deleted_at.get_or_insert(deleted_at);
        })
    }

    pub fn restore_note(&self, id: Uuid) -> Result<Option<Note>> {
        self.modify_note(id, |note| note.deleted_at = None)
    }

    /// Reads, changes and writes back a note row under one lock and
    /// transaction, refreshing `updated_at`.
    fn modify_note(&self, id: Uuid, change: impl FnOnce(&mut Note)) -> Result<Option<Note>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut note) = fetch_by_id(&tx, "notes", NOTE_COLUMNS, id, note_from_row)? else {
            return Ok(None);
        };
        change(&mut note);
        note.updated_at = now();

        let rows = tx.execute(
            "UPDATE notes SET notebook_id = ?, title = ?, content = ?, note_type = ?, is_favorite = ?,
                 is_pinned = ?, updated_at = ?, deleted_at = ?
             WHERE id = ?",
            (
                note.notebook_id.map(|u| u.to_string()),
                &note.title,
                &note.content,
                note.note_type.as_str(),
                note.is_favorite,
                note.is_pinned,
                timestamp(note.updated_at),
                note.deleted_at.map(timestamp),
                id.to_string(),
            ),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        tx.commit()?;
        Ok(Some(note))
    }

    /// Permanently deletes a note with its versions, shares and tag links.
    pub fn delete_note(&self, id: Uuid) -> Result<bool> {
        self.delete_with_dependents("notes", id)
    }

    // ============================================================
    // Tag operations
    // ============================================================

    pub fn get_tag(&self, id: Uuid) -> Result<Option<Tag>> {
        let conn = self.lock()?;
        fetch_by_id(&conn, "tags", TAG_COLUMNS, id, tag_from_row)
    }

    pub fn get_tags_by_user(&self, user_id: Uuid) -> Result<Vec<Tag>> {
        self.query_tags("user_id = ?", user_id)
    }

    pub fn get_note_tags(&self, note_id: Uuid) -> Result<Vec<Tag>> {
        self.query_tags(
            "id IN (SELECT tag_id FROM note_tags WHERE note_id = ?)",
            note_id,
        )
    }

    fn query_tags(&self, filter: &str, id: Uuid) -> Result<Vec<Tag>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tags WHERE {} ORDER BY name, color",
            TAG_COLUMNS, filter
        ))?;
        let tags = stmt
            .query_map([id.to_string()], tag_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn create_tag(&self, user_id: Uuid, input: CreateTagInput) -> Result<Tag> {
        let conn = self.lock()?;
        let id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO tags (id, user_id, name, color) VALUES (?, ?, ?, ?)",
            (id.to_string(), user_id.to_string(), &input.name, &input.color),
        )?;

        Ok(Tag {
            id,
            user_id,
            name: input.name,
            color: input.color,
        })
    }

    pub fn update_tag(&self, id: Uuid, input: UpdateTagInput) -> Result<Option<Tag>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut tag) = fetch_by_id(&tx, "tags", TAG_COLUMNS, id, tag_from_row)? else {
            return Ok(None);
        };
        if let Some(name) = input.name {
            tag.name = name;
        }
        if let Some(color) = input.color {
            tag.color = color;
        }

        let rows = tx.execute(
            "UPDATE tags SET name = ?, color = ? WHERE id = ?",
            (&tag.name, &tag.color, id.to_string()),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        tx.commit()?;
        Ok(Some(tag))
    }

    /// Deletes a tag and detaches it from every note. The notes are kept.
    pub fn delete_tag(&self, id: Uuid) -> Result<bool> {
        self.delete_with_dependents("tags", id)
    }

    /// Attaches a tag to a note. Returns `false` if it was already attached.
    pub fn add_tag_to_note(&self, note_id: Uuid, tag_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?, ?)",
            (note_id.to_string(), tag_id.to_string()),
        )?;
        Ok(rows > 0)
    }

    pub fn remove_tag_from_note(&self, note_id: Uuid, tag_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM note_tags WHERE note_id = ? AND tag_id = ?",
            (note_id.to_string(), tag_id.to_string()),
        )?;
        Ok(rows > 0)
    }

    /// Replaces the note's whole tag set. Either every link is written or,
    /// on error, the previous set is left untouched.
    pub fn set_note_tags(&self, note_id: Uuid, tag_ids: &[Uuid]) -> Result<Vec<NoteTag>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM note_tags WHERE note_id = ?",
            [note_id.to_string()],
        )?;

        let mut links = Vec::with_capacity(tag_ids.len());
        for &tag_id in tag_ids {
            let rows = tx.execute(
                "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?, ?)",
                (note_id.to_string(), tag_id.to_string()),
            )?;
            if rows > 0 {
                links.push(NoteTag { note_id, tag_id });
            }
        }

        tx.commit()?;
        Ok(links)
    }

    // ============================================================
    // Note version operations
    // ============================================================

    pub fn get_note_version(&self, id: Uuid) -> Result<Option<NoteVersion>> {
        let conn = self.lock()?;
        fetch_by_id(&conn, "note_versions", VERSION_COLUMNS, id, version_from_row)
    }

    /// Versions of a note, newest first.
    pub fn get_note_versions(&self, note_id: Uuid) -> Result<Vec<NoteVersion>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM note_versions WHERE note_id = ? ORDER BY created_at DESC, rowid DESC",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map([note_id.to_string()], version_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    pub fn create_note_version(
        &self,
        note_id: Uuid,
        input: CreateNoteVersionInput,
    ) -> Result<NoteVersion> {
        let conn = self.lock()?;
        insert_version(&conn, note_id, input.content)
    }

    /// Stores the note's current content as a new version.
    pub fn snapshot_note(&self, note_id: Uuid) -> Result<Option<NoteVersion>> {
        let conn = self.lock()?;
        let content: Option<String> = conn
            .query_row(
                "SELECT content FROM notes WHERE id = ?",
                [note_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match content {
            Some(content) => insert_version(&conn, note_id, content).map(Some),
            None => Ok(None),
        }
    }

    // ============================================================
    // Note share operations
    // ============================================================

    pub fn get_note_share(&self, id: Uuid) -> Result<Option<NoteShare>> {
        let conn = self.lock()?;
        fetch_by_id(&conn, "note_shares", SHARE_COLUMNS, id, share_from_row)
    }

    pub fn get_note_shares(&self, note_id: Uuid) -> Result<Vec<NoteShare>> {
        self.query_shares("note_id = ?", note_id)
    }

    /// Shares granted to a user on other users' notes.
    pub fn get_shares_for_user(&self, user_id: Uuid) -> Result<Vec<NoteShare>> {
        self.query_shares("user_id = ?", user_id)
    }

    fn query_shares(&self, filter: &str, id: Uuid) -> Result<Vec<NoteShare>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM note_shares WHERE {} ORDER BY created_at, rowid",
            SHARE_COLUMNS, filter
        ))?;
        let shares = stmt
            .query_map([id.to_string()], share_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(shares)
    }

    /// Grants `input.user_id` access to a note. A second share for the same
    /// (note, user) pair fails with a unique constraint violation whatever the
    /// permission; use [`Database::update_share_permission`] to change it.
    pub fn share_note(&self, note_id: Uuid, input: CreateNoteShareInput) -> Result<NoteShare> {
        let conn = self.lock()?;
        let id = Uuid::new_v4();
        let now = now();

        conn.execute(
            "INSERT INTO note_shares (id, note_id, user_id, permission, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                id.to_string(),
                note_id.to_string(),
                input.user_id.to_string(),
                input.permission.as_str(),
                timestamp(now),
            ),
        )?;

        tracing::debug!(
            "Shared note {} with user {} ({})",
            note_id,
            input.user_id,
            input.permission.as_str()
        );

        Ok(NoteShare {
            id,
            note_id,
            user_id: input.user_id,
            permission: input.permission,
            created_at: now,
        })
    }

    pub fn update_share_permission(
        &self,
        id: Uuid,
        permission: SharePermission,
    ) -> Result<Option<NoteShare>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut share) = fetch_by_id(&tx, "note_shares", SHARE_COLUMNS, id, share_from_row)?
        else {
            return Ok(None);
        };
        share.permission = permission;

        let rows = tx.execute(
            "UPDATE note_shares SET permission = ? WHERE id = ?",
            (permission.as_str(), id.to_string()),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        tx.commit()?;
        Ok(Some(share))
    }

    pub fn delete_note_share(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM note_shares WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Integrity
    // ============================================================

    /// Compares the foreign keys SQLite reports against [`RELATIONS`].
    ///
    /// Fails with [`Error::RelationDrift`] listing every relation that is
    /// missing, unexpected, or declared with a different delete policy.
    pub fn check_relations(&self) -> Result<()> {
        let conn = self.lock()?;
        let mut live = Vec::new();

        for table in TABLES {
            let mut stmt = conn.prepare(
                "SELECT \"table\", \"from\", on_delete FROM pragma_foreign_key_list(?)",
            )?;
            let keys = stmt
                .query_map([table], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            live.extend(
                keys.into_iter()
                    .map(|(parent, column, on_delete)| (*table, column, parent, on_delete)),
            );
        }

        let mut problems = Vec::new();

        for relation in RELATIONS {
            let found = live.iter().find(|(table, column, parent, _)| {
                *table == relation.table && column == relation.column && parent == relation.references
            });
            match found {
                None => problems.push(format!("missing {}", relation)),
                Some((_, _, _, on_delete)) => {
                    if OnDelete::from_sql(on_delete) != Some(relation.on_delete) {
                        problems.push(format!("{} is declared ON DELETE {}", relation, on_delete));
                    }
                }
            }
        }

        for (table, column, parent, on_delete) in &live {
            let known = RELATIONS.iter().any(|r| {
                r.table == *table && r.column == column && r.references == parent
            });
            if !known {
                problems.push(format!(
                    "unexpected {}.{} -> {} (ON DELETE {})",
                    table, column, parent, on_delete
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::RelationDrift(problems.join("; ")))
        }
    }

    /// Number of rows whose foreign keys point at missing parents.
    pub fn foreign_key_violations(&self) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while rows.next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Row count of every schema table, in [`TABLES`] order.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let conn = self.lock()?;
        TABLES
            .iter()
            .map(|table| -> Result<(&'static str, i64)> {
                let count = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |row| row.get(0),
                )?;
                Ok((*table, count))
            })
            .collect()
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn fetch_by_id<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    id: Uuid,
    from_row: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE id = ?", columns, table),
            [id.to_string()],
            from_row,
        )
        .optional()?;
    Ok(record)
}

fn insert_version(conn: &Connection, note_id: Uuid, content: String) -> Result<NoteVersion> {
    let id = Uuid::new_v4();
    let now = now();

    conn.execute(
        "INSERT INTO note_versions (id, note_id, content, created_at) VALUES (?, ?, ?, ?)",
        (id.to_string(), note_id.to_string(), &content, timestamp(now)),
    )?;

    Ok(NoteVersion {
        id,
        note_id,
        content,
        created_at: now,
    })
}

fn log_dependents(tx: &Transaction<'_>, table: &str, id: Uuid) -> Result<()> {
    for relation in relations_referencing(table) {
        let count: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?",
                relation.table, relation.column
            ),
            [id.to_string()],
            |row| row.get(0),
        )?;
        if count > 0 {
            tracing::debug!(
                "Deleting {} {}: {} row(s) in {}.{} ({})",
                table,
                id,
                count,
                relation.table,
                relation.column,
                relation.on_delete.as_sql()
            );
        }
    }
    Ok(())
}

// Stored timestamps have microsecond precision, so values handed back to
// callers are truncated to match what a later read returns.
fn now() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Stored values that fail to parse surface as conversion errors rather than
// being replaced with placeholders.
fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let value: String = row.get(idx)?;
    Uuid::parse_str(&value).map_err(|e| conversion_error(idx, e))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(value) => Uuid::parse_str(&value).map(Some).map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn parse_datetime(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_datetime(idx, &value)
}

fn get_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|value| parse_datetime(idx, &value))
        .transpose()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: get_uuid(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        is_verified: row.get(5)?,
        is_active: row.get(6)?,
        profile_picture: row.get(7)?,
        bio: row.get(8)?,
        date_joined: get_datetime(row, 9)?,
    })
}

fn notebook_from_row(row: &Row<'_>) -> rusqlite::Result<Notebook> {
    Ok(Notebook {
        id: get_uuid(row, 0)?,
        user_id: get_uuid(row, 1)?,
        title: row.get(2)?,
        created_at: get_datetime(row, 3)?,
        updated_at: get_datetime(row, 4)?,
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let note_type: String = row.get(5)?;
    Ok(Note {
        id: get_uuid(row, 0)?,
        user_id: get_uuid(row, 1)?,
        notebook_id: get_opt_uuid(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        note_type: NoteType::from_str(&note_type)
            .ok_or_else(|| conversion_error(5, format!("unknown note type {:?}", note_type)))?,
        is_favorite: row.get(6)?,
        is_pinned: row.get(7)?,
        created_at: get_datetime(row, 8)?,
        updated_at: get_datetime(row, 9)?,
        deleted_at: get_opt_datetime(row, 10)?,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: get_uuid(row, 0)?,
        user_id: get_uuid(row, 1)?,
        name: row.get(2)?,
        color: row.get(3)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<NoteVersion> {
    Ok(NoteVersion {
        id: get_uuid(row, 0)?,
        note_id: get_uuid(row, 1)?,
        content: row.get(2)?,
        created_at: get_datetime(row, 3)?,
    })
}

fn share_from_row(row: &Row<'_>) -> rusqlite::Result<NoteShare> {
    let permission: String = row.get(3)?;
    Ok(NoteShare {
        id: get_uuid(row, 0)?,
        note_id: get_uuid(row, 1)?,
        user_id: get_uuid(row, 2)?,
        permission: SharePermission::from_str(&permission)
            .ok_or_else(|| conversion_error(3, format!("unknown permission {:?}", permission)))?,
        created_at: get_datetime(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConstraintKind;

    fn migrated() -> Database {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn seed_note(db: &Database) -> Note {
        let user = db
            .create_user(CreateUserInput {
                username: "owner".to_string(),
                email: "owner@x.com".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                bio: String::new(),
                profile_picture: None,
            })
            .unwrap();
        db.create_note(
            user.id,
            CreateNoteInput {
                title: "Groceries".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_foreign_keys_are_enforced_on_open() {
        let db = Database::open_memory().unwrap();
        let conn = db.lock().unwrap();
        let enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_file_database_uses_wal_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.db");

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();

        assert!(path.exists());
        let conn = db.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_raw_note_type_outside_enumeration_is_rejected() {
        let db = migrated();
        let note = seed_note(&db);

        let conn = db.lock().unwrap();
        let err: Error = conn
            .execute(
                "UPDATE notes SET note_type = 'markdown' WHERE id = ?",
                [note.id.to_string()],
            )
            .unwrap_err()
            .into();

        assert_eq!(err.constraint().unwrap().kind, ConstraintKind::Check);
    }

    #[test]
    fn test_raw_share_permission_outside_enumeration_is_rejected() {
        let db = migrated();
        let note = seed_note(&db);

        let conn = db.lock().unwrap();
        let err: Error = conn
            .execute(
                "INSERT INTO note_shares (id, note_id, user_id, permission, created_at)
                 VALUES ('s1', ?1, (SELECT user_id FROM notes WHERE id = ?1), 'admin', '2026-01-01T00:00:00Z')",
                [note.id.to_string()],
            )
            .unwrap_err()
            .into();

        assert_eq!(err.constraint().unwrap().kind, ConstraintKind::Check);
    }

    #[test]
    fn test_check_relations_passes_on_migrated_db() {
        let db = migrated();
        db.check_relations().unwrap();
        assert_eq!(db.foreign_key_violations().unwrap(), 0);
    }

    #[test]
    fn test_check_relations_reports_policy_drift() {
        let db = migrated();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "DROP TABLE note_shares;
                 CREATE TABLE note_shares (
                     id TEXT PRIMARY KEY,
                     note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                     user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                     permission TEXT NOT NULL,
                     created_at TEXT NOT NULL
                 );",
            )
            .unwrap();
        }

        let err = db.check_relations().unwrap_err();
        match err {
            Error::RelationDrift(message) => {
                assert!(message.contains("note_shares.user_id"));
                assert!(message.contains("SET NULL"));
            }
            other => panic!("expected relation drift, got {:?}", other),
        }
    }

    #[test]
    fn test_check_relations_reports_missing_relation() {
        let db = migrated();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "DROP TABLE note_versions;
                 CREATE TABLE note_versions (id TEXT PRIMARY KEY, note_id TEXT NOT NULL, content TEXT NOT NULL, created_at TEXT NOT NULL);",
            )
            .unwrap();
        }

        let err = db.check_relations().unwrap_err();
        assert!(err.to_string().contains("missing note_versions.note_id"));
    }

    #[test]
    fn test_table_counts_cover_every_table() {
        let db = migrated();
        seed_note(&db);

        let counts = db.table_counts().unwrap();
        assert_eq!(counts.len(), TABLES.len());
        assert!(counts.contains(&("users", 1)));
        assert!(counts.contains(&("notes", 1)));
        assert!(counts.contains(&("note_shares", 0)));
    }

    #[test]
    fn test_corrupt_id_is_a_conversion_error() {
        let db = migrated();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO users (id, username, email, date_joined)
                 VALUES ('not-a-uuid', 'broken', 'broken@x.com', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        }

        let err = db.get_all_users().unwrap_err();
        assert!(matches!(
            err,
            Error::Database(rusqlite::Error::FromSqlConversionFailure(0, Type::Text, _))
        ));
    }

    #[test]
    fn test_corrupt_timestamp_is_a_conversion_error() {
        let db = migrated();
        let note = seed_note(&db);
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE notes SET updated_at = 'last tuesday' WHERE id = ?",
                [note.id.to_string()],
            )
            .unwrap();
        }

        let err = db.get_note(note.id).unwrap_err();
        assert!(matches!(
            err,
            Error::Database(rusqlite::Error::FromSqlConversionFailure(9, Type::Text, _))
        ));
        assert!(db.update_note(note.id, UpdateNoteInput::default()).is_err());
    }

    #[test]
    fn test_modify_refreshes_a_stale_updated_at() {
        let db = migrated();
        let note = seed_note(&db);
        let stale = "2000-01-01T00:00:00.000000Z";
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE notes SET updated_at = ? WHERE id = ?",
                (stale, note.id.to_string()),
            )
            .unwrap();
        }

        let moved = db.move_note(note.id, None).unwrap().unwrap();
        assert!(timestamp(moved.updated_at).as_str() > stale);
        assert_eq!(db.get_note(note.id).unwrap().unwrap(), moved);
    }

    #[test]
    fn test_stored_timestamps_round_trip_exactly() {
        let db = migrated();
        let note = seed_note(&db);
        let fetched = db.get_note(note.id).unwrap().unwrap();
        assert_eq!(fetched, note);
    }
}
