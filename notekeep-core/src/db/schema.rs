use rusqlite::Connection;

use crate::error::{Error, Result};

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: "002",
        name: "foreign_key_indexes",
        sql: include_str!("migrations/002_foreign_key_indexes.sql"),
    },
];

/// Tables created by the migrations, parents before children.
pub const TABLES: &[&str] = &[
    "users",
    "notebooks",
    "notes",
    "tags",
    "note_tags",
    "note_versions",
    "note_shares",
];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    let applied = get_applied_migrations(conn)?;

    for migration in MIGRATIONS {
        if !applied.iter().any(|v| v == migration.version) {
            apply_migration(conn, migration)?;
        }
    }

    Ok(())
}

pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(versions)
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    tracing::info!(
        "Applying migration {}: {}",
        migration.version,
        migration.name
    );

    let wrap = |source| Error::Migration {
        version: migration.version,
        name: migration.name,
        source,
    };

    let tx = conn.unchecked_transaction().map_err(wrap)?;
    tx.execute_batch(migration.sql).map_err(wrap)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
        (
            migration.version,
            migration.name,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(wrap)?;
    tx.commit().map_err(wrap)?;

    tracing::info!("Migration {} applied successfully", migration.version);
    Ok(())
}
