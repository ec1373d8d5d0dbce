//! Implementations of the `notekeep` subcommands.
//!
//! Command output goes to stdout; logging goes to stderr.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::{Map, Value};

use notekeep_core::db::Database;
use notekeep_core::models::*;

/// Record types whose JSON Schema can be printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Entity {
    User,
    Notebook,
    Note,
    Tag,
    NoteTag,
    NoteVersion,
    NoteShare,
}

impl Entity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Notebook => "notebook",
            Self::Note => "note",
            Self::Tag => "tag",
            Self::NoteTag => "note_tag",
            Self::NoteVersion => "note_version",
            Self::NoteShare => "note_share",
        }
    }

    fn json_schema(&self) -> schemars::Schema {
        match self {
            Self::User => schemars::schema_for!(User),
            Self::Notebook => schemars::schema_for!(Notebook),
            Self::Note => schemars::schema_for!(Note),
            Self::Tag => schemars::schema_for!(Tag),
            Self::NoteTag => schemars::schema_for!(NoteTag),
            Self::NoteVersion => schemars::schema_for!(NoteVersion),
            Self::NoteShare => schemars::schema_for!(NoteShare),
        }
    }
}

pub fn migrate(db: &Database) -> Result<()> {
    db.migrate().context("Failed to migrate database")?;
    println!("Database schema is up to date");
    Ok(())
}

pub fn check(db: &Database) -> Result<()> {
    db.migrate().context("Failed to migrate database")?;
    db.check_relations()?;

    let violations = db.foreign_key_violations()?;
    if violations > 0 {
        anyhow::bail!("{} row(s) reference missing parents", violations);
    }

    println!("OK: {} relations verified, no dangling references", RELATIONS.len());
    Ok(())
}

pub fn stats(db: &Database, json: bool) -> Result<()> {
    db.migrate().context("Failed to migrate database")?;
    let counts = db.table_counts()?;
    println!("{}", render_stats(&counts, json)?);
    Ok(())
}

fn render_stats(counts: &[(&'static str, i64)], json: bool) -> Result<String> {
    if json {
        let map: Map<String, Value> = counts
            .iter()
            .map(|(table, count)| (table.to_string(), Value::from(*count)))
            .collect();
        return Ok(serde_json::to_string_pretty(&map)?);
    }

    let width = counts.iter().map(|(table, _)| table.len()).max().unwrap_or(0);
    Ok(counts
        .iter()
        .map(|(table, count)| format!("{:<width$}  {}", table, count, width = width))
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn relations() {
    for relation in RELATIONS {
        println!("{}", relation);
    }
}

pub fn schema(entity: Option<Entity>) -> Result<()> {
    println!("{}", render_schema(entity)?);
    Ok(())
}

fn render_schema(entity: Option<Entity>) -> Result<String> {
    let value = match entity {
        Some(entity) => serde_json::to_value(entity.json_schema())?,
        None => {
            let mut all = Map::new();
            for entity in Entity::value_variants() {
                all.insert(
                    entity.name().to_string(),
                    serde_json::to_value(entity.json_schema())?,
                );
            }
            Value::Object(all)
        }
    };
    Ok(serde_json::to_string_pretty(&value)?)
}
