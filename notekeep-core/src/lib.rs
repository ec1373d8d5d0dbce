//! Storage layer for notekeep: users, notebooks, notes, tags, note versions
//! and note shares in SQLite.
//!
//! ```no_run
//! use notekeep_core::db::Database;
//! use notekeep_core::models::CreateUserInput;
//!
//! let db = Database::open_memory()?;
//! db.migrate()?;
//! let user = db.create_user(CreateUserInput {
//!     username: "ada".to_string(),
//!     email: "ada@example.com".to_string(),
//!     first_name: String::new(),
//!     last_name: String::new(),
//!     bio: String::new(),
//!     profile_picture: None,
//! })?;
//! # let _ = user;
//! # Ok::<(), notekeep_core::Error>(())
//! ```

pub mod db;
pub mod error;
pub mod models;

pub use error::{ConstraintKind, ConstraintViolation, Error, Result};
