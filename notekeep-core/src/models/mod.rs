//! Domain models for notekeep.
//!
//! # Ownership
//!
//! [`User`] is the root. Each [`Notebook`], [`Note`] and [`Tag`] belongs to
//! exactly one user. A note may sit in one notebook, but the notebook does not
//! own it: deleting the notebook leaves the note in place with no notebook.
//!
//! - [`NoteTag`]: association record linking a note to a tag.
//! - [`NoteVersion`]: immutable snapshot of a note's content, owned by the note.
//! - [`NoteShare`]: grant of [`SharePermission`] on a note to another user,
//!   at most one per (note, user) pair.
//!
//! The delete policy of every reference is listed in [`RELATIONS`].

mod note;
mod notebook;
mod relation;
mod share;
mod tag;
mod user;
mod version;

pub use note::*;
pub use notebook::*;
pub use relation::*;
pub use share::*;
pub use tag::*;
pub use user::*;
pub use version::*;
