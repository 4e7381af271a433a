//! Error taxonomy shared by the core and the collaborator boundary.

use thiserror::Error;

use crate::auth::AuthError;

/// Result alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A note was saved without a title.
    #[error("Note title cannot be empty")]
    MissingTitle,

    /// Tag input contained tokens that do not normalize to a canonical tag.
    #[error("Invalid tags: {}", .0.join(", "))]
    InvalidTags(Vec<String>),

    /// A file was rejected before upload.
    #[error("File '{name}' rejected: {reason}")]
    InvalidFile { name: String, reason: String },

    /// An operation needed a signed-in user.
    #[error("You must be signed in to do that")]
    Unauthenticated,

    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// The note exists but belongs to someone else.
    #[error("Access denied: note {0} does not belong to you")]
    Forbidden(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// One of the uploads of a batch failed; `index` is its position in the batch.
    #[error("Upload of '{name}' (file {index}) failed: {message}")]
    Upload {
        index: usize,
        name: String,
        message: String,
    },

    #[error("A save is already in progress")]
    SaveInProgress,

    #[error("Markup error: {0}")]
    Markup(String),

    /// Failure inside a collaborator implementation (database, filesystem, ...).
    #[error("Backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl Error {
    /// Validation errors are surfaced inline by the form that produced them.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MissingTitle | Error::InvalidTags(_) | Error::InvalidFile { .. }
        )
    }

    /// Authorization errors end in a "not found" view.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Error::Unauthenticated | Error::NoteNotFound(_) | Error::Forbidden(_)
        )
    }
}
