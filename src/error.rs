//! Error types for intake-store
//!
//! Each gateway has its own error enum so callers can tell a recoverable
//! per-attachment failure apart from a per-record or infrastructure failure.

use thiserror::Error;

/// Attachment payload could not be decoded
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid attachment payload for {name}: {reason}")]
    Decode { name: String, reason: String },
}

/// Object store failures
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object already exists: {bucket}/{path}")]
    AlreadyExists { bucket: String, path: String },

    #[error("Upload failed for {bucket}/{path}: {reason}")]
    Upload {
        bucket: String,
        path: String,
        reason: String,
    },

    #[error("Delete failed for {bucket}/{path}: {reason}")]
    Delete {
        bucket: String,
        path: String,
        reason: String,
    },

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Object store timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record store failures
///
/// `Constraint` is a rejection of the row itself and will not succeed on retry;
/// `Unavailable` and `Timeout` are transient.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Constraint violation on {table}: {reason}")]
    Constraint { table: String, reason: String },

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record store timeout: {0}")]
    Timeout(String),

    #[error("Malformed row in {table}: {reason}")]
    Malformed { table: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecordStoreError {
    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Boundary validation failures for submissions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Submitter name must not be empty")]
    EmptySubmitter,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown field for {category}: {field}")]
    UnknownField { category: String, field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Too many attachments for {category}: {count} (max {max})")]
    TooManyAttachments {
        category: String,
        count: usize,
        max: usize,
    },

    #[error("Attachment {name} exceeds {max} bytes")]
    AttachmentTooLarge { name: String, max: u64 },

    #[error("Attachment {name} has unsupported type {mime_type}")]
    UnsupportedAttachment { name: String, mime_type: String },

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The staged listing itself could not be read; nothing was mutated.
    #[error("Infrastructure unavailable: {0}")]
    Infrastructure(#[source] RecordStoreError),

    #[error("Record store error: {0}")]
    RecordStore(#[from] RecordStoreError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}
