//! Intake Store - staging and commit core for a member data-collection portal
//!
//! Member organizations ("submitters") compose records of several categories
//! (activities, competitions, awards, research projects, publications and an
//! annual summary document). Records are staged first and later committed,
//! at which point their attachments are materialized into object storage.
//!
//! ## Architecture
//!
//! - **Record store**: table-oriented rows scoped by submitter (`RecordDb`, SQLite)
//! - **Object store**: bucket/path blobs with public references (`FsObjectStore`)
//! - **Services**: staging, commit, committed records, summary documents
//!
//! ## Commit semantics
//!
//! Every staged record commits on its own. Attachment loss is tolerated,
//! record loss is not: a record whose permanent insert fails stays staged
//! and the commit reports `(committed, total)`.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/intake-store/
//! ├── records.db             # Staged and committed rows
//! ├── objects/
//! │   ├── images/            # Record attachments
//! │   └── documents/         # Summary document versions
//! └── config.toml            # Configuration
//! ```

pub mod category;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod object_store;
pub mod paths;
pub mod record_store;
pub mod services;
pub mod submission;

// Re-exports
pub use category::{AttachmentSlots, Category, CategorySchema, FieldKind, FieldSpec};
pub use config::Config;
pub use db::RecordDb;
pub use error::{CodecError, IntakeError, ObjectStoreError, RecordStoreError, ValidationError};
pub use object_store::{FsObjectStore, ObjectStore, PutMode};
pub use record_store::{RecordId, RecordStore};
pub use services::{
    CommitCoordinator, CommitReport, DocumentService, EventBus, IntakeEvent, RecordService, ServiceSettings,
    Services, StagingManager,
};
pub use submission::{
    Asset, CommittedRecord, ContactInfo, EncodedAttachment, FieldMap, StagedRecord, Submission, SubmissionLimits,
    Submitter,
};
