//! Submission data model
//!
//! `Submission` is the validated boundary type: field maps are checked against
//! the category schema here, so the staging manager never sees an item that
//! violates its category's field or attachment limits.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::{AttachmentSlots, Category};
use crate::config::Config;
use crate::error::ValidationError;
use crate::record_store::RecordId;

/// Scalar fields of a record, keyed by schema field name
pub type FieldMap = BTreeMap<String, String>;

/// Organization name partitioning all data
///
/// Used verbatim: two spellings of the same organization are two submitters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Submitter(String);

impl Submitter {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptySubmitter);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uploaded binary with its client-side name and type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    pub fn new(original_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Attachment held inside a staged record as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAttachment {
    pub original_name: String,
    pub mime_type: String,
    /// Base64 of the attachment bytes
    pub payload: String,
}

/// Item waiting in the pending area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRecord {
    pub id: RecordId,
    pub submitter: Submitter,
    pub category: Category,
    pub fields: FieldMap,
    pub attachments: Vec<EncodedAttachment>,
    pub staged_at: DateTime<Utc>,
}

impl StagedRecord {
    /// Value of the category's identifying field
    pub fn title(&self) -> &str {
        self.fields
            .get(self.category.schema().title_field)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Item in the permanent store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedRecord {
    pub id: RecordId,
    pub submitter: Submitter,
    pub category: Category,
    pub fields: FieldMap,
    pub attachment_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Limits applied on top of the category schema
#[derive(Debug, Clone, Copy)]
pub struct SubmissionLimits {
    pub max_images: usize,
    /// 0 = unlimited
    pub max_attachment_bytes: u64,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SubmissionLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_images: config.max_images_per_record,
            max_attachment_bytes: config.max_attachment_bytes,
        }
    }
}

/// Validated item ready to stage
#[derive(Debug, Clone)]
pub struct Submission {
    category: Category,
    fields: FieldMap,
    assets: Vec<Asset>,
}

impl Submission {
    /// Validate fields and attachments against the category schema
    pub fn new(
        category: Category,
        fields: FieldMap,
        assets: Vec<Asset>,
        limits: &SubmissionLimits,
    ) -> Result<Self, ValidationError> {
        let schema = category.schema();

        for name in fields.keys() {
            if schema.field(name).is_none() {
                return Err(ValidationError::UnknownField {
                    category: category.to_string(),
                    field: name.clone(),
                });
            }
        }

        for spec in schema.fields {
            match fields.get(spec.name).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => spec.check(value)?,
                _ if spec.required => {
                    return Err(ValidationError::MissingField(spec.name.to_string()))
                }
                _ => {}
            }
        }

        let max = match schema.attachments {
            AttachmentSlots::Images { max } => max.min(limits.max_images),
            slots => slots.max(),
        };
        if assets.len() > max {
            return Err(ValidationError::TooManyAttachments {
                category: category.to_string(),
                count: assets.len(),
                max,
            });
        }
        if schema.attachments.is_document() && assets.is_empty() {
            return Err(ValidationError::MissingField("document".to_string()));
        }

        for asset in &assets {
            if !schema.attachments.accepts(&asset.mime_type) {
                return Err(ValidationError::UnsupportedAttachment {
                    name: asset.original_name.clone(),
                    mime_type: asset.mime_type.clone(),
                });
            }
            if limits.max_attachment_bytes > 0
                && asset.bytes.len() as u64 > limits.max_attachment_bytes
            {
                return Err(ValidationError::AttachmentTooLarge {
                    name: asset.original_name.clone(),
                    max: limits.max_attachment_bytes,
                });
            }
        }

        Ok(Self {
            category,
            fields,
            assets,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn into_parts(self) -> (Category, FieldMap, Vec<Asset>) {
        (self.category, self.fields, self.assets)
    }
}

/// Contact details recorded with a submitter's annual summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub person: String,
    /// Eleven digits, separators removed
    pub phone: String,
}

impl ContactInfo {
    pub fn new(person: impl Into<String>, phone: &str) -> Result<Self, ValidationError> {
        let person = person.into();
        if person.trim().is_empty() {
            return Err(ValidationError::MissingField("contact_person".to_string()));
        }
        Ok(Self {
            person,
            phone: normalize_phone(phone)?,
        })
    }
}

/// Strip spaces and hyphens, then require exactly 11 digits
pub fn normalize_phone(phone: &str) -> Result<String, ValidationError> {
    let digits: String = phone.chars().filter(|c| *c != ' ' && *c != '-').collect();
    if digits.len() == 11 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(digits)
    } else {
        Err(ValidationError::InvalidPhone(phone.to_string()))
    }
}
