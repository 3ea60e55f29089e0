//! Object path derivation
//!
//! Layout: `{submitter}/{category}/{item}/{prefix}_{index}_{timestamp}{ext}`.
//! Path segments are ASCII-only; the submitter segment carries a hash of the
//! raw name so names that sanitize to the same text stay apart.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::category::Category;
use crate::record_store::RecordId;
use crate::submission::Submitter;

const MAX_SEGMENT_LEN: usize = 50;
const MAX_TITLE_CHARS: usize = 30;

/// Reduce text to `[A-Za-z0-9_-]`, collapsing runs of replaced characters
pub fn sanitize_segment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let keep = c.is_ascii_alphanumeric() || c == '-' || c == '_';
        if keep {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let mut out: String = out.trim_matches('_').chars().take(MAX_SEGMENT_LEN).collect();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out
}

/// Folder name for a submitter
pub fn submitter_segment(submitter: &Submitter) -> String {
    let digest = Sha256::digest(submitter.as_str().as_bytes());
    let hash = &hex::encode(digest)[..8];
    let safe = sanitize_segment(submitter.as_str());
    if safe.is_empty() {
        format!("unit_{}", hash)
    } else {
        format!("{}_{}", safe, hash)
    }
}

/// Folder name for one staged item
pub fn item_segment(title: &str, staged_id: RecordId) -> String {
    let head: String = title.chars().take(MAX_TITLE_CHARS).collect();
    let safe = sanitize_segment(&head);
    if safe.is_empty() {
        format!("item-{}", staged_id)
    } else {
        format!("{}-{}", safe, staged_id)
    }
}

/// Lowercased extension of the original filename, including the dot
fn extension(original_name: &str) -> String {
    match original_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = sanitize_segment(ext).to_ascii_lowercase();
            if ext.is_empty() {
                String::new()
            } else {
                format!(".{}", ext)
            }
        }
        _ => String::new(),
    }
}

/// Millisecond-stamped filename: `{prefix}_{YYYYmmdd_HHMMSS_mmm}{ext}`
pub fn timestamped_filename(prefix: &str, original_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}{}",
        prefix,
        now.format("%Y%m%d_%H%M%S_%3f"),
        extension(original_name)
    )
}

/// Path of a record attachment
pub fn attachment_path(
    submitter: &Submitter,
    category: Category,
    title: &str,
    staged_id: RecordId,
    index: usize,
    original_name: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}/{}/{}",
        submitter_segment(submitter),
        category.slug(),
        item_segment(title, staged_id),
        timestamped_filename(&format!("{}_{}", category.slug(), index), original_name, now)
    )
}

/// Path of a new summary document version
pub fn document_path(submitter: &Submitter, original_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}",
        submitter_segment(submitter),
        Category::Summary.slug(),
        timestamped_filename("summary", original_name, now)
    )
}

/// Fixed path used by single-version document mode
pub fn single_document_path(submitter: &Submitter, original_name: &str) -> String {
    format!(
        "{}/{}/summary{}",
        submitter_segment(submitter),
        Category::Summary.slug(),
        extension(original_name)
    )
}
