//! Attachment codec
//!
//! Staged records carry their attachments inline as base64 text so the
//! pending area needs nothing beyond the record store. Decoding is strict:
//! a payload that is not valid base64 is reported, never repaired.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CodecError;
use crate::submission::{Asset, EncodedAttachment};

/// Encode an asset for staging
pub fn encode(asset: &Asset) -> EncodedAttachment {
    EncodedAttachment {
        original_name: asset.original_name.clone(),
        mime_type: asset.mime_type.clone(),
        payload: STANDARD.encode(&asset.bytes),
    }
}

/// Decode a staged attachment back into bytes
pub fn decode(attachment: &EncodedAttachment) -> Result<Asset, CodecError> {
    let bytes = STANDARD
        .decode(attachment.payload.trim())
        .map_err(|e| CodecError::Decode {
            name: attachment.original_name.clone(),
            reason: e.to_string(),
        })?;

    Ok(Asset {
        original_name: attachment.original_name.clone(),
        mime_type: attachment.mime_type.clone(),
        bytes,
    })
}
