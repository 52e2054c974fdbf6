//! Content-hash verification of tool definitions.
//!
//! The digest covers the canonical serialization of the definition with the
//! `integrity` field nulled out, so the attached hash never feeds back into
//! itself. Canonical form is the JSON encoding with object keys in sorted
//! order (`serde_json`'s default map ordering).

use sha2::{Digest, Sha256};

use crate::definition::ToolDefinition;
use crate::error::{Error, Result};

/// The only accepted digest algorithm.
pub const SHA256: &str = "sha256";

/// Compute the canonical SHA-256 digest of a definition, ignoring any
/// attached `integrity` block.
pub fn compute_digest(definition: &ToolDefinition) -> Result<String> {
    let mut scrubbed = definition.clone();
    scrubbed.integrity = None;

    // Round-trip through Value so object keys serialize in sorted order
    // regardless of struct field declaration order.
    let canonical = serde_json::to_value(&scrubbed)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|err| Error::InitializationFailed {
            name: definition.qualified_name(),
            reason: format!("canonical serialization failed: {err}"),
        })?;

    let digest = Sha256::digest(&canonical);
    Ok(hex_encode(&digest))
}

/// Verify the attached integrity block, if any. A missing block means no
/// verification is required.
pub fn verify(definition: &ToolDefinition) -> Result<()> {
    let Some(spec) = &definition.integrity else {
        return Ok(());
    };

    if spec.algorithm != SHA256 {
        return Err(Error::UnsupportedIntegrityAlgorithm {
            algorithm: spec.algorithm.clone(),
        });
    }

    let computed = compute_digest(definition)?;
    if !computed.eq_ignore_ascii_case(&spec.hash) {
        return Err(Error::IntegrityFailed {
            name: definition.qualified_name(),
            expected: spec.hash.clone(),
            computed,
        });
    }

    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
