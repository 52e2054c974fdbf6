//! Path traversal, dangerous scheme, absolute path and flag-smuggling checks.
//!
//! These overlays run on every substituted value before any quote-context
//! rule, and on the raw value even when URL escaping is enabled downstream
//! (path escaping leaves `.` intact, so an escaped value can still traverse).

use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};

/// Plain traversal patterns. `..` must be standalone or slash-adjacent;
/// `...` and other dotted runs are legitimate.
fn contains_plain_traversal(value: &str) -> bool {
    value == ".."
        || value.contains("../")
        || value.contains("..\\")
        || value.contains("/..")
        || value.contains("\\..")
}

/// Encoded traversal fragments, scanned byte-wise and case-insensitively. Any
/// percent-encoding that assembles `..` is categorically hostile, embedded or
/// not.
fn contains_encoded_traversal(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    lowered.contains("%2e%2e") || lowered.contains("%2e.") || lowered.contains(".%2e")
}

/// Upper bound on percent-decode rounds. Values still mutating past this
/// depth are hostile by construction.
const MAX_DECODE_ROUNDS: usize = 8;

/// Detect traversal through every layer of percent-encoding.
///
/// A single unescape round misses nested payloads: `%25252e%25252e/` decodes
/// to `%252e%252e/`, which carries neither a literal `..` nor a `%2e`
/// fragment yet. Decoding therefore repeats until the value stops changing,
/// with the pattern scan applied at every layer; any round that surfaces a
/// fresh `%2e` is refused outright, as is a value that has not reached a
/// fixpoint within the round limit.
pub fn check_traversal(parameter: &str, value: &str) -> Result<()> {
    let traversal = || Error::PathTraversal {
        parameter: parameter.to_string(),
    };

    let mut current = value.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        if contains_plain_traversal(&current) || contains_encoded_traversal(&current) {
            return Err(traversal());
        }

        let decoded = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if decoded == current {
            return Ok(());
        }
        if decoded.to_ascii_lowercase().contains("%2e") {
            return Err(traversal());
        }
        current = decoded;
    }

    Err(traversal())
}

const DANGEROUS_SCHEMES: &[&str] = &["file:", "gopher:", "dict:", "ldap:", "tftp:", "expect:"];

/// Reject dangerous URL schemes. Inside a container the `file:` scheme is
/// permitted; the rest stay blocked everywhere.
pub fn check_scheme(parameter: &str, value: &str, in_container: bool) -> Result<()> {
    let lowered = value.trim_start().to_ascii_lowercase();
    for scheme in DANGEROUS_SCHEMES {
        if lowered.starts_with(scheme) {
            if in_container && *scheme == "file:" {
                continue;
            }
            return Err(Error::DangerousScheme {
                parameter: parameter.to_string(),
                scheme: scheme.trim_end_matches(':').to_string(),
            });
        }
    }
    Ok(())
}

/// Reject absolute paths outside container execution.
pub fn check_absolute_path(parameter: &str, value: &str, in_container: bool) -> Result<()> {
    if in_container {
        return Ok(());
    }
    let absolute = value.starts_with('/')
        || value.starts_with('\\')
        || is_windows_drive_path(value);
    if absolute {
        return Err(Error::AbsolutePath {
            parameter: parameter.to_string(),
        });
    }
    Ok(())
}

fn is_windows_drive_path(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Reject values that would smuggle a flag into the argv: a leading `-` that
/// is not a parseable signed number. Applied to the raw and the once-decoded
/// form.
pub fn check_flag_smuggling(parameter: &str, value: &str) -> Result<()> {
    for candidate in [value.to_string(), percent_decode_str(value).decode_utf8_lossy().to_string()] {
        if candidate.starts_with('-') && candidate.parse::<f64>().is_err() {
            return Err(Error::ArgumentInjection {
                parameter: parameter.to_string(),
                reason: "leading dash is not a signed number".into(),
            });
        }
    }
    Ok(())
}
