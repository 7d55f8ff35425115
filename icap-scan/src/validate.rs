//! Pre-flight file checks.
//!
//! [`validate`] runs before any connection is opened and never fails with an
//! [`crate::error::Error`]: a rejected file is an expected outcome reported
//! through [`ValidationResult`].
//!
//! Rules are applied in order and the first violation wins:
//!
//! 1. size must be in `(0, max_file_size]`
//! 2. filename length must not exceed `max_name_length`
//! 3. extension must be in the allow-list (case-insensitive)
//! 4. the stem must not contain an excluded substring
//!
//! With the default policy `.` is an excluded substring, so `a.b.pdf` is
//! rejected by rule 4.

use serde::Deserialize;

pub const MSG_OK: &str = "Validation succeeded";
pub const MSG_INVALID_NAME: &str = "Invalid file name";
pub const MSG_EXCLUDED: &str = "Invalid character in filename";

/// Limits a candidate file must satisfy before it is sent for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilePolicy {
    pub max_name_length: usize,
    pub max_file_size: u64,
    #[serde(deserialize_with = "crate::config::list_or_csv")]
    pub allowed_extensions: Vec<String>,
    #[serde(deserialize_with = "crate::config::list_or_csv")]
    pub excluded_substrings: Vec<String>,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            max_name_length: 255,
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: vec!["pdf".into(), "tif".into(), "rtf".into()],
            excluded_substrings: vec![".".into(), "/".into(), "\\".into()],
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_validated: bool,
    pub message: String,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            is_validated: true,
            message: MSG_OK.to_string(),
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            is_validated: false,
            message: message.into(),
        }
    }
}

/// Check `size` and `filename` against `policy`.
pub fn validate(size: u64, filename: &str, policy: &FilePolicy) -> ValidationResult {
    if size == 0 || size > policy.max_file_size {
        return ValidationResult::reject(format!(
            "The file size is greater than {} bytes",
            policy.max_file_size
        ));
    }

    if filename.chars().count() > policy.max_name_length {
        return ValidationResult::reject(format!(
            "The length of filename is greater than {}",
            policy.max_name_length
        ));
    }

    let Some((stem, ext)) = split_extension(filename) else {
        return ValidationResult::reject(MSG_INVALID_NAME);
    };

    if !policy
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    {
        return ValidationResult::reject(format!("Invalid filetype extension .{ext} in filename"));
    }

    if policy
        .excluded_substrings
        .iter()
        .any(|needle| !needle.is_empty() && stem.contains(needle.as_str()))
    {
        return ValidationResult::reject(MSG_EXCLUDED);
    }

    ValidationResult::ok()
}

/// Split `filename` at its last `.` into `(stem, extension)`.
///
/// Returns `None` for names with control characters or whose final path
/// component has no dot.
fn split_extension(filename: &str) -> Option<(&str, &str)> {
    if filename.chars().any(char::is_control) {
        return None;
    }
    let dot = filename.rfind('.')?;
    let last_sep = filename.rfind(['/', '\\']);
    if last_sep.is_some_and(|sep| sep > dot) {
        return None;
    }
    Some((&filename[..dot], &filename[dot + 1..]))
}
