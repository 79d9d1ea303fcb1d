//! Internal helpers for input validation and normalization.
//!
//! These utilities are **not** part of the public API.

use unicode_normalization::UnicodeNormalization;

use crate::{EngineError, MoneyCents, ResultEngine};

/// Longest error message persisted on a state row.
const MAX_ERROR_LEN: usize = 500;

/// Trim a required user-provided text field, rejecting empty values.
pub(crate) fn normalize_required_text(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Configuration(format!(
            "{label} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn ensure_positive_amount(amount: MoneyCents) -> ResultEngine<()> {
    if !amount.is_positive() {
        return Err(EngineError::Configuration(
            "budget amount must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// Normalize a category label returned by the classifier: NFC, trimmed,
/// inner whitespace collapsed. Blank labels mean "no category".
pub(crate) fn normalize_category(label: &str) -> Option<String> {
    let composed: String = label.nfc().collect();
    let collapsed = composed.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Render an error for storage on a status row, bounded in length.
pub(crate) fn error_message(err: &EngineError) -> String {
    let message = err.to_string();
    if message.chars().count() <= MAX_ERROR_LEN {
        return message;
    }
    message.chars().take(MAX_ERROR_LEN).collect()
}
