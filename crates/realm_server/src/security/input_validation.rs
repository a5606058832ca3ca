//! Chat text validation.

use super::SecurityError;

/// Checks a say or whisper body and returns it trimmed.
///
/// Empty text, text over `max_length` bytes, NUL bytes and control
/// characters other than tab are refused.
pub fn validate_chat_message(message: &str, max_length: usize) -> Result<&str, SecurityError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(SecurityError::InvalidMessageFormat(
            "empty message".to_string(),
        ));
    }
    if trimmed.len() > max_length {
        return Err(SecurityError::MessageTooLarge(trimmed.len()));
    }
    if trimmed.contains('\0') {
        return Err(SecurityError::MaliciousContent);
    }
    if let Some(c) = trimmed.chars().find(|c| c.is_control() && *c != '\t') {
        return Err(SecurityError::InvalidMessageFormat(format!(
            "control character U+{:04X}",
            c as u32
        )));
    }
    Ok(trimmed)
}
