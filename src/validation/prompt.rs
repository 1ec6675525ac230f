use crate::error::{AppError, Result};
use crate::models::generation::Prompt;

/// Validates a prompt.
///
/// # Arguments
///
/// * `text` - The raw prompt text.
/// * `max_chars` - The maximum length in characters, after trimming.
///
/// # Returns
///
/// The trimmed [`Prompt`], or `InvalidInput`.
pub fn validate_prompt(text: &str, max_chars: usize) -> Result<Prompt> {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("Prompt cannot be empty".to_string()));
    }

    let length = trimmed.chars().count();
    if length > max_chars {
        return Err(AppError::InvalidInput(format!(
            "Prompt must be at most {} characters (got {})",
            max_chars, length
        )));
    }

    if trimmed.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(AppError::InvalidInput(
            "Prompt cannot contain control characters".to_string(),
        ));
    }

    Ok(Prompt::new_unchecked(trimmed.to_string()))
}
