use crate::error::ApiError;

/// Maximum prompt/text length accepted by the API
const MAX_TEXT_LENGTH: usize = 5000;

/// Validate the prompt driving a chat request
pub fn validate_prompt(prompt: &str) -> Result<(), ApiError> {
    if prompt.is_empty() {
        return Err(ApiError::InvalidInput("Prompt cannot be empty".to_string()));
    }
    if prompt.len() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Prompt too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// Validate text for direct synthesis
pub fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// Validate a session id (clients use UUIDs)
pub fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    uuid::Uuid::parse_str(session_id)
        .map(|_| ())
        .map_err(|_| ApiError::InvalidInput(format!("Invalid session id: {}", session_id)))
}
