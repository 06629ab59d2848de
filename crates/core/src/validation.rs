//! Submission and registration validation.
//!
//! Pure checks shared by the HTTP surface and the provider socket; error
//! messages are part of the client contract.

use crate::error::CoreError;
use crate::task::TaskOptions;

/// Maximum length of a provider id.
const MAX_PROVIDER_ID_LEN: usize = 128;

/// Validate the pipeline selection of a task submission.
///
/// Rules:
/// - At least one pipeline must be present.
/// - A standard pipeline must carry a non-empty prompt.
/// - A comfy pipeline must carry non-empty pipeline data.
pub fn validate_task_options(options: &TaskOptions) -> Result<(), CoreError> {
    if options.standard_pipeline.is_none() && options.comfy_pipeline.is_none() {
        return Err(CoreError::Validation(
            "image pipeline is not specified".to_string(),
        ));
    }

    if let Some(standard) = &options.standard_pipeline {
        if standard.prompt.is_empty() {
            return Err(CoreError::Validation(
                "prompt length cannot be 0".to_string(),
            ));
        }
    }

    if let Some(comfy) = &options.comfy_pipeline {
        if comfy.pipeline_data.is_empty() {
            return Err(CoreError::Validation(
                "pipelineData cannot be null or undefined".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a provider id announced at registration.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_PROVIDER_ID_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_provider_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(
            "Provider id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_PROVIDER_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Provider id must not exceed {MAX_PROVIDER_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CoreError::Validation(
            "Provider id may contain only alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}
