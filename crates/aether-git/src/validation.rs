use crate::GitError;

/// Validate a value about to be passed to the git CLI as a positional
/// argument.
///
/// Rejects values that could be interpreted as flags, carry control
/// characters, or smuggle a refspec separator.
pub fn validate_git_arg(value: &str, context: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidArgument {
            context: context.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidArgument {
            context: context.to_string(),
            reason: "must not start with '-'".to_string(),
        });
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(GitError::InvalidArgument {
            context: context.to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }
    if value.contains("::") {
        return Err(GitError::InvalidArgument {
            context: context.to_string(),
            reason: "must not contain '::'".to_string(),
        });
    }
    Ok(())
}
