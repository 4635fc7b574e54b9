//! Prompt rendering for agent roles.
//!
//! Templates live either embedded in the binary (the default) or in a
//! user-supplied prompt directory. The directory is re-read on **every**
//! render, so template edits take effect on the next spawn or respawn
//! without a daemon restart.

use std::path::Path;

use tracing::debug;

use aether_protocol::Role;

const EMBEDDED_WORKER: &str = include_str!("templates/worker.md");
const EMBEDDED_PLANNER: &str = include_str!("templates/planner.md");

const LAND_SOLO: &str =
    "Merge your branch to the mainline branch directly. Do not open a pull request.";
const LAND_PR: &str =
    "Push your branch and open a pull request against the mainline branch. Do not merge it yourself.";

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("role '{role}' has no prompt template")]
    NoTemplateForRole { role: String },

    #[error("failed to read prompt template '{path}': {message}")]
    TemplateRead { path: String, message: String },

    #[error("rendered prompt still contains an unexpanded placeholder near '{snippet}'")]
    UnexpandedPlaceholder { snippet: String },
}

/// Produces the initial message text for a role given a work-item identifier.
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    /// Empty string means the embedded templates.
    prompt_dir: String,
    solo: bool,
}

impl PromptRenderer {
    pub fn new(prompt_dir: impl Into<String>, solo: bool) -> Self {
        Self {
            prompt_dir: prompt_dir.into(),
            solo,
        }
    }

    /// Render the initial prompt for `role` on `task_id`.
    pub fn render(&self, role: Role, task_id: &str) -> Result<String, PromptError> {
        let template = self.template_for(role)?;

        let land = if self.solo { LAND_SOLO } else { LAND_PR };
        let rendered = template
            .replace("{{task_id}}", task_id)
            .replace("{{land_instructions}}", land);

        if let Some(pos) = rendered.find("{{") {
            let snippet: String = rendered[pos..].chars().take(24).collect();
            return Err(PromptError::UnexpandedPlaceholder { snippet });
        }
        Ok(rendered)
    }

    fn template_for(&self, role: Role) -> Result<String, PromptError> {
        let (file_name, embedded) = match role {
            Role::Worker => ("worker.md", EMBEDDED_WORKER),
            Role::Planner => ("planner.md", EMBEDDED_PLANNER),
            Role::Spawn => {
                return Err(PromptError::NoTemplateForRole {
                    role: role.to_string(),
                });
            }
        };

        if self.prompt_dir.is_empty() {
            return Ok(embedded.to_string());
        }

        let path = Path::new(&self.prompt_dir).join(file_name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            // Only worker.md is required by config validation; a missing
            // planner template falls back to the embedded one.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && role == Role::Planner => {
                debug!(
                    event = "core.prompts.planner_fallback_embedded",
                    path = %path.display(),
                );
                Ok(embedded.to_string())
            }
            Err(e) => Err(PromptError::TemplateRead {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}
