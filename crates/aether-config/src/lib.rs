//! aether-config: configuration types, loading, validation.
//!
//! Configuration is resolved once, before daemon startup:
//! 1. **Hardcoded defaults** - built-in fallback values
//! 2. **User config** - `<user-config>/aetherflow/config.toml`
//! 3. **CLI arguments** - daemon flags (highest priority)
//!
//! The resolved [`DaemonConfig`] is validated exactly once; the daemon never
//! re-validates at use sites.

mod errors;
mod loading;
mod types;
mod validation;

pub use errors::ConfigError;
pub use loading::{load, CliOverrides, FileConfig};
pub use types::DaemonConfig;
pub use validation::{is_valid_project_name, validate_config};
