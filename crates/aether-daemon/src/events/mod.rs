//! Session event plane: the per-session ring buffer and the claim protocol
//! that binds a freshly-created session to the agent that produced it.

pub mod buffer;
pub mod claim;

pub use buffer::{DEFAULT_CAPACITY, EventBuffer, SessionEvent};
pub use claim::{ClaimContext, handle_session_created};
