use crate::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to bind socket at '{path}': {message}")]
    SocketBind { path: String, message: String },

    #[error("failed to set socket permissions on '{path}': {source}")]
    SocketPermissions {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory '{path}': {source}")]
    DirCreate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session registry error: {source}")]
    Registry {
        #[from]
        source: RegistryError,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
