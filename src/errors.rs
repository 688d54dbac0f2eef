//! Error hierarchy of the client-side socket registry.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket registry operation failures
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process attention
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Second init on the same map
    #[error("Socket map already initialized")]
    AlreadyInitialized,

    /// Init without a socket factory, or an operation before init
    #[error("SocketMapOptions.socket_factory must be set")]
    MissingFactory,

    /// The map could not be pre-sized
    #[error("Fail to reserve {0} entries for the socket map")]
    MapInitFailed(usize),

    /// The background reaper task could not be spawned
    #[error("Fail to start the connection reaper task")]
    ReaperStartFailed,

    /// Factory failed to open a connection
    #[error("Fail to create socket to {0}")]
    CreateFailed(String),

    /// A just-created socket could not be registered
    #[error("Socket map inconsistency: {0}")]
    InternalInconsistency(String),

    /// Lookup on an absent key
    #[error("Socket not found")]
    NotFound,
}
