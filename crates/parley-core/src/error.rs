use thiserror::Error;

/// Failures a chat operation can surface to the requesting connection.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected locally — nothing was written and no one else was notified.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// A store could not be reached. Nothing partial was committed: a
    /// persistence failure aborts before any push goes out.
    #[error("store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}
