//! Error type for the checkpoint stream abstraction.

/// Errors raised while opening or committing checkpoint streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Creating or opening a directory/file on disk failed.
    #[error("failed to open '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A read from an open stream failed.
    #[error("read failed: {reason}")]
    Read { reason: String },

    /// A write to an open stream failed.
    #[error("write failed: {reason}")]
    Write { reason: String },

    /// Renaming the shadow directory on top of the live directory failed.
    #[error("commit rename from '{from}' to '{to}' failed: {reason}")]
    Commit {
        from: String,
        to: String,
        reason: String,
    },
}
