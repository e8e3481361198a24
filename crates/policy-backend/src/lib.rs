//! Checkpoint stream abstraction for the policy engine.
//!
//! This crate defines [`StreamFactory`] — the narrow injected-opener
//! interface the engine's serializer/deserializer use to read and write
//! the on-disk text format. It knows nothing about buckets, policies, or
//! the text format itself; it only hands out byte streams keyed by bucket
//! id.
//!
//! Two implementations are provided:
//!
//! - [`FsStreamFactory`] — writes into a shadow directory and commits it
//!   onto the live directory with a single atomic rename.
//! - [`MemoryStreamFactory`] — in-memory, for tests.

mod error;
mod fs_backend;
mod memory_backend;

pub use error::StreamError;
pub use fs_backend::FsStreamFactory;
pub use memory_backend::MemoryStreamFactory;

use std::io::{Read, Write};

/// Reserved filename used for the root bucket (id `""`), which cannot be
/// used directly as a path component.
pub const ROOT_BUCKET_FILENAME: &str = "_root_";

/// Maps a bucket id to a safe, non-empty filename component.
#[must_use]
pub fn bucket_filename(bucket_id: &str) -> &str {
    if bucket_id.is_empty() {
        ROOT_BUCKET_FILENAME
    } else {
        bucket_id
    }
}

/// A pluggable source of checkpoint streams.
///
/// Implementations must be able to hand out an index stream (one per
/// dump/load call) and, per bucket id, a stream for that bucket's policy
/// records. A missing bucket file on read is reported as `Ok(None)`, not
/// an error — the caller (the engine's deserializer) decides whether that
/// is fatal.
pub trait StreamFactory {
    /// Open the index stream for writing. Called once per dump.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if the stream cannot be created.
    fn index_writer(&self) -> Result<Box<dyn Write>, StreamError>;

    /// Open a bucket's stream for writing. Called once per bucket per dump.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if the stream cannot be created.
    fn bucket_writer(&self, bucket_id: &str) -> Result<Box<dyn Write>, StreamError>;

    /// Open the index stream for reading. Called once per load.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if an unexpected I/O failure occurs
    /// (a simply-absent index is `Ok(None)`).
    fn index_reader(&self) -> Result<Option<Box<dyn Read>>, StreamError>;

    /// Open a bucket's stream for reading. Returns `Ok(None)` if no stream
    /// exists for `bucket_id` — the deserializer turns this into
    /// `BucketDeserialization(bucket_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if an unexpected I/O failure occurs.
    fn bucket_reader(&self, bucket_id: &str) -> Result<Option<Box<dyn Read>>, StreamError>;
}
