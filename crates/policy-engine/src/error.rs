//! Error types for the policy engine.
//!
//! A cycle or dangling bucket link is not a variant here — the resolver
//! never raises those as errors, it reports them alongside a verdict
//! (see [`crate::storage::IntegrityWarning`]).

use crate::types::PolicyBucketId;

/// Errors from bucket and policy mutation, and from load/dump.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A mutation or lookup named a bucket that does not exist.
    #[error("bucket does not exist: {0}")]
    BucketNotExists(PolicyBucketId),

    /// A bucket creation named an id that is already present.
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(PolicyBucketId),

    /// An attempt to delete the root bucket.
    #[error("the root bucket cannot be deleted")]
    DefaultBucketDeletion,

    /// The index named a bucket for which no stream could be opened.
    #[error("no stream available to deserialize bucket: {0}")]
    BucketDeserialization(PolicyBucketId),

    /// A record in a per-bucket or index stream failed to parse.
    #[error("corrupted record: {0}")]
    BucketRecordCorrupted(String),

    /// The checkpoint I/O layer failed.
    #[error("checkpoint stream error: {0}")]
    Stream(#[from] policy_backend::StreamError),
}
