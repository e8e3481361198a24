//! A local authorization-decision engine: given a `(client, user,
//! privilege)` triple, walk a graph of named policy buckets to produce
//! `ALLOW`, `DENY`, or a deferral to an external agent plugin.
//!
//! The public surface is [`storage::Storage`] — construct one, populate
//! it through [`storage::Storage::insert_policies`] /
//! [`storage::Storage::add_or_update_bucket`], and call
//! [`storage::Storage::check`]. [`persist::dump`] / [`persist::load`]
//! checkpoint a `Storage` to and from anything implementing
//! [`policy_backend::StreamFactory`].

pub mod agent;
pub mod backend;
pub mod bucket;
pub mod error;
pub mod persist;
pub mod storage;
pub mod types;

pub use agent::{AgentActionRequest, AgentActionResponse, AgentContext, CheckOutcome, DeferredOutcome};
pub use backend::StorageBackend;
pub use bucket::{PolicyBucket, PolicyCollection};
pub use error::EngineError;
pub use storage::{IntegrityWarning, Storage};
pub use types::{
    predefined, Policy, PolicyBucketId, PolicyKey, PolicyKeyFeature, PolicyMetadata, PolicyResult,
    PolicyType, ROOT_BUCKET_ID, WILDCARD,
};
