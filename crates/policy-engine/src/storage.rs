//! [`Storage`]: the public façade. Implements the bucket-graph traversal
//! that produces a verdict (`check`/`resume_check`) and the bulk mutation
//! operations that validate cross-bucket references.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentContext, CheckOutcome, DeferredOutcome};
use crate::backend::StorageBackend;
use crate::bucket::{most_specific, PolicyBucket, PolicyCollection};
use crate::error::EngineError;
use crate::types::{
    predefined, Policy, PolicyBucketId, PolicyKey, PolicyResult, PolicyType, ROOT_BUCKET_ID,
};

/// An integrity condition the resolver detected while walking the bucket
/// graph. Never raised as an error — `check` still returns a verdict
/// (`DENY`); this is reported alongside it for the caller to log or
/// alert on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityWarning {
    /// Traversal revisited a bucket already on the current call stack.
    CycleDetected { bucket: PolicyBucketId },
    /// A `BUCKET`-typed result named a bucket that no longer exists.
    DanglingBucketLink { bucket: PolicyBucketId },
}

/// The single most specific matching policy in `bucket`, or its default
/// if none match. The `bool` reports whether an actual policy matched
/// (`true`) versus falling back to the default (`false`).
fn minimal_policy(bucket: &PolicyBucket, query: &PolicyKey) -> (PolicyResult, bool) {
    let matches = bucket.filtered(query);
    match most_specific(&matches) {
        Some(policy) => (policy.result.clone(), true),
        None => (bucket.default_result().clone(), false),
    }
}

/// The storage façade: owns a [`StorageBackend`] and the set of
/// currently-registered agent plugin types.
#[derive(Debug)]
pub struct Storage {
    backend: StorageBackend,
    registered_agents: HashSet<PolicyType>,
}

impl Storage {
    /// A fresh store with only the root bucket, defaulting to
    /// `root_default`.
    #[must_use]
    pub fn new(root_default: PolicyResult) -> Self {
        Self {
            backend: StorageBackend::new(root_default),
            registered_agents: HashSet::new(),
        }
    }

    /// Direct access to the underlying bucket store, for the serializer.
    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// Direct mutable access to the underlying bucket store, for the
    /// deserializer, which populates buckets directly rather than
    /// through the validated mutation API.
    pub fn backend_mut(&mut self) -> &mut StorageBackend {
        &mut self.backend
    }

    /// Register an agent plugin type. Returns `true` if newly
    /// registered, `false` if `plugin_type` was already registered.
    pub fn register_agent(&mut self, plugin_type: PolicyType) -> bool {
        self.registered_agents.insert(plugin_type)
    }

    /// Unregister an agent plugin type. Returns `true` if it had been
    /// registered.
    pub fn unregister_agent(&mut self, plugin_type: PolicyType) -> bool {
        self.registered_agents.remove(&plugin_type)
    }

    #[must_use]
    pub fn is_agent_registered(&self, plugin_type: PolicyType) -> bool {
        self.registered_agents.contains(&plugin_type)
    }

    /// Entry point: walk the bucket graph from the root for `query` and
    /// produce a verdict or a deferral. Pure in `query` for a fixed store
    /// — never mutates `self`.
    #[must_use]
    pub fn check(&self, query: &PolicyKey) -> (CheckOutcome, Vec<IntegrityWarning>) {
        self.traverse(ROOT_BUCKET_ID, query)
    }

    /// Resume a deferred lookup once the agent has replied with
    /// `agent_result`. Re-validates against the *current* store: if the
    /// policy that originally triggered the deferral is gone or changed,
    /// the reply is stale and traversal restarts from the root.
    #[must_use]
    pub fn resume_check(
        &self,
        original_key: &PolicyKey,
        agent_context: &AgentContext,
        agent_result: PolicyResult,
    ) -> (CheckOutcome, Vec<IntegrityWarning>) {
        if !self.deferral_still_live(original_key, agent_context) {
            debug!(
                bucket = %agent_context.source_bucket,
                "deferred reply is stale, restarting from root"
            );
            return self.check(original_key);
        }

        if agent_result.is_bucket_link() {
            self.traverse(&agent_result.metadata, original_key)
        } else {
            (
                self.finalize(agent_result, original_key, &agent_context.source_bucket),
                Vec::new(),
            )
        }
    }

    fn deferral_still_live(&self, query: &PolicyKey, context: &AgentContext) -> bool {
        let Ok(bucket) = self.backend.get_bucket(&context.source_bucket) else {
            return false;
        };
        let (result, _matched) = minimal_policy(bucket, query);
        result.policy_type == context.plugin_type && result.metadata == context.plugin_metadata
    }

    fn traverse(&self, start: &str, query: &PolicyKey) -> (CheckOutcome, Vec<IntegrityWarning>) {
        let mut visited = HashSet::new();
        let mut current = start.to_owned();
        let mut warnings = Vec::new();

        loop {
            if !visited.insert(current.clone()) {
                warn!(bucket = %current, "cycle detected in bucket graph, falling back to DENY");
                warnings.push(IntegrityWarning::CycleDetected {
                    bucket: current,
                });
                return (CheckOutcome::Verdict(PolicyResult::deny()), warnings);
            }

            let Ok(bucket) = self.backend.get_bucket(&current) else {
                warn!(bucket = %current, "dangling bucket link, falling back to DENY");
                warnings.push(IntegrityWarning::DanglingBucketLink {
                    bucket: current,
                });
                return (CheckOutcome::Verdict(PolicyResult::deny()), warnings);
            };

            let (result, matched) = minimal_policy(bucket, query);
            debug!(bucket = %current, matched, result_type = result.policy_type, "resolved one hop");

            if result.is_bucket_link() {
                current = result.metadata.clone();
                continue;
            }

            let source_bucket = current.clone();
            return (self.finalize(result, query, &source_bucket), warnings);
        }
    }

    /// Turn a non-`BUCKET` [`PolicyResult`] into a [`CheckOutcome`]:
    /// predefined verdicts and unregistered/unknown numeric types return
    /// `Verdict`; registered agent plugin types defer.
    fn finalize(&self, result: PolicyResult, query: &PolicyKey, source_bucket: &str) -> CheckOutcome {
        if result.policy_type == predefined::ALLOW || result.policy_type == predefined::DENY {
            return CheckOutcome::Verdict(result);
        }

        if self.registered_agents.contains(&result.policy_type) {
            return CheckOutcome::Deferred(DeferredOutcome {
                plugin_type: result.policy_type,
                metadata: result.metadata.clone(),
                original_key: query.clone(),
                agent_context: AgentContext {
                    source_bucket: source_bucket.to_owned(),
                    plugin_type: result.policy_type,
                    plugin_metadata: result.metadata,
                },
                request_id: Uuid::new_v4(),
            });
        }

        // Non-predefined, non-BUCKET, and not registered: DENY by
        // convention.
        CheckOutcome::Verdict(PolicyResult::deny())
    }

    /// Create `id` if absent, otherwise update its default result.
    pub fn add_or_update_bucket(&mut self, id: impl Into<PolicyBucketId>, default_result: PolicyResult) {
        let id = id.into();
        if self.backend.has_bucket(&id) {
            // Infallible: existence just confirmed.
            let _ = self.backend.update_bucket(&id, default_result);
        } else {
            // Infallible: absence just confirmed.
            let _ = self.backend.create_bucket(id, default_result);
        }
    }

    /// Delete a bucket and every policy pointing at it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DefaultBucketDeletion`] for the root bucket,
    /// [`EngineError::BucketNotExists`] otherwise.
    pub fn delete_bucket(&mut self, id: &str) -> Result<(), EngineError> {
        self.backend.delete_bucket(id)
    }

    /// Validate, then apply, a batch insert across multiple buckets.
    /// All-or-nothing: the first bucket id or `BUCKET`-target that does
    /// not exist raises and leaves the store unchanged. A `BTreeMap` key
    /// (not a `HashMap`) is used so "the first offender" is well-defined
    /// and deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] naming the first missing
    /// bucket id or `BUCKET` target encountered in map-then-vector order.
    pub fn insert_policies(
        &mut self,
        policies: BTreeMap<PolicyBucketId, Vec<Policy>>,
    ) -> Result<(), EngineError> {
        for (bucket_id, list) in &policies {
            if !self.backend.has_bucket(bucket_id) {
                return Err(EngineError::BucketNotExists(bucket_id.clone()));
            }
            for policy in list {
                if policy.result.is_bucket_link() && !self.backend.has_bucket(&policy.result.metadata) {
                    return Err(EngineError::BucketNotExists(policy.result.metadata.clone()));
                }
            }
        }

        for (bucket_id, list) in policies {
            info!(bucket = %bucket_id, count = list.len(), "policies inserted");
            for policy in list {
                // Unwrap-free: existence of `bucket_id` was validated above
                // and nothing else can have removed it since `self` is
                // exclusively borrowed for the duration of this call.
                if let Err(err) = self.backend.insert_policy(&bucket_id, policy) {
                    debug_assert!(false, "validated bucket vanished mid-insert: {err}");
                }
            }
        }
        Ok(())
    }

    /// Validate, then apply, a batch delete across multiple buckets.
    /// Missing keys are not errors (delete is idempotent); a missing
    /// bucket id is, and leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] naming the first missing
    /// bucket id.
    pub fn delete_policies(
        &mut self,
        deletions: BTreeMap<PolicyBucketId, Vec<PolicyKey>>,
    ) -> Result<(), EngineError> {
        for bucket_id in deletions.keys() {
            if !self.backend.has_bucket(bucket_id) {
                return Err(EngineError::BucketNotExists(bucket_id.clone()));
            }
        }

        for (bucket_id, keys) in deletions {
            info!(bucket = %bucket_id, count = keys.len(), "policies deleted");
            for key in keys {
                if let Err(err) = self.backend.delete_policy(&bucket_id, &key) {
                    debug_assert!(false, "validated bucket vanished mid-delete: {err}");
                }
            }
        }
        Ok(())
    }

    /// All policies in bucket `id`, or those matching `filter` if given.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] if `id` is absent.
    pub fn list_policies(
        &self,
        id: &str,
        filter: Option<&PolicyKey>,
    ) -> Result<PolicyCollection, EngineError> {
        self.backend.list_policies(id, filter)
    }
}
