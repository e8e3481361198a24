//! [`PolicyBucket`]: the container of policies for one bucket plus its
//! default result, and the specificity order used to pick among several
//! matching policies.

use std::collections::BTreeMap;

use crate::types::{Policy, PolicyBucketId, PolicyKey, PolicyKeyFeature, PolicyResult};

/// An eagerly-constructed set of matching policies. The store is small
/// enough that materializing a `Vec` beats building a lazy iterator
/// adapter chain.
pub type PolicyCollection = Vec<Policy>;

/// The container of policies for one bucket.
///
/// Policies are stored in a `BTreeMap` keyed by [`PolicyKey`], which gives
/// two invariants for free: keys are unique within a bucket (a second
/// insert overwrites), and iteration visits policies in `PolicyKey`'s
/// `Ord` order — the deterministic key order the on-disk dump relies on.
#[derive(Debug, Clone)]
pub struct PolicyBucket {
    id: PolicyBucketId,
    default_result: PolicyResult,
    policies: BTreeMap<PolicyKey, PolicyResult>,
}

impl PolicyBucket {
    /// Create an empty bucket with the given default result.
    #[must_use]
    pub fn new(id: impl Into<PolicyBucketId>, default_result: PolicyResult) -> Self {
        Self {
            id: id.into(),
            default_result,
            policies: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn default_result(&self) -> &PolicyResult {
        &self.default_result
    }

    pub fn set_default(&mut self, result: PolicyResult) {
        self.default_result = result;
    }

    /// Add or overwrite the policy at `policy.key`.
    pub fn insert_policy(&mut self, policy: Policy) {
        self.policies.insert(policy.key, policy.result);
    }

    /// Remove the policy at `key`, if any. Idempotent. Returns the
    /// removed result so callers (the reverse-link index maintenance in
    /// [`crate::backend::StorageBackend`]) can tell whether it was a
    /// `BUCKET` link without a second lookup.
    pub fn delete_policy(&mut self, key: &PolicyKey) -> Option<PolicyResult> {
        self.policies.remove(key)
    }

    /// Every stored policy whose key matches `query` under the wildcard
    /// rule, in `PolicyKey` order.
    #[must_use]
    pub fn filtered(&self, query: &PolicyKey) -> PolicyCollection {
        self.policies
            .iter()
            .filter(|(stored, _)| stored.matches(query))
            .map(|(key, result)| Policy::new(key.clone(), result.clone()))
            .collect()
    }

    /// Like [`PolicyBucket::filtered`], but when no stored policy matches
    /// `query`, returns a single synthetic policy carrying the bucket's
    /// default result under `query`'s own key — for callers (bucket
    /// introspection, `list_policies`) that want to see the effective
    /// result rather than an empty collection. The resolver itself does
    /// not use this: it consults [`PolicyBucket::default_result`]
    /// directly so it can tell a real match from a default fallback.
    #[must_use]
    pub fn filtered_with_default(&self, query: &PolicyKey) -> PolicyCollection {
        let matches = self.filtered(query);
        if matches.is_empty() {
            vec![Policy::new(query.clone(), self.default_result.clone())]
        } else {
            matches
        }
    }

    /// All policies, or those matching `filter` if given, in key order.
    #[must_use]
    pub fn list(&self, filter: Option<&PolicyKey>) -> PolicyCollection {
        match filter {
            Some(key) => self.filtered(key),
            None => self
                .policies
                .iter()
                .map(|(key, result)| Policy::new(key.clone(), result.clone()))
                .collect(),
        }
    }

    /// Policies in key order, for dump.
    pub fn iter_in_key_order(&self) -> impl Iterator<Item = (&PolicyKey, &PolicyResult)> {
        self.policies.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }
}

/// Per-position specificity rank of a feature for the tie-break order:
/// concrete ranks below wildcard.
fn feature_rank(feature: &PolicyKeyFeature) -> u8 {
    u8::from(feature.is_wildcard())
}

/// The total order over policies matching one query within one bucket:
/// primarily by concrete-feature count (more concrete wins), then by a
/// client/user/privilege-priority tie-break where, at the first
/// differing position, a wildcard outranks a concrete feature.
///
/// Returns the greatest element, i.e. the single most specific match, or
/// `None` if `matches` is empty.
#[must_use]
pub fn most_specific(matches: &[Policy]) -> Option<&Policy> {
    matches.iter().max_by(|a, b| specificity_key(a).cmp(&specificity_key(b)))
}

fn specificity_key(policy: &Policy) -> (u8, u8, u8, u8) {
    let key = &policy.key;
    (
        key.concrete_count(),
        feature_rank(&key.client),
        feature_rank(&key.user),
        feature_rank(&key.privilege),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::predefined;

    fn policy(client: &str, user: &str, privilege: &str, result: PolicyResult) -> Policy {
        Policy::new(PolicyKey::new(client, user, privilege), result)
    }

    #[test]
    fn insert_overwrites_by_key() {
        let mut bucket = PolicyBucket::new("b", PolicyResult::deny());
        let key = PolicyKey::new("c", "u", "p");
        bucket.insert_policy(Policy::new(key.clone(), PolicyResult::allow()));
        bucket.insert_policy(Policy::new(key.clone(), PolicyResult::deny()));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.filtered(&key)[0].result, PolicyResult::deny());
    }

    #[test]
    fn delete_is_idempotent() {
        let mut bucket = PolicyBucket::new("b", PolicyResult::deny());
        let key = PolicyKey::new("c", "u", "p");
        assert!(bucket.delete_policy(&key).is_none());
        bucket.insert_policy(Policy::new(key.clone(), PolicyResult::allow()));
        assert!(bucket.delete_policy(&key).is_some());
        assert!(bucket.delete_policy(&key).is_none());
    }

    #[test]
    fn filtered_excludes_non_matching() {
        let mut bucket = PolicyBucket::new("b", PolicyResult::deny());
        bucket.insert_policy(policy("c", "u", "p", PolicyResult::allow()));
        bucket.insert_policy(policy("other", "u", "p", PolicyResult::deny()));
        let matches = bucket.filtered(&PolicyKey::new("c", "u", "p"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].result, PolicyResult::allow());
    }

    #[test]
    fn concrete_match_outranks_wildcard_match() {
        let mut bucket = PolicyBucket::new("", PolicyResult::deny());
        bucket.insert_policy(policy("*", "u", "p", PolicyResult::allow()));
        bucket.insert_policy(policy("c", "u", "p", PolicyResult::deny()));

        let query = PolicyKey::new("c", "u", "p");
        let matches = bucket.filtered(&query);
        assert_eq!(matches.len(), 2);
        let winner = most_specific(&matches).expect("non-empty");
        assert_eq!(winner.result.policy_type, predefined::DENY);
    }

    #[test]
    fn filtered_with_default_falls_back_when_empty() {
        let bucket = PolicyBucket::new("b", PolicyResult::allow());
        let query = PolicyKey::new("x", "y", "z");
        let result = bucket.filtered_with_default(&query);
        assert_eq!(result, vec![Policy::new(query, PolicyResult::allow())]);
    }

    #[test]
    fn iteration_is_in_key_order() {
        let mut bucket = PolicyBucket::new("b", PolicyResult::deny());
        bucket.insert_policy(policy("z", "u", "p", PolicyResult::allow()));
        bucket.insert_policy(policy("a", "u", "p", PolicyResult::allow()));
        let ids: Vec<_> = bucket
            .iter_in_key_order()
            .map(|(k, _)| k.client.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "z"]);
    }
}
