//! The value types of the policy model: keys, types, results, policies.
//!
//! Metadata is opaque to everything in this module — it is only ever
//! interpreted by the resolver (`BUCKET` metadata names a bucket) or by
//! an out-of-process agent plugin (any other non-predefined type).

use std::cmp::Ordering;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Wildcard token: a stored key feature equal to this matches any query
/// value at that position. The query itself never contains this token as
/// a wildcard — a query asking for the literal string `"*"` matches only
/// stored features equal to `"*"` or exactly `"*"` itself, per the
/// one-directional matching rule.
pub const WILDCARD: &str = "*";

/// A 16-bit policy type. Values below [`PolicyType::BUCKET`] and above
/// the reserved agent range are free for agent plugins to define.
pub type PolicyType = u16;

/// Predefined, engine-understood policy type values.
pub mod predefined {
    use super::PolicyType;

    /// Access denied. Also the safe fallback the resolver uses on cycle
    /// detection and on unregistered agent plugin types.
    pub const DENY: PolicyType = 0x0000;

    /// Consult the bucket named in the policy result's metadata.
    pub const BUCKET: PolicyType = 0xFFFE;

    /// Access allowed.
    pub const ALLOW: PolicyType = 0xFFFF;

    /// Lower bound (inclusive) of the range reserved for agent plugin
    /// types.
    pub const AGENT_RANGE_START: PolicyType = 0x0010;

    /// Upper bound (inclusive) of the range reserved for agent plugin
    /// types.
    pub const AGENT_RANGE_END: PolicyType = BUCKET - 1;

    /// Whether `policy_type` falls in the range convention reserves for
    /// agent plugins (as opposed to being `DENY`, `ALLOW`, `BUCKET`, or an
    /// otherwise-unassigned numeric value below the agent range).
    #[must_use]
    pub fn in_agent_range(policy_type: PolicyType) -> bool {
        (AGENT_RANGE_START..=AGENT_RANGE_END).contains(&policy_type)
    }
}

/// One feature of a [`PolicyKey`]: a concrete string or the wildcard.
///
/// Equality between two features is always plain string equality — the
/// wildcard is not special there, only in [`PolicyKeyFeature::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolicyKeyFeature(String);

impl PolicyKeyFeature {
    /// Build a feature from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wildcard feature.
    #[must_use]
    pub fn wildcard() -> Self {
        Self(WILDCARD.to_owned())
    }

    /// Whether this feature is the wildcard token.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    /// The feature's raw string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` (as a *stored* feature) matches `query` (as a
    /// *query* feature), per the one-directional wildcard rule: a
    /// wildcard stored feature matches anything; a concrete stored
    /// feature matches only an identical query feature.
    #[must_use]
    pub fn matches(&self, query: &PolicyKeyFeature) -> bool {
        self.is_wildcard() || self == query
    }
}

impl From<&str> for PolicyKeyFeature {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PolicyKeyFeature {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for PolicyKeyFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(client, user, privilege)` triple identifying a subject × object
/// pair. Equality is plain string equality on all three features —
/// wildcard has no special meaning for `Eq`, only for
/// [`PolicyKey::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolicyKey {
    pub client: PolicyKeyFeature,
    pub user: PolicyKeyFeature,
    pub privilege: PolicyKeyFeature,
}

impl PolicyKey {
    /// Build a key from three string-like features.
    pub fn new(
        client: impl Into<PolicyKeyFeature>,
        user: impl Into<PolicyKeyFeature>,
        privilege: impl Into<PolicyKeyFeature>,
    ) -> Self {
        Self {
            client: client.into(),
            user: user.into(),
            privilege: privilege.into(),
        }
    }

    /// Whether `self`, read as a stored key, matches `query`, read as a
    /// query key: every feature position must match under
    /// [`PolicyKeyFeature::matches`].
    #[must_use]
    pub fn matches(&self, query: &PolicyKey) -> bool {
        self.client.matches(&query.client)
            && self.user.matches(&query.user)
            && self.privilege.matches(&query.privilege)
    }

    /// Count of concrete (non-wildcard) features, used by the
    /// specificity order.
    #[must_use]
    pub fn concrete_count(&self) -> u8 {
        u8::from(!self.client.is_wildcard())
            + u8::from(!self.user.is_wildcard())
            + u8::from(!self.privilege.is_wildcard())
    }
}

/// Lexicographic ordering over `(client, user, privilege)`, used for
/// deterministic dump order. This is a plain total order over the three
/// string features — it is unrelated to the specificity order used to
/// pick the minimal policy within a bucket (see
/// [`crate::bucket::most_specific`]).
impl PartialOrd for PolicyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PolicyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.client, &self.user, &self.privilege).cmp(&(
            &other.client,
            &other.user,
            &other.privilege,
        ))
    }
}

/// Metadata attached to a [`PolicyResult`]: the target bucket id for
/// `BUCKET`, an opaque plugin token for agent types, empty for `ALLOW`
/// and `DENY`.
pub type PolicyMetadata = String;

/// The outcome a matching policy (or a bucket's default) carries: a
/// policy type plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolicyResult {
    pub policy_type: PolicyType,
    pub metadata: PolicyMetadata,
}

impl PolicyResult {
    /// Build a result with explicit metadata.
    pub fn new(policy_type: PolicyType, metadata: impl Into<PolicyMetadata>) -> Self {
        Self {
            policy_type,
            metadata: metadata.into(),
        }
    }

    /// `ALLOW`, with empty metadata.
    #[must_use]
    pub fn allow() -> Self {
        Self::new(predefined::ALLOW, String::new())
    }

    /// `DENY`, with empty metadata.
    #[must_use]
    pub fn deny() -> Self {
        Self::new(predefined::DENY, String::new())
    }

    /// `BUCKET`, pointing at `target`.
    pub fn bucket(target: impl Into<PolicyMetadata>) -> Self {
        Self::new(predefined::BUCKET, target.into())
    }

    /// Whether this result redirects to another bucket.
    #[must_use]
    pub fn is_bucket_link(&self) -> bool {
        self.policy_type == predefined::BUCKET
    }
}

/// One stored `(key, result)` pair. Within a bucket, keys are unique —
/// re-inserting an existing key overwrites its result.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Policy {
    pub key: PolicyKey,
    pub result: PolicyResult,
}

impl Policy {
    #[must_use]
    pub fn new(key: PolicyKey, result: PolicyResult) -> Self {
        Self { key, result }
    }
}

/// The identifier of a bucket. `""` is reserved for the root bucket.
pub type PolicyBucketId = String;

/// The empty string, naming the root bucket — the entry point of every
/// `check`, which can never be deleted.
pub const ROOT_BUCKET_ID: &str = "";

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_anything() {
        let stored = PolicyKeyFeature::wildcard();
        assert!(stored.matches(&PolicyKeyFeature::new("x")));
        assert!(stored.matches(&PolicyKeyFeature::wildcard()));
    }

    #[test]
    fn concrete_matches_only_equal() {
        let stored = PolicyKeyFeature::new("c1");
        assert!(stored.matches(&PolicyKeyFeature::new("c1")));
        assert!(!stored.matches(&PolicyKeyFeature::new("c2")));
        // The query never contains '*', but if it did, concrete stored
        // features would still only match identical strings.
        assert!(!stored.matches(&PolicyKeyFeature::wildcard()));
    }

    #[test]
    fn query_containing_wildcard_matches_literally() {
        // "requests for `*` are allowed, and match literally"
        let stored = PolicyKeyFeature::new("*");
        let query = PolicyKeyFeature::new("*");
        assert!(stored.matches(&query));
        let stored_concrete = PolicyKeyFeature::new("c1");
        assert!(!stored_concrete.matches(&query));
    }

    #[test]
    fn key_equality_ignores_wildcard_semantics() {
        let a = PolicyKey::new("*", "u", "p");
        let b = PolicyKey::new("*", "u", "p");
        let c = PolicyKey::new("c", "u", "p");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn concrete_count() {
        let key = PolicyKey::new("*", "u", "p");
        assert_eq!(key.concrete_count(), 2);
        assert_eq!(PolicyKey::new("*", "*", "*").concrete_count(), 0);
        assert_eq!(PolicyKey::new("c", "u", "p").concrete_count(), 3);
    }

    #[test]
    fn ordering_is_lexicographic_over_features() {
        let a = PolicyKey::new("a", "z", "z");
        let b = PolicyKey::new("b", "a", "a");
        assert!(a < b);
    }

    #[test]
    fn bucket_link_detection() {
        assert!(PolicyResult::bucket("other").is_bucket_link());
        assert!(!PolicyResult::allow().is_bucket_link());
        assert!(!PolicyResult::deny().is_bucket_link());
    }
}
