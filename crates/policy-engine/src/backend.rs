//! [`StorageBackend`]: the in-memory store of all buckets, plus the
//! reverse-link index used to cascade-delete `BUCKET`-typed policies
//! when their target bucket is removed.
//!
//! This is the sole owner of every [`PolicyBucket`] — everything above
//! it (the [`crate::storage::Storage`] façade) only borrows.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::bucket::{PolicyBucket, PolicyCollection};
use crate::error::EngineError;
use crate::types::{Policy, PolicyBucketId, PolicyKey, PolicyResult, ROOT_BUCKET_ID};

/// `(source bucket id, source policy key)` — one entry in a reverse-link
/// set.
pub type ReverseLink = (PolicyBucketId, PolicyKey);

/// The in-memory bucket store. Created already containing the root
/// bucket (id `""`), which can never be deleted.
#[derive(Debug)]
pub struct StorageBackend {
    buckets: HashMap<PolicyBucketId, PolicyBucket>,
    /// target bucket id -> set of policies elsewhere that point at it.
    reverse_links: HashMap<PolicyBucketId, HashSet<ReverseLink>>,
}

impl StorageBackend {
    /// A fresh store containing only the root bucket, with `root_default`
    /// as its default result.
    #[must_use]
    pub fn new(root_default: PolicyResult) -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(
            ROOT_BUCKET_ID.to_owned(),
            PolicyBucket::new(ROOT_BUCKET_ID, root_default),
        );
        Self {
            buckets,
            reverse_links: HashMap::new(),
        }
    }

    #[must_use]
    pub fn has_bucket(&self, id: &str) -> bool {
        self.buckets.contains_key(id)
    }

    fn bucket(&self, id: &str) -> Result<&PolicyBucket, EngineError> {
        self.buckets
            .get(id)
            .ok_or_else(|| EngineError::BucketNotExists(id.to_owned()))
    }

    fn bucket_mut(&mut self, id: &str) -> Result<&mut PolicyBucket, EngineError> {
        self.buckets
            .get_mut(id)
            .ok_or_else(|| EngineError::BucketNotExists(id.to_owned()))
    }

    /// Fetch a bucket by id, for the resolver's graph traversal.
    pub fn get_bucket(&self, id: &str) -> Result<&PolicyBucket, EngineError> {
        self.bucket(id)
    }

    /// Create `id` with `default_result`. Fails if `id` is already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketAlreadyExists`] if `id` exists.
    pub fn create_bucket(
        &mut self,
        id: impl Into<PolicyBucketId>,
        default_result: PolicyResult,
    ) -> Result<(), EngineError> {
        let id = id.into();
        if self.buckets.contains_key(&id) {
            return Err(EngineError::BucketAlreadyExists(id));
        }
        self.buckets
            .insert(id.clone(), PolicyBucket::new(id.clone(), default_result));
        info!(bucket = %id, "bucket created");
        Ok(())
    }

    /// Replace `id`'s default result. Fails if `id` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] if `id` is absent.
    pub fn update_bucket(
        &mut self,
        id: &str,
        default_result: PolicyResult,
    ) -> Result<(), EngineError> {
        self.bucket_mut(id)?.set_default(default_result);
        info!(bucket = %id, "bucket default updated");
        Ok(())
    }

    /// Remove `id` and every policy the reverse-link index recorded as
    /// pointing at it. The root bucket cannot be removed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DefaultBucketDeletion`] for `id == ""`, or
    /// [`EngineError::BucketNotExists`] if `id` is absent.
    pub fn delete_bucket(&mut self, id: &str) -> Result<(), EngineError> {
        if id == ROOT_BUCKET_ID {
            return Err(EngineError::DefaultBucketDeletion);
        }
        let Some(removed) = self.buckets.remove(id) else {
            return Err(EngineError::BucketNotExists(id.to_owned()));
        };

        // Drop every reverse link `id` held as a *source* (its own
        // BUCKET-typed policies) before dropping its incoming links —
        // otherwise a target bucket's reverse-link set would keep a
        // dangling (id, key) entry after `id` itself is gone.
        for (key, result) in removed.iter_in_key_order() {
            if result.is_bucket_link() {
                self.remove_reverse_link(&result.metadata, id, key);
            }
        }

        self.delete_linking(id)?;
        self.reverse_links.remove(id);
        info!(bucket = %id, "bucket deleted");
        Ok(())
    }

    /// The filtered view of one bucket against `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] if `id` is absent.
    pub fn search_bucket(&self, id: &str, key: &PolicyKey) -> Result<PolicyCollection, EngineError> {
        Ok(self.bucket(id)?.filtered(key))
    }

    /// Insert `policy` into bucket `id`. If the result is `BUCKET`-typed,
    /// records the reverse link from `(id, policy.key)` to the target.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] if `id` is absent.
    pub fn insert_policy(&mut self, id: &str, policy: Policy) -> Result<(), EngineError> {
        // Drop any prior reverse-link for this key before inserting the
        // new one — the key may have previously pointed at a different
        // (or no) bucket.
        if let Some(previous) = self.bucket(id)?.filtered(&policy.key).into_iter().find(|p| p.key == policy.key) {
            if previous.result.is_bucket_link() {
                self.remove_reverse_link(&previous.result.metadata, id, &policy.key);
            }
        }

        let is_link = policy.result.is_bucket_link();
        let target = policy.result.metadata.clone();
        let key = policy.key.clone();
        self.bucket_mut(id)?.insert_policy(policy);

        if is_link {
            self.reverse_links
                .entry(target)
                .or_default()
                .insert((id.to_owned(), key));
        }
        Ok(())
    }

    /// Remove the policy at `key` from bucket `id`. Idempotent: removing
    /// a missing key is not an error. If the removed policy was a
    /// `BUCKET` link, its reverse-link entry is dropped too.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] if `id` is absent.
    pub fn delete_policy(&mut self, id: &str, key: &PolicyKey) -> Result<(), EngineError> {
        let removed = self.bucket_mut(id)?.delete_policy(key);
        if let Some(result) = removed {
            if result.is_bucket_link() {
                self.remove_reverse_link(&result.metadata, id, key);
            }
        }
        Ok(())
    }

    /// For every `(source, key)` recorded against `target_id`, delete
    /// that policy from `source`. Used by [`StorageBackend::delete_bucket`]
    /// to cascade.
    ///
    /// # Errors
    ///
    /// Propagates [`EngineError::BucketNotExists`] if a recorded source
    /// bucket no longer exists (should not happen under normal use, since
    /// buckets only disappear through `delete_bucket`, which clears their
    /// own outgoing links first — but a partially-loaded store could hit
    /// this).
    pub fn delete_linking(&mut self, target_id: &str) -> Result<(), EngineError> {
        let Some(links) = self.reverse_links.remove(target_id) else {
            return Ok(());
        };
        for (source_id, key) in links {
            debug!(source = %source_id, target = %target_id, "cascading bucket-link delete");
            self.delete_policy(&source_id, &key)?;
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
        Ok(self.bucket(id)?.list(filter))
    }

    /// The reverse-link set recorded against `target_id`, for tests and
    /// integrity checks.
    #[must_use]
    pub fn reverse_links_for(&self, target_id: &str) -> HashSet<ReverseLink> {
        self.reverse_links.get(target_id).cloned().unwrap_or_default()
    }

    /// Every bucket id, root first, then the rest in an order stable for
    /// a single process run (insertion order is not guaranteed by
    /// `HashMap`, so the deserializer's own index line order is what
    /// later determines load order — this is only used by the
    /// serializer, where any full-coverage order is correct).
    #[must_use]
    pub fn bucket_ids_in_order(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.buckets.keys().map(String::as_str).collect();
        ids.sort_unstable_by_key(|id| (*id != ROOT_BUCKET_ID, *id));
        ids
    }

    /// Every bucket, root first, paired with its id, in the same order as
    /// [`StorageBackend::bucket_ids_in_order`]. Used by the serializer so
    /// it never needs a second, fallible lookup per id.
    #[must_use]
    pub fn buckets_in_order(&self) -> Vec<(&str, &PolicyBucket)> {
        let mut entries: Vec<(&str, &PolicyBucket)> = self
            .buckets
            .iter()
            .map(|(id, bucket)| (id.as_str(), bucket))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| (*id != ROOT_BUCKET_ID, *id));
        entries
    }

    /// Drop every bucket except the root, and every reverse link. Used by
    /// the deserializer to clear the store before repopulating it from a
    /// checkpoint.
    pub fn clear_all_but_root(&mut self) {
        let root = self
            .buckets
            .remove(ROOT_BUCKET_ID)
            .unwrap_or_else(|| PolicyBucket::new(ROOT_BUCKET_ID, PolicyResult::deny()));
        self.buckets.clear();
        self.buckets.insert(ROOT_BUCKET_ID.to_owned(), root);
        self.reverse_links.clear();
    }

    /// Replace the root bucket's default result. Used only by the
    /// deserializer, which reads the root's default straight off the
    /// index rather than going through [`StorageBackend::update_bucket`].
    pub fn set_root_default(&mut self, default_result: PolicyResult) {
        if let Some(bucket) = self.buckets.get_mut(ROOT_BUCKET_ID) {
            bucket.set_default(default_result);
        }
    }

    /// Insert a non-root bucket read off the index, unconditionally
    /// (overwrites a same-id bucket if one is already present — the
    /// deserializer runs this after `clear_all_but_root`, so in practice
    /// there never is one).
    pub fn insert_loaded_bucket(&mut self, id: PolicyBucketId, default_result: PolicyResult) {
        self.buckets
            .insert(id.clone(), PolicyBucket::new(id, default_result));
    }

    /// Insert a policy read off a bucket's stream, maintaining the
    /// reverse-link index exactly as [`StorageBackend::insert_policy`]
    /// does. Kept as a separate entry point because the deserializer
    /// loads bucket streams strictly after the index, when every bucket
    /// id referenced by a `BUCKET` link is already known to exist or not
    /// — unlike the validated mutation API, a dangling link here is
    /// recorded rather than rejected, surfaced only once the resolver
    /// actually traverses it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BucketNotExists`] if `id` itself is absent.
    pub fn insert_loaded_policy(&mut self, id: &str, policy: Policy) -> Result<(), EngineError> {
        self.insert_policy(id, policy)
    }

    fn remove_reverse_link(&mut self, target_id: &str, source_id: &str, key: &PolicyKey) {
        if let Some(set) = self.reverse_links.get_mut(target_id) {
            set.remove(&(source_id.to_owned(), key.clone()));
            if set.is_empty() {
                self.reverse_links.remove(target_id);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn backend() -> StorageBackend {
        StorageBackend::new(PolicyResult::deny())
    }

    #[test]
    fn root_bucket_exists_on_creation() {
        let backend = backend();
        assert!(backend.has_bucket(""));
    }

    #[test]
    fn root_bucket_cannot_be_deleted() {
        let mut backend = backend();
        let err = backend.delete_bucket("").unwrap_err();
        assert!(matches!(err, EngineError::DefaultBucketDeletion));
        assert!(backend.has_bucket(""));
    }

    #[test]
    fn create_bucket_rejects_duplicate() {
        let mut backend = backend();
        backend.create_bucket("b", PolicyResult::deny()).unwrap();
        let err = backend.create_bucket("b", PolicyResult::deny()).unwrap_err();
        assert!(matches!(err, EngineError::BucketAlreadyExists(id) if id == "b"));
    }

    #[test]
    fn update_missing_bucket_fails() {
        let mut backend = backend();
        let err = backend.update_bucket("missing", PolicyResult::deny()).unwrap_err();
        assert!(matches!(err, EngineError::BucketNotExists(id) if id == "missing"));
    }

    #[test]
    fn reverse_link_consistency_on_insert_and_delete() {
        let mut backend = backend();
        backend.create_bucket("B", PolicyResult::deny()).unwrap();
        let key = PolicyKey::new("c", "u", "p");
        backend
            .insert_policy("", Policy::new(key.clone(), PolicyResult::bucket("B")))
            .unwrap();

        let links = backend.reverse_links_for("B");
        assert_eq!(links.len(), 1);
        assert!(links.contains(&(String::new(), key.clone())));

        backend.delete_policy("", &key).unwrap();
        assert!(backend.reverse_links_for("B").is_empty());
    }

    #[test]
    fn cascade_delete_removes_pointing_policies() {
        let mut backend = backend();
        backend.create_bucket("B", PolicyResult::deny()).unwrap();
        let key = PolicyKey::new("c", "u", "p");
        backend
            .insert_policy("", Policy::new(key.clone(), PolicyResult::bucket("B")))
            .unwrap();

        backend.delete_bucket("B").unwrap();

        let remaining = backend.search_bucket("", &key).unwrap();
        assert!(remaining.is_empty());
        assert!(backend.reverse_links_for("B").is_empty());
    }

    #[test]
    fn deleting_a_bucket_clears_its_own_outgoing_links() {
        let mut backend = backend();
        backend.create_bucket("B", PolicyResult::deny()).unwrap();
        backend.create_bucket("C", PolicyResult::deny()).unwrap();
        let key = PolicyKey::new("c", "u", "p");
        backend
            .insert_policy("B", Policy::new(key.clone(), PolicyResult::bucket("C")))
            .unwrap();
        assert_eq!(backend.reverse_links_for("C").len(), 1);

        backend.delete_bucket("B").unwrap();

        // C's reverse-link set must not keep a dangling entry naming the
        // now-gone source bucket B.
        assert!(backend.reverse_links_for("C").is_empty());

        // Deleting C afterwards must not fail trying to cascade into the
        // already-gone B.
        backend.delete_bucket("C").unwrap();
    }

    #[test]
    fn reinserting_over_a_bucket_link_updates_reverse_link() {
        let mut backend = backend();
        backend.create_bucket("B1", PolicyResult::deny()).unwrap();
        backend.create_bucket("B2", PolicyResult::deny()).unwrap();
        let key = PolicyKey::new("c", "u", "p");
        backend
            .insert_policy("", Policy::new(key.clone(), PolicyResult::bucket("B1")))
            .unwrap();
        backend
            .insert_policy("", Policy::new(key.clone(), PolicyResult::bucket("B2")))
            .unwrap();

        assert!(backend.reverse_links_for("B1").is_empty());
        assert_eq!(backend.reverse_links_for("B2").len(), 1);
    }

    #[test]
    fn delete_policy_is_idempotent() {
        let mut backend = backend();
        let key = PolicyKey::new("c", "u", "p");
        backend.delete_policy("", &key).unwrap();
        backend.delete_policy("", &key).unwrap();
    }

    #[test]
    fn operations_on_missing_bucket_fail() {
        let mut backend = backend();
        let key = PolicyKey::new("c", "u", "p");
        assert!(matches!(
            backend.search_bucket("missing", &key),
            Err(EngineError::BucketNotExists(_))
        ));
        assert!(matches!(
            backend.insert_policy("missing", Policy::new(key.clone(), PolicyResult::allow())),
            Err(EngineError::BucketNotExists(_))
        ));
        assert!(matches!(
            backend.delete_policy("missing", &key),
            Err(EngineError::BucketNotExists(_))
        ));
        assert!(matches!(
            backend.list_policies("missing", None),
            Err(EngineError::BucketNotExists(_))
        ));
    }
}
