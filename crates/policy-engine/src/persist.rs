//! The on-disk text format: a flat index listing every bucket and its
//! default result, plus one stream per bucket listing its policies.
//!
//! Index record: `<bucketId>;<policyType-hex>;<metadata>\n`
//! Bucket record: `<client>;<user>;<privilege>;<policyType-hex>;<metadata>\n`
//!
//! Every stream ends with one blank line: an empty record is the
//! end-of-stream sentinel the loader stops on, rather than relying on
//! EOF, so a truncated write is detectable as a missing sentinel instead
//! of silently accepted as "this is all there was".

use std::io::{BufRead, BufReader, Write as _};

use policy_backend::{bucket_filename, StreamError, StreamFactory};
use tracing::error;

use crate::error::EngineError;
use crate::storage::Storage;
use crate::types::{Policy, PolicyKey, PolicyResult, ROOT_BUCKET_ID};

const FIELD_SEPARATOR: char = ';';

fn write_err(e: std::io::Error) -> EngineError {
    EngineError::Stream(StreamError::Write { reason: e.to_string() })
}

fn read_err(e: std::io::Error) -> EngineError {
    EngineError::Stream(StreamError::Read { reason: e.to_string() })
}

fn write_index_record(w: &mut impl std::io::Write, bucket_id: &str, policy_type: u16, metadata: &str) -> Result<(), EngineError> {
    writeln!(w, "{bucket_id}{FIELD_SEPARATOR}{policy_type:x}{FIELD_SEPARATOR}{metadata}").map_err(write_err)
}

fn write_bucket_record(
    w: &mut impl std::io::Write,
    key: &PolicyKey,
    policy_type: u16,
    metadata: &str,
) -> Result<(), EngineError> {
    writeln!(
        w,
        "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{policy_type:x}{FIELD_SEPARATOR}{metadata}",
        key.client, key.user, key.privilege
    )
    .map_err(write_err)
}

fn write_sentinel(w: &mut impl std::io::Write) -> Result<(), EngineError> {
    writeln!(w).map_err(write_err)
}

/// Write every bucket's id/default to the index stream, and every
/// bucket's policies to its own stream, through `factory`. Every stream
/// ends with the blank-line sentinel.
///
/// # Errors
///
/// Returns [`EngineError::Stream`] on any I/O failure.
pub fn dump(storage: &Storage, factory: &impl StreamFactory) -> Result<(), EngineError> {
    dump_inner(storage, factory).inspect_err(|err| error!(error = %err, "dump failed"))
}

fn dump_inner(storage: &Storage, factory: &impl StreamFactory) -> Result<(), EngineError> {
    let backend = storage.backend();
    let mut index = factory.index_writer()?;

    for (id, bucket) in backend.buckets_in_order() {
        write_index_record(&mut index, id, bucket.default_result().policy_type, &bucket.default_result().metadata)?;

        let mut writer = factory.bucket_writer(id)?;
        for (key, result) in bucket.iter_in_key_order() {
            write_bucket_record(&mut writer, key, result.policy_type, &result.metadata)?;
        }
        write_sentinel(&mut writer)?;
        writer.flush().map_err(write_err)?;
    }

    write_sentinel(&mut index)?;
    index.flush().map_err(write_err)?;
    Ok(())
}

struct IndexRecord {
    bucket_id: String,
    policy_type: u16,
    metadata: String,
}

fn parse_index_record(line: &str) -> Result<IndexRecord, EngineError> {
    let fields: Vec<&str> = line.splitn(3, FIELD_SEPARATOR).collect();
    let [bucket_id, type_hex, metadata] = fields.as_slice() else {
        return Err(EngineError::BucketRecordCorrupted(line.to_owned()));
    };
    let policy_type = u16::from_str_radix(type_hex, 16)
        .map_err(|_| EngineError::BucketRecordCorrupted(line.to_owned()))?;
    Ok(IndexRecord {
        bucket_id: (*bucket_id).to_owned(),
        policy_type,
        metadata: (*metadata).to_owned(),
    })
}

struct BucketRecord {
    client: String,
    user: String,
    privilege: String,
    policy_type: u16,
    metadata: String,
}

fn parse_bucket_record(line: &str) -> Result<BucketRecord, EngineError> {
    let fields: Vec<&str> = line.splitn(5, FIELD_SEPARATOR).collect();
    let [client, user, privilege, type_hex, metadata] = fields.as_slice() else {
        return Err(EngineError::BucketRecordCorrupted(line.to_owned()));
    };
    let policy_type = u16::from_str_radix(type_hex, 16)
        .map_err(|_| EngineError::BucketRecordCorrupted(line.to_owned()))?;
    Ok(BucketRecord {
        client: (*client).to_owned(),
        user: (*user).to_owned(),
        privilege: (*privilege).to_owned(),
        policy_type,
        metadata: (*metadata).to_owned(),
    })
}

/// Replace `storage`'s contents with what `factory` holds: first read the
/// index to learn every bucket id and default result (clearing any prior
/// buckets other than the root first), then read each bucket's own
/// stream for its policies.
///
/// # Errors
///
/// Returns [`EngineError::BucketRecordCorrupted`] on a malformed line,
/// [`EngineError::BucketDeserialization`] if the index names a bucket
/// whose stream `factory` cannot open, or [`EngineError::Stream`] on I/O
/// failure.
pub fn load(storage: &mut Storage, factory: &impl StreamFactory) -> Result<(), EngineError> {
    load_inner(storage, factory).inspect_err(|err| error!(error = %err, "load failed"))
}

fn load_inner(storage: &mut Storage, factory: &impl StreamFactory) -> Result<(), EngineError> {
    storage.backend_mut().clear_all_but_root();

    let Some(index) = factory.index_reader()? else {
        // No prior checkpoint: an empty store (just the root bucket) is
        // the correct result, matching a fresh `Storage::new`.
        return Ok(());
    };
    let mut lines = BufReader::new(index).lines();

    let mut bucket_ids = Vec::new();
    while let Some(line) = lines.next().transpose().map_err(read_err)? {
        if line.is_empty() {
            break;
        }
        let record = parse_index_record(&line)?;
        let default_result = PolicyResult::new(record.policy_type, record.metadata);
        if record.bucket_id == ROOT_BUCKET_ID {
            storage.backend_mut().set_root_default(default_result);
        } else {
            storage
                .backend_mut()
                .insert_loaded_bucket(record.bucket_id.clone(), default_result);
        }
        bucket_ids.push(record.bucket_id);
    }

    for id in bucket_ids {
        let reader = factory
            .bucket_reader(&id)?
            .ok_or_else(|| EngineError::BucketDeserialization(id.clone()))?;
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next().transpose().map_err(read_err)? {
            if line.is_empty() {
                break;
            }
            let record = parse_bucket_record(&line)?;
            let key = PolicyKey::new(record.client, record.user, record.privilege);
            let result = PolicyResult::new(record.policy_type, record.metadata);
            storage
                .backend_mut()
                .insert_loaded_policy(&id, Policy::new(key, result))
                .map_err(|_| EngineError::BucketDeserialization(id.clone()))?;
        }
    }

    Ok(())
}

/// Run `bucket_filename` over a loaded id, for callers that need the
/// on-disk name a bucket id maps to (the daemon's checkpoint listing).
#[must_use]
pub fn filename_for(bucket_id: &str) -> &str {
    bucket_filename(bucket_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use policy_backend::MemoryStreamFactory;
    use std::collections::BTreeMap;
    use std::io::Read as _;

    #[test]
    fn round_trip_preserves_buckets_and_policies() {
        let mut storage = Storage::new(PolicyResult::deny());
        storage.add_or_update_bucket("B", PolicyResult::allow());
        let mut policies = BTreeMap::new();
        policies.insert(
            ROOT_BUCKET_ID.to_owned(),
            vec![Policy::new(PolicyKey::new("c", "u", "p"), PolicyResult::bucket("B"))],
        );
        policies.insert(
            "B".to_owned(),
            vec![Policy::new(PolicyKey::new("*", "u2", "p2"), PolicyResult::deny())],
        );
        storage.insert_policies(policies).unwrap();

        let factory = MemoryStreamFactory::new();
        dump(&storage, &factory).unwrap();

        let mut restored = Storage::new(PolicyResult::deny());
        load(&mut restored, &factory).unwrap();

        assert!(restored.backend().has_bucket("B"));
        let root_policies = restored.list_policies(ROOT_BUCKET_ID, None).unwrap();
        assert_eq!(root_policies.len(), 1);
        assert_eq!(root_policies[0].result, PolicyResult::bucket("B"));
        let b_policies = restored.list_policies("B", None).unwrap();
        assert_eq!(b_policies.len(), 1);
        assert_eq!(b_policies[0].result, PolicyResult::deny());
    }

    #[test]
    fn empty_store_dumps_to_a_single_default_record() {
        let storage = Storage::new(PolicyResult::allow());
        let factory = MemoryStreamFactory::new();
        dump(&storage, &factory).unwrap();

        let mut buf = String::new();
        factory
            .index_reader()
            .unwrap()
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, ";ffff;\n\n");
    }

    #[test]
    fn index_uses_reserved_filename_for_root() {
        assert_eq!(filename_for(ROOT_BUCKET_ID), "_root_");
        assert_eq!(filename_for("B"), "B");
    }

    #[test]
    fn corrupted_index_record_is_rejected() {
        assert!(parse_index_record("only-one-field").is_err());
        assert!(parse_index_record(";zzzz;").is_err());
        assert!(parse_index_record(";ffff;").is_ok());
    }

    #[test]
    fn corrupted_bucket_record_is_rejected() {
        assert!(parse_bucket_record("only;two").is_err());
        assert!(parse_bucket_record("c;u;p;zzzz;meta").is_err());
        assert!(parse_bucket_record("c;u;p;1a;meta").is_ok());
    }
}
