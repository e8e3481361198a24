//! In-memory checkpoint streams, for tests.
//!
//! All data lives in a `Mutex`-guarded map and is lost when the factory
//! is dropped. No directory, no rename — writes are visible to
//! subsequent reads immediately, which is fine for tests that don't care
//! about the atomic commit behavior `FsStreamFactory` provides.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::{StreamError, StreamFactory};

#[derive(Debug, Default)]
struct State {
    index: Option<Vec<u8>>,
    buckets: HashMap<String, Vec<u8>>,
}

/// An in-memory [`StreamFactory`] backed by a shared map.
///
/// # Examples
///
/// ```
/// # use policy_backend::{MemoryStreamFactory, StreamFactory};
/// # use std::io::Write;
/// let factory = MemoryStreamFactory::new();
/// write!(factory.index_writer().unwrap(), ";ffff;").unwrap();
/// assert!(factory.index_reader().unwrap().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStreamFactory {
    state: Arc<Mutex<State>>,
}

impl MemoryStreamFactory {
    /// Create a new, empty in-memory checkpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct SharedWriter {
    state: Arc<Mutex<State>>,
    target: WriteTarget,
    buf: Vec<u8>,
}

enum WriteTarget {
    Index,
    Bucket(String),
}

impl Write for SharedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SharedWriter {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match &self.target {
            WriteTarget::Index => state.index = Some(std::mem::take(&mut self.buf)),
            WriteTarget::Bucket(id) => {
                state.buckets.insert(id.clone(), std::mem::take(&mut self.buf));
            }
        }
    }
}

impl StreamFactory for MemoryStreamFactory {
    fn index_writer(&self) -> Result<Box<dyn Write>, StreamError> {
        Ok(Box::new(SharedWriter {
            state: Arc::clone(&self.state),
            target: WriteTarget::Index,
            buf: Vec::new(),
        }))
    }

    fn bucket_writer(&self, bucket_id: &str) -> Result<Box<dyn Write>, StreamError> {
        Ok(Box::new(SharedWriter {
            state: Arc::clone(&self.state),
            target: WriteTarget::Bucket(bucket_id.to_owned()),
            buf: Vec::new(),
        }))
    }

    fn index_reader(&self) -> Result<Option<Box<dyn Read>>, StreamError> {
        let state = self.state.lock().map_err(|_| StreamError::Read {
            reason: "poisoned lock".to_owned(),
        })?;
        Ok(state
            .index
            .clone()
            .map(|bytes| Box::new(io::Cursor::new(bytes)) as Box<dyn Read>))
    }

    fn bucket_reader(&self, bucket_id: &str) -> Result<Option<Box<dyn Read>>, StreamError> {
        let state = self.state.lock().map_err(|_| StreamError::Read {
            reason: "poisoned lock".to_owned(),
        })?;
        Ok(state
            .buckets
            .get(bucket_id)
            .cloned()
            .map(|bytes| Box::new(io::Cursor::new(bytes)) as Box<dyn Read>))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn index_roundtrip() {
        let factory = MemoryStreamFactory::new();
        {
            let mut w = factory.index_writer().unwrap();
            w.write_all(b";ffff;\n").unwrap();
        }
        let mut buf = String::new();
        factory
            .index_reader()
            .unwrap()
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, ";ffff;\n");
    }

    #[test]
    fn missing_bucket_reader_is_none() {
        let factory = MemoryStreamFactory::new();
        assert!(factory.bucket_reader("nope").unwrap().is_none());
    }

    #[test]
    fn bucket_writer_overwrites() {
        let factory = MemoryStreamFactory::new();
        {
            let mut w = factory.bucket_writer("b1").unwrap();
            w.write_all(b"first").unwrap();
        }
        {
            let mut w = factory.bucket_writer("b1").unwrap();
            w.write_all(b"second").unwrap();
        }
        let mut buf = String::new();
        factory
            .bucket_reader("b1")
            .unwrap()
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "second");
    }

    #[test]
    fn clone_shares_state() {
        let factory = MemoryStreamFactory::new();
        let clone = factory.clone();
        {
            let mut w = factory.bucket_writer("b1").unwrap();
            w.write_all(b"value").unwrap();
        }
        assert!(clone.bucket_reader("b1").unwrap().is_some());
    }
}
