//! Filesystem-backed checkpoint streams with atomic commit.
//!
//! Writes land in a shadow directory (`<live>.shadow`) next to the live
//! directory. Nothing under the live directory is touched until
//! [`FsStreamFactory::commit`] renames the shadow directory on top of it —
//! a single atomic operation on POSIX filesystems when both paths share a
//! mount point.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::{bucket_filename, StreamError, StreamFactory};

const INDEX_FILENAME: &str = "index";
const BUCKETS_DIRNAME: &str = "buckets";

/// A [`StreamFactory`] that reads from a live directory and writes into a
/// shadow directory pending commit.
///
/// # Examples
///
/// ```no_run
/// # use policy_backend::FsStreamFactory;
/// let factory = FsStreamFactory::begin_checkpoint("/var/lib/policy-engine/data").unwrap();
/// // ... dump through `factory` ...
/// factory.commit().unwrap();
/// ```
pub struct FsStreamFactory {
    live_dir: PathBuf,
    write_dir: PathBuf,
}

impl std::fmt::Debug for FsStreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStreamFactory")
            .field("live_dir", &self.live_dir)
            .field("write_dir", &self.write_dir)
            .finish()
    }
}

impl FsStreamFactory {
    /// Open `dir` for reading only — writes go nowhere useful because
    /// `write_dir` equals `live_dir`. Use this to `load` an existing
    /// checkpoint without intending to write one back.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if `dir` cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StreamError> {
        let live_dir = dir.as_ref().to_path_buf();
        ensure_dir(&live_dir)?;
        ensure_dir(&live_dir.join(BUCKETS_DIRNAME))?;
        Ok(Self {
            write_dir: live_dir.clone(),
            live_dir,
        })
    }

    /// Begin a checkpoint: reads still resolve against `live_dir`, but
    /// writes land in a freshly-created shadow directory beside it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if the shadow directory cannot be
    /// created.
    pub fn begin_checkpoint(live_dir: impl AsRef<Path>) -> Result<Self, StreamError> {
        let live_dir = live_dir.as_ref().to_path_buf();
        let write_dir = shadow_path(&live_dir);
        if write_dir.exists() {
            fs::remove_dir_all(&write_dir).map_err(|e| StreamError::Open {
                path: write_dir.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        ensure_dir(&write_dir)?;
        ensure_dir(&write_dir.join(BUCKETS_DIRNAME))?;
        Ok(Self {
            live_dir,
            write_dir,
        })
    }

    /// Atomically swap the shadow directory on top of the live directory.
    ///
    /// No-op (beyond consuming `self`) if this factory was opened with
    /// [`FsStreamFactory::open`] rather than
    /// [`FsStreamFactory::begin_checkpoint`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Commit`] if the rename fails.
    pub fn commit(self) -> Result<(), StreamError> {
        if self.write_dir == self.live_dir {
            return Ok(());
        }

        let backup = backup_path(&self.live_dir);
        if self.live_dir.exists() {
            fs::rename(&self.live_dir, &backup).map_err(|e| StreamError::Commit {
                from: self.live_dir.display().to_string(),
                to: backup.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        fs::rename(&self.write_dir, &self.live_dir).map_err(|e| StreamError::Commit {
            from: self.write_dir.display().to_string(),
            to: self.live_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if backup.exists() {
            let _ = fs::remove_dir_all(&backup);
        }

        info!(live_dir = %self.live_dir.display(), "checkpoint committed");
        Ok(())
    }
}

impl StreamFactory for FsStreamFactory {
    fn index_writer(&self) -> Result<Box<dyn Write>, StreamError> {
        let path = self.write_dir.join(INDEX_FILENAME);
        open_writer(&path)
    }

    fn bucket_writer(&self, bucket_id: &str) -> Result<Box<dyn Write>, StreamError> {
        let path = self
            .write_dir
            .join(BUCKETS_DIRNAME)
            .join(bucket_filename(bucket_id));
        open_writer(&path)
    }

    fn index_reader(&self) -> Result<Option<Box<dyn Read>>, StreamError> {
        let path = self.live_dir.join(INDEX_FILENAME);
        open_reader(&path)
    }

    fn bucket_reader(&self, bucket_id: &str) -> Result<Option<Box<dyn Read>>, StreamError> {
        let path = self
            .live_dir
            .join(BUCKETS_DIRNAME)
            .join(bucket_filename(bucket_id));
        open_reader(&path)
    }
}

fn shadow_path(live_dir: &Path) -> PathBuf {
    let mut name = live_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".shadow");
    live_dir.with_file_name(name)
}

fn backup_path(live_dir: &Path) -> PathBuf {
    let mut name = live_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".previous");
    live_dir.with_file_name(name)
}

fn ensure_dir(path: &Path) -> Result<(), StreamError> {
    fs::create_dir_all(path).map_err(|e| StreamError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn open_writer(path: &Path) -> Result<Box<dyn Write>, StreamError> {
    let file = File::create(path).map_err(|e| StreamError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Box::new(file))
}

fn open_reader(path: &Path) -> Result<Option<Box<dyn Read>>, StreamError> {
    match File::open(path) {
        Ok(file) => Ok(Some(Box::new(file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StreamError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ROOT_BUCKET_FILENAME;
    use std::io::Read as _;

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("policy-engine-fs-test-{}", uuid_like()));
        p
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }

    #[test]
    fn open_missing_bucket_returns_none() {
        let dir = tempdir();
        let factory = FsStreamFactory::open(&dir).unwrap();
        assert!(factory.bucket_reader("nope").unwrap().is_none());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn checkpoint_writes_are_invisible_until_commit() {
        let dir = tempdir();
        let factory = FsStreamFactory::open(&dir).unwrap();
        drop(factory);

        let checkpoint = FsStreamFactory::begin_checkpoint(&dir).unwrap();
        {
            let mut w = checkpoint.bucket_writer("b1").unwrap();
            w.write_all(b"hello\n").unwrap();
        }

        // Not yet visible through a reader opened against the live dir.
        let reader_factory = FsStreamFactory::open(&dir).unwrap();
        assert!(reader_factory.bucket_reader("b1").unwrap().is_none());

        checkpoint.commit().unwrap();

        let mut buf = String::new();
        reader_factory
            .bucket_reader("b1")
            .unwrap()
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "hello\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn root_bucket_uses_reserved_filename() {
        let dir = tempdir();
        let checkpoint = FsStreamFactory::begin_checkpoint(&dir).unwrap();
        {
            let mut w = checkpoint.bucket_writer("").unwrap();
            w.write_all(b";ffff;\n").unwrap();
        }
        checkpoint.commit().unwrap();

        let path = dir.join(BUCKETS_DIRNAME).join(ROOT_BUCKET_FILENAME);
        assert!(path.exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
