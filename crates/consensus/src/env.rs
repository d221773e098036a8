//! Filesystem collaborator for consensus metadata.
//!
//! The [`Env`] trait abstracts the handful of filesystem capabilities the
//! metadata store needs, allowing tests to interpose while production uses
//! [`DiskEnv`] on `std::fs`.
//!
//! # Atomic replacement
//!
//! `write_file` with [`OverwritePolicy::Overwrite`] never leaves a torn
//! destination: the new contents go to a temp file in the target directory,
//! which is optionally fsynced and then renamed over the destination. A
//! crash at any point leaves either the old complete file or the new one.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use snafu::ResultExt;

use crate::{AlreadyPresentSnafu, IoSnafu, Result};

/// Whether a write may replace an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Replace the destination if it exists.
    Overwrite,
    /// Fail with `AlreadyPresent` if the destination exists.
    NoOverwrite,
}

/// Whether a write must reach durable storage before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync the file (and the directory, for renames) before returning.
    Sync,
    /// Let the OS write back at its leisure.
    NoSync,
}

/// Filesystem capabilities required by the consensus metadata store.
pub trait Env: Send + Sync {
    /// Returns true if `path` exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Creates `path` as a directory if it does not exist.
    ///
    /// Returns `true` if this call created the directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if creation fails for any reason other than the
    /// directory already existing.
    fn create_dir_if_missing(&self, path: &Path) -> Result<bool>;

    /// Synchronizes a directory's entries to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be opened or fsynced.
    fn sync_dir(&self, path: &Path) -> Result<()>;

    /// Returns the size of the file at `path` in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Deletes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be removed.
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Reads the entire file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Writes `data` as the complete contents of `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyPresent` under [`OverwritePolicy::NoOverwrite`]
    /// if the destination exists, `Error::Io` for any filesystem failure.
    fn write_file(
        &self,
        path: &Path,
        data: &[u8],
        overwrite: OverwritePolicy,
        sync: SyncPolicy,
    ) -> Result<()>;
}

/// Production [`Env`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskEnv;

impl DiskEnv {
    fn io_context(path: &Path, what: &str) -> String {
        format!("{what} {}", path.display())
    }
}

impl Env for DiskEnv {
    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_if_missing(&self, path: &Path) -> Result<bool> {
        match fs::create_dir(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
            Err(e) => {
                Err(e).context(IoSnafu { context: Self::io_context(path, "Unable to create dir") })
            }
        }
    }

    fn sync_dir(&self, path: &Path) -> Result<()> {
        let dir = File::open(path)
            .context(IoSnafu { context: Self::io_context(path, "Unable to open dir") })?;
        dir.sync_all()
            .context(IoSnafu { context: Self::io_context(path, "Unable to fsync dir") })
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path)
            .context(IoSnafu { context: Self::io_context(path, "Unable to stat") })?;
        Ok(meta.len())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .context(IoSnafu { context: Self::io_context(path, "Unable to delete") })
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).context(IoSnafu { context: Self::io_context(path, "Unable to read") })
    }

    fn write_file(
        &self,
        path: &Path,
        data: &[u8],
        overwrite: OverwritePolicy,
        sync: SyncPolicy,
    ) -> Result<()> {
        match overwrite {
            OverwritePolicy::NoOverwrite => {
                // create_new makes existence check + create atomic; no
                // temp-file dance is needed since there is nothing to tear.
                let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
                    Ok(f) => f,
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        return AlreadyPresentSnafu { path: path.display().to_string() }.fail();
                    }
                    Err(e) => {
                        return Err(e).context(IoSnafu {
                            context: Self::io_context(path, "Unable to create"),
                        });
                    }
                };
                file.write_all(data)
                    .context(IoSnafu { context: Self::io_context(path, "Unable to write") })?;
                if sync == SyncPolicy::Sync {
                    file.sync_all()
                        .context(IoSnafu { context: Self::io_context(path, "Unable to fsync") })?;
                }
                Ok(())
            }
            OverwritePolicy::Overwrite => {
                let parent = path.parent().unwrap_or_else(|| Path::new("."));
                // Append rather than with_extension: the destination name
                // may itself contain dots.
                let tmp_path = {
                    let mut name = path.as_os_str().to_owned();
                    name.push(".tmp");
                    std::path::PathBuf::from(name)
                };

                let mut tmp = File::create(&tmp_path).context(IoSnafu {
                    context: Self::io_context(&tmp_path, "Unable to create temp file"),
                })?;
                tmp.write_all(data).context(IoSnafu {
                    context: Self::io_context(&tmp_path, "Unable to write temp file"),
                })?;
                if sync == SyncPolicy::Sync {
                    tmp.sync_all().context(IoSnafu {
                        context: Self::io_context(&tmp_path, "Unable to fsync temp file"),
                    })?;
                }
                drop(tmp);

                fs::rename(&tmp_path, path)
                    .context(IoSnafu { context: Self::io_context(path, "Unable to rename over") })?;
                if sync == SyncPolicy::Sync {
                    // The rename itself must be durable, not just the data.
                    self.sync_dir(parent)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tabletdb_test_utils::TestDir;

    use super::*;
    use crate::Error;

    #[test]
    fn test_create_dir_if_missing_reports_creation() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let target = dir.join("subdir");

        assert!(env.create_dir_if_missing(&target).unwrap(), "first call creates");
        assert!(!env.create_dir_if_missing(&target).unwrap(), "second call is a no-op");
        assert!(target.is_dir());
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("record");

        env.write_file(&path, b"payload", OverwritePolicy::Overwrite, SyncPolicy::NoSync)
            .unwrap();
        assert_eq!(env.read_file(&path).unwrap(), b"payload");
        assert_eq!(env.file_size(&path).unwrap(), 7);
    }

    #[test]
    fn test_no_overwrite_fails_on_existing_file() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("record");

        env.write_file(&path, b"first", OverwritePolicy::NoOverwrite, SyncPolicy::NoSync)
            .unwrap();
        let err = env
            .write_file(&path, b"second", OverwritePolicy::NoOverwrite, SyncPolicy::NoSync)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyPresent { .. }), "got: {err}");
        // The original contents survive.
        assert_eq!(env.read_file(&path).unwrap(), b"first");
    }

    #[test]
    fn test_overwrite_replaces_contents() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("record");

        env.write_file(&path, b"old", OverwritePolicy::Overwrite, SyncPolicy::NoSync).unwrap();
        env.write_file(&path, b"new", OverwritePolicy::Overwrite, SyncPolicy::Sync).unwrap();
        assert_eq!(env.read_file(&path).unwrap(), b"new");
    }

    #[test]
    fn test_overwrite_leaves_no_temp_file() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("record");

        env.write_file(&path, b"data", OverwritePolicy::Overwrite, SyncPolicy::Sync).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_delete_file() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("record");

        env.write_file(&path, b"x", OverwritePolicy::Overwrite, SyncPolicy::NoSync).unwrap();
        assert!(env.file_exists(&path));
        env.delete_file(&path).unwrap();
        assert!(!env.file_exists(&path));

        let err = env.delete_file(&path).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_file_size_missing_file_is_io_error() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let err = env.file_size(&dir.join("nope")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_sync_dir() {
        let dir = TestDir::new();
        let env = DiskEnv;
        env.sync_dir(dir.path()).unwrap();
    }
}
