//! Checksummed container format for durable consensus metadata records.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! ┌───────────┬─────────┬─────────────┬──────────────┬──────────┐
//! │ magic (4) │ ver (4) │ payload len │ XXH3-64 (8)  │ payload  │
//! │  "TCMT"   │   u32   │   u32 (4)   │ over payload │ postcard │
//! └───────────┴─────────┴─────────────┴──────────────┴──────────┘
//! ```
//!
//! Readers verify magic, version, declared length, and checksum before
//! decoding, so a torn or bit-flipped file surfaces as `Corrupted` with the
//! failing check named rather than as a decode panic deeper in.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use snafu::ResultExt;
use xxhash_rust::xxh3::xxh3_64;

use crate::{
    env::{Env, OverwritePolicy, SyncPolicy},
    CodecSnafu, CorruptedSnafu, Result,
};

/// Magic bytes identifying a TabletDB consensus metadata container.
const CONTAINER_MAGIC: [u8; 4] = *b"TCMT";

/// Current container format version.
const CONTAINER_VERSION: u32 = 1;

/// Fixed header size: magic + version + length + checksum.
const HEADER_SIZE: usize = 4 + 4 + 4 + 8;

/// Serializes `record` into a container and writes it to `path` via `env`.
///
/// # Errors
///
/// Returns `Error::Codec` if serialization fails, `Error::AlreadyPresent`
/// under `NoOverwrite` when the destination exists, or `Error::Io` for
/// filesystem failures.
pub fn write_container_to_path<E: Env, T: Serialize>(
    env: &E,
    path: &Path,
    record: &T,
    overwrite: OverwritePolicy,
    sync: SyncPolicy,
) -> Result<()> {
    let payload = tabletdb_types::encode(record).context(CodecSnafu)?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&CONTAINER_MAGIC);
    buf.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&xxh3_64(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);

    env.write_file(path, &buf, overwrite, sync)
}

/// Reads and verifies a container at `path`, decoding its payload.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read and `Error::Corrupted`
/// if the magic, version, length, checksum, or payload decoding fails.
pub fn read_container_from_path<E: Env, T: DeserializeOwned>(env: &E, path: &Path) -> Result<T> {
    let buf = env.read_file(path)?;
    let path_str = path.display().to_string();

    let corrupted = |reason: String| CorruptedSnafu { path: path_str.clone(), reason }.build();

    if buf.len() < HEADER_SIZE {
        return Err(corrupted(format!("file too short: {} bytes", buf.len())));
    }
    if buf[0..4] != CONTAINER_MAGIC {
        return Err(corrupted("bad magic".to_string()));
    }
    // Slice conversions below are infallible: the length check above
    // guarantees at least HEADER_SIZE bytes.
    #[allow(clippy::unwrap_used)]
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != CONTAINER_VERSION {
        return Err(corrupted(format!("unsupported container version {version}")));
    }
    #[allow(clippy::unwrap_used)]
    let payload_len = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
    if buf.len() != HEADER_SIZE + payload_len {
        return Err(corrupted(format!(
            "length mismatch: header declares {payload_len} payload bytes, file has {}",
            buf.len() - HEADER_SIZE
        )));
    }
    #[allow(clippy::unwrap_used)]
    let expected = u64::from_le_bytes(buf[12..20].try_into().unwrap());
    let payload = &buf[HEADER_SIZE..];
    let actual = xxh3_64(payload);
    if actual != expected {
        return Err(corrupted(format!(
            "checksum mismatch: expected {expected:#018x}, got {actual:#018x}"
        )));
    }

    tabletdb_types::decode(payload)
        .map_err(|e| corrupted(format!("payload does not decode: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde::Deserialize;
    use tabletdb_test_utils::TestDir;

    use super::*;
    use crate::{env::DiskEnv, Error};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestRecord {
        term: i64,
        voted_for: Option<String>,
    }

    fn sample() -> TestRecord {
        TestRecord { term: 5, voted_for: Some("p2".to_string()) }
    }

    #[test]
    fn test_round_trip() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("cmeta");

        write_container_to_path(&env, &path, &sample(), OverwritePolicy::Overwrite, SyncPolicy::Sync)
            .unwrap();
        let read: TestRecord = read_container_from_path(&env, &path).unwrap();
        assert_eq!(read, sample());
    }

    #[test]
    fn test_truncated_file_is_corrupted() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("cmeta");

        write_container_to_path(&env, &path, &sample(), OverwritePolicy::Overwrite, SyncPolicy::NoSync)
            .unwrap();
        let full = env.read_file(&path).unwrap();
        env.write_file(&path, &full[..full.len() - 1], OverwritePolicy::Overwrite, SyncPolicy::NoSync)
            .unwrap();

        let err = read_container_from_path::<_, TestRecord>(&env, &path).unwrap_err();
        assert!(matches!(err, Error::Corrupted { ref reason, .. } if reason.contains("length")));
    }

    #[test]
    fn test_bit_flip_is_corrupted() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("cmeta");

        write_container_to_path(&env, &path, &sample(), OverwritePolicy::Overwrite, SyncPolicy::NoSync)
            .unwrap();
        let mut bytes = env.read_file(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        env.write_file(&path, &bytes, OverwritePolicy::Overwrite, SyncPolicy::NoSync).unwrap();

        let err = read_container_from_path::<_, TestRecord>(&env, &path).unwrap_err();
        assert!(
            matches!(err, Error::Corrupted { ref reason, .. } if reason.contains("checksum")),
            "got: {err}"
        );
    }

    #[test]
    fn test_bad_magic_is_corrupted() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("cmeta");

        env.write_file(&path, b"NOTACONTAINERATALL", OverwritePolicy::Overwrite, SyncPolicy::NoSync)
            .unwrap();
        let err = read_container_from_path::<_, TestRecord>(&env, &path).unwrap_err();
        assert!(matches!(err, Error::Corrupted { ref reason, .. } if reason.contains("magic")));
    }

    #[test]
    fn test_short_file_is_corrupted() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("cmeta");

        env.write_file(&path, b"TCMT", OverwritePolicy::Overwrite, SyncPolicy::NoSync).unwrap();
        let err = read_container_from_path::<_, TestRecord>(&env, &path).unwrap_err();
        assert!(matches!(err, Error::Corrupted { ref reason, .. } if reason.contains("short")));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let err = read_container_from_path::<_, TestRecord>(&env, &dir.join("nope")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_no_overwrite_preserves_existing_container() {
        let dir = TestDir::new();
        let env = DiskEnv;
        let path = dir.join("cmeta");

        write_container_to_path(&env, &path, &sample(), OverwritePolicy::NoOverwrite, SyncPolicy::NoSync)
            .unwrap();
        let other = TestRecord { term: 99, voted_for: None };
        let err = write_container_to_path(
            &env,
            &path,
            &other,
            OverwritePolicy::NoOverwrite,
            SyncPolicy::NoSync,
        )
        .unwrap_err();
        assert!(matches!(err, Error::AlreadyPresent { .. }));

        let read: TestRecord = read_container_from_path(&env, &path).unwrap();
        assert_eq!(read, sample());
    }
}
