//! Per-tablet durable consensus metadata.
//!
//! [`ConsensusMetadata`] tracks a replica's Raft state: the durable record
//! (current term, vote, committed configuration) plus volatile state (the
//! pending configuration, the locally-believed leader, and the derived
//! active role). Mutation is serialized through an interior mutex; the one
//! exception is [`ConsensusMetadata::get_role_and_term`], which reads a
//! packed `(role, term)` word from an `AtomicU64` so vote checks and leader
//! lookups never contend with writers.
//!
//! # Packed (role, term) cache
//!
//! ```text
//!  63 62 61 60                                             0
//! ┌────────┬───────────────────────────────────────────────┐
//! │  role  │                     term                      │
//! └────────┴───────────────────────────────────────────────┘
//! ```
//!
//! Bits 0..=60 hold the term, bits 61..=63 the role. The role value `0b111`
//! encodes `RaftRole::Unknown`, whose wire discriminant (999) does not fit
//! in three bits. The all-ones term field is a sentinel meaning "the term
//! was not representable when packed": a corrupt persisted term must not
//! crash the process at pack time, so overflow is normalized to the
//! sentinel and detected when (if ever) the cache is read.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use tabletdb_types::{
    consensus_role, count_voters, is_raft_config_member, is_raft_config_voter, verify_raft_config,
    ConsensusState, DurabilityConfig, RaftGroupConfig, RaftRole,
};
use tracing::debug;

use crate::{
    container,
    env::{Env, OverwritePolicy, SyncPolicy},
    fault,
    fs_manager::FsManager,
    Error, InvalidArgumentSnafu, InvalidConfigSnafu, Result,
};

/// Smallest valid Raft term.
pub const MINIMUM_TERM: i64 = 0;

const PACKED_ROLE_BITS: u32 = 3;
const PACKED_TERM_BITS: u32 = u64::BITS - PACKED_ROLE_BITS;
const UNKNOWN_ROLE_PACKED: u64 = (1 << PACKED_ROLE_BITS) - 1;
const ROLE_MASK: u64 = UNKNOWN_ROLE_PACKED << PACKED_TERM_BITS;
const TERM_MASK: u64 = !ROLE_MASK;

/// Packs a role and term into a single word per the layout above.
///
/// A term that does not fit in the 61-bit field (only possible with corrupt
/// persisted data) is replaced by the sentinel value rather than panicking;
/// higher layers detect the anomaly through replica-failure reporting.
fn pack_role_and_term(role: RaftRole, term: i64) -> u64 {
    let mut term = term as u64;
    if term & ROLE_MASK != 0 {
        term = TERM_MASK;
    }
    let role = match role {
        RaftRole::Unknown => UNKNOWN_ROLE_PACKED,
        other => other as u64,
    };
    (role << PACKED_TERM_BITS) | term
}

fn unpack_role(packed: u64) -> RaftRole {
    match packed >> PACKED_TERM_BITS {
        0 => RaftRole::Follower,
        1 => RaftRole::Leader,
        2 => RaftRole::Learner,
        3 => RaftRole::NonParticipant,
        _ => RaftRole::Unknown,
    }
}

/// # Panics
///
/// Panics if the term field holds the overflow sentinel. Writers normalize
/// overflow to the sentinel before storing, so reaching it here means the
/// caller read the cache of a metadata object it already knows is corrupt.
fn unpack_term(packed: u64) -> i64 {
    let term = packed & TERM_MASK;
    assert!(term != TERM_MASK, "packed term is invalid: {term}");
    term as i64
}

/// The durable portion of a tablet's consensus state, as persisted in the
/// metadata container file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMetadataRecord {
    /// Last-known leader term for this tablet.
    pub current_term: i64,
    /// Peer this replica voted for in `current_term`, if any.
    pub voted_for: Option<String>,
    /// The committed Raft configuration.
    pub committed_config: RaftGroupConfig,
}

/// Which configuration a config-valued accessor should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// The pending config if one exists, else the committed config.
    Active,
    /// The committed config.
    Committed,
    /// The pending config; requesting it when none exists is a caller bug.
    Pending,
}

/// Overwrite behavior of [`ConsensusMetadata::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Replace any existing metadata file.
    Overwrite,
    /// Fail with `AlreadyPresent` if a metadata file exists.
    NoOverwrite,
}

/// Initial-flush behavior of [`ConsensusMetadata::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Persist the fresh record immediately (without clobbering).
    FlushOnCreate,
    /// Leave the record in memory only; fail if a file already exists.
    NoFlush,
}

/// Volatile and durable state behind the mutation lock.
#[derive(Debug)]
struct Inner {
    record: ConsensusMetadataRecord,
    pending_config: Option<RaftGroupConfig>,
    leader_uuid: String,
    active_role: RaftRole,
    flush_count_for_tests: u64,
    on_disk_size: u64,
}

/// Durable consensus metadata for one tablet replica.
///
/// Mutators serialize on an interior mutex, and every mutation leaves the
/// derived state (`active_role`, the packed cache) consistent before it
/// returns. [`get_role_and_term`](Self::get_role_and_term) is the lock-free
/// read path for hot callers.
#[derive(Debug)]
pub struct ConsensusMetadata<E: Env> {
    fs: Arc<FsManager<E>>,
    options: DurabilityConfig,
    tablet_id: String,
    peer_uuid: String,
    inner: Mutex<Inner>,
    /// Packed `(active_role, current_term)`; see the module docs for layout.
    role_and_term_cache: AtomicU64,
}

impl<E: Env> ConsensusMetadata<E> {
    fn new(
        fs: Arc<FsManager<E>>,
        options: DurabilityConfig,
        tablet_id: String,
        peer_uuid: String,
        record: ConsensusMetadataRecord,
    ) -> Self {
        let cache = pack_role_and_term(RaftRole::Unknown, record.current_term);
        Self {
            fs,
            options,
            tablet_id,
            peer_uuid,
            inner: Mutex::new(Inner {
                record,
                pending_config: None,
                leader_uuid: String::new(),
                active_role: RaftRole::Unknown,
                flush_count_for_tests: 0,
                on_disk_size: 0,
            }),
            role_and_term_cache: AtomicU64::new(cache),
        }
    }

    /// Creates fresh consensus metadata for a tablet.
    ///
    /// Under [`CreateMode::FlushOnCreate`] the record is persisted with a
    /// non-clobbering write; under [`CreateMode::NoFlush`] the record stays
    /// in memory, but creation still fails if a metadata file already
    /// exists on disk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `current_term` is negative,
    /// `AlreadyPresent` if a metadata file exists, and the flush errors of
    /// [`flush`](Self::flush) under `FlushOnCreate`.
    pub fn create(
        fs: Arc<FsManager<E>>,
        options: DurabilityConfig,
        tablet_id: impl Into<String>,
        peer_uuid: impl Into<String>,
        config: RaftGroupConfig,
        current_term: i64,
        mode: CreateMode,
    ) -> Result<Arc<Self>> {
        ensure!(
            current_term >= MINIMUM_TERM,
            InvalidArgumentSnafu { message: format!("term must be non-negative, got {current_term}") }
        );
        let tablet_id = tablet_id.into();
        let record = ConsensusMetadataRecord {
            current_term,
            voted_for: None,
            committed_config: config,
        };
        let cmeta = Arc::new(Self::new(fs, options, tablet_id, peer_uuid.into(), record));

        {
            let mut inner = cmeta.inner.lock();
            cmeta.update_active_role(&mut inner);
        }

        match mode {
            CreateMode::FlushOnCreate => {
                // Create must never clobber existing metadata.
                cmeta.flush(FlushMode::NoOverwrite)?;
            }
            CreateMode::NoFlush => {
                let path = cmeta.fs.consensus_metadata_path(&cmeta.tablet_id);
                if cmeta.fs.env().file_exists(&path) {
                    return Err(Error::AlreadyPresent { path: path.display().to_string() });
                }
            }
        }
        Ok(cmeta)
    }

    /// Loads consensus metadata from the tablet's persisted record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Corrupted` if it does
    /// not verify or decode.
    pub fn load(
        fs: Arc<FsManager<E>>,
        options: DurabilityConfig,
        tablet_id: impl Into<String>,
        peer_uuid: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let tablet_id = tablet_id.into();
        let path = fs.consensus_metadata_path(&tablet_id);
        let record: ConsensusMetadataRecord =
            container::read_container_from_path(fs.env().as_ref(), &path)?;
        let cmeta = Arc::new(Self::new(fs, options, tablet_id, peer_uuid.into(), record));

        let mut inner = cmeta.inner.lock();
        cmeta.update_active_role(&mut inner);
        cmeta.update_on_disk_size(&mut inner)?;
        drop(inner);
        Ok(cmeta)
    }

    /// Removes the tablet's persisted metadata file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be deleted (including when it does
    /// not exist).
    pub fn delete_on_disk_data(fs: &FsManager<E>, tablet_id: &str) -> Result<()> {
        let path = fs.consensus_metadata_path(tablet_id);
        fs.env().delete_file(&path).map_err(|e| {
            prefix_io(e, format!("Unable to delete consensus metadata file for tablet {tablet_id}"))
        })
    }

    /// The tablet this metadata belongs to.
    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    /// This replica's own permanent UUID.
    pub fn peer_uuid(&self) -> &str {
        &self.peer_uuid
    }

    /// Current Raft term.
    pub fn current_term(&self) -> i64 {
        self.inner.lock().record.current_term
    }

    /// Sets the current term.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `term` is negative.
    pub fn set_current_term(&self, term: i64) -> Result<()> {
        ensure!(
            term >= MINIMUM_TERM,
            InvalidArgumentSnafu { message: format!("term must be non-negative, got {term}") }
        );
        let mut inner = self.inner.lock();
        inner.record.current_term = term;
        self.update_role_and_term_cache(&inner);
        Ok(())
    }

    /// Returns true if this replica has voted in the current term.
    pub fn has_voted_for(&self) -> bool {
        self.inner.lock().record.voted_for.is_some()
    }

    /// The peer voted for in the current term, if any.
    pub fn voted_for(&self) -> Option<String> {
        self.inner.lock().record.voted_for.clone()
    }

    /// Records a vote for `uuid` in the current term.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `uuid` is empty.
    pub fn set_voted_for(&self, uuid: impl Into<String>) -> Result<()> {
        let uuid = uuid.into();
        ensure!(
            !uuid.is_empty(),
            InvalidArgumentSnafu { message: "voted_for must not be empty".to_string() }
        );
        self.inner.lock().record.voted_for = Some(uuid);
        Ok(())
    }

    /// Clears the recorded vote.
    pub fn clear_voted_for(&self) {
        self.inner.lock().record.voted_for = None;
    }

    /// The committed Raft configuration.
    pub fn committed_config(&self) -> RaftGroupConfig {
        self.inner.lock().record.committed_config.clone()
    }

    /// Replaces the committed configuration.
    ///
    /// The active role is re-derived unless a pending config supersedes the
    /// committed one for active queries.
    pub fn set_committed_config(&self, config: RaftGroupConfig) {
        let mut inner = self.inner.lock();
        inner.record.committed_config = config;
        if inner.pending_config.is_none() {
            self.update_active_role(&mut inner);
        }
    }

    /// Returns true if a membership change is in flight.
    pub fn has_pending_config(&self) -> bool {
        self.inner.lock().pending_config.is_some()
    }

    /// The pending (uncommitted) configuration.
    ///
    /// # Panics
    ///
    /// Panics if no pending config exists; callers check
    /// [`has_pending_config`](Self::has_pending_config) first.
    pub fn pending_config(&self) -> RaftGroupConfig {
        let inner = self.inner.lock();
        inner
            .pending_config
            .clone()
            .unwrap_or_else(|| panic!("T {} P {}: no pending config", self.tablet_id, self.peer_uuid))
    }

    /// Installs a pending configuration and re-derives the active role.
    pub fn set_pending_config(&self, config: RaftGroupConfig) {
        let mut inner = self.inner.lock();
        inner.pending_config = Some(config);
        self.update_active_role(&mut inner);
    }

    /// Discards the pending configuration and re-derives the active role.
    pub fn clear_pending_config(&self) {
        let mut inner = self.inner.lock();
        inner.pending_config = None;
        self.update_active_role(&mut inner);
    }

    /// The active configuration: pending if present, else committed.
    pub fn active_config(&self) -> RaftGroupConfig {
        let inner = self.inner.lock();
        Self::config_of(&inner, ConfigKind::Active, &self.tablet_id, &self.peer_uuid).clone()
    }

    /// Returns the configuration of the requested kind.
    ///
    /// # Panics
    ///
    /// Panics for [`ConfigKind::Pending`] when no pending config exists.
    pub fn get_config(&self, kind: ConfigKind) -> RaftGroupConfig {
        let inner = self.inner.lock();
        Self::config_of(&inner, kind, &self.tablet_id, &self.peer_uuid).clone()
    }

    /// `opid_index` of the configuration of the requested kind.
    ///
    /// # Panics
    ///
    /// Panics for [`ConfigKind::Pending`] when no pending config exists.
    pub fn get_config_opid_index(&self, kind: ConfigKind) -> i64 {
        let inner = self.inner.lock();
        Self::config_of(&inner, kind, &self.tablet_id, &self.peer_uuid).opid_index
    }

    /// Number of voters in the configuration of the requested kind.
    pub fn count_voters_in_config(&self, kind: ConfigKind) -> usize {
        let inner = self.inner.lock();
        count_voters(Self::config_of(&inner, kind, &self.tablet_id, &self.peer_uuid))
    }

    /// Returns true if `uuid` is a voter in the configuration of the
    /// requested kind.
    pub fn is_voter_in_config(&self, uuid: &str, kind: ConfigKind) -> bool {
        let inner = self.inner.lock();
        is_raft_config_voter(uuid, Self::config_of(&inner, kind, &self.tablet_id, &self.peer_uuid))
    }

    /// Returns true if `uuid` is a member of the configuration of the
    /// requested kind.
    pub fn is_member_in_config(&self, uuid: &str, kind: ConfigKind) -> bool {
        let inner = self.inner.lock();
        is_raft_config_member(uuid, Self::config_of(&inner, kind, &self.tablet_id, &self.peer_uuid))
    }

    /// UUID of the peer currently believed to be leader; empty if unknown.
    pub fn leader_uuid(&self) -> String {
        self.inner.lock().leader_uuid.clone()
    }

    /// Records the locally-believed leader (empty string = unknown) and
    /// re-derives the active role.
    pub fn set_leader_uuid(&self, uuid: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.leader_uuid = uuid.into();
        self.update_active_role(&mut inner);
    }

    /// The role this replica currently plays in its consensus group.
    pub fn active_role(&self) -> RaftRole {
        self.inner.lock().active_role
    }

    /// Returns a consistent snapshot of the visible consensus state.
    pub fn to_consensus_state(&self) -> ConsensusState {
        let inner = self.inner.lock();
        ConsensusState {
            current_term: inner.record.current_term,
            leader_uuid: if inner.leader_uuid.is_empty() {
                None
            } else {
                Some(inner.leader_uuid.clone())
            },
            committed_config: inner.record.committed_config.clone(),
            pending_config: inner.pending_config.clone(),
        }
    }

    /// Adopts a remote authoritative consensus state.
    ///
    /// If the remote term is newer, it is adopted and the local vote is
    /// cleared. The local leader belief and any pending membership change
    /// are always invalidated: the remote snapshot supersedes both.
    pub fn merge_committed_consensus_state(&self, state: &ConsensusState) {
        let mut inner = self.inner.lock();
        if state.current_term > inner.record.current_term {
            inner.record.current_term = state.current_term;
            inner.record.voted_for = None;
        }
        inner.leader_uuid.clear();
        inner.record.committed_config = state.committed_config.clone();
        inner.pending_config = None;
        self.update_active_role(&mut inner);
    }

    /// Number of flushes attempted on this object. Test observability.
    pub fn flush_count_for_tests(&self) -> u64 {
        self.inner.lock().flush_count_for_tests
    }

    /// Size in bytes of the persisted record as of the last flush or load.
    pub fn on_disk_size(&self) -> u64 {
        self.inner.lock().on_disk_size
    }

    /// Persists the durable record.
    ///
    /// The committed config is verified first; nothing is written if it
    /// fails. The file is fsynced per the durability policy (see
    /// `DurabilityConfig::should_fsync`), and when this flush had to create
    /// the metadata directory, the parent directory is fsynced so the new
    /// directory entry itself is durable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if verification fails, `AlreadyPresent`
    /// under [`FlushMode::NoOverwrite`] when a file exists, and `Io` for
    /// filesystem failures.
    pub fn flush(&self, mode: FlushMode) -> Result<()> {
        let mut inner = self.inner.lock();
        fault::maybe_crash(self.options.fault_crash_before_cmeta_flush);
        inner.flush_count_for_tests += 1;

        // Sanity check: never write out a bad configuration.
        verify_raft_config(&inner.record.committed_config).context(InvalidConfigSnafu)?;

        let dir = self.fs.consensus_metadata_dir();
        let created = self
            .fs
            .env()
            .create_dir_if_missing(&dir)
            .map_err(|e| prefix_io(e, "Unable to create consensus metadata root dir".to_string()))?;
        if created {
            if let Some(parent) = dir.parent() {
                self.fs.env().sync_dir(parent).map_err(|e| {
                    prefix_io(e, format!("Unable to fsync consensus parent dir {}", parent.display()))
                })?;
            }
        }

        let path = self.fs.consensus_metadata_path(&self.tablet_id);
        let overwrite = match mode {
            FlushMode::Overwrite => OverwritePolicy::Overwrite,
            FlushMode::NoOverwrite => OverwritePolicy::NoOverwrite,
        };
        let sync = if self.options.should_fsync(self.fs.meta_on_xfs()) {
            SyncPolicy::Sync
        } else {
            SyncPolicy::NoSync
        };
        container::write_container_to_path(self.fs.env().as_ref(), &path, &inner.record, overwrite, sync)
            .map_err(|e| {
                prefix_io(
                    e,
                    format!(
                        "Unable to write consensus meta file for tablet {} to path {}",
                        self.tablet_id,
                        path.display()
                    ),
                )
            })?;
        debug!(
            tablet_id = %self.tablet_id,
            peer_uuid = %self.peer_uuid,
            path = %path.display(),
            synced = sync == SyncPolicy::Sync,
            "Flushed consensus metadata"
        );
        self.update_on_disk_size(&mut inner)
    }

    /// Returns `(active_role, current_term)` from one atomic load of the
    /// packed cache, without taking the mutation lock.
    ///
    /// Either field may be stale relative to an in-flight mutator, but the
    /// pair is always internally consistent: both values were installed by
    /// the same mutation.
    ///
    /// # Panics
    ///
    /// Panics if the cached term holds the overflow sentinel (the object is
    /// known-corrupt; see the module docs).
    pub fn get_role_and_term(&self) -> (RaftRole, i64) {
        let packed = self.role_and_term_cache.load(Ordering::Relaxed);
        (unpack_role(packed), unpack_term(packed))
    }

    fn config_of<'a>(
        inner: &'a Inner,
        kind: ConfigKind,
        tablet_id: &str,
        peer_uuid: &str,
    ) -> &'a RaftGroupConfig {
        match kind {
            ConfigKind::Active => {
                inner.pending_config.as_ref().unwrap_or(&inner.record.committed_config)
            }
            ConfigKind::Committed => &inner.record.committed_config,
            ConfigKind::Pending => inner
                .pending_config
                .as_ref()
                .unwrap_or_else(|| panic!("T {tablet_id} P {peer_uuid}: no pending config")),
        }
    }

    fn update_active_role(&self, inner: &mut Inner) {
        let active = inner.pending_config.as_ref().unwrap_or(&inner.record.committed_config);
        inner.active_role = consensus_role(&self.peer_uuid, &inner.leader_uuid, active);
        self.update_role_and_term_cache(inner);
        debug!(
            tablet_id = %self.tablet_id,
            peer_uuid = %self.peer_uuid,
            role = %inner.active_role,
            term = inner.record.current_term,
            "Updated active role"
        );
    }

    fn update_role_and_term_cache(&self, inner: &Inner) {
        // Relaxed suffices: readers only require the (role, term) pair to be
        // a single word some mutation installed, not ordering with respect
        // to other state.
        self.role_and_term_cache.store(
            pack_role_and_term(inner.active_role, inner.record.current_term),
            Ordering::Relaxed,
        );
    }

    fn update_on_disk_size(&self, inner: &mut Inner) -> Result<()> {
        let path = self.fs.consensus_metadata_path(&self.tablet_id);
        inner.on_disk_size = self.fs.env().file_size(&path)?;
        Ok(())
    }
}

fn prefix_io(err: Error, prefix: String) -> Error {
    match err {
        Error::Io { context, source } => {
            Error::Io { context: format!("{prefix}: {context}"), source }
        }
        other => other,
    }
}
