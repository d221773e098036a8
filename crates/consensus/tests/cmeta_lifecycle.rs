//! End-to-end lifecycle tests for consensus metadata: create, load, vote,
//! membership changes, merges, and flush durability.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use tabletdb_consensus::{
    ConfigKind, ConsensusMetadata, CreateMode, DiskEnv, Error, FlushMode, FsManager,
};
use tabletdb_test_utils::TestDir;
use tabletdb_types::{ConsensusState, DurabilityConfig, RaftGroupConfig, RaftRole};

fn fs_manager(dir: &TestDir) -> Arc<FsManager<DiskEnv>> {
    Arc::new(FsManager::new(Arc::new(DiskEnv), dir.path(), false))
}

fn three_voters() -> RaftGroupConfig {
    RaftGroupConfig::with_voters(0, ["p1", "p2", "p3"])
}

#[test]
fn test_fresh_create_then_load() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    let created = ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");
    assert_eq!(created.flush_count_for_tests(), 1);
    assert!(created.on_disk_size() > 0);

    let loaded = ConsensusMetadata::load(fs, DurabilityConfig::default(), "t1", "p1")
        .expect("load");
    assert_eq!(loaded.current_term(), 1);
    assert_eq!(loaded.committed_config(), three_voters());
    // A fresh voter with no known leader participates as a follower.
    assert_eq!(loaded.active_role(), RaftRole::Follower);
    assert!(!loaded.has_pending_config());
    assert!(!loaded.has_voted_for());
    assert_eq!(loaded.on_disk_size(), created.on_disk_size());
}

#[test]
fn test_vote_and_flush_round_trip() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    let cmeta = ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");

    cmeta.set_current_term(5).expect("set term");
    cmeta.set_voted_for("p2").expect("set vote");
    cmeta.flush(FlushMode::Overwrite).expect("flush");

    let reloaded = ConsensusMetadata::load(fs, DurabilityConfig::default(), "t1", "p1")
        .expect("reload");
    assert_eq!(reloaded.current_term(), 5);
    assert_eq!(reloaded.voted_for().as_deref(), Some("p2"));
    assert_eq!(reloaded.get_role_and_term(), (RaftRole::Follower, 5));
}

#[test]
fn test_pending_config_then_commit() {
    let dir = TestDir::new();
    let cmeta = ConsensusMetadata::create(
        fs_manager(&dir),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");

    let four_voters = RaftGroupConfig::with_voters(2, ["p1", "p2", "p3", "p4"]);
    cmeta.set_pending_config(four_voters.clone());
    assert_eq!(cmeta.count_voters_in_config(ConfigKind::Active), 4);
    assert_eq!(cmeta.count_voters_in_config(ConfigKind::Committed), 3);

    cmeta.set_committed_config(four_voters.clone());
    cmeta.clear_pending_config();

    assert!(!cmeta.has_pending_config());
    assert_eq!(cmeta.active_config(), four_voters);
    assert_eq!(cmeta.committed_config(), four_voters);
    assert_eq!(cmeta.count_voters_in_config(ConfigKind::Active), 4);
    assert_eq!(cmeta.active_role(), RaftRole::Follower);
}

#[test]
fn test_merge_with_higher_term_clears_vote_and_leader() {
    let dir = TestDir::new();
    let cmeta = ConsensusMetadata::create(
        fs_manager(&dir),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        3,
        CreateMode::FlushOnCreate,
    )
    .expect("create");
    cmeta.set_voted_for("p1").expect("set vote");
    cmeta.set_leader_uuid("p1");
    cmeta.set_pending_config(RaftGroupConfig::with_voters(5, ["p1", "p2", "p3", "p4"]));

    let remote_config = RaftGroupConfig::with_voters(9, ["p1", "p2", "p5"]);
    cmeta.merge_committed_consensus_state(&ConsensusState {
        current_term: 7,
        leader_uuid: None,
        committed_config: remote_config.clone(),
        pending_config: None,
    });

    assert_eq!(cmeta.current_term(), 7);
    assert!(!cmeta.has_voted_for());
    assert_eq!(cmeta.leader_uuid(), "");
    assert_eq!(cmeta.committed_config(), remote_config);
    assert!(!cmeta.has_pending_config());
    assert_eq!(cmeta.get_role_and_term(), (RaftRole::Follower, 7));
}

#[test]
fn test_merge_with_older_term_keeps_term_and_vote() {
    let dir = TestDir::new();
    let cmeta = ConsensusMetadata::create(
        fs_manager(&dir),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        9,
        CreateMode::FlushOnCreate,
    )
    .expect("create");
    cmeta.set_voted_for("p3").expect("set vote");
    cmeta.set_leader_uuid("p3");

    cmeta.merge_committed_consensus_state(&ConsensusState {
        current_term: 4,
        leader_uuid: None,
        committed_config: three_voters(),
        pending_config: None,
    });

    // An older remote term does not roll back the local term or vote, but
    // leader belief and pending config are still invalidated.
    assert_eq!(cmeta.current_term(), 9);
    assert_eq!(cmeta.voted_for().as_deref(), Some("p3"));
    assert_eq!(cmeta.leader_uuid(), "");
}

#[test]
fn test_flush_overwrite_is_idempotent() {
    let dir = TestDir::new();
    let cmeta = ConsensusMetadata::create(
        fs_manager(&dir),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");

    cmeta.flush(FlushMode::Overwrite).expect("first flush");
    let size = cmeta.on_disk_size();
    cmeta.flush(FlushMode::Overwrite).expect("second flush");
    assert_eq!(cmeta.on_disk_size(), size);
    assert_eq!(cmeta.flush_count_for_tests(), 3);
}

#[test]
fn test_create_no_flush_fails_on_existing_file() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("first create");

    let err = ConsensusMetadata::create(
        fs,
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::NoFlush,
    )
    .unwrap_err();
    assert!(matches!(err, Error::AlreadyPresent { .. }), "got: {err}");
}

#[test]
fn test_create_flush_on_create_never_clobbers() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    let first = ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        4,
        CreateMode::FlushOnCreate,
    )
    .expect("first create");
    assert_eq!(first.current_term(), 4);

    let err = ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        8,
        CreateMode::FlushOnCreate,
    )
    .unwrap_err();
    assert!(matches!(err, Error::AlreadyPresent { .. }));

    // The original record survives the attempted clobber.
    let loaded = ConsensusMetadata::load(fs, DurabilityConfig::default(), "t1", "p1")
        .expect("load");
    assert_eq!(loaded.current_term(), 4);
}

#[test]
fn test_create_no_flush_leaves_no_file() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::NoFlush,
    )
    .expect("create");

    let err =
        ConsensusMetadata::load(fs, DurabilityConfig::default(), "t1", "p1").unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn test_flush_rejects_invalid_config() {
    let dir = TestDir::new();
    let cmeta = ConsensusMetadata::create(
        fs_manager(&dir),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");

    // Wipe the voters; the next flush must refuse to persist.
    cmeta.set_committed_config(RaftGroupConfig::default());
    let err = cmeta.flush(FlushMode::Overwrite).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }), "got: {err}");
    assert!(err.to_string().contains("cannot flush to disk"));
}

#[test]
fn test_delete_on_disk_data() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");

    ConsensusMetadata::delete_on_disk_data(&fs, "t1").expect("delete");
    let err = ConsensusMetadata::load(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t1",
        "p1",
    )
    .unwrap_err();
    assert!(matches!(err, Error::Io { .. }));

    let err = ConsensusMetadata::delete_on_disk_data(&fs, "t1").unwrap_err();
    assert!(err.to_string().contains("tablet t1"));
}

#[test]
fn test_flush_with_fsync_forced() {
    let dir = TestDir::new();
    // Exercise the fsync path end to end (observable only as success).
    let fs = Arc::new(FsManager::new(Arc::new(DiskEnv), dir.path(), true));
    let options = DurabilityConfig { cmeta_force_fsync: true, ..Default::default() };

    let cmeta = ConsensusMetadata::create(
        Arc::clone(&fs),
        options,
        "t1",
        "p1",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");
    cmeta.set_current_term(2).expect("set term");
    cmeta.flush(FlushMode::Overwrite).expect("flush with fsync");

    let loaded = ConsensusMetadata::load(fs, DurabilityConfig::default(), "t1", "p1")
        .expect("load");
    assert_eq!(loaded.current_term(), 2);
}

#[test]
fn test_loaded_role_reflects_membership() {
    let dir = TestDir::new();
    let fs = fs_manager(&dir);

    // p9 is not a member of the config it stores.
    ConsensusMetadata::create(
        Arc::clone(&fs),
        DurabilityConfig::default(),
        "t2",
        "p9",
        three_voters(),
        1,
        CreateMode::FlushOnCreate,
    )
    .expect("create");

    let loaded = ConsensusMetadata::load(fs, DurabilityConfig::default(), "t2", "p9")
        .expect("load");
    assert_eq!(loaded.active_role(), RaftRole::NonParticipant);
    assert_eq!(loaded.get_role_and_term(), (RaftRole::NonParticipant, 1));
}
