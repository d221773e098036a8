//! Raft group model and quorum helpers.
//!
//! A tablet's consensus group is described by a [`RaftGroupConfig`]: the set
//! of participating peers, each with a [`MemberKind`], plus the log position
//! (`opid_index`) at which the configuration was committed. From a config,
//! the locally-known leader, and this node's own UUID, [`consensus_role`]
//! derives the [`RaftRole`] the peer currently plays.

use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Errors produced by Raft configuration verification.
#[derive(Debug, Snafu)]
pub enum RaftConfigError {
    /// The configuration has no peers at all.
    #[snafu(display("Config has no peers"))]
    EmptyConfig,

    /// A peer entry is missing its UUID.
    #[snafu(display("Peer at index {index} has an empty UUID"))]
    EmptyPeerUuid {
        /// Position of the offending peer in the config.
        index: usize,
    },

    /// Two peer entries share the same UUID.
    #[snafu(display("Duplicate peer UUID in config: {uuid}"))]
    DuplicatePeerUuid {
        /// The repeated UUID.
        uuid: String,
    },

    /// A peer has an unknown membership kind.
    #[snafu(display("Peer {uuid} has unknown membership kind"))]
    UnknownMemberKind {
        /// UUID of the offending peer.
        uuid: String,
    },

    /// The configuration contains no voters.
    #[snafu(display("Config has no voters"))]
    NoVoters,
}

/// Membership class of a peer within a Raft configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    /// Full voting member; counts toward quorum.
    Voter,
    /// Replicates data but does not vote.
    NonVoter,
    /// Replica being caught up before promotion to voter.
    Learner,
    /// Membership kind could not be determined (e.g. from a newer format).
    Unknown,
}

/// Role a peer plays in its consensus group, derived from membership plus
/// the locally-known leader identity.
///
/// Discriminants match the wire enum of the metadata record format. The
/// `Unknown` sentinel is deliberately large: it must stay stable for
/// compatibility and therefore does not fit the 3-bit packed role encoding
/// used by the consensus metadata hot-path cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum RaftRole {
    /// Voter that is not currently the leader.
    Follower = 0,
    /// The acting leader of the group.
    Leader = 1,
    /// Non-voting member (learner or non-voter).
    Learner = 2,
    /// Not a member of the active configuration.
    NonParticipant = 3,
    /// Role could not be derived from the available state.
    Unknown = 999,
}

impl fmt::Display for RaftRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RaftRole::Follower => "FOLLOWER",
            RaftRole::Leader => "LEADER",
            RaftRole::Learner => "LEARNER",
            RaftRole::NonParticipant => "NON_PARTICIPANT",
            RaftRole::Unknown => "UNKNOWN_ROLE",
        };
        f.write_str(s)
    }
}

/// A single peer in a Raft configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftPeer {
    /// Permanent UUID of the peer.
    pub uuid: String,
    /// Membership class of the peer.
    pub kind: MemberKind,
}

impl RaftPeer {
    /// Creates a voting peer.
    pub fn voter(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into(), kind: MemberKind::Voter }
    }

    /// Creates a non-voting peer.
    pub fn non_voter(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into(), kind: MemberKind::NonVoter }
    }

    /// Creates a learner peer.
    pub fn learner(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into(), kind: MemberKind::Learner }
    }
}

/// A Raft configuration: the peers of a consensus group and the log position
/// at which this membership was committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftGroupConfig {
    /// Index of the log entry that committed this configuration.
    pub opid_index: i64,
    /// Participating peers.
    pub peers: Vec<RaftPeer>,
}

impl RaftGroupConfig {
    /// Creates a config of all-voter peers, the common test and bootstrap
    /// shape.
    pub fn with_voters<I, S>(opid_index: i64, uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { opid_index, peers: uuids.into_iter().map(RaftPeer::voter).collect() }
    }

    /// Looks up a peer by UUID.
    pub fn peer(&self, uuid: &str) -> Option<&RaftPeer> {
        self.peers.iter().find(|p| p.uuid == uuid)
    }
}

/// Point-in-time snapshot of a tablet's consensus state.
///
/// Returned by `ConsensusMetadata::to_consensus_state` and consumed by
/// `merge_committed_consensus_state` when adopting a remote authoritative
/// view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
    /// Current Raft term.
    pub current_term: i64,
    /// Leader UUID, if one is currently known.
    pub leader_uuid: Option<String>,
    /// The committed configuration.
    pub committed_config: RaftGroupConfig,
    /// The pending (uncommitted) configuration, if a membership change is in
    /// flight.
    pub pending_config: Option<RaftGroupConfig>,
}

/// Verifies that a configuration is well-formed enough to act on (and in
/// particular, to persist).
///
/// # Errors
///
/// Returns a [`RaftConfigError`] if the config is empty, contains a peer
/// with an empty or duplicate UUID, contains a peer of unknown membership
/// kind, or has no voters.
pub fn verify_raft_config(config: &RaftGroupConfig) -> Result<(), RaftConfigError> {
    if config.peers.is_empty() {
        return Err(RaftConfigError::EmptyConfig);
    }
    let mut seen: Vec<&str> = Vec::with_capacity(config.peers.len());
    for (index, peer) in config.peers.iter().enumerate() {
        if peer.uuid.is_empty() {
            return Err(RaftConfigError::EmptyPeerUuid { index });
        }
        if seen.contains(&peer.uuid.as_str()) {
            return Err(RaftConfigError::DuplicatePeerUuid { uuid: peer.uuid.clone() });
        }
        seen.push(&peer.uuid);
        if peer.kind == MemberKind::Unknown {
            return Err(RaftConfigError::UnknownMemberKind { uuid: peer.uuid.clone() });
        }
    }
    if count_voters(config) == 0 {
        return Err(RaftConfigError::NoVoters);
    }
    Ok(())
}

/// Returns true if `uuid` is a voting member of `config`.
pub fn is_raft_config_voter(uuid: &str, config: &RaftGroupConfig) -> bool {
    config.peer(uuid).is_some_and(|p| p.kind == MemberKind::Voter)
}

/// Returns true if `uuid` appears in `config` with any membership kind.
pub fn is_raft_config_member(uuid: &str, config: &RaftGroupConfig) -> bool {
    config.peer(uuid).is_some()
}

/// Counts the voting members of `config`.
pub fn count_voters(config: &RaftGroupConfig) -> usize {
    config.peers.iter().filter(|p| p.kind == MemberKind::Voter).count()
}

/// Derives the role `peer_uuid` plays in `config` given the locally-known
/// leader.
///
/// An empty `leader_uuid` means the leader is unknown. Policy for the cases
/// the membership table leaves open:
/// - a voter with an unknown leader is a `Follower` (it participates and
///   will vote);
/// - a voter whose known leader is not itself a voter in the active config
///   is in an inconsistent state and reports `Unknown`.
pub fn consensus_role(peer_uuid: &str, leader_uuid: &str, config: &RaftGroupConfig) -> RaftRole {
    let Some(peer) = config.peer(peer_uuid) else {
        return RaftRole::NonParticipant;
    };
    if peer.kind != MemberKind::Voter {
        return RaftRole::Learner;
    }
    if leader_uuid.is_empty() {
        return RaftRole::Follower;
    }
    if peer_uuid == leader_uuid {
        return RaftRole::Leader;
    }
    if is_raft_config_voter(leader_uuid, config) {
        return RaftRole::Follower;
    }
    RaftRole::Unknown
}
