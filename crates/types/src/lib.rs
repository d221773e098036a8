//! Core types and helpers for TabletDB consensus and storage.
//!
//! This crate provides the foundational pieces shared by the consensus
//! metadata store and the tablet layer:
//! - Raft group model: peers, membership kinds, derived roles, configurations
//! - Quorum helpers: config verification, voter/member predicates, role
//!   derivation
//! - Centralized postcard codec with consistent error handling
//! - Durability configuration (fsync policy, fault injection knobs)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod raft;

// Re-export commonly used types at crate root
pub use codec::{decode, encode, CodecError};
pub use config::{ConfigError, DurabilityConfig, DurabilityHandle};
pub use raft::{
    consensus_role, count_voters, is_raft_config_member, is_raft_config_voter, verify_raft_config,
    ConsensusState, MemberKind, RaftConfigError, RaftGroupConfig, RaftPeer, RaftRole,
};
