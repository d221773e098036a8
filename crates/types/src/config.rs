//! Durability configuration for consensus metadata.
//!
//! The flags here govern when consensus metadata flushes call `fsync` and
//! whether the testing-only crash hook fires. They are modeled as a plain
//! config object threaded through the `ConsensusMetadata` constructor, with
//! a process-wide default provider ([`DurabilityHandle`]) for CLI parity.

use std::sync::Arc;

use arc_swap::ArcSwap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Errors produced by configuration validation.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[snafu(display("Invalid configuration: {message}"))]
    Validation {
        /// Description of the violated rule.
        message: String,
    },
}

/// Durability and fault-injection flags for consensus metadata flushes.
///
/// # Validation Rules
///
/// - `fault_crash_before_cmeta_flush` must be in `[0.0, 1.0]`
///
/// # Fsync policy
///
/// A flush syncs the metadata file to durable storage when any of the
/// following holds:
/// - `log_force_fsync_all`: consensus metadata is an extension of the
///   primary durability mechanism of the consensus subsystem (the WAL), so
///   it honors the same global flag and gets the same guarantees;
/// - `cmeta_force_fsync`, the metadata-specific override;
/// - `cmeta_fsync_override_on_xfs` and the metadata volume is XFS: some
///   filesystems (ext4 with default settings) commit periodically and are
///   forgiving to a missing fsync, whereas XFS commits less often and loses
///   significant data on crash without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DurabilityConfig {
    /// Call fsync whenever a consensus metadata file is updated.
    #[serde(default = "default_cmeta_force_fsync")]
    pub cmeta_force_fsync: bool,
    /// Force fsync of consensus metadata when the metadata volume is XFS.
    #[serde(default = "default_cmeta_fsync_override_on_xfs")]
    pub cmeta_fsync_override_on_xfs: bool,
    /// Global WAL-family fsync forcing; consensus metadata honors it.
    #[serde(default = "default_log_force_fsync_all")]
    pub log_force_fsync_all: bool,
    /// Probability of a simulated crash just before a metadata flush writes.
    /// Testing only. Must be in `[0.0, 1.0]`.
    #[serde(default = "default_fault_crash_before_cmeta_flush")]
    pub fault_crash_before_cmeta_flush: f64,
}

#[bon::bon]
impl DurabilityConfig {
    /// Creates a new durability configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if
    /// `fault_crash_before_cmeta_flush` is outside `[0.0, 1.0]`.
    #[builder]
    pub fn new(
        #[builder(default = default_cmeta_force_fsync())] cmeta_force_fsync: bool,
        #[builder(default = default_cmeta_fsync_override_on_xfs())]
        cmeta_fsync_override_on_xfs: bool,
        #[builder(default = default_log_force_fsync_all())] log_force_fsync_all: bool,
        #[builder(default = default_fault_crash_before_cmeta_flush())]
        fault_crash_before_cmeta_flush: f64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            cmeta_force_fsync,
            cmeta_fsync_override_on_xfs,
            log_force_fsync_all,
            fault_crash_before_cmeta_flush,
        };
        config.validate()?;
        Ok(config)
    }
}

impl DurabilityConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.fault_crash_before_cmeta_flush;
        if !(0.0..=1.0).contains(&p) || p.is_nan() {
            return Err(ConfigError::Validation {
                message: format!("fault_crash_before_cmeta_flush must be in [0.0, 1.0], got {p}"),
            });
        }
        Ok(())
    }

    /// Returns true if a flush targeting a volume with the given XFS
    /// property must fsync.
    pub fn should_fsync(&self, meta_on_xfs: bool) -> bool {
        self.log_force_fsync_all
            || self.cmeta_force_fsync
            || (self.cmeta_fsync_override_on_xfs && meta_on_xfs)
    }
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            cmeta_force_fsync: default_cmeta_force_fsync(),
            cmeta_fsync_override_on_xfs: default_cmeta_fsync_override_on_xfs(),
            log_force_fsync_all: default_log_force_fsync_all(),
            fault_crash_before_cmeta_flush: default_fault_crash_before_cmeta_flush(),
        }
    }
}

fn default_cmeta_force_fsync() -> bool {
    false
}

fn default_cmeta_fsync_override_on_xfs() -> bool {
    true
}

fn default_log_force_fsync_all() -> bool {
    false
}

fn default_fault_crash_before_cmeta_flush() -> f64 {
    0.0
}

/// Thread-safe handle to the process-wide default durability configuration.
///
/// Uses `ArcSwap` for lock-free reads and atomic replacement, so CLI or
/// signal-driven updates never block flushers reading the flags.
#[derive(Debug, Clone)]
pub struct DurabilityHandle {
    inner: Arc<ArcSwap<DurabilityConfig>>,
}

impl DurabilityHandle {
    /// Creates a handle with the given initial configuration.
    #[must_use]
    pub fn new(config: DurabilityConfig) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(config)) }
    }

    /// Loads the current configuration snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<DurabilityConfig> {
        self.inner.load_full()
    }

    /// Atomically replaces the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `config` fails validation; the
    /// current configuration is left untouched.
    pub fn store(&self, config: DurabilityConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }
}

impl Default for DurabilityHandle {
    fn default() -> Self {
        Self::new(DurabilityConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DurabilityConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn test_builder_rejects_out_of_range_probability() {
        let result = DurabilityConfig::builder().fault_crash_before_cmeta_flush(1.5).build();
        assert!(result.is_err());

        let result = DurabilityConfig::builder().fault_crash_before_cmeta_flush(-0.1).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_nan_probability() {
        let config =
            DurabilityConfig { fault_crash_before_cmeta_flush: f64::NAN, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fsync_policy_default_only_on_xfs() {
        let config = DurabilityConfig::default();
        assert!(!config.should_fsync(false));
        assert!(config.should_fsync(true));
    }

    #[test]
    fn test_fsync_policy_forced() {
        let config = DurabilityConfig {
            cmeta_force_fsync: true,
            cmeta_fsync_override_on_xfs: false,
            ..Default::default()
        };
        assert!(config.should_fsync(false));

        let config = DurabilityConfig {
            log_force_fsync_all: true,
            cmeta_fsync_override_on_xfs: false,
            ..Default::default()
        };
        assert!(config.should_fsync(false));
    }

    #[test]
    fn test_handle_load_store() {
        let handle = DurabilityHandle::default();
        assert!(!handle.load().cmeta_force_fsync);

        handle
            .store(DurabilityConfig { cmeta_force_fsync: true, ..Default::default() })
            .expect("valid config");
        assert!(handle.load().cmeta_force_fsync);
    }

    #[test]
    fn test_handle_rejects_invalid_update() {
        let handle = DurabilityHandle::default();
        let bad =
            DurabilityConfig { fault_crash_before_cmeta_flush: 2.0, ..Default::default() };
        assert!(handle.store(bad).is_err());
        // The previous configuration is preserved.
        assert_eq!(handle.load().fault_crash_before_cmeta_flush, 0.0);
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: DurabilityConfig = serde_json::from_str("{}").expect("empty object");
        assert_eq!(config, DurabilityConfig::default());
    }
}
