//! Process-wide bridge configuration
//!
//! Configuration is installed once with [`install`]; otherwise it is read from
//! the environment the first time it is needed:
//!
//! | Variable | Values | Default |
//! |----------|--------|---------|
//! | `SHADOWBRIDGE_REFCOUNT_VIOLATION` | `abort`, `log` | `abort` (debug), `log` (release) |
//! | `SHADOWBRIDGE_STASH_FAULTS` | `0`, `1` | `1` |

use std::sync::OnceLock;

/// Environment variable selecting the [`ViolationPolicy`]
pub const ENV_REFCOUNT_VIOLATION: &str = "SHADOWBRIDGE_REFCOUNT_VIOLATION";
/// Environment variable toggling fault stashing
pub const ENV_STASH_FAULTS: &str = "SHADOWBRIDGE_STASH_FAULTS";

/// What to do when a reference-counting contract is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Log the violation, then abort the process.
    Abort,
    /// Log the violation and keep going.
    Log,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ViolationPolicy::Abort
        } else {
            ViolationPolicy::Log
        }
    }
}

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Policy for double release, release below zero and shadows alive at teardown.
    pub refcount_violation: ViolationPolicy,
    /// Whether thunks keep the error behind a failure code for [`check`](crate::check).
    pub stash_faults: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            refcount_violation: ViolationPolicy::default(),
            stash_faults: true,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by the `SHADOWBRIDGE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_REFCOUNT_VIOLATION) {
            match value.trim().to_ascii_lowercase().as_str() {
                "abort" => config.refcount_violation = ViolationPolicy::Abort,
                "log" => config.refcount_violation = ViolationPolicy::Log,
                other => tracing::warn!(
                    variable = ENV_REFCOUNT_VIOLATION,
                    value = other,
                    "ignoring unrecognized value"
                ),
            }
        }

        if let Some(value) = lookup(ENV_STASH_FAULTS) {
            config.stash_faults = !matches!(value.trim(), "0" | "false" | "off");
        }

        config
    }
}

static CONFIG: OnceLock<BridgeConfig> = OnceLock::new();

/// Install the configuration for this process.
///
/// Fails (returning the rejected config) if a configuration is already in effect.
pub fn install(config: BridgeConfig) -> Result<(), BridgeConfig> {
    CONFIG.set(config)
}

/// The configuration in effect.
pub fn get() -> &'static BridgeConfig {
    CONFIG.get_or_init(BridgeConfig::from_env)
}

/// Report a reference-counting contract violation.
///
/// Never unwinds: this runs inside `extern "system"` thunks.
pub(crate) fn refcount_violation(what: &str, detail: &dyn std::fmt::Display) {
    tracing::error!(violation = what, "{detail}");
    if get().refcount_violation == ViolationPolicy::Abort {
        eprintln!("shadowbridge: fatal reference-count violation ({what}): {detail}");
        std::process::abort();
    }
}
