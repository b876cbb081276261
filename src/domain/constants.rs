//! Platform and domain constants
//!
//! Values that are properties of the environment the sync runs in rather than
//! operator-tunable settings. Tunable defaults live in
//! `infrastructure::config::defaults`.

/// Limits imposed by the periodic run trigger
pub mod platform {
    /// Hard wall-clock ceiling of one triggered run (seconds).
    ///
    /// The executor never plans past this, whatever `max_runtime` says.
    pub const HARD_CAP_SECONDS: u64 = 15 * 60;

    /// Head-room kept below the deadline so the merge pass can finish (seconds).
    pub const SAFETY_BUFFER_SECONDS: u64 = 30;
}

/// Retention defaults
pub mod retention {
    /// Grace period for items absent from every market index (days).
    pub const DEFAULT_WINDOW_DAYS: u32 = 365;
}

/// `lur` values written to retention metadata
pub mod update_reason {
    pub const NEW: &str = "new";
    pub const CHANGED_LUA: &str = "changed:lua";
    pub const CHANGED_SIG: &str = "changed:sig";
}
