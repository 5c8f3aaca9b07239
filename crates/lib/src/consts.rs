//! Crate-wide constants.

/// Application name, used for data directory names.
pub const APP_NAME: &str = "keel";

/// Length of truncated object hashes (plan ids, local object ids).
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Version of the persisted state record format.
pub const STATE_VERSION: u32 = 1;

/// Default program file evaluated by the CLI.
pub const DEFAULT_PROGRAM: &str = "index.lua";

/// Prefix of per-stack configuration files, `Keel.<stack>.yaml`.
pub const CONFIG_FILE_PREFIX: &str = "Keel";

/// Default stack name when none is given.
pub const DEFAULT_STACK: &str = "dev";

/// Default cap on concurrent provider operations.
pub const DEFAULT_PARALLELISM: usize = 16;
