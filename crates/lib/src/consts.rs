/// Application name, used for default directory names.
pub const APP_NAME: &str = "kiln";

/// Length of the truncated identity hash used for cache entry directories.
pub const ID_HASH_PREFIX_LEN: usize = 20;

/// Environment variable overriding the on-disk cache root.
pub const CACHE_DIR_ENV: &str = "KILN_CACHE_DIR";

/// Environment variable overriding the number of parallel builders.
pub const JOBS_ENV: &str = "KILN_JOBS";

/// Environment variable enabling fail-fast scheduling (`1`/`true`).
pub const FAIL_FAST_ENV: &str = "KILN_FAIL_FAST";

/// Lock file guarding an on-disk cache root.
pub const CACHE_LOCK_FILENAME: &str = ".lock";

/// Encoded fingerprint of a cache entry.
pub const ENTRY_FINGERPRINT_FILENAME: &str = "fingerprint.bin";

/// JSON description of a cache entry (builder id + artifact list).
pub const ENTRY_INDEX_FILENAME: &str = "entry.json";

/// Directory holding the cached artifact copies of an entry.
pub const ENTRY_FILES_DIR: &str = "files";

/// Upper bound for a decoded fingerprint payload.
///
/// Corrupted length prefixes must degrade to a protocol error instead of
/// requesting enormous allocations.
pub const FINGERPRINT_PAYLOAD_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

/// Maximum nesting of fingerprint frames inside composite fingerprints.
pub const FINGERPRINT_MAX_NESTING: usize = 64;
