//! Durable account pool storage
//!
//! Owns the canonical serialized pool: a versioned JSON file written with
//! atomic temp-file + rename under a process-wide write mutex. Raw file
//! content is reduced to a typed v3 pool by a single total normalization
//! pass; downstream code never inspects untyped values.
//!
//! Storage lifecycle:
//! 1. `load` reads, validates, and normalizes; v1 files migrate in place
//! 2. mutations go through `save`, which serializes writers and renames
//!    atomically so readers never observe a torn file
//! 3. `export`/`import` move accounts between pools, re-running dedup
//! 4. `clear` removes the file entirely

pub mod normalize;
pub mod paths;
pub mod schema;
pub mod store;

pub use normalize::{NormalizeOutcome, normalize_account_storage, normalize_storage};
pub use paths::{discover_recovery_paths, find_project_root, resolve_storage_path};
pub use schema::{
    AccountStorage, CooldownReason, KNOWN_FAMILIES, MAX_ACCOUNTS, STORAGE_VERSION, StoredAccount,
    SwitchReason, quota_key,
};
pub use store::{AccountStore, ImportOutcome};
