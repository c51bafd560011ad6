//! kiln-lib: incremental build orchestration.
//!
//! This crate provides the scheduling core of kiln:
//! - `Builder`: a named unit of work producing target-relative artifacts
//! - `Dependencies` / `Fingerprint`: change detection over a builder's inputs
//! - `BuildCache` / `CachedBuilder`: skip builders whose inputs did not change
//! - `BuildContext`: the builder graph, its transformations and parallel execution

pub mod builder;
pub mod cache;
pub mod cache_lock;
pub mod consts;
pub mod deps;
pub mod execute;
pub mod fingerprint;
pub mod fs;
pub mod platform;
pub mod util;

pub use builder::{Builder, BuilderError, BuilderId, BuilderRef};
pub use cache::{BuildCache, CachedBuilder, FileBuildCache, MemoryBuildCache};
pub use deps::Dependencies;
pub use execute::{BuildConfig, BuildContext, BuildError, RunReport};
pub use fingerprint::{Fingerprint, ProtocolRegistry};
pub use fs::{FileSystemDirectory, LocalDirectory, MemoryDirectory, RelativePath};
