//! Shared building blocks for the vdbench crates.
//!
//! - [`distance`] - scalar distance kernels used for brute-force ground truth
//! - [`telemetry`] - tracing subscriber setup for binaries
//! - [`build_info`] - git hash and build timestamp captured by `build.rs`

pub mod distance;
pub mod telemetry;

/// Build metadata captured at compile time.
pub mod build_info {
    /// Short git hash of the tree the crate was built from.
    pub const GIT_HASH: &str = env!("VDBENCH_GIT_HASH");
    /// RFC 3339 build timestamp.
    pub const BUILD_TIMESTAMP: &str = env!("VDBENCH_BUILD_TIMESTAMP");
}
