//! Build metadata embedded by `build.rs`, reported in `GET /status` and by
//! `wlinkd --version`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit hash, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("WLINKD_GIT_HASH");

/// Unix epoch seconds at build time.
pub const BUILD_TIMESTAMP: &str = env!("WLINKD_BUILD_TIMESTAMP");

/// Cargo profile (`debug`, `release`).
pub const BUILD_PROFILE: &str = env!("WLINKD_BUILD_PROFILE");

/// `"0.1.0 (abc1234, release)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
