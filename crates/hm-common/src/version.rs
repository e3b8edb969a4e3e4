//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Shared primitives and utilities for the host manager."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use serde::Serialize;

/// API revision served by the HTTP adapter.
pub const API_VERSION: &str = "v1";

/// Build metadata captured at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub semver: String,
    pub git_sha: String,
    pub profile: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        let profile = match option_env!("VERGEN_CARGO_DEBUG") {
            Some("true") => "debug",
            Some(_) => "release",
            None => "unknown",
        };
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("VERGEN_GIT_SHA")
                .filter(|sha| !sha.is_empty() && *sha != "VERGEN_IDEMPOTENT_OUTPUT")
                .unwrap_or("unknown")
                .to_owned(),
            profile: profile.to_owned(),
        }
    }

    /// Short form used in health responses and log lines.
    pub fn cli_string(&self) -> String {
        self.semver.clone()
    }

    pub fn extended(&self) -> String {
        format!(
            "host-manager {} (git {}, {} build, api {})",
            self.semver, self.git_sha, self.profile, API_VERSION
        )
    }
}
