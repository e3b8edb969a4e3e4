//! ---
//! hm_section: "11-test-harness"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Recording fakes for every host-manager collaborator trait."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
//! In-process doubles used by the integration suites.
//!
//! Every fake records its calls and can be told to fail, so tests can assert
//! both what the code under test asked for and how it reacts to errors.

pub mod cluster;
pub mod host;
pub mod runner;

pub use cluster::{FakeClusterTool, Failure, ToolCall, ToolOp};
pub use host::{FakePackageInstaller, FakeStorageConfigurator, FakeStorageDetector};
pub use runner::ScriptedRunner;
