//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "build"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Build script emitting version metadata."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Source tarballs carry no git metadata; vergen falls back to placeholder values.
    EmitBuilder::builder().all_cargo().git_sha(true).emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=HOST_MANAGER_GIT_OVERRIDE");
    Ok(())
}
