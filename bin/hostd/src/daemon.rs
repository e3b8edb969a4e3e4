//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "binary"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Process environment checks and backgrounding for the daemon."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Files left behind by container runtimes.
const CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];

/// Whether the process runs inside a container.
pub fn running_in_container() -> bool {
    container_hint(
        CONTAINER_MARKERS.iter().map(Path::new),
        |key| std::env::var_os(key),
    )
}

fn container_hint<'a>(
    markers: impl IntoIterator<Item = &'a Path>,
    env: impl Fn(&str) -> Option<OsString>,
) -> bool {
    markers.into_iter().any(Path::exists)
        || ["container", "KUBERNETES_SERVICE_HOST"]
            .iter()
            .any(|key| env(key).is_some_and(|value| !value.is_empty()))
}

/// Whether the process runs with an effective uid of root.
#[cfg(unix)]
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn running_as_root() -> bool {
    false
}

/// Re-launch this executable in the background with `--foreground` and return
/// the child's pid. The child starts a new session and has no stdio.
pub fn daemonize() -> Result<u32> {
    let exe = std::env::current_exe().context("unable to locate the running executable")?;
    let mut args: Vec<OsString> = std::env::args_os().skip(1).collect();
    args.push(OsString::from("--foreground"));

    let mut command = Command::new(&exe);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Runs in the forked child: only async-signal-safe calls.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    let child = command
        .spawn()
        .with_context(|| format!("failed to start {} in the background", exe.display()))?;
    Ok(child.id())
}
