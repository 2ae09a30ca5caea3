//! Process Tree Termination
//!
//! Scanning tools and their wrappers fork. Killing only the direct child
//! leaves the rest of the tree running, so termination signals the child's
//! process group and every descendant found under `/proc`, waits a grace
//! period, then hard-kills whatever is left.

use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Returns `true` if the current process runs with elevated privileges
pub fn is_privileged() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Terminate a child, its process group and its descendants
///
/// The child must have been spawned as the leader of a new process group.
/// Sends SIGTERM, waits up to `grace` for the child to exit, then SIGKILLs
/// the group and any descendant still alive.
pub async fn terminate_tree(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped
        return;
    };

    #[cfg(unix)]
    {
        let descendants = descendant_pids(pid);
        debug!(pid, descendants = descendants.len(), "Sending SIGTERM to process tree");
        signal_tree(pid, &descendants, Signal::SIGTERM);

        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            warn!(pid, "Process ignored SIGTERM for {:?}, sending SIGKILL", grace);
        }

        signal_tree(pid, &descendants, Signal::SIGKILL);
    }

    if let Err(e) = child.kill().await {
        debug!(pid, "Child already exited: {}", e);
    }
}

/// SIGKILL every remaining member of a process group
pub fn kill_group(pgid: u32) {
    #[cfg(unix)]
    signal_tree(pgid, &[], Signal::SIGKILL);
    #[cfg(not(unix))]
    let _ = pgid;
}

#[cfg(unix)]
fn signal_tree(leader: u32, descendants: &[u32], signal: Signal) {
    let Ok(raw) = i32::try_from(leader) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pgid = leader, "killpg failed: {}", e),
    }
    for &pid in descendants {
        if let Ok(raw) = i32::try_from(pid) {
            let _ = kill(Pid::from_raw(raw), signal);
        }
    }
}

/// Collect the PIDs of every descendant of `root`
///
/// Walks `/proc` on Linux; returns an empty list elsewhere.
pub fn descendant_pids(root: u32) -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };

        let parents: Vec<(u32, u32)> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter_map(|pid| read_parent_pid(pid).map(|ppid| (pid, ppid)))
            .collect();

        let mut found = Vec::new();
        let mut frontier = vec![root];
        while let Some(parent) = frontier.pop() {
            for &(pid, ppid) in &parents {
                if ppid == parent && !found.contains(&pid) {
                    found.push(pid);
                    frontier.push(pid);
                }
            }
        }
        found
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = root;
        Vec::new()
    }
}

/// Parse the parent PID out of `/proc/<pid>/stat`
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are read after the last `)`.
#[cfg(target_os = "linux")]
fn read_parent_pid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}
