//! Process discovery, termination and detached launch
//!
//! The worker may be started in several ways (directly, through a shell,
//! from a shortcut), so discovery is a loose case-insensitive substring
//! match over the process name, executable path and command line.
//!
//! The controller holds no state between calls; each operation takes a
//! fresh snapshot of the process table.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind};

use crate::error::ProcessError;

/// How often `stop` re-checks the process table
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long to wait after a force kill
const KILL_WAIT: Duration = Duration::from_secs(5);

/// A process matched by [`ProcessController::find_by_name`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Finds, stops and starts OS processes
#[derive(Debug, Clone)]
pub struct ProcessController {
    own_pid: u32,
    kill_wait: Duration,
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessController {
    pub fn new() -> Self {
        Self {
            own_pid: std::process::id(),
            kill_wait: KILL_WAIT,
        }
    }

    /// Running processes whose name, path or command line contains `pattern`
    ///
    /// The calling process is never included.
    pub fn find_by_name(&self, pattern: &str) -> Vec<ProcessHandle> {
        let needle = pattern.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let system = snapshot();
        let mut matches: Vec<ProcessHandle> = system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != self.own_pid)
            .filter(|(_, process)| !matches!(process.status(), ProcessStatus::Zombie))
            .filter(|(_, process)| {
                let name = process.name().to_string_lossy().to_lowercase();
                let exe = process
                    .exe()
                    .map(|p| p.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                name.contains(&needle) || exe.contains(&needle) || cmdline.contains(&needle)
            })
            .map(|(pid, process)| ProcessHandle {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(Path::to_path_buf),
            })
            .collect();

        matches.sort_by_key(|h| h.pid);
        tracing::debug!("Found {} process(es) matching '{}'", matches.len(), pattern);
        matches
    }

    /// Terminate `handles`, escalating to a force kill after `graceful_timeout`
    ///
    /// Returns true when none of the processes remain. A process that exits
    /// on its own between discovery and signalling counts as stopped.
    pub fn stop(&self, handles: &[ProcessHandle], graceful_timeout: Duration) -> bool {
        if handles.is_empty() {
            return true;
        }

        let mut system = snapshot();
        for handle in handles {
            match system.process(Pid::from_u32(handle.pid)) {
                Some(process) => {
                    tracing::info!("Terminating {} (PID {})", handle.name, handle.pid);
                    // Platforms without SIGTERM get a plain kill
                    if process.kill_with(Signal::Term).is_none() {
                        process.kill();
                    }
                }
                None => tracing::debug!("PID {} already exited", handle.pid),
            }
        }

        if wait_for_exit(&mut system, handles, graceful_timeout) {
            return true;
        }

        for handle in handles {
            if let Some(process) = system.process(Pid::from_u32(handle.pid)) {
                tracing::warn!("Force killing {} (PID {})", handle.name, handle.pid);
                process.kill();
            }
        }

        let stopped = wait_for_exit(&mut system, handles, self.kill_wait);
        if !stopped {
            tracing::error!("Some processes survived a force kill");
        }
        stopped
    }

    /// Spawn `exe` detached from this process
    ///
    /// The child gets null stdio and its own process group; it is not
    /// waited on. Returns the child's PID.
    pub fn start(&self, exe: &Path, args: &[String], cwd: &Path) -> Result<u32, ProcessError> {
        if !exe.is_file() {
            return Err(ProcessError::LaunchFailed {
                path: exe.to_path_buf(),
                reason: "executable not found".to_string(),
            });
        }

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|e| ProcessError::LaunchFailed {
            path: exe.to_path_buf(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        tracing::info!("Started {:?} (PID {})", exe, pid);
        Ok(pid)
    }
}

fn snapshot() -> System {
    let mut system = System::new();
    refresh(&mut system);
    system
}

fn refresh(system: &mut System) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet),
    );
}

/// Poll until none of `handles` is alive or `timeout` passes
fn wait_for_exit(system: &mut System, handles: &[ProcessHandle], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        refresh(system);
        let alive = handles.iter().any(|h| {
            system
                .process(Pid::from_u32(h.pid))
                .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
                .unwrap_or(false)
        });
        if !alive {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0) to check if the process exists.
/// On Windows, uses OpenProcess to check if the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // EPERM means the process exists but belongs to someone else
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

#[cfg(not(any(unix, windows)))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}
