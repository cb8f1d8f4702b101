//! Vendor tool execution
//!
//! Vendor tools are not guaranteed to terminate, so every run is bounded by a
//! timeout and can be cut short through a [`CancelToken`].

use crate::backend::BackendError;
use crate::cancel::CancelToken;
use crate::outcome::InterruptKind;
use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code
    pub code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Run a tool to completion
///
/// The child is killed when `cancel` fires or `timeout` expires. A child that
/// dies from a signal nobody asked for counts as a system interruption.
pub fn run_tool(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ToolOutput, BackendError> {
    let tool = cmd.get_program().to_string_lossy().into_owned();
    log::debug!("Running {:?}", cmd);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => BackendError::ToolNotFound(tool.clone()),
            _ => BackendError::Spawn {
                tool: tool.clone(),
                source,
            },
        })?;

    // Drain the pipes on their own threads so a chatty tool cannot block on a full pipe
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(kind) = cancel.interrupted() {
            kill(&mut child, &tool);
            return Err(BackendError::Interrupted(kind));
        }
        if started.elapsed() >= timeout {
            kill(&mut child, &tool);
            return Err(BackendError::TimedOut(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = join_reader(stdout);
    let stderr = join_reader(stderr);
    log::debug!("{} stdout: {}", tool, stdout.trim_end());
    log::debug!("{} stderr: {}", tool, stderr.trim_end());

    match status.code() {
        Some(code) => Ok(ToolOutput {
            code,
            stdout,
            stderr,
        }),
        None => {
            let kind = cancel.interrupted().unwrap_or(InterruptKind::System);
            log::error!("{} was terminated by a signal", tool);
            Err(BackendError::Interrupted(kind))
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child, tool: &str) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill {}: {}", tool, e);
    }
    let _ = child.wait();
}

/// Resolve a tool executable
///
/// An explicit path wins if it exists. Otherwise each `PATH` entry is
/// searched for the candidate names, and entries whose path contains
/// `dir_hint` are checked first.
pub fn find_executable(
    explicit: Option<&Path>,
    names: &[&str],
    dir_hint: Option<&str>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if path.components().count() == 1 {
            // A bare name, look it up like the others
            let name = path.to_string_lossy().into_owned();
            return find_in_path(&[name.as_str()], dir_hint);
        }
        log::warn!("Configured executable {} does not exist", path.display());
        return None;
    }
    find_in_path(names, dir_hint)
}

fn find_in_path(names: &[&str], dir_hint: Option<&str>) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    let mut dirs: Vec<PathBuf> = env::split_paths(&path_var).collect();
    if let Some(hint) = dir_hint {
        // Stable sort keeps PATH order within each group
        dirs.sort_by_key(|d| !d.to_string_lossy().contains(hint));
    }

    dirs.iter().find_map(|dir| {
        names.iter().find_map(|name| {
            let candidate = dir.join(name);
            candidate.is_file().then_some(candidate)
        })
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; echo oops >&2; exit 3"]);
        let output = run_tool(&mut cmd, Duration::from_secs(10), &CancelToken::new()).unwrap();
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn test_missing_tool() {
        let mut cmd = Command::new("boardflash-no-such-tool");
        let err = run_tool(&mut cmd, Duration::from_secs(1), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BackendError::ToolNotFound(_)));
    }

    #[test]
    fn test_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_tool(&mut cmd, Duration::from_millis(100), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BackendError::TimedOut(_)));
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel(InterruptKind::User);
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_tool(&mut cmd, Duration::from_secs(10), &cancel).unwrap_err();
        assert!(matches!(err, BackendError::Interrupted(InterruptKind::User)));
    }

    #[test]
    fn test_find_explicit_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("ST-LINK_CLI.exe");
        std::fs::write(&exe, "").unwrap();
        assert_eq!(find_executable(Some(&exe), &[], None), Some(exe));
        assert_eq!(
            find_executable(Some(&dir.path().join("missing")), &[], None),
            None
        );
    }
}
