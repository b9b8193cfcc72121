// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

pub mod mock;
pub mod session;

use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use thiserror::Error;
use wait_timeout::ChildExt;

pub use session::{
    ssh_login, Auth, GuestSession, PasswordAuth, SessionError, SessionState, SshSession,
};

#[derive(Error, Debug)]
pub enum WaitTimeoutError {
    #[error("timeout after {0:?}")]
    Timedout(Duration),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("spawning {1} failed")]
    Spawn(#[source] std::io::Error, String),
    #[error("waiting for {1} failed")]
    Wait(#[source] std::io::Error, String),
    #[error("{command} did not complete within {timeout:?}")]
    Timedout { command: String, timeout: Duration },
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timedout { .. })
    }
}

/// Grace period given to a child between SIGTERM and SIGKILL.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Outcome of one external command invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    /// Process exit code, `-1` when the process was killed by a signal.
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn new(command: &str, exit_status: i32, stdout: &str, stderr: &str) -> Self {
        CommandResult {
            command: command.to_owned(),
            exit_status,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_text(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_text(&self) -> &str {
        self.stderr.trim()
    }

    pub fn log_failure(&self) {
        error!(
            "\n\n==== Start '{}' failed ==== \
            \n\nexit_status = {} \
            \n\n---stdout---\n{}\n---stderr---\n{} \
            \n\n==== End '{}' failed ====",
            self.command, self.exit_status, self.stdout, self.stderr, self.command
        );
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' exited with {}", self.command, self.exit_status)?;
        if !self.stderr_text().is_empty() {
            write!(f, ": {}", self.stderr_text())?;
        }
        Ok(())
    }
}

/// Seam between the CLI adapters and the host. The host implementation
/// spawns processes; tests substitute [`mock::MockRunner`].
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandResult, Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandResult, Error> {
        exec_command(program, args, timeout)
    }
}

pub fn command_line<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        // Intentionally ignore the result, a broken pipe just ends the output
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|r| r.join().ok())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// Runs `program` to completion, or until `timeout` expires. On expiry the
/// child is killed and [`Error::Timedout`] is returned without waiting for
/// the output readers, so control comes back within the timeout plus
/// [`KILL_GRACE_PERIOD`].
pub fn exec_command(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<CommandResult, Error> {
    let command = command_line(program, args);
    debug!("Running '{command}'");

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Spawn(e, command.clone()))?;

    // Drain both pipes on helper threads so a chatty child never blocks
    // on a full pipe while we wait on it.
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let status = match timeout {
        Some(timeout) => match child
            .wait_timeout(timeout)
            .map_err(|e| Error::Wait(e, command.clone()))?
        {
            Some(status) => status,
            None => {
                warn!("'{command}' timed out after {timeout:?}, killing it");
                kill_child(&mut child, KILL_GRACE_PERIOD);
                return Err(Error::Timedout { command, timeout });
            }
        },
        None => child.wait().map_err(|e| Error::Wait(e, command.clone()))?,
    };

    let result = CommandResult {
        command,
        exit_status: status.code().unwrap_or(-1),
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
        duration: start.elapsed(),
    };
    debug!(
        "'{}' exited with {} after {:?}",
        result.command, result.exit_status, result.duration
    );

    Ok(result)
}

/// Terminates a child with SIGTERM, escalating to SIGKILL once `grace`
/// elapsed, and reaps it.
pub fn kill_child(child: &mut Child, grace: Duration) {
    let r = unsafe { libc::kill(child.id() as i32, libc::SIGTERM) };
    if r != 0 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() == Some(libc::ESRCH) {
            let _ = child.wait();
            return;
        }
        warn!("Failed to kill child with SIGTERM: {e:?}");
    }

    // The grace period elapsed without the child exiting
    if !matches!(child.wait_timeout(grace), Ok(Some(_))) {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Polls `condition` every `interval` until it yields a value or `timeout`
/// elapses. The last sleep is cut short at the deadline, so the call
/// returns within `timeout` plus the duration of one `condition` call.
/// A `timeout` too large to be represented as a point in time never
/// expires.
pub fn wait_until<T, F>(
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> Result<T, WaitTimeoutError>
where
    F: FnMut() -> Option<T>,
{
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(value) = condition() {
            return Ok(value);
        }

        let sleep = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(WaitTimeoutError::Timedout(timeout));
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        thread::sleep(sleep);
    }
}
