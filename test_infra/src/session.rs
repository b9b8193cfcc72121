// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, warn};
use ssh2::Session;
use thiserror::Error;

use crate::wait_until;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOGIN_RETRY_INTERVAL: Duration = Duration::from_secs(5);

// LIBSSH2_ERROR_TIMEOUT
const SSH_ERROR_TIMEOUT: i32 = -9;

const READ_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Disconnected,
    Closed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("resolving guest address {0} failed")]
    Resolve(String),
    #[error("ssh connection to {1} failed")]
    Connection(#[source] std::io::Error, String),
    #[error("ssh session setup failed")]
    Setup(#[source] ssh2::Error),
    #[error("ssh handshake failed")]
    Handshake(#[source] ssh2::Error),
    #[error("ssh authentication failed")]
    Authentication(#[source] ssh2::Error),
    #[error("ssh authentication was not accepted")]
    NotAuthenticated,
    #[error("ssh channel session failed")]
    ChannelSession(#[source] ssh2::Error),
    #[error("ssh command failed")]
    Command(#[source] ssh2::Error),
    #[error("reading ssh command output failed")]
    Read(#[source] std::io::Error),
    #[error("retrieving exit status from ssh command failed")]
    ExitStatus(#[source] ssh2::Error),
    #[error("the exit code indicates failure: {0}")]
    NonZeroExitStatus(i32, String /* output */),
    #[error("guest command timed out after {0:?}")]
    Timeout(Duration),
    #[error("session is {0:?}")]
    NotConnected(SessionState),
    #[error("login to {ip} timed out after {timeout:?}, last error: {last_error}")]
    LoginTimeout {
        ip: String,
        timeout: Duration,
        last_error: String,
    },
    #[error("no address found for guest {0}")]
    NoAddress(String),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout(_) | SessionError::LoginTimeout { .. }
        )
    }
}

#[derive(Clone)]
pub struct PasswordAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Auth {
    Password(PasswordAuth),
    KeyFile { username: String, path: PathBuf },
}

impl Auth {
    /// Key based login with `~/.ssh/id_rsa`.
    pub fn default_key(username: &str) -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        path.push(".ssh");
        path.push("id_rsa");
        Auth::KeyFile {
            username: username.to_owned(),
            path,
        }
    }

    fn username(&self) -> &str {
        match self {
            Auth::Password(p) => &p.username,
            Auth::KeyFile { username, .. } => username,
        }
    }
}

/// A shell channel into a guest.
///
/// Sessions start `Connected` once returned by a login routine. A command
/// timing out leaves the session `Disconnected`; `close` moves it to
/// `Closed` and is a no-op when called again, so implementations can also
/// call it from `Drop`.
pub trait GuestSession: Send {
    fn state(&self) -> SessionState;

    /// Runs `command` and returns its exit status and standard output.
    fn cmd_status_output(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<(i32, String), SessionError>;

    /// Like [`GuestSession::cmd_status_output`] but a non-zero exit status
    /// is an error.
    fn cmd_output(&mut self, command: &str, timeout: Duration) -> Result<String, SessionError> {
        let (status, output) = self.cmd_status_output(command, timeout)?;
        if status != 0 {
            return Err(SessionError::NonZeroExitStatus(status, output));
        }
        Ok(output)
    }

    fn close(&mut self);
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().clamp(1, u32::MAX as u128) as u32
}

fn is_ssh_timeout(e: &ssh2::Error) -> bool {
    e.code() == ssh2::ErrorCode::Session(SSH_ERROR_TIMEOUT)
}

/// Time left before `deadline`, `None` once it passed. A missing deadline
/// leaves the whole `timeout` for every call.
fn remaining(deadline: Option<Instant>, timeout: Duration) -> Option<Duration> {
    match deadline {
        Some(deadline) => deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero()),
        None => Some(timeout),
    }
}

/// Reads `reader` until EOF in fixed size chunks. `arm` gets the time left
/// before each read so the underlying transport can bound it; once the
/// deadline passed the read is abandoned with [`SessionError::Timeout`].
fn read_with_deadline<R: Read>(
    reader: &mut R,
    deadline: Option<Instant>,
    timeout: Duration,
    mut arm: impl FnMut(Duration),
) -> Result<String, SessionError> {
    let mut output = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let left = remaining(deadline, timeout).ok_or(SessionError::Timeout(timeout))?;
        arm(left);
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(SessionError::Timeout(timeout))
            }
            Err(e) => return Err(SessionError::Read(e)),
        }
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}

pub struct SshSession {
    session: Option<Session>,
    state: SessionState,
    peer: String,
}

impl fmt::Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish()
    }
}

impl SshSession {
    pub fn connect(ip: &str, auth: &Auth, timeout: Duration) -> Result<Self, SessionError> {
        let addr = (ip, DEFAULT_SSH_PORT)
            .to_socket_addrs()
            .map_err(|e| SessionError::Connection(e, ip.to_owned()))?
            .next()
            .ok_or_else(|| SessionError::Resolve(ip.to_owned()))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| SessionError::Connection(e, ip.to_owned()))?;
        let mut sess = Session::new().map_err(SessionError::Setup)?;
        sess.set_timeout(timeout_ms(timeout));
        sess.set_tcp_stream(tcp);
        sess.handshake().map_err(SessionError::Handshake)?;

        match auth {
            Auth::Password(p) => sess.userauth_password(&p.username, &p.password),
            Auth::KeyFile { username, path } => {
                sess.userauth_pubkey_file(username, None, path, None)
            }
        }
        .map_err(SessionError::Authentication)?;
        if !sess.authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        debug!("Logged into {ip} as {}", auth.username());
        Ok(SshSession {
            session: Some(sess),
            state: SessionState::Connected,
            peer: ip.to_owned(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn exec(
        sess: &Session,
        command: &str,
        timeout: Duration,
    ) -> Result<(i32, String), SessionError> {
        let ssh_err = |e: ssh2::Error, f: fn(ssh2::Error) -> SessionError| {
            if is_ssh_timeout(&e) {
                SessionError::Timeout(timeout)
            } else {
                f(e)
            }
        };
        let deadline = Instant::now().checked_add(timeout);

        sess.set_timeout(timeout_ms(timeout));
        let mut channel = sess
            .channel_session()
            .map_err(|e| ssh_err(e, SessionError::ChannelSession))?;
        channel
            .exec(command)
            .map_err(|e| ssh_err(e, SessionError::Command))?;

        let output = read_with_deadline(&mut channel, deadline, timeout, |left| {
            sess.set_timeout(timeout_ms(left))
        })?;

        let left = remaining(deadline, timeout).ok_or(SessionError::Timeout(timeout))?;
        sess.set_timeout(timeout_ms(left));
        // Intentionally ignore these results here as their failure
        // does not change the outcome of the command
        let _ = channel.close();
        let _ = channel.wait_close();

        let status = channel
            .exit_status()
            .map_err(|e| ssh_err(e, SessionError::ExitStatus))?;
        Ok((status, output))
    }

    // A timed out or broken read disconnects the session.
    fn track(&mut self, command: &str, r: &Result<(i32, String), SessionError>) {
        match r {
            Ok((status, output)) => {
                debug!("[{}] '{command}' exited with {status}: {output}", self.peer)
            }
            Err(e @ (SessionError::Timeout(_) | SessionError::Read(_))) => {
                warn!("[{}] '{command}' failed, session disconnected: {e}", self.peer);
                self.state = SessionState::Disconnected;
            }
            Err(e) => debug!("[{}] '{command}' failed: {e}", self.peer),
        }
    }
}

impl GuestSession for SshSession {
    fn state(&self) -> SessionState {
        self.state
    }

    fn cmd_status_output(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<(i32, String), SessionError> {
        let sess = match (&self.session, self.state) {
            (Some(sess), SessionState::Connected) => sess,
            _ => return Err(SessionError::NotConnected(self.state)),
        };

        debug!("[{}] running '{command}'", self.peer);
        let r = Self::exec(sess, command, timeout);
        self.track(command, &r);
        r
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(sess) = self.session.take() {
            let _ = sess.disconnect(None, "closing session", None);
        }
        debug!("Closed session to {}", self.peer);
        self.state = SessionState::Closed;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Retries an SSH login until it succeeds or `timeout` elapses.
pub fn ssh_login(ip: &str, auth: &Auth, timeout: Duration) -> Result<SshSession, SessionError> {
    let mut attempts = 0;
    let mut last_error = String::new();

    wait_until(timeout, LOGIN_RETRY_INTERVAL, || {
        attempts += 1;
        match SshSession::connect(ip, auth, DEFAULT_SSH_TIMEOUT.min(timeout)) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!("Login attempt {attempts} to {ip} failed: {e}");
                last_error = e.to_string();
                None
            }
        }
    })
    .map_err(|_| SessionError::LoginTimeout {
        ip: ip.to_owned(),
        timeout,
        last_error,
    })
}
