// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Scripted stand-ins for the host and for guests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    command_line, CommandResult, CommandRunner, Error, GuestSession, SessionError, SessionState,
};

type Handler = Box<dyn FnMut(&str, &[String]) -> Result<CommandResult, Error> + Send>;

/// A [`CommandRunner`] answering every invocation through a closure and
/// recording the command lines it was asked to run.
pub struct MockRunner {
    handler: Mutex<Handler>,
    calls: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&str, &[String]) -> Result<CommandResult, Error> + Send + 'static,
    {
        MockRunner {
            handler: Mutex::new(Box::new(handler)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every command with the same exit status and output.
    pub fn constant(exit_status: i32, stdout: &str, stderr: &str) -> Self {
        let (stdout, stderr) = (stdout.to_owned(), stderr.to_owned());
        Self::new(move |program, args| {
            Ok(CommandResult::new(
                &command_line(program, args),
                exit_status,
                &stdout,
                &stderr,
            ))
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Option<Duration>,
    ) -> Result<CommandResult, Error> {
        self.calls
            .lock()
            .unwrap()
            .push(command_line(program, args));
        let mut handler = self.handler.lock().unwrap();
        (*handler)(program, args)
    }
}

/// Counters shared between a [`MockSession`] and the test observing it.
#[derive(Clone, Default)]
pub struct SessionProbe {
    pub commands: Arc<Mutex<Vec<String>>>,
    pub closes: Arc<AtomicUsize>,
}

impl SessionProbe {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

/// A guest session replaying canned `(exit status, output)` replies in
/// order; once they run out every command returns `(0, "")`.
pub struct MockSession {
    replies: VecDeque<Result<(i32, String), SessionError>>,
    state: SessionState,
    probe: SessionProbe,
}

impl MockSession {
    pub fn new(probe: SessionProbe) -> Self {
        MockSession {
            replies: VecDeque::new(),
            state: SessionState::Connected,
            probe,
        }
    }

    pub fn reply(mut self, status: i32, output: &str) -> Self {
        self.replies.push_back(Ok((status, output.to_owned())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.replies.push_back(Err(SessionError::Timeout(timeout)));
        self
    }
}

impl GuestSession for MockSession {
    fn state(&self) -> SessionState {
        self.state
    }

    fn cmd_status_output(
        &mut self,
        command: &str,
        _timeout: Duration,
    ) -> Result<(i32, String), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected(self.state));
        }
        self.probe.commands.lock().unwrap().push(command.to_owned());

        let reply = self.replies.pop_front().unwrap_or(Ok((0, String::new())));
        if matches!(reply, Err(SessionError::Timeout(_))) {
            self.state = SessionState::Disconnected;
        }
        reply
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.state = SessionState::Closed;
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.close();
    }
}
