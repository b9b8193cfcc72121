// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Harness a scenario runs in: typed failure taxonomy, the verdict, the
//! cleanup stack, the per-run [`Context`] and the scenario [`Registry`].

mod checks;
mod cleanup;
mod context;
mod login;
mod registry;

use std::any::Any;
use std::fmt;

use test_infra::{SessionError, WaitTimeoutError};
use thiserror::Error;

pub use checks::{check_error_message, check_status, expect_sync};
pub use cleanup::Cleanup;
pub use context::{Context, Env, HarnessConfig, Session};
pub use login::{SessionLogin, SshLogin};
pub use registry::{Registry, RegistryError, ScenarioFn, ScenarioInfo};

/// Everything a scenario may bail out with.
///
/// `Fail`, `Cancel` and `Skip` are raised on purpose by scenario code. The
/// wrapped lower level errors are infrastructure problems and end up as
/// [`Outcome::Error`], except for parameter errors which cancel the run.
#[derive(Error, Debug)]
pub enum TestError {
    #[error("{0}")]
    Fail(String),
    #[error("{0}")]
    Cancel(String),
    #[error("{0}")]
    Skip(String),
    #[error("{0}")]
    Error(String),
    #[error("invalid scenario parameters")]
    Params(#[from] test_params::Error),
    #[error("virsh call failed")]
    Virsh(#[from] virsh::Error),
    #[error("XML configuration failed")]
    Xml(#[from] vm_xml::Error),
    #[error("guest session failed")]
    Session(#[from] SessionError),
    #[error("wait failed")]
    Wait(#[from] WaitTimeoutError),
    #[error("command execution failed")]
    Exec(#[from] test_infra::Error),
}

impl TestError {
    pub fn fail(reason: impl Into<String>) -> Self {
        TestError::Fail(reason.into())
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        TestError::Cancel(reason.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        TestError::Skip(reason.into())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        TestError::Error(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Renders an error and all of its sources on one line.
pub fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        chain.push_str(": ");
        chain.push_str(&s.to_string());
        source = s.source();
    }
    chain
}

/// Final verdict of one scenario run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail(String),
    Error(String),
    Cancel(String),
    Skip(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail(_) => "FAIL",
            Outcome::Error(_) => "ERROR",
            Outcome::Cancel(_) => "CANCEL",
            Outcome::Skip(_) => "SKIP",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Pass => None,
            Outcome::Fail(r) | Outcome::Error(r) | Outcome::Cancel(r) | Outcome::Skip(r) => {
                Some(r)
            }
        }
    }

    /// Process exit status reported by the runner.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Pass => 0,
            Outcome::Fail(_) => 1,
            Outcome::Error(_) => 2,
            Outcome::Cancel(_) | Outcome::Skip(_) => 77,
        }
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        Outcome::Error(format!("scenario panicked: {message}"))
    }
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Pass,
            Err(TestError::Fail(r)) => Outcome::Fail(r),
            Err(TestError::Cancel(r)) => Outcome::Cancel(r),
            Err(TestError::Skip(r)) => Outcome::Skip(r),
            Err(TestError::Error(r)) => Outcome::Error(r),
            Err(e @ TestError::Params(_)) => Outcome::Cancel(error_chain(&e)),
            Err(e) => Outcome::Error(error_chain(&e)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {reason}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Where a run currently is. Transitions are logged and emitted as events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    Setup,
    Action,
    Verify,
    Cleanup,
    Terminal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Setup => "setup",
            Phase::Action => "action",
            Phase::Verify => "verify",
            Phase::Cleanup => "cleanup",
            Phase::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(Outcome::from(Ok(())), Outcome::Pass);
        assert_eq!(
            Outcome::from(Err(TestError::fail("domain still running"))),
            Outcome::Fail("domain still running".to_owned())
        );
        assert_eq!(
            Outcome::from(Err(TestError::skip("no guest"))).exit_code(),
            77
        );

        let params = Outcome::from(Err(TestError::from(test_params::Error::Missing(
            "main_vm".to_owned(),
        ))));
        assert_eq!(
            params,
            Outcome::Cancel(
                "invalid scenario parameters: missing required parameter: main_vm".to_owned()
            )
        );

        let wait = Outcome::from(Err(TestError::from(WaitTimeoutError::Timedout(
            std::time::Duration::from_secs(1),
        ))));
        assert_eq!(wait.label(), "ERROR");
        assert_eq!(wait.exit_code(), 2);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Pass.to_string(), "PASS");
        assert_eq!(
            Outcome::Fail("exit status 0".to_owned()).to_string(),
            "FAIL: exit status 0"
        );
    }

    #[test]
    fn test_from_panic() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(
            Outcome::from_panic(payload.as_ref()),
            Outcome::Error("scenario panicked: boom".to_owned())
        );
        let payload: Box<dyn Any + Send> = Box::new(format!("code {}", 3));
        assert_eq!(
            Outcome::from_panic(payload.as_ref()).reason(),
            Some("scenario panicked: code 3")
        );
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::Setup < Phase::Action);
        assert!(Phase::Cleanup < Phase::Terminal);
        assert_eq!(Phase::Verify.to_string(), "verify");
    }
}
