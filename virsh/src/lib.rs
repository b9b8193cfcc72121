// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Thin adapter over the `virsh` command line tool.
//!
//! Every call returns the raw [`CommandResult`]. Whether a non-zero exit
//! status is an error is decided by [`VirshOptions::ignore_status`]: with
//! it set the caller inspects the result, without it the call fails with
//! [`Error::NonZeroExitStatus`].

mod domain;
mod network;
mod pool;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use event_monitor::event;
use log::{debug, info};
use test_infra::{CommandResult, CommandRunner, HostRunner};
use thiserror::Error;

pub use domain::{DomainState, InterfaceAddress};
pub use network::NetworkInfo;
pub use pool::{PoolInfo, PoolState};

pub const DEFAULT_VIRSH_BINARY: &str = "virsh";
pub const DEFAULT_VIRSH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum Error {
    #[error("running virsh {1} failed")]
    Exec(#[source] test_infra::Error, String),
    #[error("virsh {verb} failed: {result}")]
    NonZeroExitStatus {
        verb: String,
        result: Box<CommandResult>,
    },
    #[error("unexpected output from virsh {verb}: {output:?}")]
    Parse { verb: String, output: String },
}

impl Error {
    /// The command did not finish in time. Callers may retry or treat
    /// this as the expected outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Exec(e, _) if e.is_timeout())
    }

    pub fn result(&self) -> Option<&CommandResult> {
        match self {
            Error::NonZeroExitStatus { result, .. } => Some(result.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug)]
pub struct VirshOptions {
    /// Passed as `--connect`.
    pub uri: Option<String>,
    /// Log command lines and full output at info level.
    pub debug: bool,
    /// Return a non-zero exit status as `Ok` instead of an error.
    pub ignore_status: bool,
    /// Use a read-only connection.
    pub readonly: bool,
    pub timeout: Option<Duration>,
}

impl Default for VirshOptions {
    fn default() -> Self {
        VirshOptions {
            uri: None,
            debug: false,
            ignore_status: false,
            readonly: false,
            timeout: Some(DEFAULT_VIRSH_TIMEOUT),
        }
    }
}

#[derive(Clone)]
pub struct Virsh {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    options: VirshOptions,
}

impl Virsh {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Virsh {
            runner,
            binary: DEFAULT_VIRSH_BINARY.to_owned(),
            options: VirshOptions::default(),
        }
    }

    pub fn host() -> Self {
        Self::new(Arc::new(HostRunner))
    }

    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_owned();
        self
    }

    pub fn with_options(mut self, options: VirshOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &VirshOptions {
        &self.options
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    fn adjusted<F: FnOnce(&mut VirshOptions)>(&self, f: F) -> Self {
        let mut virsh = self.clone();
        f(&mut virsh.options);
        virsh
    }

    pub fn ignore_status(&self) -> Self {
        self.adjusted(|o| o.ignore_status = true)
    }

    pub fn strict(&self) -> Self {
        self.adjusted(|o| o.ignore_status = false)
    }

    pub fn readonly(&self) -> Self {
        self.adjusted(|o| o.readonly = true)
    }

    pub fn debug(&self) -> Self {
        self.adjusted(|o| o.debug = true)
    }

    pub fn with_uri(&self, uri: &str) -> Self {
        self.adjusted(|o| o.uri = Some(uri.to_owned()))
    }

    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        self.adjusted(|o| o.timeout = timeout)
    }

    /// Runs `virsh <verb> <args>`.
    pub fn command(&self, verb: &str, args: &[&str]) -> Result<CommandResult> {
        self.command_extra(verb, args, "")
    }

    /// Runs `virsh <verb> <args> <extra>`, `extra` being native virsh flags
    /// such as `--live --config` split on whitespace.
    pub fn command_extra(&self, verb: &str, args: &[&str], extra: &str) -> Result<CommandResult> {
        let mut cmd_args = Vec::new();
        if let Some(uri) = &self.options.uri {
            cmd_args.push("--connect".to_owned());
            cmd_args.push(uri.clone());
        }
        if self.options.readonly {
            cmd_args.push("--readonly".to_owned());
        }
        cmd_args.push(verb.to_owned());
        cmd_args.extend(args.iter().map(|a| (*a).to_owned()));
        cmd_args.extend(extra.split_whitespace().map(str::to_owned));

        let result = self
            .runner
            .run(&self.binary, &cmd_args, self.options.timeout)
            .map_err(|e| {
                event!("virsh", "command", "verb", verb, "error", e.to_string());
                Error::Exec(e, verb.to_owned())
            })?;

        event!(
            "virsh",
            "command",
            "verb",
            verb,
            "exit_status",
            result.exit_status.to_string()
        );
        if self.options.debug {
            info!(
                "Command: {}\nExit status: {}\nstdout:\n{}\nstderr:\n{}",
                result.command, result.exit_status, result.stdout, result.stderr
            );
        } else {
            debug!("'{}' exited with {}", result.command, result.exit_status);
        }

        if !result.success() && !self.options.ignore_status {
            result.log_failure();
            return Err(Error::NonZeroExitStatus {
                verb: verb.to_owned(),
                result: Box::new(result),
            });
        }

        Ok(result)
    }

    pub(crate) fn command_path(
        &self,
        verb: &str,
        path: &Path,
        extra: &str,
    ) -> Result<CommandResult> {
        let path = path.to_string_lossy();
        self.command_extra(verb, &[&*path], extra)
    }

    /// Checks the connection to libvirtd, `virsh uri`.
    pub fn uri(&self) -> Result<String> {
        Ok(self.strict().command("uri", &[])?.stdout_text().to_owned())
    }

    pub(crate) fn names(&self, verb: &str, extra: &str) -> Result<Vec<String>> {
        let result = self.strict().command_extra(verb, &["--name"], extra)?;
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Parses `Key:   value` listings such as `dominfo`, `net-info` and
/// `pool-info` output.
pub fn parse_info_output(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

pub(crate) fn yes_no(value: Option<&String>) -> bool {
    value.is_some_and(|v| v == "yes")
}
