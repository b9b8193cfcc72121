// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use test_infra::CommandResult;

use crate::{parse_info_output, Error, Result, Virsh};

/// Domain state as printed by `virsh domstate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainState {
    Running,
    Blocked,
    Paused,
    InShutdown,
    ShutOff,
    Crashed,
    PmSuspended,
    NoState,
}

impl DomainState {
    pub fn is_active(&self) -> bool {
        !matches!(self, DomainState::ShutOff | DomainState::Crashed)
    }
}

#[derive(Debug)]
pub struct UnknownDomainState(pub String);

impl fmt::Display for UnknownDomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown domain state {:?}", self.0)
    }
}

impl std::error::Error for UnknownDomainState {}

impl FromStr for DomainState {
    type Err = UnknownDomainState;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim() {
            "running" => DomainState::Running,
            "blocked" | "idle" => DomainState::Blocked,
            "paused" => DomainState::Paused,
            "in shutdown" => DomainState::InShutdown,
            "shut off" => DomainState::ShutOff,
            "crashed" => DomainState::Crashed,
            "pmsuspended" => DomainState::PmSuspended,
            "no state" => DomainState::NoState,
            other => return Err(UnknownDomainState(other.to_owned())),
        })
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainState::Running => "running",
            DomainState::Blocked => "blocked",
            DomainState::Paused => "paused",
            DomainState::InShutdown => "in shutdown",
            DomainState::ShutOff => "shut off",
            DomainState::Crashed => "crashed",
            DomainState::PmSuspended => "pmsuspended",
            DomainState::NoState => "no state",
        };
        f.write_str(s)
    }
}

/// One row of `virsh domifaddr`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub name: String,
    pub mac: String,
    pub protocol: String,
    /// Address without the prefix length.
    pub address: String,
}

fn parse_domifaddr(output: &str) -> Vec<InterfaceAddress> {
    let mut addresses = Vec::new();
    let mut last_iface: Option<(String, String)> = None;

    for line in output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
    {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Continuation rows for extra addresses of the same interface
        // carry `-` in the name and MAC columns.
        let (name, mac, protocol, address) = match fields.as_slice() {
            ["-", "-", protocol, address] => match &last_iface {
                Some((name, mac)) => (name.clone(), mac.clone(), *protocol, *address),
                None => continue,
            },
            [name, mac, protocol, address] => {
                ((*name).to_owned(), (*mac).to_owned(), *protocol, *address)
            }
            _ => continue,
        };
        last_iface = Some((name.clone(), mac.clone()));

        let address = address.split('/').next().unwrap_or(address).to_owned();
        addresses.push(InterfaceAddress {
            name,
            mac,
            protocol: protocol.to_owned(),
            address,
        });
    }

    addresses
}

impl Virsh {
    pub fn start(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("start", &[name], extra)
    }

    pub fn destroy(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("destroy", &[name], extra)
    }

    pub fn shutdown(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("shutdown", &[name], extra)
    }

    pub fn reboot(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("reboot", &[name], extra)
    }

    pub fn suspend(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("suspend", &[name], extra)
    }

    pub fn resume(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("resume", &[name], extra)
    }

    pub fn undefine(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("undefine", &[name], extra)
    }

    /// `extra` takes `--inactive`, `--security-info` and friends.
    pub fn dumpxml(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("dumpxml", &[name], extra)
    }

    pub fn define(&self, xml_file: &Path) -> Result<CommandResult> {
        self.command_path("define", xml_file, "")
    }

    pub fn setvcpus(&self, name: &str, count: u32, extra: &str) -> Result<CommandResult> {
        self.command_extra("setvcpus", &[name, &count.to_string()], extra)
    }

    /// `size` in KiB.
    pub fn setmem(&self, name: &str, size: u64, extra: &str) -> Result<CommandResult> {
        self.command_extra("setmem", &[name, &size.to_string()], extra)
    }

    /// `size` in KiB.
    pub fn setmaxmem(&self, name: &str, size: u64, extra: &str) -> Result<CommandResult> {
        self.command_extra("setmaxmem", &[name, &size.to_string()], extra)
    }

    pub fn attach_device(
        &self,
        name: &str,
        xml_file: &Path,
        extra: &str,
    ) -> Result<CommandResult> {
        let file = xml_file.to_string_lossy();
        self.command_extra("attach-device", &[name, &*file], extra)
    }

    pub fn detach_device(
        &self,
        name: &str,
        xml_file: &Path,
        extra: &str,
    ) -> Result<CommandResult> {
        let file = xml_file.to_string_lossy();
        self.command_extra("detach-device", &[name, &*file], extra)
    }

    pub fn domstate(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("domstate", &[name], extra)
    }

    /// Current state of a domain. Always fails on a non-zero exit status.
    pub fn domain_state(&self, name: &str) -> Result<DomainState> {
        let result = self.strict().domstate(name, "")?;
        let first = result.stdout_text().lines().next().unwrap_or_default();
        first.parse().map_err(|_| Error::Parse {
            verb: "domstate".to_owned(),
            output: result.stdout.clone(),
        })
    }

    pub fn dominfo(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let result = self.strict().command("dominfo", &[name])?;
        Ok(parse_info_output(&result.stdout))
    }

    /// Numeric id of a running domain, `None` for an inactive one.
    pub fn domid(&self, name: &str) -> Result<Option<u32>> {
        let result = self.strict().command("domid", &[name])?;
        match result.stdout_text() {
            "-" | "" => Ok(None),
            id => id.parse().map(Some).map_err(|_| Error::Parse {
                verb: "domid".to_owned(),
                output: result.stdout.clone(),
            }),
        }
    }

    pub fn domuuid(&self, name: &str) -> Result<String> {
        let result = self.strict().command("domuuid", &[name])?;
        Ok(result.stdout_text().to_owned())
    }

    /// Interface addresses of a running domain. `extra` selects the
    /// source, e.g. `--source arp`.
    pub fn domifaddr(&self, name: &str, extra: &str) -> Result<Vec<InterfaceAddress>> {
        let result = self.strict().command_extra("domifaddr", &[name], extra)?;
        Ok(parse_domifaddr(&result.stdout))
    }

    /// Domain names, `virsh list --name <extra>`.
    pub fn list(&self, extra: &str) -> Result<Vec<String>> {
        self.names("list", extra)
    }

    pub fn domain_exists(&self, name: &str) -> Result<bool> {
        Ok(self.ignore_status().domstate(name, "")?.success())
    }
}
