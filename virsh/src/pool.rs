// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::Path;

use test_infra::CommandResult;

use crate::{parse_info_output, yes_no, Error, Result, Virsh};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    Inactive,
    Building,
    Running,
    Degraded,
    Inaccessible,
}

impl PoolState {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "inactive" => PoolState::Inactive,
            "building" => PoolState::Building,
            "running" => PoolState::Running,
            "degraded" => PoolState::Degraded,
            "inaccessible" => PoolState::Inaccessible,
            _ => return None,
        })
    }
}

/// Parsed `virsh pool-info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolInfo {
    pub name: String,
    pub uuid: String,
    pub state: PoolState,
    pub persistent: bool,
    pub autostart: bool,
    /// As printed, e.g. `49.98 GiB`. Absent for inactive pools.
    pub capacity: Option<String>,
}

impl Virsh {
    pub fn pool_dumpxml(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("pool-dumpxml", &[name], extra)
    }

    pub fn pool_define(&self, xml_file: &Path) -> Result<CommandResult> {
        self.command_path("pool-define", xml_file, "")
    }

    pub fn pool_undefine(&self, name: &str) -> Result<CommandResult> {
        self.command("pool-undefine", &[name])
    }

    pub fn pool_start(&self, name: &str) -> Result<CommandResult> {
        self.command("pool-start", &[name])
    }

    pub fn pool_destroy(&self, name: &str) -> Result<CommandResult> {
        self.command("pool-destroy", &[name])
    }

    pub fn pool_refresh(&self, name: &str) -> Result<CommandResult> {
        self.command("pool-refresh", &[name])
    }

    pub fn pool_list(&self, extra: &str) -> Result<Vec<String>> {
        self.names("pool-list", extra)
    }

    pub fn pool_info(&self, name: &str) -> Result<PoolInfo> {
        let result = self.strict().command("pool-info", &[name])?;
        let info = parse_info_output(&result.stdout);
        let parse_error = || Error::Parse {
            verb: "pool-info".to_owned(),
            output: result.stdout.clone(),
        };

        let pool_name = info.get("Name").ok_or_else(parse_error)?;
        let state = info
            .get("State")
            .and_then(|s| PoolState::parse(s))
            .ok_or_else(parse_error)?;

        Ok(PoolInfo {
            name: pool_name.clone(),
            uuid: info.get("UUID").cloned().unwrap_or_default(),
            state,
            persistent: yes_no(info.get("Persistent")),
            autostart: yes_no(info.get("Autostart")),
            capacity: info.get("Capacity").cloned(),
        })
    }
}
