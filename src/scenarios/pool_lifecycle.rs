// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use log::info;
use scenario::{check_status, Context, Phase, Result, TestError};
use test_params::{FromParams, TestParams};
use virsh::{PoolState, Virsh};
use vm_xml::LibvirtXml;

pub const DESCRIPTION: &str = "storage pool destroy/start, refresh and undefine/define";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PoolAction {
    DestroyStart,
    Refresh,
    UndefineDefine,
}

struct PoolConfig {
    pool: String,
    action: PoolAction,
    status_error: bool,
}

impl FromParams for PoolConfig {
    fn from_params(params: &TestParams) -> test_params::Result<Self> {
        let action = match params.get_or("pool_action", "destroy_start") {
            "destroy_start" => PoolAction::DestroyStart,
            "refresh" => PoolAction::Refresh,
            "undefine_define" => PoolAction::UndefineDefine,
            other => {
                return Err(test_params::Error::Conversion(
                    "pool_action".to_owned(),
                    other.to_owned(),
                ))
            }
        };

        Ok(PoolConfig {
            pool: params.get_or("pool_name", "default").to_owned(),
            action,
            status_error: params.get_bool("status_error", false)?,
        })
    }
}

fn expect_state(virsh: &Virsh, pool: &str, expected: PoolState) -> Result<()> {
    let state = virsh.pool_info(pool)?.state;
    if state != expected {
        return Err(TestError::fail(format!(
            "pool {pool} is {state:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

pub fn run(ctx: &mut Context) -> Result<()> {
    let config: PoolConfig = ctx.config()?;
    let virsh = ctx.virsh().clone();
    let poolxml = ctx.backup_pool(&config.pool)?;

    // An expected refresh failure runs against the pool as found.
    let as_found = config.action == PoolAction::Refresh && config.status_error;
    if !as_found && virsh.pool_info(&config.pool)?.state == PoolState::Inactive {
        virsh.pool_start(&config.pool)?;
    }

    ctx.enter(Phase::Action);
    let result = match config.action {
        PoolAction::DestroyStart => virsh.ignore_status().pool_destroy(&config.pool)?,
        PoolAction::Refresh => virsh.ignore_status().pool_refresh(&config.pool)?,
        PoolAction::UndefineDefine => virsh.ignore_status().pool_undefine(&config.pool)?,
    };
    check_status(&result, config.status_error)?;
    if config.status_error {
        return Ok(());
    }

    ctx.enter(Phase::Verify);
    match config.action {
        PoolAction::DestroyStart => {
            expect_state(&virsh, &config.pool, PoolState::Inactive)?;
            virsh.pool_start(&config.pool)?;
            expect_state(&virsh, &config.pool, PoolState::Running)?;
        }
        PoolAction::Refresh => {
            expect_state(&virsh, &config.pool, PoolState::Running)?;
            let info = virsh.pool_info(&config.pool)?;
            if info.capacity.is_none() {
                return Err(TestError::fail(format!(
                    "pool {} reports no capacity after refresh",
                    config.pool
                )));
            }
        }
        PoolAction::UndefineDefine => {
            if virsh.pool_info(&config.pool)?.persistent {
                return Err(TestError::fail(format!(
                    "pool {} is still persistent after undefine",
                    config.pool
                )));
            }
            poolxml.define(&virsh)?;
            let info = virsh.pool_info(&config.pool)?;
            if !info.persistent {
                return Err(TestError::fail(format!(
                    "pool {} is not persistent after define",
                    config.pool
                )));
            }
        }
    }

    info!("Pool {} passed {:?}", config.pool, config.action);
    Ok(())
}
