// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use log::info;
use scenario::{check_status, expect_sync, Context, Phase, Result, TestError};
use test_params::{FromParams, TestParams};
use virsh::Virsh;
use vm_xml::LibvirtXml;

pub const DESCRIPTION: &str = "virtual network destroy/start, undefine/define and bridge change";

#[derive(Clone, Debug, PartialEq, Eq)]
enum NetAction {
    DestroyStart,
    UndefineDefine,
    ChangeBridge(String),
}

struct NetConfig {
    net: String,
    action: NetAction,
    status_error: bool,
}

impl FromParams for NetConfig {
    fn from_params(params: &TestParams) -> test_params::Result<Self> {
        let action = match params.get_or("net_action", "destroy_start") {
            "destroy_start" => NetAction::DestroyStart,
            "undefine_define" => NetAction::UndefineDefine,
            "change_bridge" => NetAction::ChangeBridge(params.require("new_bridge")?.to_owned()),
            other => {
                return Err(test_params::Error::Conversion(
                    "net_action".to_owned(),
                    other.to_owned(),
                ))
            }
        };

        Ok(NetConfig {
            net: params.get_or("net_name", "default").to_owned(),
            action,
            status_error: params.get_bool("status_error", false)?,
        })
    }
}

fn expect_active(virsh: &Virsh, net: &str, active: bool) -> Result<()> {
    let info = virsh.net_info(net)?;
    if info.active != active {
        return Err(TestError::fail(format!(
            "network {net} active={} after the action, expected {active}",
            info.active
        )));
    }
    Ok(())
}

pub fn run(ctx: &mut Context) -> Result<()> {
    let config: NetConfig = ctx.config()?;
    let virsh = ctx.virsh().clone();
    let mut netxml = ctx.backup_network(&config.net)?;

    if !virsh.net_info(&config.net)?.active {
        virsh.net_start(&config.net)?;
    }

    ctx.enter(Phase::Action);
    match &config.action {
        NetAction::DestroyStart => {
            let result = virsh.ignore_status().net_destroy(&config.net)?;
            check_status(&result, config.status_error)?;
            if config.status_error {
                return Ok(());
            }
            ctx.enter(Phase::Verify);
            expect_active(&virsh, &config.net, false)?;

            virsh.net_start(&config.net)?;
            expect_active(&virsh, &config.net, true)?;
        }
        NetAction::UndefineDefine => {
            let result = virsh.ignore_status().net_undefine(&config.net)?;
            check_status(&result, config.status_error)?;
            if config.status_error {
                return Ok(());
            }
            ctx.enter(Phase::Verify);
            let info = virsh.net_info(&config.net)?;
            if info.persistent {
                return Err(TestError::fail(format!(
                    "network {} is still persistent after undefine",
                    config.net
                )));
            }

            netxml.define(&virsh)?;
            let info = virsh.net_info(&config.net)?;
            if !info.persistent || !info.active {
                return Err(TestError::fail(format!(
                    "network {} after define: persistent={} active={}",
                    config.net, info.persistent, info.active
                )));
            }
        }
        NetAction::ChangeBridge(bridge) => {
            virsh.net_destroy(&config.net)?;
            netxml.set_bridge(bridge);
            let synced = netxml.sync(&virsh);
            let accepted = synced.is_ok();
            expect_sync(synced, config.status_error)?;
            if !accepted {
                return Ok(());
            }

            ctx.enter(Phase::Verify);
            virsh.net_start(&config.net)?;
            let info = virsh.net_info(&config.net)?;
            if info.bridge.as_deref() != Some(bridge.as_str()) {
                return Err(TestError::fail(format!(
                    "network {} uses bridge {:?}, expected {bridge}",
                    config.net, info.bridge
                )));
            }
        }
    }

    info!("Network {} passed {:?}", config.net, config.action);
    Ok(())
}
