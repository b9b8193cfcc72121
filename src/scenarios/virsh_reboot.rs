// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use log::{debug, info};
use scenario::{check_status, Context, Phase, Result, Session, TestError};
use test_infra::wait_until;
use test_params::{FromParams, TestParams};

pub const DESCRIPTION: &str = "virsh reboot, confirmed by a new boot id in the guest";

const BOOT_ID_COMMAND: &str = "cat /proc/sys/kernel/random/boot_id";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

struct RebootConfig {
    vm: String,
    extra: String,
    status_error: bool,
    timeout: Duration,
}

impl FromParams for RebootConfig {
    fn from_params(params: &TestParams) -> test_params::Result<Self> {
        Ok(RebootConfig {
            vm: params.require("main_vm")?.to_owned(),
            extra: params.get_or("reboot_extra", "").to_owned(),
            status_error: params.get_bool("status_error", false)?,
            timeout: Duration::from_secs(params.get_num("reboot_timeout", 240)?),
        })
    }
}

fn boot_id(session: &Session) -> Result<String> {
    Ok(session
        .cmd_output(BOOT_ID_COMMAND, COMMAND_TIMEOUT)?
        .trim()
        .to_owned())
}

pub fn run(ctx: &mut Context) -> Result<()> {
    let config: RebootConfig = ctx.config()?;
    let virsh = ctx.virsh().clone();
    ctx.backup_vm(&config.vm)?;

    if !virsh.domain_state(&config.vm)?.is_active() {
        virsh.start(&config.vm, "")?;
    }
    let session = ctx.login(&config.vm)?;
    let before = boot_id(&session)?;
    session.close();
    debug!("{} boot id before reboot: {before}", config.vm);

    ctx.enter(Phase::Action);
    let result = virsh.ignore_status().reboot(&config.vm, &config.extra)?;

    ctx.enter(Phase::Verify);
    check_status(&result, config.status_error)?;
    if config.status_error {
        return Ok(());
    }

    let login = ctx.env().login.clone();
    let after = wait_until(config.timeout, POLL_INTERVAL, || {
        let mut session = login.login(&virsh, &config.vm).ok()?;
        let id = session.cmd_output(BOOT_ID_COMMAND, COMMAND_TIMEOUT).ok();
        session.close();
        id.map(|id| id.trim().to_owned()).filter(|id| *id != before)
    })
    .map_err(|_| {
        TestError::fail(format!(
            "{} did not come back with a new boot id within {:?}",
            config.vm, config.timeout
        ))
    })?;

    info!("{} rebooted, boot id {before} -> {after}", config.vm);
    Ok(())
}

#[cfg(test)]
mod tests {
    use scenario::Outcome;

    use super::*;
    use crate::scenarios::registry;
    use crate::test_util::tests::{FakeLibvirt, V1_XML};

    fn reboot(fake: &FakeLibvirt, pairs: &[(&str, &str)]) -> Outcome {
        let mut params = TestParams::from_pairs([("main_vm", "v1"), ("reboot_timeout", "5")]);
        for (k, v) in pairs {
            params.set(*k, *v);
        }
        registry()
            .unwrap()
            .run("virsh_reboot", params, &fake.env())
            .unwrap()
    }

    #[test]
    fn test_reboot_changes_boot_id() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, false);
        assert_eq!(reboot(&fake, &[]), Outcome::Pass);

        assert_eq!(fake.probe.commands(), vec![BOOT_ID_COMMAND; 2]);
        assert_eq!(fake.probe.close_count(), 2);
        // Started for the run, shut off again by the restore.
        assert!(!fake.domain_running("v1"));
    }

    #[test]
    fn test_huge_reboot_timeout() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let forever = u64::MAX.to_string();
        let outcome = reboot(&fake, &[("reboot_timeout", forever.as_str())]);
        assert_eq!(outcome, Outcome::Pass);
    }

    #[test]
    fn test_unexpected_reboot_success_fails() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let outcome = reboot(&fake, &[("reboot_extra", "--mode acpi"), ("status_error", "yes")]);
        assert!(matches!(outcome, Outcome::Fail(_)));
        assert!(fake.domain_running("v1"));
    }
}
