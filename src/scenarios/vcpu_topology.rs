// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use log::info;
use scenario::{expect_sync, Context, Phase, Result, TestError};
use test_params::{FromParams, TestParams};
use vm_xml::{CpuTopology, LibvirtXml, VmXml};

pub const DESCRIPTION: &str = "vCPU count and CPU topology in the domain XML, checked in the guest";

const NPROC_TIMEOUT: Duration = Duration::from_secs(30);

struct TopologyConfig {
    vm: String,
    vcpu_max: u32,
    vcpu_current: Option<u32>,
    topology: Option<CpuTopology>,
    status_error: bool,
    check_guest: bool,
}

impl FromParams for TopologyConfig {
    fn from_params(params: &TestParams) -> test_params::Result<Self> {
        let sockets = params.convert::<u32>("sockets")?;
        let cores = params.convert::<u32>("cores")?;
        let threads = params.convert::<u32>("threads")?;
        let topology = match (sockets, cores, threads) {
            (Some(s), Some(c), Some(t)) => Some(CpuTopology::new(s, c, t)),
            (None, None, None) => None,
            _ => {
                let missing = [("sockets", sockets), ("cores", cores), ("threads", threads)]
                    .into_iter()
                    .find_map(|(key, value)| value.is_none().then_some(key))
                    .unwrap_or("sockets");
                return Err(test_params::Error::Missing(missing.to_owned()));
            }
        };

        Ok(TopologyConfig {
            vm: params.require("main_vm")?.to_owned(),
            vcpu_max: params.get_num("vcpu_max", 2)?,
            vcpu_current: params.convert("vcpu_current")?,
            topology,
            status_error: params.get_bool("status_error", false)?,
            check_guest: params.get_bool("check_guest", true)?,
        })
    }
}

fn verify_definition(vmxml: &VmXml, config: &TopologyConfig) -> Result<()> {
    let vcpu = vmxml.vcpu()?;
    let current = vmxml.current_vcpu()?;
    let topology = vmxml.topology()?;

    if vcpu != config.vcpu_max {
        return Err(TestError::fail(format!(
            "defined maximum vcpu is {vcpu}, expected {}",
            config.vcpu_max
        )));
    }
    let expected_current = config.vcpu_current.unwrap_or(config.vcpu_max);
    if current != expected_current {
        return Err(TestError::fail(format!(
            "defined current vcpu is {current}, expected {expected_current}"
        )));
    }
    if config.topology.is_some() && topology != config.topology {
        return Err(TestError::fail(format!(
            "defined topology is {topology:?}, expected {:?}",
            config.topology
        )));
    }
    Ok(())
}

pub fn run(ctx: &mut Context) -> Result<()> {
    let config: TopologyConfig = ctx.config()?;
    let virsh = ctx.virsh().clone();
    let mut vmxml = ctx.backup_vm(&config.vm)?;

    if virsh.domain_state(&config.vm)?.is_active() {
        virsh.destroy(&config.vm, "")?;
    }

    ctx.enter(Phase::Action);
    vmxml.set_vcpu(config.vcpu_max);
    vmxml.set_current_vcpu(config.vcpu_current);
    vmxml.set_topology(config.topology);
    let synced = vmxml.sync(&virsh);
    let accepted = synced.is_ok();
    expect_sync(synced, config.status_error)?;
    if !accepted {
        return Ok(());
    }

    ctx.enter(Phase::Verify);
    let defined = VmXml::new_from_inactive_dumpxml(&virsh, &config.vm)?;
    verify_definition(&defined, &config)?;

    if config.check_guest {
        virsh.start(&config.vm, "")?;
        let session = ctx.login(&config.vm)?;
        let output = session.cmd_output("nproc", NPROC_TIMEOUT)?;
        let online: u32 = output
            .trim()
            .parse()
            .map_err(|_| TestError::error(format!("unexpected nproc output {output:?}")))?;

        let expected = config.vcpu_current.unwrap_or(config.vcpu_max);
        if online != expected {
            return Err(TestError::fail(format!(
                "guest sees {online} vcpus, expected {expected}"
            )));
        }
        info!("Guest {} has {online} vcpus online", config.vm);
        session.close();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use scenario::Outcome;

    use super::*;
    use crate::scenarios::registry;
    use crate::test_util::tests::{FakeLibvirt, FAKE_MAX_VCPUS, V1_XML};

    fn topology(fake: &FakeLibvirt, pairs: &[(&str, &str)]) -> Outcome {
        let mut params = TestParams::from_pairs([("main_vm", "v1")]);
        for (k, v) in pairs {
            params.set(*k, *v);
        }
        registry()
            .unwrap()
            .run("vcpu_topology", params, &fake.env())
            .unwrap()
    }

    #[test]
    fn test_topology_params_go_together() {
        let params = TestParams::from_pairs([("main_vm", "v1"), ("sockets", "2")]);
        assert!(TopologyConfig::from_params(&params).is_err());

        let params = TestParams::from_pairs([
            ("main_vm", "v1"),
            ("sockets", "2"),
            ("cores", "2"),
            ("threads", "1"),
        ]);
        let config = TopologyConfig::from_params(&params).unwrap();
        assert_eq!(config.topology, Some(CpuTopology::new(2, 2, 1)));
        assert!(config.check_guest);
    }

    #[test]
    fn test_topology_checked_in_guest() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let outcome = topology(
            &fake,
            &[
                ("vcpu_max", "4"),
                ("vcpu_current", "3"),
                ("sockets", "2"),
                ("cores", "2"),
                ("threads", "1"),
            ],
        );
        assert_eq!(outcome, Outcome::Pass);
        assert_eq!(fake.probe.commands(), vec!["nproc"]);
        assert_eq!(fake.probe.close_count(), 1);
    }

    #[test]
    fn test_restored_after_each_run() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let before = fake.domain_xml("v1").unwrap();
        let pairs = [("vcpu_max", "8"), ("check_guest", "no")];

        assert_eq!(topology(&fake, &pairs), Outcome::Pass);
        assert_eq!(topology(&fake, &pairs), Outcome::Pass);

        assert_eq!(fake.domain_xml("v1").unwrap(), before);
        assert!(fake.domain_running("v1"));
    }

    #[test]
    fn test_rejected_topology() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, false);
        let before = fake.domain_xml("v1").unwrap();
        let too_many = (FAKE_MAX_VCPUS + 1).to_string();

        let outcome = topology(&fake, &[("vcpu_max", too_many.as_str()), ("status_error", "yes")]);
        assert_eq!(outcome, Outcome::Pass);
        assert!(matches!(
            topology(&fake, &[("vcpu_max", too_many.as_str()), ("status_error", "no")]),
            Outcome::Fail(_)
        ));

        // Caught locally, before libvirt sees it.
        let outcome = topology(
            &fake,
            &[
                ("vcpu_max", "4"),
                ("sockets", "1"),
                ("cores", "2"),
                ("threads", "1"),
                ("status_error", "yes"),
            ],
        );
        assert_eq!(outcome, Outcome::Pass);
        assert_eq!(fake.domain_xml("v1").unwrap(), before);
    }
}
