// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use log::info;
use scenario::{check_status, Context, Phase, Result, TestError};
use test_params::{FromParams, TestParams};
use virsh::Virsh;

pub const DESCRIPTION: &str = "virsh destroy through a name, id, uuid or raw domain reference";

/// How the domain is addressed on the `destroy` command line.
#[derive(Clone, Debug, PartialEq, Eq)]
enum DomainRef {
    Name,
    Id,
    Uuid,
    HexId,
    /// Passed as is, e.g. a name that does not exist.
    Literal(String),
}

impl From<&str> for DomainRef {
    fn from(s: &str) -> Self {
        match s {
            "name" => DomainRef::Name,
            "id" => DomainRef::Id,
            "uuid" => DomainRef::Uuid,
            "hex_id" => DomainRef::HexId,
            other => DomainRef::Literal(other.to_owned()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PreState {
    Running,
    ShutOff,
}

struct DestroyConfig {
    vm: String,
    vm_ref: DomainRef,
    extra: String,
    pre_state: PreState,
    status_error: bool,
}

impl FromParams for DestroyConfig {
    fn from_params(params: &TestParams) -> test_params::Result<Self> {
        let pre_state = match params.get_or("pre_vm_state", "running") {
            "running" => PreState::Running,
            "shut off" | "shutoff" => PreState::ShutOff,
            other => {
                return Err(test_params::Error::Conversion(
                    "pre_vm_state".to_owned(),
                    other.to_owned(),
                ))
            }
        };

        Ok(DestroyConfig {
            vm: params.require("main_vm")?.to_owned(),
            vm_ref: params.get_or("destroy_vm_ref", "name").into(),
            extra: params.get_or("destroy_extra", "").to_owned(),
            pre_state,
            status_error: params.get_bool("status_error", false)?,
        })
    }
}

fn resolve_ref(virsh: &Virsh, config: &DestroyConfig) -> Result<String> {
    let id = || -> Result<Option<u32>> { Ok(virsh.domid(&config.vm)?) };
    Ok(match &config.vm_ref {
        DomainRef::Name => config.vm.clone(),
        DomainRef::Id => id()?.map_or_else(|| "-".to_owned(), |id| id.to_string()),
        DomainRef::HexId => id()?.map_or_else(|| "-".to_owned(), |id| format!("{id:#x}")),
        DomainRef::Uuid => virsh.domuuid(&config.vm)?,
        DomainRef::Literal(s) => s.clone(),
    })
}

pub fn run(ctx: &mut Context) -> Result<()> {
    let config: DestroyConfig = ctx.config()?;
    let virsh = ctx.virsh().clone();
    ctx.backup_vm(&config.vm)?;

    let active = virsh.domain_state(&config.vm)?.is_active();
    match config.pre_state {
        PreState::Running if !active => {
            virsh.start(&config.vm, "")?;
        }
        PreState::ShutOff if active => {
            virsh.destroy(&config.vm, "")?;
        }
        _ => {}
    }

    let vm_ref = resolve_ref(&virsh, &config)?;
    ctx.set_param("resolved_vm_ref", &vm_ref);

    ctx.enter(Phase::Action);
    let result = virsh.ignore_status().destroy(&vm_ref, &config.extra)?;

    ctx.enter(Phase::Verify);
    check_status(&result, config.status_error)?;
    if !config.status_error {
        let state = virsh.domain_state(&config.vm)?;
        if state.is_active() {
            return Err(TestError::fail(format!(
                "{} is {state} after destroy",
                config.vm
            )));
        }
        info!("{} is {state}", config.vm);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use scenario::Outcome;

    use super::*;
    use crate::scenarios::registry;
    use crate::test_util::tests::{FakeLibvirt, V1_XML};

    fn destroy(fake: &FakeLibvirt, pairs: &[(&str, &str)]) -> Outcome {
        let mut params = TestParams::from_pairs([("main_vm", "v1")]);
        for (k, v) in pairs {
            params.set(*k, *v);
        }
        registry()
            .unwrap()
            .run("virsh_destroy", params, &fake.env())
            .unwrap()
    }

    #[test]
    fn test_domain_ref() {
        assert_eq!(DomainRef::from("hex_id"), DomainRef::HexId);
        assert_eq!(
            DomainRef::from("no_such_vm"),
            DomainRef::Literal("no_such_vm".to_owned())
        );

        let params = TestParams::from_pairs([("pre_vm_state", "paused")]);
        assert!(DestroyConfig::from_params(&params).is_err());
    }

    #[test]
    fn test_destroy_running_by_name() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let before = fake.domain_xml("v1").unwrap();

        assert_eq!(destroy(&fake, &[("status_error", "no")]), Outcome::Pass);

        let calls = fake.runner().calls();
        let destroyed = calls.iter().position(|c| c == "virsh destroy v1").unwrap();
        assert!(calls[destroyed + 1..].iter().any(|c| c == "virsh domstate v1"));
        // The domain is brought back the way it was found.
        assert!(fake.domain_running("v1"));
        assert_eq!(fake.domain_xml("v1").unwrap(), before);
    }

    #[test]
    fn test_destroy_shut_off_expected_to_fail() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let outcome = destroy(&fake, &[("pre_vm_state", "shut off"), ("status_error", "yes")]);
        assert_eq!(outcome, Outcome::Pass);
        assert!(fake.domain_running("v1"));
    }

    #[test]
    fn test_status_error_flips_verdict() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        assert!(matches!(
            destroy(&fake, &[("status_error", "yes")]),
            Outcome::Fail(_)
        ));
        assert!(matches!(
            destroy(&fake, &[("pre_vm_state", "shut off"), ("status_error", "no")]),
            Outcome::Fail(_)
        ));
    }

    #[test]
    fn test_destroy_refs() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, false);
        assert_eq!(destroy(&fake, &[("destroy_vm_ref", "id")]), Outcome::Pass);
        assert_eq!(destroy(&fake, &[("destroy_vm_ref", "uuid")]), Outcome::Pass);
        assert_eq!(
            destroy(&fake, &[("destroy_vm_ref", "hex_id"), ("status_error", "yes")]),
            Outcome::Pass
        );
        assert_eq!(
            destroy(&fake, &[("destroy_vm_ref", "no_such_vm"), ("status_error", "yes")]),
            Outcome::Pass
        );
        assert!(!fake.domain_running("v1"));
    }

    #[test]
    fn test_bad_params_cancel() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let outcome = destroy(&fake, &[("status_error", "maybe")]);
        assert!(matches!(outcome, Outcome::Cancel(_)));
        assert_eq!(fake.runner().calls(), Vec::<String>::new());
    }
}
