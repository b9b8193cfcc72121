// Copyright © 2025 Cyberus Technology GmbH
//
// SPDX-License-Identifier: Apache-2.0

use clap::{Arg, ArgAction, Command};

pub mod scenarios;
#[cfg(test)]
mod test_util;

/// Exit status of a run that never reached a verdict.
pub const SETUP_ERROR_EXIT: i32 = 2;

/// Prints a runner setup error and its causes, one per line, followed by
/// the debug rendering for bug reports.
pub fn print_error_chain(error: &anyhow::Error) {
    let chain = error.chain();
    if chain.len() == 1 {
        eprintln!("Error: virt-scenarios exited with the following error:");
        eprintln!("  {error}");
    } else {
        eprintln!("Error: virt-scenarios exited with the following chain of errors:");
        for (level, cause) in chain.enumerate() {
            eprintln!("  {level}: {cause}");
        }
    }

    eprintln!();
    eprintln!("Debug Info: {error:?}");
}

fn run_command() -> Command {
    Command::new("run")
        .about("Run one scenario and print its verdict")
        .arg(
            Arg::new("connect")
                .long("connect")
                .short('c')
                .help("libvirt connection URI, overrides connect_uri")
                .num_args(1),
        )
        .arg(
            Arg::new("param")
                .long("param")
                .short('p')
                .help("Parameter override \"key=value\", applied after the files")
                .num_args(1)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("params")
                .long("params")
                .help("Parameter file, \"key = value\" lines or a JSON object")
                .num_args(1)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("scenario")
                .help("Registered scenario name")
                .required(true)
                .index(1),
        )
}

pub fn create_app() -> Command {
    Command::new("virt-scenarios")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Run parametrized libvirt scenarios.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("event-monitor")
                .long("event-monitor")
                .help("File to report events on: path=</path/to/a/file>")
                .num_args(1)
                .global(true),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Log file. Standard error is used if not specified")
                .num_args(1)
                .global(true),
        )
        .arg(
            Arg::new("v")
                .short('v')
                .action(ArgAction::Count)
                .help("Sets the level of debugging output")
                .global(true),
        )
        .subcommand(Command::new("list").about("List registered scenarios"))
        .subcommand(run_command())
}


#[cfg(test)]
mod restore_tests {
    use scenario::{Outcome, Registry};
    use test_params::TestParams;
    use vm_xml::LibvirtXml;

    use crate::test_util::tests::{FakeLibvirt, V1_XML};

    fn panics_mid_action(ctx: &mut scenario::Context) -> scenario::Result<()> {
        let virsh = ctx.virsh().clone();
        let mut vmxml = ctx.backup_vm("v1")?;
        let _session = ctx.login("v1")?;
        vmxml.set_vcpu(4);
        vmxml.sync(&virsh)?;
        panic!("guest agent went away");
    }

    #[test]
    fn test_panic_still_restores_and_closes() {
        let fake = FakeLibvirt::new().with_domain(V1_XML, true);
        let before = fake.domain_xml("v1").unwrap();
        let mut registry = Registry::new();
        registry
            .register("panics_mid_action", "", panics_mid_action)
            .unwrap();

        let outcome = registry
            .run("panics_mid_action", TestParams::new(), &fake.env())
            .unwrap();

        assert!(matches!(outcome, Outcome::Error(ref r) if r.contains("guest agent went away")));
        assert_eq!(fake.domain_xml("v1").unwrap(), before);
        assert!(fake.domain_running("v1"));
        assert_eq!(fake.probe.close_count(), 1);
    }
}
