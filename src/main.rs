// Copyright © 2019 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs::{File, OpenOptions};
use std::process;

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use env_logger::{Target, WriteStyle};
use log::{info, LevelFilter};
use scenario::{Env, HarnessConfig, Registry};
use test_params::{FromParams, TestParams};
use virt_scenarios::{create_app, print_error_chain, scenarios, SETUP_ERROR_EXIT};

fn init_logger(matches: &ArgMatches) -> anyhow::Result<()> {
    let level = match matches.get_count("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis();

    if let Some(path) = matches.get_one::<String>("log-file") {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {path}"))?;
        builder
            .target(Target::Pipe(Box::new(file)))
            .write_style(WriteStyle::Never);
    }

    builder.try_init().context("failed to set up logging")
}

fn init_event_monitor(matches: &ArgMatches) -> anyhow::Result<()> {
    let Some(config) = matches.get_one::<String>("event-monitor") else {
        return Ok(());
    };
    let path = config
        .strip_prefix("path=")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("invalid --event-monitor {config:?}, expected path=<file>"))?;

    let file = File::create(path)
        .with_context(|| format!("failed to create event monitor file {path}"))?;
    let monitor = event_monitor::set_monitor(file).context("failed to set up the event monitor")?;
    monitor
        .spawn()
        .context("failed to spawn the event monitor thread")?;
    Ok(())
}

fn load_params(matches: &ArgMatches) -> anyhow::Result<TestParams> {
    let mut params = TestParams::new();
    for path in matches.get_many::<String>("params").into_iter().flatten() {
        params.load_file(path)?;
    }
    for pair in matches.get_many::<String>("param").into_iter().flatten() {
        params.apply_override(pair)?;
    }
    if let Some(uri) = matches.get_one::<String>("connect") {
        params.set("connect_uri", uri.as_str());
    }
    Ok(params)
}

fn run_scenario(registry: &Registry, matches: &ArgMatches) -> anyhow::Result<i32> {
    let name = matches
        .get_one::<String>("scenario")
        .ok_or_else(|| anyhow!("no scenario given"))?;
    if registry.get(name).is_none() {
        return Err(anyhow!("no scenario named {name:?}, see `virt-scenarios list`"));
    }

    let params = load_params(matches).context("failed to load scenario parameters")?;
    let config = HarnessConfig::from_params(&params).context("invalid harness parameters")?;
    let env = Env::from_config(&config);
    let uri = env
        .virsh
        .uri()
        .context("failed to reach libvirt through virsh")?;
    info!("Connected to {uri}");

    let outcome = registry.run(name, params, &env)?;
    println!("{name}: {outcome}");
    Ok(outcome.exit_code())
}

fn start() -> anyhow::Result<i32> {
    let matches = create_app().get_matches();
    init_logger(&matches)?;
    init_event_monitor(&matches)?;

    let registry = scenarios::registry().context("failed to build the scenario registry")?;
    let exit_code = match matches.subcommand() {
        Some(("list", _)) => {
            for scenario in registry.list() {
                println!("{:<16} {}", scenario.name, scenario.description);
            }
            0
        }
        Some(("run", run)) => run_scenario(&registry, run)?,
        _ => return Err(anyhow!("unknown subcommand")),
    };

    event_monitor::flush();
    Ok(exit_code)
}

fn main() {
    let exit_code = match start() {
        Ok(code) => code,
        Err(e) => {
            print_error_chain(&e);
            event_monitor::flush();
            SETUP_ERROR_EXIT
        }
    };

    process::exit(exit_code);
}
