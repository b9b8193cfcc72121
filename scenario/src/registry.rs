// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use event_monitor::event;
use log::{error, info, warn};
use test_params::TestParams;
use thiserror::Error;

use crate::{Context, Env, Outcome, Phase, Result};

pub type ScenarioFn = fn(&mut Context) -> Result<()>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no scenario named {0:?}")]
    UnknownScenario(String),
    #[error("scenario {0:?} is registered twice")]
    Duplicate(&'static str),
}

#[derive(Clone, Copy)]
pub struct ScenarioInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub run: ScenarioFn,
}

/// Name to scenario map, filled once at start up.
#[derive(Default)]
pub struct Registry {
    scenarios: BTreeMap<&'static str, ScenarioInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        run: ScenarioFn,
    ) -> std::result::Result<&mut Self, RegistryError> {
        if self.scenarios.contains_key(name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.scenarios.insert(
            name,
            ScenarioInfo {
                name,
                description,
                run,
            },
        );
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioInfo> {
        self.scenarios.get(name)
    }

    /// Registered scenarios sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &ScenarioInfo> {
        self.scenarios.values()
    }

    /// Runs one scenario to its verdict. The cleanup stack runs whatever
    /// way the scenario ends, a panic included; cleanup failures are logged
    /// and do not change the verdict.
    pub fn run(
        &self,
        name: &str,
        params: TestParams,
        env: &Env,
    ) -> std::result::Result<Outcome, RegistryError> {
        let scenario = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownScenario(name.to_owned()))?;

        info!("Running scenario {name}");
        let mut ctx = Context::new(name, params, env.clone());
        ctx.enter(Phase::Setup);

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (scenario.run)(&mut ctx))) {
            Ok(result) => Outcome::from(result),
            Err(payload) => {
                let outcome = Outcome::from_panic(payload.as_ref());
                error!("Scenario {name} panicked in {} phase", ctx.phase());
                outcome
            }
        };

        ctx.enter(Phase::Cleanup);
        for e in ctx.run_cleanup() {
            warn!("Scenario {name} left an unrestored resource: {e}");
        }
        ctx.enter(Phase::Terminal);

        info!("Scenario {name}: {outcome}");
        event!(
            "scenario",
            "outcome",
            "name",
            name,
            "verdict",
            outcome.label(),
            "reason",
            outcome.reason().unwrap_or_default()
        );

        Ok(outcome)
    }
}
