// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::panic::{self, AssertUnwindSafe};

use event_monitor::event;
use log::{debug, warn};

use crate::{error_chain, Outcome, Result};

type Action = Box<dyn FnOnce() -> Result<()>>;

/// Deferred restore actions, run last registered first.
///
/// A failing or panicking action is logged and recorded, and the remaining
/// actions still run. Whatever is left when the stack is dropped runs at
/// that point, so unwinding out of a scenario restores its state too.
#[derive(Default)]
pub struct Cleanup {
    actions: Vec<(String, Action)>,
    errors: Vec<String>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, name: &str, action: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        debug!("Registered cleanup: {name}");
        self.actions.push((name.to_owned(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Errors collected by the runs so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Runs and drops every pending action.
    pub fn run(&mut self) -> &[String] {
        while let Some((name, action)) = self.actions.pop() {
            debug!("Running cleanup: {name}");
            let error = match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(error_chain(&e)),
                Err(payload) => Outcome::from_panic(payload.as_ref())
                    .reason()
                    .map(str::to_owned),
            };

            match error {
                None => event!("scenario", "cleanup", "action", name.as_str(), "result", "ok"),
                Some(e) => {
                    warn!("Cleanup '{name}' failed: {e}");
                    event!("scenario", "cleanup", "action", name.as_str(), "result", e.as_str());
                    self.errors.push(format!("{name}: {e}"));
                }
            }
        }
        &self.errors
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            self.run();
        }
    }
}
