// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use log::info;
use test_infra::CommandResult;

use crate::{error_chain, Result, TestError};

/// Holds a command result against the `status_error` expectation: with it
/// set the command must fail, without it the command must succeed.
pub fn check_status(result: &CommandResult, status_error: bool) -> Result<()> {
    match (status_error, result.success()) {
        (true, true) => Err(TestError::fail(format!(
            "'{}' succeeded but was expected to fail",
            result.command
        ))),
        (true, false) => {
            info!("'{}' failed as expected: {}", result.command, result.stderr_text());
            Ok(())
        }
        (false, true) => Ok(()),
        (false, false) => {
            result.log_failure();
            Err(TestError::fail(format!(
                "'{}' failed unexpectedly with {}: {}",
                result.command,
                result.exit_status,
                result.stderr_text()
            )))
        }
    }
}

/// An expected failure must carry one of `patterns` in its error output.
pub fn check_error_message(result: &CommandResult, patterns: &[&str]) -> Result<()> {
    if patterns.is_empty() {
        return Ok(());
    }
    let output = format!("{}\n{}", result.stderr, result.stdout);
    if patterns.iter().any(|p| output.contains(p)) {
        return Ok(());
    }
    Err(TestError::fail(format!(
        "'{}' error output {:?} matches none of {patterns:?}",
        result.command,
        result.stderr_text()
    )))
}

/// Holds the result of an XML sync against `status_error`. A configuration
/// refused by libvirt or by local validation counts as an expected
/// failure, anything else is an infrastructure error.
pub fn expect_sync(result: vm_xml::Result<()>, status_error: bool) -> Result<()> {
    match (result, status_error) {
        (Ok(()), false) => Ok(()),
        (Ok(()), true) => Err(TestError::fail(
            "configuration was accepted but was expected to be rejected",
        )),
        (Err(e), true) if e.is_rejected_config() => {
            info!("Configuration rejected as expected: {}", error_chain(&e));
            Ok(())
        }
        (Err(e), false) if e.is_rejected_config() => Err(TestError::fail(format!(
            "configuration was rejected: {}",
            error_chain(&e)
        ))),
        (Err(e), _) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_status: i32, stderr: &str) -> CommandResult {
        CommandResult::new("virsh destroy v1", exit_status, "", stderr)
    }

    #[test]
    fn test_check_status_symmetry() {
        for exit_status in [0, 1] {
            let r = result(exit_status, "error: domain is not running");
            let as_expected = check_status(&r, false).is_ok();
            let flipped = check_status(&r, true).is_ok();
            assert_ne!(as_expected, flipped);
        }
        assert!(check_status(&result(0, ""), false).is_ok());
        assert!(matches!(
            check_status(&result(0, ""), true),
            Err(TestError::Fail(_))
        ));
    }

    #[test]
    fn test_check_error_message() {
        let r = result(1, "error: Requested operation is not valid: domain is not running");
        assert!(check_error_message(&r, &["not running", "no domain"]).is_ok());
        assert!(check_error_message(&r, &[]).is_ok());
        assert!(matches!(
            check_error_message(&r, &["permission denied"]),
            Err(TestError::Fail(_))
        ));
    }

    #[test]
    fn test_expect_sync() {
        let rejected = || Err(vm_xml::Error::Invalid("topology mismatch".to_owned()));

        assert!(expect_sync(Ok(()), false).is_ok());
        assert!(expect_sync(rejected(), true).is_ok());
        assert!(matches!(expect_sync(Ok(()), true), Err(TestError::Fail(_))));
        assert!(matches!(expect_sync(rejected(), false), Err(TestError::Fail(_))));
        assert!(matches!(
            expect_sync(Err(vm_xml::Error::Missing("name".to_owned())), true),
            Err(TestError::Xml(_))
        ));
    }
}
