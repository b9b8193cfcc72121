// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::Path;

use test_infra::CommandResult;

use crate::{parse_info_output, yes_no, Error, Result, Virsh};

/// Parsed `virsh net-info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub uuid: String,
    pub active: bool,
    pub persistent: bool,
    pub autostart: bool,
    pub bridge: Option<String>,
}

impl Virsh {
    pub fn net_dumpxml(&self, name: &str, extra: &str) -> Result<CommandResult> {
        self.command_extra("net-dumpxml", &[name], extra)
    }

    pub fn net_define(&self, xml_file: &Path) -> Result<CommandResult> {
        self.command_path("net-define", xml_file, "")
    }

    pub fn net_undefine(&self, name: &str) -> Result<CommandResult> {
        self.command("net-undefine", &[name])
    }

    pub fn net_start(&self, name: &str) -> Result<CommandResult> {
        self.command("net-start", &[name])
    }

    pub fn net_destroy(&self, name: &str) -> Result<CommandResult> {
        self.command("net-destroy", &[name])
    }

    /// Network names, `virsh net-list --name <extra>`.
    pub fn net_list(&self, extra: &str) -> Result<Vec<String>> {
        self.names("net-list", extra)
    }

    pub fn net_info(&self, name: &str) -> Result<NetworkInfo> {
        let result = self.strict().command("net-info", &[name])?;
        let info = parse_info_output(&result.stdout);
        let Some(net_name) = info.get("Name") else {
            return Err(Error::Parse {
                verb: "net-info".to_owned(),
                output: result.stdout.clone(),
            });
        };

        Ok(NetworkInfo {
            name: net_name.clone(),
            uuid: info.get("UUID").cloned().unwrap_or_default(),
            active: yes_no(info.get("Active")),
            persistent: yes_no(info.get("Persistent")),
            autostart: yes_no(info.get("Autostart")),
            bridge: info.get("Bridge").filter(|b| !b.is_empty()).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::mock_virsh;

    use super::*;

    #[test]
    fn test_net_info() {
        let (virsh, runner) = mock_virsh(
            0,
            "Name:           default\nUUID:           0e8a\nActive:         yes\nPersistent:     yes\nAutostart:      no\nBridge:         virbr0\n",
            "",
        );
        let info = virsh.net_info("default").unwrap();

        assert_eq!(
            info,
            NetworkInfo {
                name: "default".to_owned(),
                uuid: "0e8a".to_owned(),
                active: true,
                persistent: true,
                autostart: false,
                bridge: Some("virbr0".to_owned()),
            }
        );
        assert_eq!(runner.calls(), vec!["virsh net-info default"]);
    }

    #[test]
    fn test_net_info_garbage() {
        let (virsh, _) = mock_virsh(0, "nothing useful\n", "");
        assert!(matches!(
            virsh.net_info("default").unwrap_err(),
            Error::Parse { .. }
        ));
    }

    #[test]
    fn test_net_verbs() {
        let (virsh, runner) = mock_virsh(0, "default\n", "");
        virsh.net_destroy("default").unwrap();
        virsh.net_start("default").unwrap();
        virsh.net_define(Path::new("/tmp/net.xml")).unwrap();
        assert_eq!(virsh.net_list("--all").unwrap(), vec!["default"]);

        assert_eq!(
            runner.calls(),
            vec![
                "virsh net-destroy default",
                "virsh net-start default",
                "virsh net-define /tmp/net.xml",
                "virsh net-list --name --all",
            ]
        );
    }
}
