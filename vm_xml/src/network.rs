// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::str::FromStr;

use crate::{Error, LibvirtXml, ObjectKind, Result, XmlElement};

/// A libvirt virtual network definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkXml {
    root: XmlElement,
}

impl NetworkXml {
    pub fn bridge(&self) -> Option<&str> {
        self.root.find("bridge").and_then(|b| b.attr("name"))
    }

    pub fn set_bridge(&mut self, name: &str) {
        self.root.ensure_path("bridge").set_attr("name", name);
    }

    /// `nat`, `route`, `bridge`... `None` for an isolated network.
    pub fn forward_mode(&self) -> Option<&str> {
        self.root.find("forward").map(|f| f.attr("mode").unwrap_or("nat"))
    }

    pub fn set_forward_mode(&mut self, mode: Option<&str>) {
        match mode {
            Some(mode) => {
                self.root.ensure_path("forward").set_attr("mode", mode);
            }
            None => {
                self.root.remove_children("forward");
            }
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.root.find("ip").and_then(|ip| ip.attr("address"))
    }

    pub fn netmask(&self) -> Option<&str> {
        self.root.find("ip").and_then(|ip| ip.attr("netmask"))
    }

    pub fn set_ip(&mut self, address: &str, netmask: &str) {
        self.root
            .ensure_path("ip")
            .set_attr("address", address)
            .set_attr("netmask", netmask);
    }

    /// First DHCP range as `(start, end)`.
    pub fn dhcp_range(&self) -> Option<(&str, &str)> {
        let range = self.root.find("ip/dhcp/range")?;
        Some((range.attr("start")?, range.attr("end")?))
    }

    pub fn set_dhcp_range(&mut self, start: &str, end: &str) {
        self.root
            .ensure_path("ip/dhcp/range")
            .set_attr("start", start)
            .set_attr("end", end);
    }
}

impl LibvirtXml for NetworkXml {
    const KIND: ObjectKind = ObjectKind::Network;

    fn root(&self) -> &XmlElement {
        &self.root
    }

    fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    fn from_root(root: XmlElement) -> Self {
        NetworkXml { root }
    }

    fn validate(&self) -> Result<()> {
        if self.name().is_none_or(str::is_empty) {
            return Err(Error::Invalid("network has no name".to_owned()));
        }
        if self.dhcp_range().is_some() && self.ip_address().is_none() {
            return Err(Error::Invalid("DHCP range without an IP address".to_owned()));
        }
        Ok(())
    }
}

impl FromStr for NetworkXml {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
