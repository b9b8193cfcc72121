// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::str::FromStr;

use crate::{Error, LibvirtXml, ObjectKind, Result, XmlElement};

/// A libvirt storage pool definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolXml {
    root: XmlElement,
}

impl PoolXml {
    /// `dir`, `logical`, `netfs`...
    pub fn pool_type(&self) -> Option<&str> {
        self.root.attr("type")
    }

    pub fn target_path(&self) -> Option<&str> {
        self.root.find_text("target/path")
    }

    pub fn set_target_path(&mut self, path: &str) {
        self.root.ensure_path("target/path").set_text(path);
    }
}

impl LibvirtXml for PoolXml {
    const KIND: ObjectKind = ObjectKind::Pool;

    fn root(&self) -> &XmlElement {
        &self.root
    }

    fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    fn from_root(root: XmlElement) -> Self {
        PoolXml { root }
    }

    fn validate(&self) -> Result<()> {
        if self.pool_type().is_none() {
            return Err(Error::Invalid("pool has no type".to_owned()));
        }
        Ok(())
    }
}

impl FromStr for PoolXml {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
