// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Typed views over libvirt XML documents.
//!
//! Each wrapper owns an [`XmlElement`] tree. Changes only reach libvirt
//! through [`LibvirtXml::sync`], which undefines the object and defines it
//! again from the modified document.

mod domain;
mod element;
mod network;
mod pool;

use std::io::{self, Write};

use log::{debug, error, warn};
use test_infra::CommandResult;
use thiserror::Error;
use virsh::Virsh;
use vmm_sys_util::tempfile::TempFile;

pub use domain::{CpuTopology, VmXml};
pub use element::{Node, XmlElement};
pub use network::NetworkXml;
pub use pool::PoolXml;

#[derive(Error, Debug)]
pub enum Error {
    #[error("parsing XML failed: {0}")]
    Parse(String),
    #[error("expected a <{expected}> document, found <{found}>")]
    RootElement { expected: &'static str, found: String },
    #[error("<{0}> is missing")]
    Missing(String),
    #[error("invalid value {value:?} in <{path}>")]
    Value { path: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("virsh command failed")]
    Virsh(#[from] virsh::Error),
    #[error("defining {name} was rejected: {result}")]
    Define {
        name: String,
        result: Box<CommandResult>,
    },
    #[error("creating temporary XML file failed")]
    TempFile(#[source] vmm_sys_util::errno::Error),
    #[error("writing temporary XML file failed")]
    WriteFile(#[source] io::Error),
}

impl Error {
    /// The target system refused the new configuration, or it was caught
    /// by local validation before reaching it.
    pub fn is_rejected_config(&self) -> bool {
        matches!(self, Error::Define { .. } | Error::Invalid(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The libvirt object family a document describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Domain,
    Network,
    Pool,
}

impl ObjectKind {
    pub fn root_name(self) -> &'static str {
        match self {
            ObjectKind::Domain => "domain",
            ObjectKind::Network => "network",
            ObjectKind::Pool => "pool",
        }
    }

    fn dumpxml(self, virsh: &Virsh, name: &str, extra: &str) -> virsh::Result<CommandResult> {
        match self {
            ObjectKind::Domain => virsh.dumpxml(name, extra),
            ObjectKind::Network => virsh.net_dumpxml(name, extra),
            ObjectKind::Pool => virsh.pool_dumpxml(name, extra),
        }
    }

    fn undefine(self, virsh: &Virsh, name: &str) -> virsh::Result<CommandResult> {
        match self {
            ObjectKind::Domain => virsh.undefine(name, ""),
            ObjectKind::Network => virsh.net_undefine(name),
            ObjectKind::Pool => virsh.pool_undefine(name),
        }
    }

    fn define(self, virsh: &Virsh, file: &TempFile) -> virsh::Result<CommandResult> {
        match self {
            ObjectKind::Domain => virsh.define(file.as_path()),
            ObjectKind::Network => virsh.net_define(file.as_path()),
            ObjectKind::Pool => virsh.pool_define(file.as_path()),
        }
    }
}

fn write_temp_xml(xml: &str) -> Result<TempFile> {
    let tmp = TempFile::new_with_prefix("/tmp/vm_xml").map_err(Error::TempFile)?;
    let mut file = tmp.as_file();
    file.write_all(xml.as_bytes()).map_err(Error::WriteFile)?;
    file.flush().map_err(Error::WriteFile)?;
    Ok(tmp)
}

/// Common surface of the domain, network and pool documents.
pub trait LibvirtXml: Clone {
    const KIND: ObjectKind;

    fn root(&self) -> &XmlElement;
    fn root_mut(&mut self) -> &mut XmlElement;
    fn from_root(root: XmlElement) -> Self;

    fn parse(xml: &str) -> Result<Self> {
        let root = XmlElement::parse(xml)?;
        let expected = Self::KIND.root_name();
        if root.name() != expected {
            return Err(Error::RootElement {
                expected,
                found: root.name().to_owned(),
            });
        }
        Ok(Self::from_root(root))
    }

    /// The live definition, `dumpxml <name>`.
    fn new_from_dumpxml(virsh: &Virsh, name: &str) -> Result<Self> {
        let result = Self::KIND.dumpxml(&virsh.strict(), name, "")?;
        Self::parse(&result.stdout)
    }

    /// The persistent definition, `dumpxml --inactive <name>`.
    fn new_from_inactive_dumpxml(virsh: &Virsh, name: &str) -> Result<Self> {
        let result = Self::KIND.dumpxml(&virsh.strict(), name, "--inactive")?;
        Self::parse(&result.stdout)
    }

    /// An independent snapshot; mutating either side leaves the other
    /// untouched.
    fn copy(&self) -> Self {
        self.clone()
    }

    fn name(&self) -> Option<&str> {
        self.root().find_text("name")
    }

    fn set_name(&mut self, name: &str) {
        self.root_mut().ensure_path("name").set_text(name);
    }

    fn uuid(&self) -> Option<&str> {
        self.root().find_text("uuid")
    }

    /// Local consistency checks run before [`LibvirtXml::sync`].
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn to_xml(&self) -> String {
        self.root().to_string()
    }

    /// Replaces the persisted definition with this document.
    ///
    /// When the new definition is refused the previous document is
    /// defined again and [`Error::Define`] carries the refusing command.
    fn sync(&self, virsh: &Virsh) -> Result<()> {
        self.validate()?;
        let name = self
            .name()
            .ok_or_else(|| Error::Missing("name".to_owned()))?;
        sync_document(Self::KIND, virsh, name, &self.to_xml())
    }

    /// Defines the document without touching any existing definition,
    /// e.g. to bring back an object after an undefine.
    fn define(&self, virsh: &Virsh) -> Result<()> {
        let name = self
            .name()
            .ok_or_else(|| Error::Missing("name".to_owned()))?;
        let file = write_temp_xml(&self.to_xml())?;
        let result = Self::KIND.define(&virsh.ignore_status(), &file)?;
        if !result.success() {
            return Err(Error::Define {
                name: name.to_owned(),
                result: Box::new(result),
            });
        }
        Ok(())
    }
}

fn sync_document(kind: ObjectKind, virsh: &Virsh, name: &str, xml: &str) -> Result<()> {
    let previous = kind.dumpxml(&virsh.ignore_status(), name, "--inactive")?;
    let previous = previous.success().then_some(previous.stdout);

    let file = write_temp_xml(xml)?;
    if previous.is_some() {
        kind.undefine(&virsh.strict(), name)?;
    }

    let result = kind.define(&virsh.ignore_status(), &file)?;
    if result.success() {
        debug!("Synced {} {name}", kind.root_name());
        return Ok(());
    }

    warn!("Defining {} {name} failed: {result}", kind.root_name());
    if let Some(previous) = previous {
        let file = write_temp_xml(&previous)?;
        match kind.define(&virsh.ignore_status(), &file) {
            Ok(r) if r.success() => debug!("Restored previous definition of {name}"),
            Ok(r) => error!("Restoring previous definition of {name} failed: {r}"),
            Err(e) => error!("Restoring previous definition of {name} failed: {e}"),
        }
    }

    Err(Error::Define {
        name: name.to_owned(),
        result: Box::new(result),
    })
}

/// Converts a libvirt memory amount to KiB. Unknown units give `None`.
pub fn to_kib(value: u64, unit: &str) -> Option<u64> {
    let bytes_per_unit: u64 = match unit {
        "b" | "bytes" => 1,
        "KB" => 1_000,
        "k" | "K" | "KiB" => 1 << 10,
        "MB" => 1_000_000,
        "M" | "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "G" | "GiB" => 1 << 30,
        "TB" => 1_000_000_000_000,
        "T" | "TiB" => 1 << 40,
        _ => return None,
    };
    value.checked_mul(bytes_per_unit).map(|b| b / 1024)
}
