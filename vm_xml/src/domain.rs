// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::str::FromStr;

use crate::{to_kib, Error, LibvirtXml, ObjectKind, Result, XmlElement};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuTopology {
    pub sockets: u32,
    pub dies: u32,
    pub cores: u32,
    pub threads: u32,
}

impl CpuTopology {
    pub fn new(sockets: u32, cores: u32, threads: u32) -> Self {
        CpuTopology {
            sockets,
            dies: 1,
            cores,
            threads,
        }
    }

    /// Number of logical CPUs the topology describes.
    pub fn vcpus(&self) -> u64 {
        u64::from(self.sockets)
            * u64::from(self.dies)
            * u64::from(self.cores)
            * u64::from(self.threads)
    }
}

/// A libvirt domain definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmXml {
    root: XmlElement,
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::Value {
        path: path.to_owned(),
        value: value.to_owned(),
    })
}

impl VmXml {
    /// Maximum number of vCPUs.
    pub fn vcpu(&self) -> Result<u32> {
        let text = self
            .root
            .find_text("vcpu")
            .ok_or_else(|| Error::Missing("vcpu".to_owned()))?;
        parse_value("vcpu", text)
    }

    pub fn set_vcpu(&mut self, count: u32) {
        self.root.ensure_path("vcpu").set_text(&count.to_string());
    }

    /// Number of vCPUs online at boot, the maximum when not set.
    pub fn current_vcpu(&self) -> Result<u32> {
        match self.root.find("vcpu").and_then(|v| v.attr("current")) {
            Some(current) => parse_value("vcpu", current),
            None => self.vcpu(),
        }
    }

    pub fn set_current_vcpu(&mut self, count: Option<u32>) {
        let vcpu = self.root.ensure_path("vcpu");
        match count {
            Some(count) => {
                vcpu.set_attr("current", &count.to_string());
            }
            None => {
                vcpu.remove_attr("current");
            }
        }
    }

    fn memory_at(&self, path: &str) -> Result<Option<u64>> {
        let Some(element) = self.root.find(path) else {
            return Ok(None);
        };
        let text = element
            .text()
            .ok_or_else(|| Error::Missing(path.to_owned()))?;
        let value = parse_value(path, text)?;
        let unit = element.attr("unit").unwrap_or("KiB");
        to_kib(value, unit).map(Some).ok_or_else(|| Error::Value {
            path: path.to_owned(),
            value: format!("{value} {unit}"),
        })
    }

    fn set_memory_at(&mut self, path: &str, kib: u64) {
        self.root
            .ensure_path(path)
            .set_text(&kib.to_string())
            .set_attr("unit", "KiB");
    }

    /// Maximum memory in KiB.
    pub fn memory_kib(&self) -> Result<u64> {
        self.memory_at("memory")?
            .ok_or_else(|| Error::Missing("memory".to_owned()))
    }

    pub fn set_memory_kib(&mut self, kib: u64) {
        self.set_memory_at("memory", kib);
    }

    /// Memory at boot in KiB, the maximum when not set.
    pub fn current_memory_kib(&self) -> Result<u64> {
        match self.memory_at("currentMemory")? {
            Some(kib) => Ok(kib),
            None => self.memory_kib(),
        }
    }

    pub fn set_current_memory_kib(&mut self, kib: u64) {
        self.set_memory_at("currentMemory", kib);
    }

    pub fn topology(&self) -> Result<Option<CpuTopology>> {
        let Some(topology) = self.root.find("cpu/topology") else {
            return Ok(None);
        };
        let attr = |key: &str| -> Result<u32> {
            let value = topology
                .attr(key)
                .ok_or_else(|| Error::Missing(format!("cpu/topology@{key}")))?;
            parse_value("cpu/topology", value)
        };

        Ok(Some(CpuTopology {
            sockets: attr("sockets")?,
            dies: match topology.attr("dies") {
                Some(dies) => parse_value("cpu/topology", dies)?,
                None => 1,
            },
            cores: attr("cores")?,
            threads: attr("threads")?,
        }))
    }

    pub fn set_topology(&mut self, topology: Option<CpuTopology>) {
        let Some(t) = topology else {
            if let Some(cpu) = self.root.find_mut("cpu") {
                cpu.remove_children("topology");
            }
            return;
        };

        let element = self.root.ensure_path("cpu/topology");
        element
            .set_attr("sockets", &t.sockets.to_string())
            .set_attr("cores", &t.cores.to_string())
            .set_attr("threads", &t.threads.to_string());
        if t.dies == 1 {
            element.remove_attr("dies");
        } else {
            element.set_attr("dies", &t.dies.to_string());
        }
    }

    pub fn devices(&self) -> Vec<&XmlElement> {
        self.root
            .find("devices")
            .map(|d| d.children().collect())
            .unwrap_or_default()
    }

    /// Devices with the given element name, e.g. `disk` or `interface`.
    pub fn devices_by_type(&self, device_type: &str) -> Vec<&XmlElement> {
        self.root.find_all(&format!("devices/{device_type}"))
    }

    pub fn add_device(&mut self, device: XmlElement) {
        self.root.ensure_path("devices").add_child(device);
    }

    pub fn remove_devices_by_type(&mut self, device_type: &str) -> usize {
        self.root
            .find_mut("devices")
            .map(|d| d.remove_children(device_type))
            .unwrap_or(0)
    }
}

impl LibvirtXml for VmXml {
    const KIND: ObjectKind = ObjectKind::Domain;

    fn root(&self) -> &XmlElement {
        &self.root
    }

    fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    fn from_root(root: XmlElement) -> Self {
        VmXml { root }
    }

    fn validate(&self) -> Result<()> {
        let vcpu = self.vcpu()?;
        if vcpu == 0 {
            return Err(Error::Invalid("vcpu count must be at least 1".to_owned()));
        }

        let current = self.current_vcpu()?;
        if current > vcpu {
            return Err(Error::Invalid(format!(
                "current vcpu count {current} exceeds maximum {vcpu}"
            )));
        }

        if let Some(topology) = self.topology()? {
            if topology.vcpus() != u64::from(vcpu) {
                return Err(Error::Invalid(format!(
                    "CPU topology {}x{}x{}x{} doesn't match maximum vcpu count {vcpu}",
                    topology.sockets, topology.dies, topology.cores, topology.threads
                )));
            }
        }

        let memory = self.memory_kib()?;
        let current_memory = self.current_memory_kib()?;
        if current_memory > memory {
            return Err(Error::Invalid(format!(
                "current memory {current_memory} KiB exceeds maximum {memory} KiB"
            )));
        }

        Ok(())
    }
}

impl FromStr for VmXml {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
