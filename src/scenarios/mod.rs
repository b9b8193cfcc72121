// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Scenarios shipped with the runner.

mod net_lifecycle;
mod pool_lifecycle;
mod vcpu_topology;
mod virsh_destroy;
mod virsh_reboot;

use scenario::{Registry, RegistryError};

pub fn registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    registry
        .register("net_lifecycle", net_lifecycle::DESCRIPTION, net_lifecycle::run)?
        .register("pool_lifecycle", pool_lifecycle::DESCRIPTION, pool_lifecycle::run)?
        .register("vcpu_topology", vcpu_topology::DESCRIPTION, vcpu_topology::run)?
        .register("virsh_destroy", virsh_destroy::DESCRIPTION, virsh_destroy::run)?
        .register("virsh_reboot", virsh_reboot::DESCRIPTION, virsh_reboot::run)?;
    Ok(registry)
}
