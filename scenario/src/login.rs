// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::{Duration, Instant};

use log::debug;
use test_infra::session::LOGIN_RETRY_INTERVAL;
use test_infra::{ssh_login, wait_until, Auth, GuestSession, SessionError};
use virsh::Virsh;

/// Opens guest sessions for a domain. The harness only talks to guests
/// through this seam.
pub trait SessionLogin: Send + Sync {
    fn login(&self, virsh: &Virsh, vm_name: &str) -> Result<Box<dyn GuestSession>, SessionError>;
}

/// Logs in over SSH, resolving the guest address with `virsh domifaddr`.
pub struct SshLogin {
    auth: Auth,
    timeout: Duration,
}

impl SshLogin {
    pub fn new(auth: Auth, timeout: Duration) -> Self {
        SshLogin { auth, timeout }
    }

    /// First IPv4 address of the domain, looking at DHCP leases first and
    /// the host ARP table second.
    fn resolve(virsh: &Virsh, vm_name: &str) -> Option<String> {
        ["", "--source arp"].iter().find_map(|source| {
            let addrs = match virsh.domifaddr(vm_name, source) {
                Ok(addrs) => addrs,
                Err(e) => {
                    debug!("domifaddr {vm_name} {source} failed: {e}");
                    return None;
                }
            };
            addrs
                .into_iter()
                .find(|a| a.protocol == "ipv4")
                .map(|a| a.address)
        })
    }
}

impl SessionLogin for SshLogin {
    fn login(&self, virsh: &Virsh, vm_name: &str) -> Result<Box<dyn GuestSession>, SessionError> {
        let start = Instant::now();
        let ip = wait_until(self.timeout, LOGIN_RETRY_INTERVAL, || {
            Self::resolve(virsh, vm_name)
        })
        .map_err(|_| SessionError::NoAddress(vm_name.to_owned()))?;

        debug!("Guest {vm_name} has address {ip}");
        let remaining = self.timeout.saturating_sub(start.elapsed());
        let session = ssh_login(&ip, &self.auth, remaining)?;
        Ok(Box::new(session))
    }
}
