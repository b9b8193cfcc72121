// Copyright © 2025 Cyberus Technology GmbH
//
// SPDX-License-Identifier: Apache-2.0
//

#[cfg(test)]
pub mod tests {
    use std::cmp::Ordering;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    use clap::Arg;
    use scenario::{Env, SessionLogin};
    use test_infra::mock::{MockRunner, SessionProbe};
    use test_infra::{command_line, CommandResult, GuestSession, SessionError, SessionState};
    use virsh::Virsh;
    use vm_xml::{LibvirtXml, NetworkXml, PoolXml, VmXml};

    pub fn assert_args_sorted<'a, F: Fn() -> R, R: Iterator<Item = &'a Arg>>(get_base_iter: F) {
        let iter = get_base_iter().zip(get_base_iter().skip(1));
        for (arg, next) in iter {
            assert_ne!(
                arg.get_id().cmp(next.get_id()),
                Ordering::Greater,
                "args not alphabetically sorted: arg={}, next={}",
                arg.get_id(),
                next.get_id()
            );
        }
    }

    /// Maximum vCPUs the fake machine type accepts.
    pub const FAKE_MAX_VCPUS: u32 = 16;

    pub const V1_XML: &str = r#"<domain type='kvm'>
  <name>v1</name>
  <uuid>6695eb01-f6a4-8304-79aa-97f2502e193f</uuid>
  <memory unit='KiB'>2097152</memory>
  <currentMemory unit='KiB'>2097152</currentMemory>
  <vcpu placement='static'>2</vcpu>
  <os>
    <type arch='x86_64' machine='pc'>hvm</type>
  </os>
  <devices>
    <interface type='network'>
      <mac address='52:54:00:8e:2a:61'/>
      <source network='default'/>
    </interface>
  </devices>
</domain>
"#;

    pub const DEFAULT_NET_XML: &str = r#"<network>
  <name>default</name>
  <uuid>0e8a6a8c-3e4c-4c83-a3b6-2c1a5a1f9a0b</uuid>
  <forward mode='nat'/>
  <bridge name='virbr0' stp='on' delay='0'/>
  <ip address='192.168.122.1' netmask='255.255.255.0'>
    <dhcp>
      <range start='192.168.122.2' end='192.168.122.254'/>
    </dhcp>
  </ip>
</network>
"#;

    pub const IMAGES_POOL_XML: &str = r#"<pool type='dir'>
  <name>images</name>
  <uuid>77c1b9c4-0d2e-4f7a-9b65-3f3c6f0f6a11</uuid>
  <target>
    <path>/var/lib/libvirt/images</path>
  </target>
</pool>
"#;

    struct FakeDomain {
        xml: String,
        id: Option<u32>,
        persistent: bool,
        boots: u32,
    }

    struct FakeObject {
        xml: String,
        active: bool,
        persistent: bool,
    }

    #[derive(Default)]
    struct FakeHost {
        domains: BTreeMap<String, FakeDomain>,
        networks: BTreeMap<String, FakeObject>,
        pools: BTreeMap<String, FakeObject>,
        next_id: u32,
    }

    fn ok(line: &str, stdout: &str) -> CommandResult {
        CommandResult::new(line, 0, stdout, "")
    }

    fn err(line: &str, stderr: &str) -> CommandResult {
        CommandResult::new(line, 1, "", &format!("error: {stderr}\n"))
    }

    fn names<'a, I>(line: &str, all: bool, items: I) -> CommandResult
    where
        I: Iterator<Item = (&'a String, bool)>,
    {
        let mut out = String::new();
        for (name, active) in items {
            if all || active {
                out.push_str(name);
                out.push('\n');
            }
        }
        out.push('\n');
        ok(line, &out)
    }

    impl FakeHost {
        fn lookup(&self, reference: &str) -> Option<String> {
            if self.domains.contains_key(reference) {
                return Some(reference.to_owned());
            }
            self.domains
                .iter()
                .find(|(_, d)| {
                    d.id.is_some_and(|id| id.to_string() == reference)
                        || VmXml::parse(&d.xml)
                            .ok()
                            .is_some_and(|x| x.uuid() == Some(reference))
                })
                .map(|(name, _)| name.clone())
        }

        fn handle(&mut self, line: &str, args: &[String]) -> CommandResult {
            let mut args: Vec<&str> = args.iter().map(String::as_str).collect();
            if args.first() == Some(&"--connect") {
                args.drain(..2.min(args.len()));
            }
            args.retain(|a| *a != "--readonly");
            let Some((verb, rest)) = args.split_first() else {
                return err(line, "no command given");
            };
            let target = rest.first().copied().unwrap_or_default();
            let all = rest.contains(&"--all");

            match *verb {
                "uri" => ok(line, "qemu:///system\n"),
                "list" => names(
                    line,
                    all,
                    self.domains.iter().map(|(n, d)| (n, d.id.is_some())),
                ),
                "net-list" => names(line, all, self.networks.iter().map(|(n, o)| (n, o.active))),
                "pool-list" => names(line, all, self.pools.iter().map(|(n, o)| (n, o.active))),
                "define" => self.define_domain(line, target),
                "net-define" => Self::define_object(&mut self.networks, line, target, "network"),
                "pool-define" => Self::define_object(&mut self.pools, line, target, "pool"),
                v if v.starts_with("net-") => self.network_verb(line, v, target),
                v if v.starts_with("pool-") => self.pool_verb(line, v, target),
                v => self.domain_verb(line, v, target),
            }
        }

        fn domain_verb(&mut self, line: &str, verb: &str, reference: &str) -> CommandResult {
            let Some(name) = self.lookup(reference) else {
                return err(line, &format!("failed to get domain '{reference}'"));
            };
            let next_id = self.next_id + 1;
            let Some(domain) = self.domains.get_mut(&name) else {
                return err(line, &format!("failed to get domain '{reference}'"));
            };
            let active = domain.id.is_some();

            match verb {
                "domstate" if active => ok(line, "running\n\n"),
                "domstate" => ok(line, "shut off\n\n"),
                "domid" => ok(line, &domain.id.map_or("-".to_owned(), |id| id.to_string())),
                "domuuid" => match VmXml::parse(&domain.xml)
                    .ok()
                    .and_then(|x| x.uuid().map(str::to_owned))
                {
                    Some(uuid) => ok(line, &format!("{uuid}\n")),
                    None => err(line, "domain has no uuid"),
                },
                "dumpxml" => ok(line, &domain.xml),
                "start" if active => err(line, "Domain is already active"),
                "start" => {
                    domain.id = Some(next_id);
                    domain.boots += 1;
                    self.next_id = next_id;
                    ok(line, &format!("Domain '{name}' started\n"))
                }
                "destroy" | "shutdown" if !active => err(
                    line,
                    &format!("Failed to {verb} domain '{reference}'\nerror: Requested operation is not valid: domain is not running"),
                ),
                "destroy" | "shutdown" => {
                    domain.id = None;
                    if !domain.persistent {
                        self.domains.remove(&name);
                    }
                    ok(line, &format!("Domain '{reference}' destroyed\n"))
                }
                "reboot" if !active => err(
                    line,
                    &format!("Failed to reboot domain '{reference}'\nerror: Requested operation is not valid: domain is not running"),
                ),
                "reboot" => {
                    domain.boots += 1;
                    ok(line, &format!("Domain '{reference}' is being rebooted\n"))
                }
                "undefine" => {
                    if active {
                        domain.persistent = false;
                    } else {
                        self.domains.remove(&name);
                    }
                    ok(line, &format!("Domain '{name}' has been undefined\n"))
                }
                "domifaddr" if !active => err(
                    line,
                    "Requested operation is not valid: domain is not running",
                ),
                "domifaddr" => {
                    let id = domain.id.unwrap_or_default();
                    ok(
                        line,
                        &format!(
                            " Name       MAC address          Protocol     Address\n\
                             -------------------------------------------------------------------------------\n \
                             vnet{id}      52:54:00:8e:2a:61    ipv4         192.168.122.{}/24\n\n",
                            10 + id
                        ),
                    )
                }
                _ => err(line, &format!("unknown command: '{verb}'")),
            }
        }

        fn define_domain(&mut self, line: &str, file: &str) -> CommandResult {
            let xml = match fs::read_to_string(file) {
                Ok(xml) => xml,
                Err(e) => return err(line, &format!("Failed to open file '{file}': {e}")),
            };
            let vmxml = match VmXml::parse(&xml) {
                Ok(v) => v,
                Err(e) => {
                    return err(line, &format!("Failed to define domain from {file}\nerror: {e}"))
                }
            };
            if vmxml.vcpu().is_ok_and(|v| v > FAKE_MAX_VCPUS) {
                return err(
                    line,
                    &format!("Failed to define domain from {file}\nerror: unsupported configuration: Maximum CPUs greater than specified machine type limit {FAKE_MAX_VCPUS}"),
                );
            }
            let Some(name) = vmxml.name().map(str::to_owned) else {
                return err(line, "Failed to define domain: missing name");
            };

            let domain = self.domains.entry(name.clone()).or_insert(FakeDomain {
                xml: String::new(),
                id: None,
                persistent: true,
                boots: 0,
            });
            domain.xml = xml;
            domain.persistent = true;
            ok(line, &format!("Domain '{name}' defined from {file}\n"))
        }

        fn define_object(
            objects: &mut BTreeMap<String, FakeObject>,
            line: &str,
            file: &str,
            kind: &str,
        ) -> CommandResult {
            let xml = match fs::read_to_string(file) {
                Ok(xml) => xml,
                Err(e) => return err(line, &format!("Failed to open file '{file}': {e}")),
            };
            let name = vm_xml::XmlElement::parse(&xml)
                .ok()
                .filter(|root| root.name() == kind)
                .and_then(|root| root.find_text("name").map(str::to_owned));
            let Some(name) = name else {
                return err(line, &format!("Failed to define {kind} from {file}"));
            };

            let object = objects.entry(name.clone()).or_insert(FakeObject {
                xml: String::new(),
                active: false,
                persistent: true,
            });
            object.xml = xml;
            object.persistent = true;
            ok(line, &format!("{kind} {name} defined from {file}\n"))
        }

        fn network_verb(&mut self, line: &str, verb: &str, name: &str) -> CommandResult {
            let Some(net) = self.networks.get_mut(name) else {
                return err(line, &format!("failed to get network '{name}'"));
            };
            match verb {
                "net-dumpxml" => ok(line, &net.xml),
                "net-info" => {
                    let bridge = NetworkXml::parse(&net.xml)
                        .ok()
                        .and_then(|n| n.bridge().map(str::to_owned))
                        .unwrap_or_default();
                    let uuid = NetworkXml::parse(&net.xml)
                        .ok()
                        .and_then(|n| n.uuid().map(str::to_owned))
                        .unwrap_or_default();
                    ok(
                        line,
                        &format!(
                            "Name:           {name}\nUUID:           {uuid}\nActive:         {}\nPersistent:     {}\nAutostart:      no\nBridge:         {bridge}\n\n",
                            yes_no(net.active),
                            yes_no(net.persistent)
                        ),
                    )
                }
                "net-start" if net.active => err(line, "Failed to start network\nerror: Requested operation is not valid: network is already active"),
                "net-start" => {
                    net.active = true;
                    ok(line, &format!("Network {name} started\n"))
                }
                "net-destroy" if !net.active => err(line, &format!("Failed to destroy network {name}\nerror: Requested operation is not valid: network '{name}' is not active")),
                "net-destroy" => {
                    net.active = false;
                    if !net.persistent {
                        self.networks.remove(name);
                    }
                    ok(line, &format!("Network {name} destroyed\n"))
                }
                "net-undefine" => {
                    if net.active {
                        net.persistent = false;
                    } else {
                        self.networks.remove(name);
                    }
                    ok(line, &format!("Network {name} has been undefined\n"))
                }
                _ => err(line, &format!("unknown command: '{verb}'")),
            }
        }

        fn pool_verb(&mut self, line: &str, verb: &str, name: &str) -> CommandResult {
            let Some(pool) = self.pools.get_mut(name) else {
                return err(line, &format!("failed to get pool '{name}'"));
            };
            match verb {
                "pool-dumpxml" => ok(line, &pool.xml),
                "pool-info" => {
                    let uuid = PoolXml::parse(&pool.xml)
                        .ok()
                        .and_then(|p| p.uuid().map(str::to_owned))
                        .unwrap_or_default();
                    let mut out = format!(
                        "Name:           {name}\nUUID:           {uuid}\nState:          {}\nPersistent:     {}\nAutostart:      no\n",
                        if pool.active { "running" } else { "inactive" },
                        yes_no(pool.persistent)
                    );
                    if pool.active {
                        out.push_str("Capacity:       49.98 GiB\nAllocation:     12.00 GiB\nAvailable:      37.98 GiB\n");
                    }
                    out.push('\n');
                    ok(line, &out)
                }
                "pool-start" if pool.active => err(line, "Failed to start pool\nerror: Requested operation is not valid: storage pool is already active"),
                "pool-start" => {
                    pool.active = true;
                    ok(line, &format!("Pool {name} started\n"))
                }
                "pool-destroy" | "pool-refresh" if !pool.active => err(
                    line,
                    &format!("Requested operation is not valid: storage pool '{name}' is not active"),
                ),
                "pool-refresh" => ok(line, &format!("Pool {name} refreshed\n")),
                "pool-destroy" => {
                    pool.active = false;
                    if !pool.persistent {
                        self.pools.remove(name);
                    }
                    ok(line, &format!("Pool {name} destroyed\n"))
                }
                "pool-undefine" => {
                    if pool.active {
                        pool.persistent = false;
                    } else {
                        self.pools.remove(name);
                    }
                    ok(line, &format!("Pool {name} has been undefined\n"))
                }
                _ => err(line, &format!("unknown command: '{verb}'")),
            }
        }
    }

    fn yes_no(v: bool) -> &'static str {
        if v {
            "yes"
        } else {
            "no"
        }
    }

    /// A libvirt host kept in memory, reachable through a [`Virsh`] built on
    /// [`MockRunner`] and through guest sessions of its running domains.
    #[derive(Clone)]
    pub struct FakeLibvirt {
        host: Arc<Mutex<FakeHost>>,
        runner: Arc<MockRunner>,
        pub probe: SessionProbe,
    }

    impl FakeLibvirt {
        pub fn new() -> Self {
            let host: Arc<Mutex<FakeHost>> = Arc::default();
            let handler_host = host.clone();
            let runner = MockRunner::new(move |program, args| {
                let line = command_line(program, args);
                let mut host = handler_host.lock().unwrap();
                Ok(host.handle(&line, args))
            });
            FakeLibvirt {
                host,
                runner: Arc::new(runner),
                probe: SessionProbe::default(),
            }
        }

        fn host(&self) -> MutexGuard<'_, FakeHost> {
            self.host.lock().unwrap()
        }

        pub fn with_domain(self, xml: &str, running: bool) -> Self {
            {
                let mut host = self.host();
                let name = VmXml::parse(xml).unwrap().name().unwrap().to_owned();
                let id = running.then(|| {
                    host.next_id += 1;
                    host.next_id
                });
                host.domains.insert(
                    name,
                    FakeDomain {
                        xml: xml.to_owned(),
                        id,
                        persistent: true,
                        boots: u32::from(running),
                    },
                );
            }
            self
        }

        pub fn with_network(self, xml: &str, active: bool) -> Self {
            let name = NetworkXml::parse(xml).unwrap().name().unwrap().to_owned();
            self.host().networks.insert(
                name,
                FakeObject {
                    xml: xml.to_owned(),
                    active,
                    persistent: true,
                },
            );
            self
        }

        pub fn with_pool(self, xml: &str, active: bool) -> Self {
            let name = PoolXml::parse(xml).unwrap().name().unwrap().to_owned();
            self.host().pools.insert(
                name,
                FakeObject {
                    xml: xml.to_owned(),
                    active,
                    persistent: true,
                },
            );
            self
        }

        pub fn runner(&self) -> Arc<MockRunner> {
            self.runner.clone()
        }

        pub fn virsh(&self) -> Virsh {
            Virsh::new(self.runner())
        }

        pub fn env(&self) -> Env {
            Env::new(self.virsh(), Arc::new(self.clone()))
        }

        pub fn domain_xml(&self, name: &str) -> Option<VmXml> {
            self.host()
                .domains
                .get(name)
                .map(|d| VmXml::parse(&d.xml).unwrap())
        }

        pub fn domain_running(&self, name: &str) -> bool {
            self.host().domains.get(name).is_some_and(|d| d.id.is_some())
        }

        pub fn network_xml(&self, name: &str) -> Option<NetworkXml> {
            self.host()
                .networks
                .get(name)
                .map(|n| NetworkXml::parse(&n.xml).unwrap())
        }

        pub fn network_state(&self, name: &str) -> Option<(bool, bool)> {
            self.host().networks.get(name).map(|n| (n.active, n.persistent))
        }

        pub fn pool_state(&self, name: &str) -> Option<(bool, bool)> {
            self.host().pools.get(name).map(|p| (p.active, p.persistent))
        }
    }

    impl SessionLogin for FakeLibvirt {
        fn login(
            &self,
            _virsh: &Virsh,
            vm_name: &str,
        ) -> Result<Box<dyn GuestSession>, SessionError> {
            if !self.domain_running(vm_name) {
                return Err(SessionError::NoAddress(vm_name.to_owned()));
            }
            Ok(Box::new(FakeGuest {
                host: self.host.clone(),
                vm: vm_name.to_owned(),
                state: SessionState::Connected,
                probe: self.probe.clone(),
            }))
        }
    }

    /// A shell into a fake domain knowing `nproc` and the boot id.
    struct FakeGuest {
        host: Arc<Mutex<FakeHost>>,
        vm: String,
        state: SessionState,
        probe: SessionProbe,
    }

    impl GuestSession for FakeGuest {
        fn state(&self) -> SessionState {
            self.state
        }

        fn cmd_status_output(
            &mut self,
            command: &str,
            _timeout: Duration,
        ) -> Result<(i32, String), SessionError> {
            if self.state != SessionState::Connected {
                return Err(SessionError::NotConnected(self.state));
            }
            self.probe.commands.lock().unwrap().push(command.to_owned());

            let host = self.host.lock().unwrap();
            let Some(domain) = host.domains.get(&self.vm).filter(|d| d.id.is_some()) else {
                self.state = SessionState::Disconnected;
                return Err(SessionError::Timeout(Duration::from_secs(1)));
            };
            let reply = match command {
                "nproc" => {
                    let vmxml = VmXml::parse(&domain.xml).unwrap();
                    (0, format!("{}\n", vmxml.current_vcpu().unwrap()))
                }
                "cat /proc/sys/kernel/random/boot_id" => {
                    (0, format!("00000000-0000-0000-0000-{:012}\n", domain.boots))
                }
                _ => (127, String::new()),
            };
            Ok(reply)
        }

        fn close(&mut self) {
            if self.state == SessionState::Closed {
                return;
            }
            self.probe
                .closes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.state = SessionState::Closed;
        }
    }

    impl Drop for FakeGuest {
        fn drop(&mut self) {
            self.close();
        }
    }
}
