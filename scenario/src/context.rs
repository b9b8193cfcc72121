// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use event_monitor::event;
use log::info;
use test_infra::{Auth, GuestSession, PasswordAuth, SessionError, SessionState};
use test_params::{FromParams, TestParams};
use virsh::{PoolState, Virsh, VirshOptions, DEFAULT_VIRSH_BINARY};
use vm_xml::{LibvirtXml, NetworkXml, PoolXml, VmXml};

use crate::{Cleanup, Phase, Result, SessionLogin, SshLogin};

const DEFAULT_VIRSH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 240;

/// Harness wide settings read from the parameter store.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub connect_uri: Option<String>,
    pub virsh_binary: String,
    pub virsh_timeout: Duration,
    pub username: String,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub login_timeout: Duration,
}

fn non_empty(params: &TestParams, key: &str) -> Option<String> {
    params
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl FromParams for HarnessConfig {
    fn from_params(params: &TestParams) -> test_params::Result<Self> {
        Ok(HarnessConfig {
            connect_uri: non_empty(params, "connect_uri"),
            virsh_binary: non_empty(params, "virsh_binary")
                .unwrap_or_else(|| DEFAULT_VIRSH_BINARY.to_owned()),
            virsh_timeout: Duration::from_secs(
                params.get_num("virsh_timeout", DEFAULT_VIRSH_TIMEOUT_SECS)?,
            ),
            username: non_empty(params, "username").unwrap_or_else(|| "root".to_owned()),
            password: non_empty(params, "password"),
            ssh_key: non_empty(params, "ssh_key").map(PathBuf::from),
            login_timeout: Duration::from_secs(
                params.get_num("login_timeout", DEFAULT_LOGIN_TIMEOUT_SECS)?,
            ),
        })
    }
}

impl HarnessConfig {
    pub fn auth(&self) -> Auth {
        match (&self.password, &self.ssh_key) {
            (Some(password), _) => Auth::Password(PasswordAuth {
                username: self.username.clone(),
                password: password.clone(),
            }),
            (None, Some(path)) => Auth::KeyFile {
                username: self.username.clone(),
                path: path.clone(),
            },
            (None, None) => Auth::default_key(&self.username),
        }
    }
}

/// Handles to the outside world a scenario runs against.
#[derive(Clone)]
pub struct Env {
    pub virsh: Virsh,
    pub login: Arc<dyn SessionLogin>,
}

impl Env {
    pub fn new(virsh: Virsh, login: Arc<dyn SessionLogin>) -> Self {
        Env { virsh, login }
    }

    /// The host `virsh` and SSH logins, as configured.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let virsh = Virsh::host()
            .with_binary(&config.virsh_binary)
            .with_options(VirshOptions {
                uri: config.connect_uri.clone(),
                timeout: Some(config.virsh_timeout),
                ..Default::default()
            });
        let login = SshLogin::new(config.auth(), config.login_timeout);
        Env::new(virsh, Arc::new(login))
    }
}

/// A guest session shared between a scenario and the cleanup stack. The
/// underlying session is closed once, by whichever side gets there first.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Box<dyn GuestSession>>>,
}

impl Session {
    pub fn new(session: Box<dyn GuestSession>) -> Self {
        Session {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn GuestSession>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn cmd_status_output(
        &self,
        command: &str,
        timeout: Duration,
    ) -> std::result::Result<(i32, String), SessionError> {
        self.lock().cmd_status_output(command, timeout)
    }

    pub fn cmd_output(
        &self,
        command: &str,
        timeout: Duration,
    ) -> std::result::Result<String, SessionError> {
        self.lock().cmd_output(command, timeout)
    }

    pub fn close(&self) {
        self.lock().close();
    }
}

/// Per-run state handed to a scenario.
pub struct Context {
    name: String,
    params: TestParams,
    env: Env,
    phase: Phase,
    cleanup: Cleanup,
}

impl Context {
    pub fn new(name: &str, params: TestParams, env: Env) -> Self {
        Context {
            name: name.to_owned(),
            params,
            env,
            phase: Phase::Init,
            cleanup: Cleanup::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &TestParams {
        &self.params
    }

    /// Records a value derived during the run, e.g. a resolved domain id.
    pub fn set_param(&mut self, key: &str, value: &str) {
        self.params.set(key, value);
    }

    /// Parses the scenario's typed parameters.
    pub fn config<T: FromParams>(&self) -> Result<T> {
        Ok(T::from_params(&self.params)?)
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn virsh(&self) -> &Virsh {
        &self.env.virsh
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn enter(&mut self, phase: Phase) {
        info!("[{}] {} -> {}", self.name, self.phase, phase);
        event!(
            "scenario",
            "phase",
            "name",
            self.name.as_str(),
            "phase",
            phase.to_string()
        );
        self.phase = phase;
    }

    /// Registers an action run at cleanup, after every action registered
    /// later.
    pub fn defer<F>(&mut self, name: &str, action: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.cleanup.push(name, action);
    }

    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.len()
    }

    pub(crate) fn run_cleanup(&mut self) -> Vec<String> {
        self.cleanup.run().to_vec()
    }

    /// Snapshots the persistent definition of `name` and registers its
    /// restore, including the domain's running state. The returned copy
    /// is free to be modified.
    pub fn backup_vm(&mut self, name: &str) -> Result<VmXml> {
        let virsh = self.env.virsh.strict();
        let was_active = virsh.domain_state(name)?.is_active();
        let backup = VmXml::new_from_inactive_dumpxml(&virsh, name)?;
        let vmxml = backup.copy();

        let name = name.to_owned();
        self.defer(&format!("restore domain {name}"), move || {
            if virsh.domain_exists(&name)? && virsh.domain_state(&name)?.is_active() {
                virsh.destroy(&name, "")?;
            }
            backup.sync(&virsh)?;
            if was_active {
                virsh.start(&name, "")?;
            }
            Ok(())
        });

        Ok(vmxml)
    }

    pub fn backup_network(&mut self, name: &str) -> Result<NetworkXml> {
        let virsh = self.env.virsh.strict();
        let was_active = virsh.net_info(name)?.active;
        let backup = NetworkXml::new_from_inactive_dumpxml(&virsh, name)?;
        let netxml = backup.copy();

        let name = name.to_owned();
        self.defer(&format!("restore network {name}"), move || {
            let exists = virsh.net_list("--all")?.contains(&name);
            if exists && virsh.net_info(&name)?.active {
                virsh.net_destroy(&name)?;
            }
            backup.sync(&virsh)?;
            if was_active {
                virsh.net_start(&name)?;
            }
            Ok(())
        });

        Ok(netxml)
    }

    pub fn backup_pool(&mut self, name: &str) -> Result<PoolXml> {
        let virsh = self.env.virsh.strict();
        let was_active = virsh.pool_info(name)?.state == PoolState::Running;
        let backup = PoolXml::new_from_inactive_dumpxml(&virsh, name)?;
        let poolxml = backup.copy();

        let name = name.to_owned();
        self.defer(&format!("restore pool {name}"), move || {
            let exists = virsh.pool_list("--all")?.contains(&name);
            if exists && virsh.pool_info(&name)?.state != PoolState::Inactive {
                virsh.pool_destroy(&name)?;
            }
            backup.sync(&virsh)?;
            if was_active {
                virsh.pool_start(&name)?;
            }
            Ok(())
        });

        Ok(poolxml)
    }

    /// Opens a session to `vm_name` that is closed at cleanup unless the
    /// scenario closes it first.
    pub fn login(&mut self, vm_name: &str) -> Result<Session> {
        let session = Session::new(self.env.login.login(&self.env.virsh, vm_name)?);
        let handle = session.clone();
        self.defer(&format!("close session to {vm_name}"), move || {
            handle.close();
            Ok(())
        });
        Ok(session)
    }
}
