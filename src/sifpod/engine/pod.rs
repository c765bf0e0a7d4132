/*
 * Copyright (C) 2026 The Sifpod Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs;
use std::io::Write;
use std::process;

use log::{debug, warn};
use nix::mount::MsFlags;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::SignalFd;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{getpid, Pid};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::sifpod::config::Layout;
use crate::sifpod::engine::{monitor, NamespaceKind, StarterConfig};
use crate::sifpod::instance::{self, status};
use crate::sifpod::k8s::pod::{DnsConfig, NamespaceMode, PodSandboxConfig};
use crate::sifpod::k8s::pod_id;
use crate::sifpod::rpc::RpcClient;
use crate::sifpod::util::{with_context, BoxError};

pub const NAME: &str = "podsandbox";

/// Engine materializing one pod sandbox: the namespace holder every
/// container of the pod joins.
pub struct PodEngine {
    config: PodSandboxConfig,
    pod_id: String,
}

impl PodEngine {
    pub fn new(config: PodSandboxConfig) -> Self {
        let pod_id = pod_id(&config.metadata);
        Self { config, pod_id }
    }

    pub fn id(&self) -> &str {
        &self.pod_id
    }

    pub fn config_json(&self) -> Result<Value, BoxError> {
        serde_json::to_value(&self.config)
            .map_err(|e| with_context(e, "failed to serialize pod config"))
    }

    /// Elects the namespaces the pod owns. Everything a container may
    /// later join has to be created here.
    pub fn prepare_config(&mut self, starter: &mut StarterConfig) -> Result<(), BoxError> {
        debug!("preparing config for pod {}", self.pod_id);

        starter.namespaces.request(NamespaceKind::Mount);
        if !self.config.hostname.is_empty() {
            starter.namespaces.request(NamespaceKind::Uts);
        }

        let security = self.config.security();
        starter.no_new_privs = !security.privileged;

        let options = self.config.namespace_options();
        if options.network == NamespaceMode::Pod {
            starter.namespaces.request(NamespaceKind::Net);
        }
        if options.pid == NamespaceMode::Pod {
            starter.namespaces.request(NamespaceKind::Pid);
        }
        if options.ipc == NamespaceMode::Pod {
            starter.namespaces.request(NamespaceKind::Ipc);
        }

        if !self.config.log_directory.is_empty() {
            fs::create_dir_all(&self.config.log_directory).map_err(|e| {
                with_context(
                    e,
                    format!("failed to create log directory for pod {}", self.pod_id),
                )
            })?;
        }

        Ok(())
    }

    /// Runs inside the freshly created namespaces: hostname, pod-scoped
    /// `/proc`, `resolv.conf`, then registration.
    pub fn create_container(
        &mut self,
        layout: &Layout,
        pid: i32,
        rpc: &mut RpcClient,
    ) -> Result<(), BoxError> {
        debug!("setting up pod {}", self.pod_id);

        if !self.config.hostname.is_empty() {
            if let Err(err) = rpc.set_hostname(&self.config.hostname) {
                warn!(
                    "failed to set hostname to {}: {}",
                    self.config.hostname, err
                );
            }
        }

        if self.config.namespace_options().pid == NamespaceMode::Pod {
            rpc.mount(
                "proc",
                "/proc".as_ref(),
                "proc",
                MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                "",
            )
            .map_err(|e| with_context(e, "failed to mount proc fs"))?;
        }

        if let Some(dns) = self.config.dns_config.clone() {
            self.mount_resolv_conf(rpc, &dns)?;
        }

        instance::register(layout, &self.pod_id, "", pid, self.config_json()?)?;
        status::add_created_file(layout, &self.pod_id)?;
        Ok(())
    }

    fn mount_resolv_conf(&self, rpc: &mut RpcClient, dns: &DnsConfig) -> Result<(), BoxError> {
        let mut temp = NamedTempFile::new()
            .map_err(|e| with_context(e, "failed to create temp resolv.conf"))?;
        temp.write_all(resolv_conf(dns).as_bytes())
            .map_err(|e| with_context(e, "failed to write temp resolv.conf"))?;

        debug!("mounting resolv.conf file");
        rpc.mount(
            &temp.path().to_string_lossy(),
            "/etc/resolv.conf".as_ref(),
            "",
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_BIND,
            "",
        )
        .map_err(|e| with_context(e, "failed to mount resolv.conf"))?;

        // The bind mount pins the inode; the temp file itself can go.
        drop(temp);
        Ok(())
    }

    /// The pod payload: a minimal PID 1 that reaps whatever it inherits
    /// and leaves on SIGTERM. Does not return.
    pub fn start_process(&mut self) -> Result<(), BoxError> {
        debug!("starting pod {}", self.pod_id);

        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGINT);
        mask.thread_block()
            .map_err(|e| with_context(e, "failed to block pause signals"))?;
        let signals = SignalFd::new(&mask)
            .map_err(|e| with_context(e, "failed to create pause signalfd"))?;

        loop {
            let info = signals
                .read_signal()
                .map_err(|e| with_context(e, "failed to read pause signalfd"))?;
            let Some(info) = info else { continue };

            match Signal::try_from(info.ssi_signo as i32) {
                Ok(Signal::SIGCHLD) => loop {
                    match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                        Ok(WaitStatus::StillAlive) | Err(_) => break,
                        Ok(_) => continue,
                    }
                },
                Ok(Signal::SIGTERM) | Ok(Signal::SIGINT) => {
                    debug!("pod {} was asked to terminate", self.pod_id);
                    process::exit(0);
                }
                _ => {}
            }
        }
    }

    pub fn post_start_process(&mut self, layout: &Layout) -> Result<(), BoxError> {
        debug!("pod {} is running", self.pod_id);
        status::add_started_file(layout, &self.pod_id)
    }

    pub fn monitor_container(
        &mut self,
        layout: &Layout,
        pid: Pid,
        signals: &mut SignalFd,
    ) -> Result<WaitStatus, BoxError> {
        debug!("monitoring pod {}", self.pod_id);
        let status = monitor::wait_for(pid, signals)?;
        status::add_finished_file(layout, &self.pod_id)?;
        status::add_exit_code_file(layout, &self.pod_id, monitor::exit_code(&status))?;
        debug!("pod {} has exited", self.pod_id);
        Ok(status)
    }

    /// Removes the record and archive, but only when called by the
    /// process that created them.
    pub fn cleanup_container(&mut self, layout: &Layout) -> Result<(), BoxError> {
        debug!("removing instance file for pod {}", self.pod_id);
        match instance::get(layout, &self.pod_id) {
            Ok(record) => {
                if record.ppid != getpid().as_raw() {
                    debug!(
                        "cleanup for {} called from pid {}, creator was {}",
                        self.pod_id,
                        getpid(),
                        record.ppid
                    );
                    return Ok(());
                }
                instance::cleanup(layout, &self.pod_id)
            }
            Err(err) if instance::is_not_found(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Renders the `resolv.conf` contents for the pod's DNS configuration.
fn resolv_conf(dns: &DnsConfig) -> String {
    let mut contents = String::new();
    for server in &dns.servers {
        contents.push_str(&format!("nameserver {}\n", server));
    }
    for search in &dns.searches {
        contents.push_str(&format!("search {}\n", search));
    }
    for option in &dns.options {
        contents.push_str(&format!("options {}\n", option));
    }
    contents
}
