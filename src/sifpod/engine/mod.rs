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

//! The two runtime engines. A pod engine materializes the sandbox the
//! containers share; a container engine stages one container inside it.
//! Both expose the same capability set, dispatched over a tagged variant:
//! init, prepare, create, start, post-start, monitor, cleanup.

pub mod container;
pub mod log;
pub mod monitor;
pub mod pod;

use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::sched::CloneFlags;
use nix::sys::signalfd::SignalFd;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde_json::Value;

use crate::sifpod::config::Layout;
use crate::sifpod::rpc::RpcClient;
use crate::sifpod::util::BoxError;

/// Notification byte: the engine finished `create_container`.
pub const SIG_CREATED: u8 = 1;
/// Notification byte: the engine ran `cleanup_container`.
pub const SIG_CLEANUP: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    Mount,
    Uts,
    Ipc,
    Net,
    Pid,
}

impl NamespaceKind {
    pub fn clone_flag(self) -> CloneFlags {
        match self {
            NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
            NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
            NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
            NamespaceKind::Net => CloneFlags::CLONE_NEWNET,
            NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        }
    }

    /// Entry name under `/proc/<pid>/ns`.
    pub fn proc_entry(self) -> &'static str {
        match self {
            NamespaceKind::Mount => "mnt",
            NamespaceKind::Uts => "uts",
            NamespaceKind::Ipc => "ipc",
            NamespaceKind::Net => "net",
            NamespaceKind::Pid => "pid",
        }
    }
}

/// A namespace the launcher must create (no path) or join (path into
/// some instance's `/proc/<pid>/ns` directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub kind: NamespaceKind,
    pub path: Option<PathBuf>,
}

/// The namespace plan an engine computes in `prepare_config`. The
/// launcher applies it deterministically: one unshare over the create
/// set, then setns over the join set in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSet {
    pub create: Vec<Namespace>,
    pub join: Vec<Namespace>,
}

impl NamespaceSet {
    pub fn request(&mut self, kind: NamespaceKind) {
        self.create.push(Namespace { kind, path: None });
    }

    pub fn join(&mut self, kind: NamespaceKind, path: PathBuf) {
        self.join.push(Namespace {
            kind,
            path: Some(path),
        });
    }

    pub fn clone_flags(&self) -> CloneFlags {
        self.create
            .iter()
            .fold(CloneFlags::empty(), |flags, ns| flags | ns.kind.clone_flag())
    }

    pub fn creates(&self, kind: NamespaceKind) -> bool {
        self.create.iter().any(|ns| ns.kind == kind)
    }

    pub fn joins(&self, kind: NamespaceKind) -> bool {
        self.join.iter().any(|ns| ns.kind == kind)
    }
}

/// What `prepare_config` hands the launcher: the namespace plan plus the
/// process attributes the privileged stage must apply.
#[derive(Debug, Clone, Default)]
pub struct StarterConfig {
    pub namespaces: NamespaceSet,
    pub mount_propagation: Option<String>,
    pub no_new_privs: bool,
}

/// The engine variants. Exec-sync is a mode of the container engine, not
/// a third variant.
pub enum Engine {
    Pod(pod::PodEngine),
    Container(container::ContainerEngine),
}

impl Engine {
    pub fn pod(config: crate::sifpod::k8s::PodSandboxConfig) -> Self {
        Engine::Pod(pod::PodEngine::new(config))
    }

    pub fn container(
        request: crate::sifpod::k8s::CreateContainerRequest,
        notify_socket: Option<RawFd>,
    ) -> Self {
        Engine::Container(container::ContainerEngine::new(request, notify_socket))
    }

    pub fn exec_sync(request: crate::sifpod::k8s::ExecSyncRequest) -> Self {
        Engine::Container(container::ContainerEngine::exec_sync(request))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Engine::Pod(_) => pod::NAME,
            Engine::Container(_) => container::NAME,
        }
    }

    /// The instance id this engine operates on.
    pub fn id(&self) -> &str {
        match self {
            Engine::Pod(engine) => engine.id(),
            Engine::Container(engine) => engine.id(),
        }
    }

    /// The engine configuration as persisted into the instance record.
    pub fn config_json(&self) -> Result<Value, BoxError> {
        match self {
            Engine::Pod(engine) => engine.config_json(),
            Engine::Container(engine) => engine.config_json(),
        }
    }

    pub fn prepare_config(
        &mut self,
        layout: &Layout,
        starter: &mut StarterConfig,
    ) -> Result<(), BoxError> {
        match self {
            Engine::Pod(engine) => engine.prepare_config(starter),
            Engine::Container(engine) => engine.prepare_config(layout, starter),
        }
    }

    /// Runs inside the freshly prepared namespaces, driving the
    /// privileged worker. `pid` is the process being supervised.
    pub fn create_container(
        &mut self,
        layout: &Layout,
        pid: i32,
        rpc: &mut RpcClient,
    ) -> Result<(), BoxError> {
        match self {
            Engine::Pod(engine) => engine.create_container(layout, pid, rpc),
            Engine::Container(engine) => engine.create_container(layout, pid, rpc),
        }
    }

    /// Executes the payload. Does not return on success: the process
    /// image is replaced or the process exits with the payload's status.
    pub fn start_process(&mut self) -> Result<(), BoxError> {
        match self {
            Engine::Pod(engine) => engine.start_process(),
            Engine::Container(engine) => engine.start_process(),
        }
    }

    pub fn post_start_process(&mut self, layout: &Layout, _pid: i32) -> Result<(), BoxError> {
        match self {
            Engine::Pod(engine) => engine.post_start_process(layout),
            Engine::Container(engine) => engine.post_start_process(layout),
        }
    }

    /// Master-side supervision: waits for the payload, records finished
    /// and exit, returns the wait status.
    pub fn monitor_container(
        &mut self,
        layout: &Layout,
        pid: Pid,
        signals: &mut SignalFd,
    ) -> Result<WaitStatus, BoxError> {
        match self {
            Engine::Pod(engine) => engine.monitor_container(layout, pid, signals),
            Engine::Container(engine) => engine.monitor_container(layout, pid, signals),
        }
    }

    pub fn cleanup_container(&mut self, layout: &Layout) -> Result<(), BoxError> {
        match self {
            Engine::Pod(engine) => engine.cleanup_container(layout),
            Engine::Container(engine) => engine.cleanup_container(layout),
        }
    }

    /// Installs the read end of the start gate. Only the container
    /// engine gates its payload; the pause process starts immediately.
    pub fn set_start_gate(&mut self, fd: RawFd) {
        if let Engine::Container(engine) = self {
            engine.set_start_gate(fd);
        }
    }

    /// Records a deferred create failure so cleanup can report it
    /// through the notification socket.
    pub fn set_create_error(&mut self, message: String) {
        if let Engine::Container(engine) = self {
            engine.set_create_error(message);
        }
    }
}
