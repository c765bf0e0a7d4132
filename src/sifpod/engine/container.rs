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

use std::env;
use std::ffi::CString;
use std::fs::{self, File};
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process;
use std::thread::JoinHandle;

use log::{debug, error};
use nix::mount::MsFlags;
use nix::sys::signal::{kill, SigSet, Signal};
use nix::sys::signalfd::SignalFd;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, chroot, execv, fork, getpid, pipe, ForkResult, Pid};
use serde_json::Value;

use crate::sifpod::config::Layout;
use crate::sifpod::engine::{log as crilog, monitor, NamespaceKind, StarterConfig, SIG_CLEANUP};
use crate::sifpod::image::{self, FsType};
use crate::sifpod::instance::{self, status};
use crate::sifpod::k8s::container::{CreateContainerRequest, ExecSyncRequest, MountPropagation};
use crate::sifpod::k8s::pod::NamespaceMode;
use crate::sifpod::k8s::container_id;
use crate::sifpod::rpc::loopdev::LO_FLAGS_AUTOCLEAR;
use crate::sifpod::rpc::{LoopInfo, RpcClient};
use crate::sifpod::util::{new_error, with_context, BoxError};

pub const NAME: &str = "container";

const RUN_SCRIPT: &str = "/.singularity.d/runscript";
const EXEC_SCRIPT: &str = "/.singularity.d/actions/exec";
const CONTAINER_LOG_DIR: &str = "/tmp/logs";

/// One entry of the container's mount recipe. The order steps are
/// produced in is contractual; execution replays them verbatim against
/// the privileged worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountStep {
    Mkdir {
        path: PathBuf,
        mode: u32,
    },
    Mount {
        source: String,
        target: PathBuf,
        fstype: String,
        flags: MsFlags,
        data: String,
    },
    /// Attach the image to a free loop device, then mount it read-only
    /// as the overlay lower layer.
    LoopImage {
        image: PathBuf,
        info: LoopInfo,
        target: PathBuf,
        fstype: String,
        flags: MsFlags,
    },
    Chroot {
        path: PathBuf,
    },
}

/// Engine staging and supervising one container inside a pod sandbox.
/// Exec-sync mode reuses the namespace plumbing to run a command inside
/// an existing container instead of creating a new one.
pub struct ContainerEngine {
    request: Option<CreateContainerRequest>,
    exec: Option<ExecSyncRequest>,
    container_id: String,
    pod_id: String,
    notify_socket: Option<RawFd>,
    start_gate: Option<RawFd>,
    create_error: Option<String>,
    exec_pid: i32,
    exec_working_dir: String,
}

impl ContainerEngine {
    pub fn new(request: CreateContainerRequest, notify_socket: Option<RawFd>) -> Self {
        let container_id = container_id(&request.pod_sandbox_id, &request.config.metadata);
        let pod_id = request.pod_sandbox_id.clone();
        Self {
            request: Some(request),
            exec: None,
            container_id,
            pod_id,
            notify_socket,
            start_gate: None,
            create_error: None,
            exec_pid: 0,
            exec_working_dir: String::new(),
        }
    }

    pub fn exec_sync(request: ExecSyncRequest) -> Self {
        let container_id = request.container_id.clone();
        Self {
            request: None,
            exec: Some(request),
            container_id,
            pod_id: String::new(),
            notify_socket: None,
            start_gate: None,
            create_error: None,
            exec_pid: 0,
            exec_working_dir: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.container_id
    }

    pub fn is_exec_sync(&self) -> bool {
        self.exec.is_some()
    }

    pub fn set_start_gate(&mut self, fd: RawFd) {
        self.start_gate = Some(fd);
    }

    pub fn set_create_error(&mut self, message: String) {
        self.create_error = Some(message);
    }

    pub fn config_json(&self) -> Result<Value, BoxError> {
        let value = match (&self.request, &self.exec) {
            (Some(request), _) => serde_json::to_value(request),
            (None, Some(exec)) => serde_json::to_value(exec),
            (None, None) => Ok(Value::Null),
        };
        value.map_err(|e| with_context(e, "failed to serialize container config"))
    }

    fn request(&self) -> Result<&CreateContainerRequest, BoxError> {
        self.request
            .as_ref()
            .ok_or_else(|| new_error("container engine has no create request"))
    }

    /// Elects namespaces: a mount and PID namespace of our own, the rest
    /// joined from the pod or created privately per the security context.
    pub fn prepare_config(
        &mut self,
        layout: &Layout,
        starter: &mut StarterConfig,
    ) -> Result<(), BoxError> {
        if self.exec.is_some() {
            return self.prepare_exec_sync(layout, starter);
        }

        starter.mount_propagation = Some("shared".to_string());

        let pod = instance::get(layout, &self.pod_id)
            .map_err(|e| with_context(e, format!("failed to get pod instance {}", self.pod_id)))?;
        let ns_dir = PathBuf::from(format!("/proc/{}/ns", pod.pid));

        let request = self.request()?.clone();

        debug!("requesting Mount namespace");
        starter.namespaces.request(NamespaceKind::Mount);
        debug!("requesting PID namespace");
        starter.namespaces.request(NamespaceKind::Pid);

        if !request.sandbox_config.hostname.is_empty() {
            debug!("joining pod UTS namespace");
            starter
                .namespaces
                .join(NamespaceKind::Uts, ns_dir.join("uts"));
        }

        let security = request.config.security();
        starter.no_new_privs = security.no_new_privs;

        let options = request.config.namespace_options();
        match options.ipc {
            NamespaceMode::Container => {
                debug!("requesting IPC namespace");
                starter.namespaces.request(NamespaceKind::Ipc);
            }
            NamespaceMode::Pod => {
                debug!("joining pod IPC namespace");
                starter
                    .namespaces
                    .join(NamespaceKind::Ipc, ns_dir.join("ipc"));
            }
            NamespaceMode::Node => {}
        }
        match options.network {
            NamespaceMode::Container => {
                debug!("requesting NET namespace");
                starter.namespaces.request(NamespaceKind::Net);
            }
            NamespaceMode::Pod => {
                debug!("joining pod NET namespace");
                starter
                    .namespaces
                    .join(NamespaceKind::Net, ns_dir.join("net"));
            }
            NamespaceMode::Node => {}
        }

        if !request.config.log_path.is_empty() {
            let log_path =
                Path::new(&request.sandbox_config.log_directory).join(&request.config.log_path);
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| with_context(e, "failed to create log directory"))?;
            }
            debug!("creating log file {}", log_path.display());
            File::create(&log_path).map_err(|e| {
                with_context(e, format!("failed to create log file {}", log_path.display()))
            })?;
        }

        Ok(())
    }

    /// Exec-sync joins everything the running container has; nothing is
    /// created.
    fn prepare_exec_sync(
        &mut self,
        layout: &Layout,
        starter: &mut StarterConfig,
    ) -> Result<(), BoxError> {
        let record = instance::get(layout, &self.container_id).map_err(|e| {
            with_context(
                e,
                format!("failed to get container instance {}", self.container_id),
            )
        })?;

        let request: CreateContainerRequest = serde_json::from_value(record.config.clone())
            .map_err(|e| with_context(e, "failed to parse recorded container config"))?;
        starter.no_new_privs = request.config.security().no_new_privs;
        self.exec_pid = record.pid;
        self.exec_working_dir = request.config.working_dir.clone();

        let ns_dir = PathBuf::from(format!("/proc/{}/ns", record.pid));
        for kind in [
            NamespaceKind::Mount,
            NamespaceKind::Pid,
            NamespaceKind::Uts,
            NamespaceKind::Ipc,
            NamespaceKind::Net,
        ] {
            debug!("joining container {} namespace", kind.proc_entry());
            starter.namespaces.join(kind, ns_dir.join(kind.proc_entry()));
        }

        Ok(())
    }

    /// Builds the mount recipe for this container. Later steps assume
    /// earlier ones succeeded, so order matters everywhere.
    pub fn mount_plan(&self, layout: &Layout) -> Result<Vec<MountStep>, BoxError> {
        let request = self.request()?;
        let session = layout.session_dir(&self.container_id);
        let lower = session.join("lower");
        let upper = session.join("upper");
        let work = session.join("work");
        let root = session.join("root");

        let mut plan = Vec::new();

        // Keep everything staged below from leaking back to the host.
        plan.push(MountStep::Mount {
            source: String::new(),
            target: PathBuf::from("/"),
            fstype: String::new(),
            flags: MsFlags::MS_SLAVE | MsFlags::MS_REC,
            data: String::new(),
        });

        plan.push(MountStep::Mkdir {
            path: session.clone(),
            mode: 0o755,
        });
        plan.push(MountStep::Mount {
            source: "tmpfs".to_string(),
            target: session.clone(),
            fstype: "tmpfs".to_string(),
            flags: MsFlags::MS_NOSUID,
            data: String::new(),
        });

        let image_path = PathBuf::from(request.config.image_path());
        let part = image::primary_partition(&image_path)
            .map_err(|e| with_context(e, "failed to read image partition"))?;
        if part.fstype != FsType::Squashfs {
            return Err(new_error(format!(
                "unsupported image fs type: {}",
                part.fstype.name()
            )));
        }
        plan.push(MountStep::LoopImage {
            image: image_path,
            info: LoopInfo {
                offset: part.offset,
                size_limit: part.length,
                flags: LO_FLAGS_AUTOCLEAR,
            },
            target: lower.clone(),
            fstype: "squashfs".to_string(),
            flags: MsFlags::MS_NOSUID | MsFlags::MS_REC,
        });

        for dir in [&upper, &work, &root] {
            plan.push(MountStep::Mkdir {
                path: dir.clone(),
                mode: 0o755,
            });
        }

        // Pre-create bind targets in the writable layer so the merged
        // view has somewhere to hang them. The worker's mkdir is a
        // single level, so nested paths get one step per component.
        for mount in &request.config.mounts {
            mkdir_chain(&mut plan, &upper, relative(&mount.container_path));
        }

        plan.push(MountStep::Mount {
            source: "overlay".to_string(),
            target: root.clone(),
            fstype: "overlay".to_string(),
            flags: MsFlags::MS_NOSUID | MsFlags::MS_REC,
            data: format!(
                "lowerdir={},workdir={},upperdir={}",
                lower.display(),
                work.display(),
                upper.display()
            ),
        });

        for mount in &request.config.mounts {
            let source = resolve_bind_source(&mount.host_path)?;
            let target = root.join(relative(&mount.container_path));
            mkdir_chain(&mut plan, &root, relative(&mount.container_path));
            plan.push(MountStep::Mount {
                source,
                target: target.clone(),
                fstype: String::new(),
                flags: MsFlags::MS_BIND | MsFlags::MS_REC,
                data: String::new(),
            });
            if mount.readonly {
                plan.push(MountStep::Mount {
                    source: String::new(),
                    target: target.clone(),
                    fstype: String::new(),
                    flags: MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                    data: String::new(),
                });
            }
            plan.push(MountStep::Mount {
                source: String::new(),
                target,
                fstype: String::new(),
                flags: propagation_flag(mount.propagation),
                data: String::new(),
            });
        }

        plan.push(MountStep::Mount {
            source: "proc".to_string(),
            target: root.join("proc"),
            fstype: "proc".to_string(),
            flags: MsFlags::MS_NOSUID,
            data: String::new(),
        });
        plan.push(MountStep::Mount {
            source: "/dev".to_string(),
            target: root.join("dev"),
            fstype: "udev".to_string(),
            flags: MsFlags::MS_NOSUID | MsFlags::MS_BIND,
            data: String::new(),
        });
        plan.push(MountStep::Mount {
            source: "sysfs".to_string(),
            target: root.join("sys"),
            fstype: "sysfs".to_string(),
            flags: MsFlags::MS_NOSUID,
            data: String::new(),
        });
        plan.push(MountStep::Mount {
            source: "tmpfs".to_string(),
            target: root.join("tmp"),
            fstype: "tmpfs".to_string(),
            flags: MsFlags::MS_NOSUID,
            data: String::new(),
        });

        if !request.config.log_path.is_empty() {
            let host_log_path =
                Path::new(&request.sandbox_config.log_directory).join(&request.config.log_path);
            let host_log_dir = host_log_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            let target = root.join(relative(CONTAINER_LOG_DIR));
            plan.push(MountStep::Mkdir {
                path: target.clone(),
                mode: 0o755,
            });
            plan.push(MountStep::Mount {
                source: host_log_dir.to_string_lossy().to_string(),
                target,
                fstype: String::new(),
                flags: MsFlags::MS_NOSUID | MsFlags::MS_BIND,
                data: String::new(),
            });
        }

        plan.push(MountStep::Chroot { path: root });
        Ok(plan)
    }

    /// Stages the container filesystem and registers the instance. Runs
    /// inside the joined pod namespaces with a fresh mount namespace;
    /// every kernel operation goes through the privileged worker.
    pub fn create_container(
        &mut self,
        layout: &Layout,
        pid: i32,
        rpc: &mut RpcClient,
    ) -> Result<(), BoxError> {
        if self.exec.is_some() {
            return Ok(());
        }

        debug!("setting up container {}", self.container_id);
        let plan = self.mount_plan(layout)?;
        execute_plan(&plan, rpc)?;
        rpc.ll("/");
        rpc.ll("/tmp");

        let image = self.request()?.config.image_path().to_string();
        instance::register(layout, &self.container_id, &image, pid, self.config_json()?)?;
        status::add_created_file(layout, &self.container_id)?;
        Ok(())
    }

    /// Gates on the start byte, then replaces this process with the
    /// supervision loop around the payload. Does not return on success.
    pub fn start_process(&mut self) -> Result<(), BoxError> {
        if self.exec.is_some() {
            return self.exec_sync_process();
        }

        if let Some(fd) = self.start_gate {
            debug!("waiting on start gate fd {}", fd);
            let gate = unsafe { BorrowedFd::borrow_raw(fd) };
            let mut byte = [0u8; 1];
            nix::unistd::read(gate, &mut byte)
                .map_err(|e| with_context(e, "failed to read start gate"))?;
            debug!("start gate released");
        }

        let request = self.request()?.clone();
        for kv in &request.config.envs {
            env::set_var(&kv.key, &kv.value);
        }

        let mut command: Vec<String> = request
            .config
            .command
            .iter()
            .chain(request.config.args.iter())
            .cloned()
            .collect();
        if command.is_empty() {
            command = vec![RUN_SCRIPT.to_string()];
        }

        let mut argv = Vec::with_capacity(command.len() + 1);
        argv.push(cstring(EXEC_SCRIPT)?);
        for arg in &command {
            argv.push(cstring(arg)?);
        }

        // Stdio pipes only exist when output goes to the CRI log file;
        // otherwise the payload inherits ours.
        let mut log_pipes = None;
        let mut pump: Option<JoinHandle<()>> = None;
        if !request.config.log_path.is_empty() {
            let log_name = Path::new(&request.config.log_path)
                .file_name()
                .ok_or_else(|| new_error("container log path has no file name"))?
                .to_string_lossy()
                .to_string();
            let log_path = Path::new(CONTAINER_LOG_DIR).join(log_name);

            let (out_read, out_write) =
                pipe().map_err(|e| with_context(e, "failed to create stdout pipe"))?;
            let (err_read, err_write) =
                pipe().map_err(|e| with_context(e, "failed to create stderr pipe"))?;
            pump = Some(crilog::spawn_log_pump(
                File::from(out_read),
                File::from(err_read),
                log_path,
            ));
            log_pipes = Some((out_write, err_write));
        }

        let mask = SigSet::all();
        mask.thread_block()
            .map_err(|e| with_context(e, "failed to block signals"))?;
        let mut signals = SignalFd::new(&mask)
            .map_err(|e| with_context(e, "failed to create signalfd"))?;

        debug!("starting container {}", self.container_id);
        match unsafe { fork() }.map_err(|e| with_context(e, "failed to fork payload"))? {
            ForkResult::Child => {
                let _ = SigSet::all().thread_unblock();
                if let Some((out_write, err_write)) = &log_pipes {
                    if nix::unistd::dup2_stdout(out_write).is_err()
                        || nix::unistd::dup2_stderr(err_write).is_err()
                    {
                        unsafe { libc::_exit(255) };
                    }
                }
                if !request.config.working_dir.is_empty()
                    && chdir(Path::new(&request.config.working_dir)).is_err()
                {
                    unsafe { libc::_exit(255) };
                }
                let args: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
                let _ = execv(args[0], &args);
                unsafe { libc::_exit(255) };
            }
            ForkResult::Parent { child } => {
                drop(log_pipes);
                self.supervise_payload(child, &mut signals, pump)
            }
        }
    }

    /// Signal loop around the running payload: SIGTERM forwards once,
    /// SIGCHLD/SIGCONT are ignored, anything else goes to everyone we
    /// may signal. Exits with the payload's status.
    fn supervise_payload(
        &self,
        child: Pid,
        signals: &mut SignalFd,
        mut pump: Option<JoinHandle<()>>,
    ) -> Result<(), BoxError> {
        loop {
            let info = signals
                .read_signal()
                .map_err(|e| with_context(e, "failed to read signalfd"))?;
            let Some(info) = info else { continue };
            let Ok(signal) = Signal::try_from(info.ssi_signo as i32) else {
                continue;
            };

            match signal {
                Signal::SIGCHLD => loop {
                    match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                        Ok(WaitStatus::StillAlive) | Err(_) => break,
                        Ok(status) if status.pid() == Some(child) => {
                            let code = match status {
                                WaitStatus::Exited(_, code) => code,
                                WaitStatus::Signaled(_, signal, _) => {
                                    debug!("container payload was signaled: {}", signal);
                                    128 + signal as i32
                                }
                                _ => continue,
                            };
                            debug!("container {} exiting with status {}", self.container_id, code);
                            if let Some(handle) = pump.take() {
                                let _ = handle.join();
                            }
                            process::exit(code);
                        }
                        Ok(_) => continue,
                    }
                },
                Signal::SIGCONT => {}
                Signal::SIGTERM => {
                    debug!("container {} was asked to terminate", self.container_id);
                    let _ = kill(child, Signal::SIGTERM);
                }
                other => {
                    debug!("propagating signal {} to others", other);
                    kill(Pid::from_raw(-1), other)
                        .map_err(|e| with_context(e, "failed to broadcast signal"))?;
                }
            }
        }
    }

    /// Runs the exec-sync command inside the joined namespaces and exits
    /// with its status.
    fn exec_sync_process(&mut self) -> Result<(), BoxError> {
        let exec = self
            .exec
            .as_ref()
            .ok_or_else(|| new_error("exec engine has no request"))?
            .clone();

        let root = PathBuf::from(format!("/proc/{}/root", self.exec_pid));
        chroot(&root)
            .map_err(|e| with_context(e, format!("failed to chroot to {}", root.display())))?;
        let cwd = if self.exec_working_dir.is_empty() {
            "/".to_string()
        } else {
            self.exec_working_dir.clone()
        };
        chdir(Path::new(&cwd))
            .map_err(|e| with_context(e, format!("failed to chdir to {}", cwd)))?;

        let mut argv = Vec::with_capacity(exec.cmd.len() + 1);
        argv.push(cstring(EXEC_SCRIPT)?);
        for arg in &exec.cmd {
            argv.push(cstring(arg)?);
        }

        match unsafe { fork() }.map_err(|e| with_context(e, "failed to fork exec command"))? {
            ForkResult::Child => {
                let args: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
                let _ = execv(args[0], &args);
                unsafe { libc::_exit(127) };
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None)
                    .map_err(|e| with_context(e, "failed to wait for exec command"))?;
                process::exit(monitor::exit_code(&status));
            }
        }
    }

    pub fn post_start_process(&mut self, layout: &Layout) -> Result<(), BoxError> {
        debug!("container {} is running", self.container_id);
        status::add_started_file(layout, &self.container_id)
    }

    pub fn monitor_container(
        &mut self,
        layout: &Layout,
        pid: Pid,
        signals: &mut SignalFd,
    ) -> Result<WaitStatus, BoxError> {
        debug!("monitoring container {}", self.container_id);
        let status = monitor::wait_for(pid, signals)?;
        status::add_finished_file(layout, &self.container_id)?;
        status::add_exit_code_file(layout, &self.container_id, monitor::exit_code(&status))?;
        debug!("container {} has exited", self.container_id);
        Ok(status)
    }

    /// Notifies the CRI caller that supervision ended, carrying any
    /// deferred create error. Record removal stays with the caller's
    /// explicit remove request.
    pub fn cleanup_container(&mut self, _layout: &Layout) -> Result<(), BoxError> {
        let Some(fd) = self.notify_socket.take() else {
            return Ok(());
        };

        debug!(
            "notifying cleanup of container {} from pid {}",
            self.container_id,
            getpid()
        );
        let socket = unsafe { OwnedFd::from_raw_fd(fd) };
        let mut payload = vec![SIG_CLEANUP];
        if let Some(message) = &self.create_error {
            payload.extend_from_slice(message.as_bytes());
        }
        if let Err(errno) = nix::unistd::write(&socket, &payload) {
            error!("failed to notify cleanup: {}", errno);
        }
        drop(socket);
        Ok(())
    }
}

/// Executes a mount recipe against the privileged worker.
pub fn execute_plan(plan: &[MountStep], rpc: &mut RpcClient) -> Result<(), BoxError> {
    for step in plan {
        match step {
            MountStep::Mkdir { path, mode } => {
                rpc.mkdir(path, *mode)
                    .map_err(|e| with_context(e, format!("failed to create {}", path.display())))?;
            }
            MountStep::Mount {
                source,
                target,
                fstype,
                flags,
                data,
            } => {
                rpc.mount(source, target, fstype, *flags, data).map_err(|e| {
                    with_context(e, format!("failed to mount {}", target.display()))
                })?;
            }
            MountStep::LoopImage {
                image,
                info,
                target,
                fstype,
                flags,
            } => {
                let number = rpc
                    .loop_device(image, libc::O_RDWR, *info)
                    .map_err(|e| with_context(e, "failed to attach loop device"))?;
                rpc.mkdir(target, 0o755)
                    .map_err(|e| with_context(e, format!("failed to create {}", target.display())))?;
                rpc.mount(&format!("/dev/loop{}", number), target, fstype, *flags, "")
                    .map_err(|e| with_context(e, "failed to mount loop device"))?;
            }
            MountStep::Chroot { path } => {
                rpc.chroot(path)
                    .map_err(|e| with_context(e, format!("failed to chroot to {}", path.display())))?;
            }
        }
    }
    Ok(())
}

/// Emits one mkdir step per path component of `rel` below `base`, so
/// nested container paths come up even though the worker's mkdir only
/// creates a single level. Existing levels are tolerated at execution.
fn mkdir_chain(plan: &mut Vec<MountStep>, base: &Path, rel: &str) {
    let mut path = base.to_path_buf();
    for component in Path::new(rel).components() {
        path.push(component);
        plan.push(MountStep::Mkdir {
            path: path.clone(),
            mode: 0o755,
        });
    }
}

fn propagation_flag(propagation: MountPropagation) -> MsFlags {
    match propagation {
        MountPropagation::Private => MsFlags::MS_PRIVATE,
        MountPropagation::HostToContainer => MsFlags::MS_SLAVE,
        MountPropagation::Bidirectional => MsFlags::MS_SHARED,
    }
}

/// Follows a bind source that is itself a symlink one step; anything
/// else is used as-is.
fn resolve_bind_source(host_path: &str) -> Result<String, BoxError> {
    let meta = fs::symlink_metadata(host_path)
        .map_err(|e| with_context(e, format!("invalid bind mount source {}", host_path)))?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(host_path)
            .map_err(|e| with_context(e, format!("failed to follow symlink {}", host_path)))?;
        return Ok(target.to_string_lossy().to_string());
    }
    Ok(host_path.to_string())
}

fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn cstring(value: &str) -> Result<CString, BoxError> {
    CString::new(value).map_err(|e| with_context(e, format!("invalid argument {:?}", value)))
}
