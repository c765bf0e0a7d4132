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

//! Two-stage start. Stage 1 runs `prepare_config` unprivileged in the
//! calling process. The launcher then forks stage 2, which applies the
//! namespace plan, forks the privileged RPC worker over a socketpair,
//! runs `create_container` through it, and finally becomes the payload
//! supervisor in `start_process`. The calling process stays behind as
//! the master: it gates the start, monitors, and cleans up.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process;

use log::{debug, error, warn};
use nix::sched::{setns, unshare};
use nix::sys::signalfd::SignalFd;
use nix::unistd::{fork, getpid, pipe, ForkResult, Pid};

use crate::sifpod::config::Layout;
use crate::sifpod::engine::{
    monitor, Engine, NamespaceSet, StarterConfig, SIG_CLEANUP, SIG_CREATED,
};
use crate::sifpod::logger::{log_debug, log_info, log_warn};
use crate::sifpod::rpc::{self, RpcClient};
use crate::sifpod::util::{errno_of, new_error, with_context, BoxError};

/// Master-side handle on a launched engine instance.
pub struct Handle {
    pid: Pid,
    start_gate: Option<OwnedFd>,
    control: UnixStream,
    signals: SignalFd,
}

impl Handle {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Blocks until stage 2 reports the outcome of `create_container`.
    /// Must be called before answering the CRI create request: a failed
    /// create leaves no instance record, and the error text arrives here.
    pub fn wait_created(&mut self) -> Result<(), BoxError> {
        let mut byte = [0u8; 1];
        let read = self
            .control
            .read(&mut byte)
            .map_err(|e| with_context(e, "failed to read create notification"))?;
        if read == 0 {
            return Err(new_error("engine exited before reporting create"));
        }
        match byte[0] {
            SIG_CREATED => Ok(()),
            SIG_CLEANUP => {
                let mut message = String::new();
                let _ = self.control.read_to_string(&mut message);
                if message.is_empty() {
                    message = "create failed".to_string();
                }
                Err(new_error(message))
            }
            other => Err(new_error(format!(
                "unexpected create notification byte {}",
                other
            ))),
        }
    }

    /// Releases the one-byte start gate, letting the payload run.
    pub fn release_start_gate(&mut self) -> Result<(), BoxError> {
        if let Some(gate) = self.start_gate.take() {
            let mut gate = File::from(gate);
            gate.write_all(&[1])
                .map_err(|e| with_context(e, "failed to release start gate"))?;
        }
        Ok(())
    }
}

/// Stage 1 plus the fork into stage 2. Returns once the child is
/// running; call [`Handle::wait_created`] for the create outcome.
pub fn launch(layout: &Layout, engine: &mut Engine) -> Result<Handle, BoxError> {
    let mut conf = StarterConfig::default();
    engine.prepare_config(layout, &mut conf)?;
    debug!(
        "prepared {} {}: create={:?} join={:?}",
        engine.kind(),
        engine.id(),
        conf.namespaces.create,
        conf.namespaces.join
    );

    let (control_master, control_stage) = UnixStream::pair()
        .map_err(|e| with_context(e, "failed to create control socketpair"))?;

    let mut gate_write = None;
    let mut gate_read = None;
    if matches!(engine, Engine::Container(c) if !c.is_exec_sync()) {
        let (read, write) = pipe().map_err(|e| with_context(e, "failed to create start gate"))?;
        engine.set_start_gate(read.as_raw_fd());
        gate_read = Some(read);
        gate_write = Some(write);
    }

    // Block signals and open the signalfd before forking so the child's
    // exit can never slip past the master.
    let signals = monitor::blocked_signalfd()?;

    match unsafe { fork() }.map_err(|e| with_context(e, "failed to fork engine stage"))? {
        ForkResult::Parent { child } => {
            drop(control_stage);
            drop(gate_read);
            log_info(
                "starter",
                "Engine stage launched",
                &[
                    ("kind", engine.kind()),
                    ("id", engine.id()),
                    ("pid", &child.as_raw().to_string()),
                ],
            );
            Ok(Handle {
                pid: child,
                start_gate: gate_write,
                control: control_master,
                signals,
            })
        }
        ForkResult::Child => {
            drop(control_master);
            drop(gate_write);
            stage_two(layout, engine, &conf, control_stage, gate_read);
        }
    }
}

/// Releases the gate and records the started timestamp. Driven by the
/// CRI start request.
pub fn start(layout: &Layout, engine: &mut Engine, handle: &mut Handle) -> Result<(), BoxError> {
    handle.release_start_gate()?;
    log_debug("starter", "Start gate released", &[("id", engine.id())]);
    engine.post_start_process(layout, handle.pid().as_raw())
}

/// Master loop: waits for the engine process, records its end, cleans
/// up, and returns the exit code to report.
pub fn supervise(
    layout: &Layout,
    engine: &mut Engine,
    handle: &mut Handle,
) -> Result<i32, BoxError> {
    let status = engine.monitor_container(layout, handle.pid, &mut handle.signals)?;
    let exit_code = monitor::exit_code(&status);
    log_info(
        "starter",
        "Engine exited",
        &[
            ("id", engine.id()),
            ("exit_code", &exit_code.to_string()),
        ],
    );
    if let Err(err) = engine.cleanup_container(layout) {
        log_warn(
            "starter",
            "Cleanup failed",
            &[("id", engine.id()), ("error", &err.to_string())],
        );
    }
    Ok(exit_code)
}

/// Everything that happens in the forked engine process. Never returns.
fn stage_two(
    layout: &Layout,
    engine: &mut Engine,
    conf: &StarterConfig,
    control: UnixStream,
    gate: Option<OwnedFd>,
) -> ! {
    if let Err(err) = apply_namespaces(&conf.namespaces) {
        error!("namespace setup for {} failed: {}", engine.id(), err);
        process::exit(1);
    }
    if let Some(propagation) = &conf.mount_propagation {
        if let Err(err) = set_mount_propagation(propagation) {
            error!("failed to set mount propagation: {}", err);
            process::exit(1);
        }
    }

    // The worker forks before privileges are restricted and shares the
    // fresh mount namespace; it is the only path back to the kernel for
    // privileged staging.
    let (worker_end, client_end) = match UnixStream::pair() {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to create rpc socketpair: {}", err);
            process::exit(1);
        }
    };

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(client_end);
            drop(control);
            drop(gate);
            if let Err(err) = rpc::serve(worker_end) {
                error!("rpc worker failed: {}", err);
                process::exit(1);
            }
            process::exit(0);
        }
        Ok(ForkResult::Parent { .. }) => {}
        Err(err) => {
            error!("failed to fork rpc worker: {}", err);
            process::exit(1);
        }
    }
    drop(worker_end);

    if conf.no_new_privs {
        if let Err(err) = set_no_new_privs() {
            error!("failed to set no_new_privs: {}", err);
            process::exit(1);
        }
    }

    let mut client = match RpcClient::new(client_end) {
        Ok(client) => client,
        Err(err) => {
            error!("failed to set up rpc client: {}", err);
            process::exit(1);
        }
    };

    let mut control = control;
    match engine.create_container(layout, getpid().as_raw(), &mut client) {
        Ok(()) => {
            if let Err(err) = control.write_all(&[SIG_CREATED]) {
                error!("failed to notify create: {}", err);
                process::exit(1);
            }
        }
        Err(err) => {
            match errno_of(&err) {
                Some(errno) => {
                    error!("create of {} failed: {} (errno {})", engine.id(), err, errno)
                }
                None => error!("create of {} failed: {}", engine.id(), err),
            }
            let message = err.to_string();
            engine.set_create_error(message.clone());
            let mut payload = vec![SIG_CLEANUP];
            payload.extend_from_slice(message.as_bytes());
            let _ = control.write_all(&payload);
            if let Err(cleanup_err) = engine.cleanup_container(layout) {
                warn!("cleanup after failed create: {}", cleanup_err);
            }
            process::exit(1);
        }
    }

    // Dropping the client closes the worker's connection; it exits with
    // its serve loop.
    drop(client);

    let _gate = gate;
    match engine.start_process() {
        Ok(()) => process::exit(0),
        Err(err) => {
            error!("start of {} failed: {}", engine.id(), err);
            process::exit(255);
        }
    }
}

/// Applies a namespace plan: one unshare over the create set, then
/// joins in plan order.
pub fn apply_namespaces(set: &NamespaceSet) -> Result<(), BoxError> {
    let flags = set.clone_flags();
    if !flags.is_empty() {
        unshare(flags).map_err(|e| with_context(e, format!("unshare({:?}) failed", flags)))?;
    }

    for ns in &set.join {
        let path = ns
            .path
            .as_ref()
            .ok_or_else(|| new_error(format!("join namespace {:?} has no path", ns.kind)))?;
        let file = File::open(path)
            .map_err(|e| with_context(e, format!("failed to open {}", path.display())))?;
        setns(&file, ns.kind.clone_flag())
            .map_err(|e| with_context(e, format!("failed to join {}", path.display())))?;
    }
    Ok(())
}

/// Remounts `/` with the requested propagation in the current mount
/// namespace.
pub fn set_mount_propagation(propagation: &str) -> Result<(), BoxError> {
    use nix::mount::MsFlags;

    let flag = match propagation {
        "shared" => MsFlags::MS_SHARED,
        "slave" => MsFlags::MS_SLAVE,
        "private" => MsFlags::MS_PRIVATE,
        other => return Err(new_error(format!("unknown mount propagation {:?}", other))),
    };
    nix::mount::mount(
        Option::<&str>::None,
        Path::new("/"),
        Option::<&str>::None,
        flag | MsFlags::MS_REC,
        Option::<&str>::None,
    )
    .map_err(|e| with_context(e, "failed to set mount propagation"))
}

pub fn set_no_new_privs() -> Result<(), BoxError> {
    if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
        return Err(with_context(
            std::io::Error::last_os_error(),
            "prctl(PR_SET_NO_NEW_PRIVS) failed",
        ));
    }
    Ok(())
}
