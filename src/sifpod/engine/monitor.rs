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

//! The master-side supervision loop. The caller owns signal delivery:
//! it blocks the mask, hands the signalfd in, and the loop only waits.

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::SignalFd;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::sifpod::util::{new_error, with_context, BoxError};

/// Blocks every signal for the calling thread and returns a signalfd
/// over the blocked set. Must run before the supervised child is forked
/// so no SIGCHLD is lost.
pub fn blocked_signalfd() -> Result<SignalFd, BoxError> {
    let mask = SigSet::all();
    mask.thread_block()
        .map_err(|e| with_context(e, "failed to block signals"))?;
    SignalFd::new(&mask).map_err(|e| with_context(e, "failed to create signalfd"))
}

/// Waits until `pid` exits. SIGCHLD triggers a non-blocking wait; exits
/// of other children are ignored. Any other signal aborts supervision.
pub fn wait_for(pid: Pid, signals: &mut SignalFd) -> Result<WaitStatus, BoxError> {
    loop {
        let info = signals
            .read_signal()
            .map_err(|e| with_context(e, "failed to read signalfd"))?
            .ok_or_else(|| new_error("signalfd returned no signal"))?;

        let signal = Signal::try_from(info.ssi_signo as i32)
            .map_err(|e| with_context(e, "unknown signal number"))?;

        if signal != Signal::SIGCHLD {
            return Err(new_error(format!("interrupted by signal {}", signal)));
        }

        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) if status.pid() == Some(pid) => return Ok(status),
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(errno) => {
                    return Err(with_context(errno, "error while waiting for child"));
                }
            }
        }
    }
}

/// Exit code to propagate for a wait status, using the shell convention
/// of 128 plus the signal number for signaled exits.
pub fn exit_code(status: &WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => *code,
        WaitStatus::Signaled(_, signal, _) => 128 + *signal as i32,
        _ => 255,
    }
}
