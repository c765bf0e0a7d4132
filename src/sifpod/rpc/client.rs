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

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use log::debug;
use nix::errno::Errno;
use nix::mount::MsFlags;

use crate::sifpod::rpc::{LoopInfo, Reply, Request, Response};
use crate::sifpod::util::{new_error, with_context, BoxError};

/// Client half of the privileged worker connection. Calls are strictly
/// sequential; a second call before the first response would corrupt the
/// frame stream, which the `&mut self` receivers make impossible.
pub struct RpcClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl RpcClient {
    pub fn new(stream: UnixStream) -> Result<Self, BoxError> {
        let writer = stream
            .try_clone()
            .map_err(|e| with_context(e, "failed to clone rpc stream"))?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    pub fn mount(
        &mut self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MsFlags,
        data: &str,
    ) -> Result<(), BoxError> {
        let reply = self.call(&Request::Mount {
            source: source.to_string(),
            target: target.to_string_lossy().to_string(),
            fstype: fstype.to_string(),
            flags: flags.bits(),
            data: data.to_string(),
        })?;
        expect_done(reply)
    }

    /// Creates a directory, reporting whether it was actually created.
    /// An already-existing path is not an error.
    pub fn mkdir(&mut self, path: &Path, mode: u32) -> Result<bool, BoxError> {
        let reply = self.call(&Request::Mkdir {
            path: path.to_string_lossy().to_string(),
            mode,
        })?;
        match reply {
            Reply::Created { created } => Ok(created),
            other => Err(unexpected_reply("mkdir", &other)),
        }
    }

    pub fn chroot(&mut self, path: &Path) -> Result<(), BoxError> {
        let reply = self.call(&Request::Chroot {
            path: path.to_string_lossy().to_string(),
        })?;
        expect_done(reply)
    }

    /// Attaches the image to a free loop device, returning its number.
    pub fn loop_device(
        &mut self,
        image: &Path,
        mode: i32,
        info: LoopInfo,
    ) -> Result<u32, BoxError> {
        let reply = self.call(&Request::LoopDevice {
            image: image.to_string_lossy().to_string(),
            mode,
            info,
        })?;
        match reply {
            Reply::Device { number } => Ok(number),
            other => Err(unexpected_reply("loop_device", &other)),
        }
    }

    pub fn set_hostname(&mut self, name: &str) -> Result<(), BoxError> {
        let reply = self.call(&Request::SetHostname {
            name: name.to_string(),
        })?;
        expect_done(reply)
    }

    pub fn redirect_io(&mut self, path: &Path) -> Result<(), BoxError> {
        let reply = self.call(&Request::RedirectIo {
            path: path.to_string_lossy().to_string(),
        })?;
        expect_done(reply)
    }

    /// Debug directory listing. Failures are swallowed; this exists only
    /// to make mount problems legible in the logs.
    pub fn ll(&mut self, path: &str) {
        match self.call(&Request::Ll {
            path: path.to_string(),
        }) {
            Ok(Reply::Listing { entries }) => debug!("content of {}:\n{}", path, entries),
            Ok(_) => {}
            Err(err) => debug!("ll {} failed: {}", path, err),
        }
    }

    fn call(&mut self, request: &Request) -> Result<Reply, BoxError> {
        let mut payload = serde_json::to_vec(request)
            .map_err(|e| with_context(e, "failed to serialize rpc request"))?;
        payload.push(b'\n');
        self.writer
            .write_all(&payload)
            .map_err(|e| with_context(e, "failed to send rpc request"))?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| with_context(e, "failed to read rpc response"))?;
        if read == 0 {
            return Err(new_error("rpc worker closed the connection"));
        }

        let response: Response = serde_json::from_str(&line)
            .map_err(|e| with_context(e, "malformed rpc response"))?;

        if let Some(error) = response.error {
            return Err(match error.errno {
                Some(errno) => with_context(Errno::from_raw(errno), error.message),
                None => new_error(error.message),
            });
        }
        response
            .reply
            .ok_or_else(|| new_error("rpc response carried neither reply nor error"))
    }
}

fn expect_done(reply: Reply) -> Result<(), BoxError> {
    match reply {
        Reply::Done => Ok(()),
        other => Err(unexpected_reply("call", &other)),
    }
}

fn unexpected_reply(op: &str, reply: &Reply) -> BoxError {
    new_error(format!("unexpected rpc reply for {}: {:?}", op, reply))
}
