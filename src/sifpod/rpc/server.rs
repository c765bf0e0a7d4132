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

use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use log::debug;
use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::stat::Mode;
use nix::unistd::{chdir, chroot, mkdir, sethostname};

use crate::sifpod::rpc::loopdev;
use crate::sifpod::rpc::{LoopInfo, Reply, Request, Response};
use crate::sifpod::util::{with_context, BoxError};

/// Serves requests on `stream` until the peer closes. One frame in, one
/// frame out; the caller guarantees a single outstanding call.
pub fn serve(stream: UnixStream) -> Result<(), BoxError> {
    let writer = stream
        .try_clone()
        .map_err(|e| with_context(e, "failed to clone rpc stream"))?;
    let mut writer = writer;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line.map_err(|e| with_context(e, "failed to read rpc request"))?;
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(request),
            Err(err) => Response::failure(format!("malformed rpc request: {}", err)),
        };

        let mut payload = serde_json::to_vec(&response)
            .map_err(|e| with_context(e, "failed to serialize rpc response"))?;
        payload.push(b'\n');
        writer
            .write_all(&payload)
            .map_err(|e| with_context(e, "failed to write rpc response"))?;
    }

    debug!("rpc peer closed, worker exiting");
    Ok(())
}

fn handle(request: Request) -> Response {
    match request {
        Request::Mount {
            source,
            target,
            fstype,
            flags,
            data,
        } => do_mount(&source, &target, &fstype, flags, &data),
        Request::Mkdir { path, mode } => do_mkdir(&path, mode),
        Request::Chroot { path } => do_chroot(&path),
        Request::LoopDevice { image, mode, info } => do_loop_device(&image, mode, info),
        Request::SetHostname { name } => do_sethostname(&name),
        Request::RedirectIo { path } => do_redirect_io(&path),
        Request::Ll { path } => do_ll(&path),
    }
}

fn do_mount(source: &str, target: &str, fstype: &str, flags: u64, data: &str) -> Response {
    debug!(
        "mounting source: {:?} target: {:?} fstype: {:?} flags: {} data: {:?}",
        source, target, fstype, flags, data
    );

    let source = non_empty_cstring(source);
    let fstype = non_empty_cstring(fstype);
    let data = non_empty_cstring(data);
    let target = match CString::new(target) {
        Ok(target) => target,
        Err(err) => return Response::failure(format!("invalid mount target: {}", err)),
    };

    match nix::mount::mount(
        source.as_deref(),
        target.as_c_str(),
        fstype.as_deref(),
        MsFlags::from_bits_truncate(flags),
        data.as_deref(),
    ) {
        Ok(()) => Response::ok(Reply::Done),
        Err(errno) => Response::errno(
            errno,
            format!("mount of {:?} failed: {}", target, errno),
        ),
    }
}

fn do_mkdir(path: &str, mode: u32) -> Response {
    match mkdir(Path::new(path), Mode::from_bits_truncate(mode)) {
        Ok(()) => Response::ok(Reply::Created { created: true }),
        Err(Errno::EEXIST) => Response::ok(Reply::Created { created: false }),
        Err(errno) => Response::errno(errno, format!("mkdir {} failed: {}", path, errno)),
    }
}

fn do_chroot(path: &str) -> Response {
    if let Err(errno) = chroot(Path::new(path)) {
        return Response::errno(errno, format!("chroot to {} failed: {}", path, errno));
    }
    match chdir("/") {
        Ok(()) => Response::ok(Reply::Done),
        Err(errno) => Response::errno(errno, format!("chdir after chroot failed: {}", errno)),
    }
}

fn do_loop_device(image: &str, mode: i32, info: LoopInfo) -> Response {
    match loopdev::attach(Path::new(image), mode, &info) {
        Ok(number) => Response::ok(Reply::Device { number }),
        Err(err) => match err.errno {
            Some(errno) => Response::errno(errno, err.message),
            None => Response::failure(err.message),
        },
    }
}

fn do_sethostname(name: &str) -> Response {
    match sethostname(name) {
        Ok(()) => Response::ok(Reply::Done),
        Err(errno) => Response::errno(errno, format!("sethostname {} failed: {}", name, errno)),
    }
}

fn do_redirect_io(path: &str) -> Response {
    let file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) => {
            let errno = err
                .raw_os_error()
                .map(Errno::from_raw)
                .unwrap_or(Errno::EIO);
            return Response::errno(errno, format!("failed to open {}: {}", path, err));
        }
    };

    if let Err(errno) = nix::unistd::dup2_stdout(&file) {
        return Response::errno(errno, format!("failed to redirect stdout: {}", errno));
    }
    if let Err(errno) = nix::unistd::dup2_stderr(&file) {
        return Response::errno(errno, format!("failed to redirect stderr: {}", errno));
    }
    Response::ok(Reply::Done)
}

fn do_ll(path: &str) -> Response {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => return Response::failure(format!("failed to read {}: {}", path, err)),
    };

    let mut listing = String::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        match fs::read_link(entry.path()) {
            Ok(target) => {
                listing.push_str(&format!("{} -> {}\n", name, target.display()));
            }
            Err(_) => {
                listing.push_str(&name);
                listing.push('\n');
            }
        }
    }
    Response::ok(Reply::Listing { entries: listing })
}

fn non_empty_cstring(value: &str) -> Option<CString> {
    if value.is_empty() {
        None
    } else {
        CString::new(value).ok()
    }
}
