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

//! Loop device attachment against the kernel ABI directly; the loop ioctl
//! numbers and `loop_info64` layout are from `<linux/loop.h>`.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

use log::debug;
use nix::errno::Errno;

use crate::sifpod::rpc::LoopInfo;

/// Detach the device automatically once its last opener is gone.
pub const LO_FLAGS_AUTOCLEAR: u32 = 4;

const LOOP_SET_FD: libc::c_ulong = 0x4C00;
const LOOP_CLR_FD: libc::c_ulong = 0x4C01;
const LOOP_SET_STATUS64: libc::c_ulong = 0x4C04;
const LOOP_CTL_GET_FREE: libc::c_ulong = 0x4C82;

const LOOP_CONTROL: &str = "/dev/loop-control";
const LO_NAME_SIZE: usize = 64;
const LO_KEY_SIZE: usize = 32;

// Attempts before giving up when every free device the control node hands
// out is stolen by a concurrent attacher.
const ATTACH_ATTEMPTS: usize = 8;

#[repr(C)]
struct RawLoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; LO_NAME_SIZE],
    lo_crypt_name: [u8; LO_NAME_SIZE],
    lo_encrypt_key: [u8; LO_KEY_SIZE],
    lo_init: [u64; 2],
}

impl RawLoopInfo64 {
    fn new(image: &Path, info: &LoopInfo) -> Self {
        let mut file_name = [0u8; LO_NAME_SIZE];
        let raw = image.as_os_str().as_encoded_bytes();
        let len = raw.len().min(LO_NAME_SIZE - 1);
        file_name[..len].copy_from_slice(&raw[..len]);

        Self {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: info.offset,
            lo_sizelimit: info.size_limit,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: info.flags,
            lo_file_name: file_name,
            lo_crypt_name: [0u8; LO_NAME_SIZE],
            lo_encrypt_key: [0u8; LO_KEY_SIZE],
            lo_init: [0u64; 2],
        }
    }
}

#[derive(Debug)]
pub struct LoopError {
    pub message: String,
    pub errno: Option<Errno>,
}

impl LoopError {
    fn errno(errno: Errno, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errno: Some(errno),
        }
    }

    fn io(err: std::io::Error, message: impl Into<String>) -> Self {
        Self {
            message: format!("{}: {}", message.into(), err),
            errno: err.raw_os_error().map(Errno::from_raw),
        }
    }
}

/// Attaches `image` to a free loop device and programs offset, size
/// limit, and flags. Returns the device number. A device snatched by a
/// concurrent attacher between GET_FREE and SET_FD shows up as EBUSY;
/// the next free device is tried instead.
pub fn attach(image: &Path, open_mode: i32, info: &LoopInfo) -> Result<u32, LoopError> {
    let control = File::open(LOOP_CONTROL)
        .map_err(|e| LoopError::io(e, format!("failed to open {}", LOOP_CONTROL)))?;

    let mut options = OpenOptions::new();
    options.read(true);
    if open_mode & libc::O_RDWR != 0 || open_mode & libc::O_WRONLY != 0 {
        options.write(true);
    }
    let backing = options
        .open(image)
        .map_err(|e| LoopError::io(e, format!("failed to open image {}", image.display())))?;

    let mut last_busy = None;
    for _ in 0..ATTACH_ATTEMPTS {
        let number = Errno::result(unsafe {
            libc::ioctl(control.as_raw_fd(), LOOP_CTL_GET_FREE)
        })
        .map_err(|errno| LoopError::errno(errno, format!("no free loop device: {}", errno)))?
            as u32;

        let device_path = format!("/dev/loop{}", number);
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device_path)
            .map_err(|e| LoopError::io(e, format!("failed to open {}", device_path)))?;

        match Errno::result(unsafe {
            libc::ioctl(device.as_raw_fd(), LOOP_SET_FD, backing.as_raw_fd())
        }) {
            Ok(_) => {}
            Err(Errno::EBUSY) => {
                last_busy = Some(number);
                continue;
            }
            Err(errno) => {
                return Err(LoopError::errno(
                    errno,
                    format!("failed to bind image to {}: {}", device_path, errno),
                ));
            }
        }

        let raw = RawLoopInfo64::new(image, info);
        if let Err(errno) = Errno::result(unsafe {
            libc::ioctl(device.as_raw_fd(), LOOP_SET_STATUS64, &raw)
        }) {
            // Leave no half-configured device behind.
            let _ = unsafe { libc::ioctl(device.as_raw_fd(), LOOP_CLR_FD) };
            return Err(LoopError::errno(
                errno,
                format!("failed to configure {}: {}", device_path, errno),
            ));
        }

        debug!(
            "attached {} to loop{} offset={} size_limit={}",
            image.display(),
            number,
            info.offset,
            info.size_limit
        );
        return Ok(number);
    }

    Err(LoopError::errno(
        Errno::EBUSY,
        match last_busy {
            Some(number) => format!("loop{} and every retry was busy", number),
            None => "no loop device could be claimed".to_string(),
        },
    ))
}
