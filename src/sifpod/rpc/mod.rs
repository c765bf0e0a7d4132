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

//! The privileged worker and its client. The stage-2 process unshares
//! into the target namespaces and drops privilege; every kernel operation
//! that still needs privilege travels over this socketpair to a worker
//! forked before the drop, living in the same mount namespace.
//!
//! One connection, one outstanding call, newline-delimited JSON frames.
//! The worker exits when the peer closes.

pub mod client;
pub mod loopdev;
pub mod server;

use serde::{Deserialize, Serialize};

pub use client::RpcClient;
pub use server::serve;

/// Loop device parameters for [`Request::LoopDevice`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopInfo {
    pub offset: u64,
    pub size_limit: u64,
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Mount {
        source: String,
        target: String,
        fstype: String,
        flags: u64,
        data: String,
    },
    Mkdir {
        path: String,
        mode: u32,
    },
    Chroot {
        path: String,
    },
    LoopDevice {
        image: String,
        mode: i32,
        info: LoopInfo,
    },
    SetHostname {
        name: String,
    },
    RedirectIo {
        path: String,
    },
    Ll {
        path: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Done,
    Created { created: bool },
    Device { number: u32 },
    Listing { entries: String },
}

/// Error half of a response. `errno` is the raw kernel errno when the
/// failing call had one, so the client can rehydrate it losslessly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            error: None,
        }
    }

    pub fn errno(errno: nix::errno::Errno, message: impl Into<String>) -> Self {
        Self {
            reply: None,
            error: Some(WireError {
                message: message.into(),
                errno: Some(errno as i32),
            }),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            reply: None,
            error: Some(WireError {
                message: message.into(),
                errno: None,
            }),
        }
    }
}
