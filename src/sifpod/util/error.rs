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

use std::error::Error;
use std::fmt;

use nix::errno::Errno;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// One link in an error chain: a context line plus, when the failure
/// bubbled up from below, the error it wraps. Most chains bottom out in
/// an [`Errno`] from the RPC worker or an `io::Error` from the host fs.
#[derive(Debug)]
struct ChainedError {
    message: String,
    source: Option<BoxError>,
}

impl fmt::Display for ChainedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for ChainedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

/// Wraps `error` with a context line describing the failed operation.
pub fn with_context<E>(error: E, context: impl Into<String>) -> BoxError
where
    E: Into<BoxError>,
{
    Box::new(ChainedError {
        message: context.into(),
        source: Some(error.into()),
    })
}

/// A leaf error with no underlying cause.
pub fn new_error(message: impl Into<String>) -> BoxError {
    Box::new(ChainedError {
        message: message.into(),
        source: None,
    })
}

/// Walks the chain for the kernel errno that produced the failure, if
/// any. Mount and loop-device errors keep their errno across the RPC
/// wire, so CRI callers can map them without parsing message text.
pub fn errno_of(err: &BoxError) -> Option<Errno> {
    let mut current: Option<&(dyn Error + 'static)> = Some(err.as_ref());
    while let Some(inner) = current {
        if let Some(errno) = inner.downcast_ref::<Errno>() {
            return Some(*errno);
        }
        if let Some(io_err) = inner.downcast_ref::<std::io::Error>() {
            if let Some(raw) = io_err.raw_os_error() {
                return Some(Errno::from_raw(raw));
            }
        }
        current = inner.source();
    }
    None
}
