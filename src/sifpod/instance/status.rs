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

use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::sifpod::config::Layout;
use crate::sifpod::instance;
use crate::sifpod::util::{with_context, BoxError};

const INFO_FILE: &str = "info";
const CREATED_FILE: &str = "created";
const STARTED_FILE: &str = "started";
const FINISHED_FILE: &str = "finished";
const EXIT_CODE_FILE: &str = "exit";

/// Contents of an instance's status archive. Timestamps are Unix
/// nanoseconds; a missing file reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Info {
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i64,
}

pub fn add_created_file(layout: &Layout, id: &str) -> Result<(), BoxError> {
    add_info_file(layout, id, CREATED_FILE, &now_nanos().to_string())
}

pub fn add_started_file(layout: &Layout, id: &str) -> Result<(), BoxError> {
    add_info_file(layout, id, STARTED_FILE, &now_nanos().to_string())
}

pub fn add_finished_file(layout: &Layout, id: &str) -> Result<(), BoxError> {
    add_info_file(layout, id, FINISHED_FILE, &now_nanos().to_string())
}

pub fn add_exit_code_file(layout: &Layout, id: &str, code: i32) -> Result<(), BoxError> {
    add_info_file(layout, id, EXIT_CODE_FILE, &code.to_string())
}

/// Links the `info` entry of the status archive to the instance record.
pub fn link_info(layout: &Layout, id: &str, record_path: &Path) -> Result<(), BoxError> {
    let dir = info_dir(layout, id)?;
    let link = dir.join(INFO_FILE);
    symlink(record_path, &link)
        .map_err(|e| with_context(e, format!("failed to symlink instance file {}", link.display())))
}

/// Reads the full archive for `id`, treating absent files as zero.
pub fn get_info(layout: &Layout, id: &str) -> Result<Info, BoxError> {
    let dir = info_dir(layout, id)?;
    Ok(Info {
        created_at: read_i64(&dir.join(CREATED_FILE))?,
        started_at: read_i64(&dir.join(STARTED_FILE))?,
        finished_at: read_i64(&dir.join(FINISHED_FILE))?,
        exit_code: read_i64(&dir.join(EXIT_CODE_FILE))?,
    })
}

fn add_info_file(layout: &Layout, id: &str, kind: &str, payload: &str) -> Result<(), BoxError> {
    // An archive entry without a live record is meaningless; refuse so
    // stale writers cannot resurrect a reclaimed instance.
    instance::get(layout, id)
        .map_err(|e| with_context(e, format!("failed to fetch instance {}", id)))?;

    let dir = info_dir(layout, id)?;
    let mut contents = payload.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    fs::write(dir.join(kind), contents)
        .map_err(|e| with_context(e, format!("failed to write {} info file for {}", kind, id)))
}

fn info_dir(layout: &Layout, id: &str) -> Result<PathBuf, BoxError> {
    let path = layout.info_dir(id);
    match DirBuilder::new().recursive(true).mode(0o755).create(&path) {
        Ok(()) => Ok(path),
        Err(e) => Err(with_context(
            e,
            format!("failed to create info directory {}", path.display()),
        )),
    }
}

fn read_i64(path: &Path) -> Result<i64, BoxError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(with_context(
                e,
                format!("failed to read info file {}", path.display()),
            ));
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .map_err(|e| with_context(e, format!("invalid content in {}", path.display())))
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
