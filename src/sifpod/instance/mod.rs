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

pub mod status;

use std::error::Error;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

use log::debug;
use nix::unistd::{getpid, getppid, getuid, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sifpod::config::Layout;
use crate::sifpod::util::{new_error, with_context, BoxError};

/// Returned by [`get`] when no record exists for the requested id.
/// Cleanup paths treat this as "already reclaimed", so it is the one
/// error callers must be able to branch on.
#[derive(Debug)]
pub struct NotFound {
    pub id: String,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {} not found", self.id)
    }
}

impl Error for NotFound {}

pub fn is_not_found(err: &BoxError) -> bool {
    err.downcast_ref::<NotFound>().is_some()
}

/// On-disk record of a live instance. Exclusively owned by the process
/// that created it; `ppid` records the creator for the cleanup gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFile {
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pid: i32,
    #[serde(default)]
    pub ppid: i32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub config: Value,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Creates the record file for `id`. Fails when a record already exists:
/// ids are unique across live instances.
pub fn add(layout: &Layout, id: &str, privileged: bool) -> Result<InstanceFile, BoxError> {
    fs::create_dir_all(layout.instance_root()).map_err(|e| {
        with_context(
            e,
            format!(
                "failed to create instance root {}",
                layout.instance_root().display()
            ),
        )
    })?;

    let path = layout.instance_file(id);
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                new_error(format!("instance {} already exists", id))
            } else {
                with_context(e, format!("failed to create instance file for {}", id))
            }
        })?;
    drop(file);

    let record = InstanceFile {
        id: id.to_string(),
        user: current_user(),
        pid: 0,
        ppid: getpid().as_raw(),
        image: String::new(),
        privileged,
        config: Value::Null,
        path,
    };
    update(&record)?;
    Ok(record)
}

/// Reads the record for `id`, re-reading the file on every call.
pub fn get(layout: &Layout, id: &str) -> Result<InstanceFile, BoxError> {
    let path = layout.instance_file(id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Box::new(NotFound { id: id.to_string() }));
        }
        Err(e) => {
            return Err(with_context(
                e,
                format!("failed to read instance file {}", path.display()),
            ));
        }
    };

    let mut record: InstanceFile = serde_json::from_str(&raw)
        .map_err(|e| with_context(e, format!("malformed instance file {}", path.display())))?;
    record.path = path;
    Ok(record)
}

/// Rewrites the record under its path. The record is single-writer, so
/// a plain truncating write is enough.
pub fn update(record: &InstanceFile) -> Result<(), BoxError> {
    let payload = serde_json::to_vec(record)
        .map_err(|e| with_context(e, format!("failed to serialize instance {}", record.id)))?;

    fs::write(&record.path, payload).map_err(|e| {
        with_context(
            e,
            format!("failed to write instance file {}", record.path.display()),
        )
    })
}

/// Removes the record file. A record that is already gone is not an error.
pub fn delete(record: &InstanceFile) -> Result<(), BoxError> {
    match fs::remove_file(&record.path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(with_context(
            e,
            format!("failed to remove instance file {}", record.path.display()),
        )),
    }
}

/// Lists every live instance under the registry root.
pub fn list(layout: &Layout) -> Result<Vec<InstanceFile>, BoxError> {
    let mut records = Vec::new();
    let entries = match fs::read_dir(layout.instance_root()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
        Err(e) => {
            return Err(with_context(
                e,
                format!(
                    "failed to read instance root {}",
                    layout.instance_root().display()
                ),
            ));
        }
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        match get(layout, &id) {
            Ok(record) => records.push(record),
            Err(err) => debug!("skipping unreadable instance file {}: {}", id, err),
        }
    }

    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}

/// Registers a freshly created instance: creates the record, fills in the
/// supervised pid, image, and engine config, and links the status archive
/// back to it.
pub fn register(
    layout: &Layout,
    id: &str,
    image: &str,
    pid: i32,
    config: Value,
) -> Result<InstanceFile, BoxError> {
    let mut record = add(layout, id, true)?;
    record.pid = pid;
    record.image = image.to_string();
    // Registration runs in the engine stage; the master above it owns
    // supervision and cleanup, so the cleanup gate keys on its pid.
    record.ppid = getppid().as_raw();
    record.config = config;
    update(&record)?;
    status::link_info(layout, id, &record.path)?;
    debug!("instance file for {} is {}", id, record.path.display());
    Ok(record)
}

/// Removes the record and the status archive for `id`. Both being absent
/// already is fine; cleanup must be idempotent.
pub fn cleanup(layout: &Layout, id: &str) -> Result<(), BoxError> {
    match get(layout, id) {
        Ok(record) => delete(&record)?,
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(with_context(err, format!("failed to get instance {}", id))),
    }

    let info_dir = layout.info_dir(id);
    match fs::remove_dir_all(&info_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(with_context(
            e,
            format!("failed to remove info directory {}", info_dir.display()),
        )),
    }
}

fn current_user() -> String {
    match User::from_uid(getuid()) {
        Ok(Some(user)) => user.name,
        _ => getuid().to_string(),
    }
}
