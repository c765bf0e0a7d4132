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
use std::path::{Path, PathBuf};

const DEFAULT_INSTANCE_ROOT: &str = "/var/run/singularity";
const DEFAULT_INFO_ROOT: &str = "/var/run/singularity/info";
const DEFAULT_SESSION_ROOT: &str = "/var/singularity/mnt/session";

const INSTANCE_ROOT_ENV: &str = "SIFPOD_INSTANCE_ROOT";
const INFO_ROOT_ENV: &str = "SIFPOD_INFO_ROOT";
const SESSION_ROOT_ENV: &str = "SIFPOD_SESSION_ROOT";

/// Host paths the engines operate on. Built once at startup and passed by
/// reference; nothing consults the environment after construction.
#[derive(Debug, Clone)]
pub struct Layout {
    instance_root: PathBuf,
    info_root: PathBuf,
    session_root: PathBuf,
}

impl Layout {
    /// Resolves the layout from the environment, falling back to the
    /// compiled defaults.
    pub fn from_env() -> Self {
        Self {
            instance_root: env_path(INSTANCE_ROOT_ENV, DEFAULT_INSTANCE_ROOT),
            info_root: env_path(INFO_ROOT_ENV, DEFAULT_INFO_ROOT),
            session_root: env_path(SESSION_ROOT_ENV, DEFAULT_SESSION_ROOT),
        }
    }

    pub fn with_roots(
        instance_root: impl Into<PathBuf>,
        info_root: impl Into<PathBuf>,
        session_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            instance_root: instance_root.into(),
            info_root: info_root.into(),
            session_root: session_root.into(),
        }
    }

    pub fn instance_root(&self) -> &Path {
        &self.instance_root
    }

    pub fn info_root(&self) -> &Path {
        &self.info_root
    }

    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    /// Path of the instance record for `id`.
    pub fn instance_file(&self, id: &str) -> PathBuf {
        self.instance_root.join(id)
    }

    /// Status archive directory for `id`.
    pub fn info_dir(&self, id: &str) -> PathBuf {
        self.info_root.join(id)
    }

    /// Per-container session anchor holding the overlay layers.
    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.session_root.join(id)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
