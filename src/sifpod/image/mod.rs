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

//! Just enough SIF to run a container: locate the primary system
//! partition and report where its filesystem bytes live. Everything else
//! about the format stays with the image tooling.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::sifpod::util::{new_error, with_context, BoxError};

pub(crate) const HEADER_LEN: usize = 128;
pub(crate) const MAGIC: &[u8; 10] = b"SIF_MAGIC\0";
pub(crate) const MAGIC_OFF: usize = 32;
pub(crate) const DESCR_OFF_FIELD: usize = 96;
pub(crate) const DESCR_COUNT_FIELD: usize = 88;

pub(crate) const DESCRIPTOR_LEN: usize = 592;
pub(crate) const DESCR_DATATYPE: usize = 0;
pub(crate) const DESCR_USED: usize = 4;
pub(crate) const DESCR_FILEOFF: usize = 24;
pub(crate) const DESCR_FILELEN: usize = 32;
pub(crate) const DESCR_EXTRA: usize = 208;

pub(crate) const DATA_PARTITION: i32 = 0x4004;
pub(crate) const PART_PRIM_SYS: i32 = 2;
pub(crate) const FS_SQUASH: i32 = 1;
pub(crate) const FS_EXT3: i32 = 2;

/// Filesystem kind recorded in a partition descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Squashfs,
    Ext3,
    Other(i32),
}

impl FsType {
    fn from_raw(raw: i32) -> Self {
        match raw {
            FS_SQUASH => FsType::Squashfs,
            FS_EXT3 => FsType::Ext3,
            other => FsType::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            FsType::Squashfs => "squashfs".to_string(),
            FsType::Ext3 => "ext3".to_string(),
            FsType::Other(raw) => format!("unknown({})", raw),
        }
    }
}

/// Byte range and filesystem kind of the primary system partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub offset: u64,
    pub length: u64,
    pub fstype: FsType,
}

/// Opens `path` and walks the descriptor table for the primary system
/// partition.
pub fn primary_partition(path: &Path) -> Result<Partition, BoxError> {
    let mut file = File::open(path)
        .map_err(|e| with_context(e, format!("failed to open image {}", path.display())))?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .map_err(|e| with_context(e, format!("failed to read SIF header of {}", path.display())))?;

    if &header[MAGIC_OFF..MAGIC_OFF + MAGIC.len()] != MAGIC {
        return Err(new_error(format!("{} is not a SIF image", path.display())));
    }

    let descr_off = read_i64(&header, DESCR_OFF_FIELD);
    let descr_count = read_i64(&header, DESCR_COUNT_FIELD);
    if descr_off < HEADER_LEN as i64 || descr_count < 0 {
        return Err(new_error(format!(
            "corrupt SIF descriptor table in {}",
            path.display()
        )));
    }

    file.seek(SeekFrom::Start(descr_off as u64))
        .map_err(|e| with_context(e, format!("failed to seek descriptors in {}", path.display())))?;

    let mut descr = [0u8; DESCRIPTOR_LEN];
    for _ in 0..descr_count {
        file.read_exact(&mut descr).map_err(|e| {
            with_context(e, format!("truncated descriptor table in {}", path.display()))
        })?;

        if descr[DESCR_USED] == 0 {
            continue;
        }
        if read_i32(&descr, DESCR_DATATYPE) != DATA_PARTITION {
            continue;
        }
        let fstype = read_i32(&descr, DESCR_EXTRA);
        let parttype = read_i32(&descr, DESCR_EXTRA + 4);
        if parttype != PART_PRIM_SYS {
            continue;
        }

        let offset = read_i64(&descr, DESCR_FILEOFF);
        let length = read_i64(&descr, DESCR_FILELEN);
        if offset < 0 || length < 0 {
            return Err(new_error(format!(
                "corrupt partition descriptor in {}",
                path.display()
            )));
        }
        return Ok(Partition {
            offset: offset as u64,
            length: length as u64,
            fstype: FsType::from_raw(fstype),
        });
    }

    Err(new_error(format!(
        "no primary system partition in {}",
        path.display()
    )))
}

fn read_i64(buf: &[u8], off: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    i64::from_le_bytes(raw)
}

fn read_i32(buf: &[u8], off: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[off..off + 4]);
    i32::from_le_bytes(raw)
}
