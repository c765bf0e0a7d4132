#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;

use crate::sifpod::config::Layout;

/// Builds a [`Layout`] rooted in a scratch directory. The `TempDir` must
/// outlive the layout; dropping it removes every record and archive the
/// test created.
pub fn scratch_layout(dir: &TempDir) -> Layout {
    Layout::with_roots(
        dir.path().join("instances"),
        dir.path().join("instances/info"),
        dir.path().join("session"),
    )
}

pub mod sif {
    use std::fs;
    use std::io;
    use std::path::Path;

    use crate::sifpod::image::{
        DESCRIPTOR_LEN, DESCR_COUNT_FIELD, DESCR_DATATYPE, DESCR_EXTRA, DESCR_FILELEN,
        DESCR_FILEOFF, DESCR_OFF_FIELD, DESCR_USED, HEADER_LEN, MAGIC, MAGIC_OFF,
    };

    /// One partition descriptor of a synthetic SIF image.
    pub struct SifPart {
        pub datatype: i32,
        pub fstype: i32,
        pub parttype: i32,
        pub offset: i64,
        pub length: i64,
    }

    /// Writes a minimal SIF image whose descriptor table follows the
    /// header immediately. The data region is zero-filled out to the end
    /// of the last partition so offsets stay in bounds.
    pub fn write_sif(path: &Path, parts: &[SifPart]) -> io::Result<()> {
        let descr_off = HEADER_LEN as i64;

        let mut header = vec![0u8; HEADER_LEN];
        header[MAGIC_OFF..MAGIC_OFF + MAGIC.len()].copy_from_slice(MAGIC);
        header[DESCR_COUNT_FIELD..DESCR_COUNT_FIELD + 8]
            .copy_from_slice(&(parts.len() as i64).to_le_bytes());
        header[DESCR_OFF_FIELD..DESCR_OFF_FIELD + 8].copy_from_slice(&descr_off.to_le_bytes());

        let mut image = header;
        for part in parts {
            let mut descr = vec![0u8; DESCRIPTOR_LEN];
            descr[DESCR_DATATYPE..DESCR_DATATYPE + 4]
                .copy_from_slice(&part.datatype.to_le_bytes());
            descr[DESCR_USED] = 1;
            descr[DESCR_FILEOFF..DESCR_FILEOFF + 8].copy_from_slice(&part.offset.to_le_bytes());
            descr[DESCR_FILELEN..DESCR_FILELEN + 8].copy_from_slice(&part.length.to_le_bytes());
            descr[DESCR_EXTRA..DESCR_EXTRA + 4].copy_from_slice(&part.fstype.to_le_bytes());
            descr[DESCR_EXTRA + 4..DESCR_EXTRA + 8]
                .copy_from_slice(&part.parttype.to_le_bytes());
            image.extend_from_slice(&descr);
        }

        let data_end = parts
            .iter()
            .map(|part| (part.offset + part.length) as usize)
            .max()
            .unwrap_or(0);
        if data_end > image.len() {
            image.resize(data_end, 0);
        }

        fs::write(path, image)
    }
}

/// Writes an empty file, creating parent directories as needed.
pub fn touch(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).map(|_| ())
}
