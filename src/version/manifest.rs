//! The MANIFEST: a JSON description of every column family and its table
//! files, replaced atomically (write to `MANIFEST.tmp`, sync, rename) on
//! each change.

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    column_family::ColumnFamilyOptions,
    util::{Result, Status},
};

pub const MANIFEST_FILE: &str = "MANIFEST";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub number: u64,
    pub size: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
    pub smallest_seq: u64,
    pub largest_seq: u64,
    /// Sequence assigned to every entry of an ingested file
    pub global_seqno: Option<u64>,
    pub has_blob: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyRecord {
    pub id: u32,
    pub name: String,
    pub options: ColumnFamilyOptions,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub next_file_number: u64,
    pub last_sequence: u64,
    /// WAL files numbered below this have been flushed
    pub log_number: u64,
    pub next_family_id: u32,
    pub families: Vec<FamilyRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest {
            next_file_number: 1,
            last_sequence: 0,
            log_number: 0,
            next_family_id: 0,
            families: Vec::new(),
        }
    }
}

impl Manifest {
    /// Load the manifest in `dir`, `None` for a fresh directory
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        let manifest: Manifest = serde_json::from_slice(&raw)
            .map_err(|e| Status::corruption(format!("Bad MANIFEST: {e}")))?;
        Ok(Some(manifest))
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Status::io_error(format!("Failed to encode MANIFEST: {e}")))?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn family(&self, name: &str) -> Option<&FamilyRecord> {
        self.families.iter().find(|f| f.name == name)
    }
}
