//! The OPTIONS file: every resolved column family and its tuning options,
//! rewritten on each successful open so a later open can load the schema
//! through `DbOptions::options_path`.

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    column_family::ColumnFamilyDescriptor,
    util::{Result, Status},
};

pub const OPTIONS_FILE: &str = "OPTIONS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsFile {
    pub column_families: Vec<ColumnFamilyDescriptor>,
}

impl OptionsFile {
    pub fn new(column_families: Vec<ColumnFamilyDescriptor>) -> Self {
        OptionsFile { column_families }
    }

    /// Load an options file; a missing file is `NotFound`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Status::not_found(format!(
                "Options file {} does not exist",
                path.display()
            )));
        }
        let raw = fs::read(path)?;
        let parsed: OptionsFile = serde_json::from_slice(&raw)?;
        Ok(parsed)
    }

    /// Write `OPTIONS` into `dir`
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{OPTIONS_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Status::io_error(format!("Failed to encode OPTIONS: {e}")))?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(OPTIONS_FILE))?;
        Ok(())
    }
}
