use serde::{Deserialize, Serialize};

use crate::column_family::ColumnFamilyOptions;

/// Name and tuning of one column family.
///
/// ```ignore
/// let descriptors = vec![
///     ColumnFamilyDescriptor::new("0", ColumnFamilyOptions::default()),
///     ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::default()),
/// ];
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamilyDescriptor {
    pub name: String,

    #[serde(default)]
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new<S: Into<String>>(name: S, options: ColumnFamilyOptions) -> Self {
        ColumnFamilyDescriptor {
            name: name.into(),
            options,
        }
    }
}
