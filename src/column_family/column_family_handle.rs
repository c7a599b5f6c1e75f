use std::{fmt, sync::Arc};

use crate::column_family::ColumnFamilyData;

/// Handle to a live column family at a stable index of the handle table.
///
/// Cheap to clone. A handle obtained before a drop keeps answering
/// `name()` but every operation through it fails with `InvalidArgument`.
#[derive(Clone)]
pub struct ColumnFamilyHandle {
    index: usize,
    data: Arc<ColumnFamilyData>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(index: usize, data: Arc<ColumnFamilyData>) -> Self {
        ColumnFamilyHandle { index, data }
    }

    /// Position in the handle table
    pub fn index(&self) -> usize {
        self.index
    }

    /// Internal id, stable across reopen
    pub fn id(&self) -> u32 {
        self.data.id()
    }

    pub fn name(&self) -> &str {
        self.data.name()
    }

    pub fn is_dropped(&self) -> bool {
        self.data.is_dropped()
    }

    pub(crate) fn data(&self) -> &Arc<ColumnFamilyData> {
        &self.data
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyHandle")
            .field("index", &self.index)
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

impl PartialEq for ColumnFamilyHandle {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.id() == other.id()
    }
}

impl Eq for ColumnFamilyHandle {}
