/// Column families: independently tuned key spaces sharing one WAL and
/// one sequence.
///
/// ```text
/// Database
///  └─→ ColumnFamilySet   [ "0" | "1" | ... | "default" ]   (index → handle, tombstones on drop)
///        └─→ ColumnFamilyHandle
///              └─→ ColumnFamilyData (id, options, current Version)
/// ```
///
/// `resolve_column_families` decides which descriptors make up the table
/// when a database is opened.
mod column_family_data;
pub mod column_family_descriptor;
pub mod column_family_handle;
pub mod column_family_options;
pub mod column_family_set;
pub mod schema;

pub(crate) use column_family_data::ColumnFamilyData;
pub use column_family_descriptor::ColumnFamilyDescriptor;
pub use column_family_handle::ColumnFamilyHandle;
pub use column_family_options::{ColumnFamilyOptions, PrefixExtractor};
pub use column_family_set::ColumnFamilySet;
pub use schema::resolve_column_families;

/// Default column family name
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";
