pub mod manifest;
pub mod table_file;
#[allow(clippy::module_inception)]
pub mod version;

pub use manifest::{FamilyRecord, FileRecord, MANIFEST_FILE, Manifest};
pub use table_file::TableFile;
pub use version::Version;
