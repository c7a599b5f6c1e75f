pub mod blob;
pub mod block;
pub mod block_builder;
pub mod format;
pub mod properties;
pub mod table_builder;
pub mod table_reader;

pub use block::Block;
pub use block_builder::BlockBuilder;
pub use format::{BlockHandle, DEFAULT_BLOCK_SIZE, Footer, blob_file_name, table_file_name};
pub use properties::TableProperties;
pub use table_builder::TableBuilder;
pub use table_reader::{BlockCache, BlockReadSettings, TableReader};
