pub mod log_format;
pub mod reader;
pub mod writer;

pub use log_format::{BLOCK_SIZE, HEADER_SIZE, RecordType, log_file_name};
pub use reader::Reader;
pub use writer::Writer;
