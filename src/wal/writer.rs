use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use crate::{
    util::{Result, Status},
    wal::log_format::{BLOCK_SIZE, HEADER_SIZE, RecordHeader, RecordType},
};

/// Appends framed records to a fresh log file
pub struct Writer {
    file: BufWriter<File>,
    /// Bytes written so far
    offset: usize,
    /// Position inside the current 32 KiB block
    block_offset: usize,
}

impl Writer {
    /// Create (or truncate) the log at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Status::io_error(format!("Failed to create WAL file: {e}")))?;

        Ok(Writer {
            file: BufWriter::new(file),
            offset: 0,
            block_offset: 0,
        })
    }

    /// Append one logical record and push it to the OS. `sync` additionally
    /// forces it to stable storage.
    pub fn add_record(&mut self, data: &[u8], sync: bool) -> Result<()> {
        let mut rest = data;
        let mut first = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                self.write_raw(&[0u8; HEADER_SIZE][..leftover])?;
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let take = rest.len().min(avail);
            let (fragment, remaining) = rest.split_at(take);
            let record_type = RecordType::for_fragment(first, remaining.is_empty());

            let header = RecordHeader::for_payload(record_type, fragment);
            self.write_raw(&header.encode())?;
            self.write_raw(fragment)?;
            self.block_offset += HEADER_SIZE + fragment.len();

            rest = remaining;
            first = false;
            if rest.is_empty() {
                break;
            }
        }

        self.file
            .flush()
            .map_err(|e| Status::io_error(format!("WAL flush failed: {e}")))?;
        if sync {
            self.sync()?;
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .map_err(|e| Status::io_error(format!("WAL write failed: {e}")))?;
        self.offset += data.len();
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| Status::io_error(format!("WAL flush failed: {e}")))?;
        self.file
            .get_ref()
            .sync_data()
            .map_err(|e| Status::io_error(format!("WAL sync failed: {e}")))
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}
