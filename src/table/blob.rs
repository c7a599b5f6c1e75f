//! Blob sidecar files.
//!
//! Large values are appended to `NNNNNN.blob` next to the table that
//! references them; the table stores a 12 byte `BlobIndex` instead:
//!
//! ```text
//! record: | len (4) | crc32 (4) | value |
//! index:  | record offset (8) | value len (4) |
//! ```

use std::{
    fs::File,
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::util::{
    Result, Status,
    coding::{decode_fixed32, decode_fixed64, put_fixed32, put_fixed64},
};

const RECORD_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobIndex {
    pub offset: u64,
    pub len: u32,
}

impl BlobIndex {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        put_fixed64(&mut buf, self.offset);
        put_fixed32(&mut buf, self.len);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 12 {
            return Err(Status::corruption("Malformed blob index"));
        }
        Ok(BlobIndex {
            offset: decode_fixed64(&data[0..8]),
            len: decode_fixed32(&data[8..12]),
        })
    }
}

pub struct BlobWriter {
    file: BufWriter<File>,
    offset: u64,
    count: u64,
}

impl BlobWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| Status::io_error(format!("Failed to create blob file: {e}")))?;
        Ok(BlobWriter {
            file: BufWriter::new(file),
            offset: 0,
            count: 0,
        })
    }

    pub fn add(&mut self, value: &[u8]) -> Result<BlobIndex> {
        let len = u32::try_from(value.len())
            .map_err(|_| Status::invalid_argument("Value too large for blob file"))?;
        let mut header = Vec::with_capacity(RECORD_HEADER_SIZE);
        put_fixed32(&mut header, len);
        put_fixed32(&mut header, crc32fast::hash(value));

        self.file.write_all(&header)?;
        self.file.write_all(value)?;

        let index = BlobIndex {
            offset: self.offset,
            len,
        };
        self.offset += (RECORD_HEADER_SIZE + value.len()) as u64;
        self.count += 1;
        Ok(index)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(mut self) -> Result<u64> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(self.offset)
    }
}

pub struct BlobReader {
    file: Mutex<File>,
}

impl BlobReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Status::io_error(format!("Failed to open blob file: {e}")))?;
        Ok(BlobReader {
            file: Mutex::new(file),
        })
    }

    pub fn read(&self, index: &BlobIndex, verify_checksum: bool) -> Result<Bytes> {
        let mut record = vec![0u8; RECORD_HEADER_SIZE + index.len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(index.offset))?;
            file.read_exact(&mut record)
                .map_err(|e| Status::corruption(format!("Truncated blob record: {e}")))?;
        }

        if decode_fixed32(&record[0..4]) != index.len {
            return Err(Status::corruption("Blob record length mismatch"));
        }
        let value = record.split_off(RECORD_HEADER_SIZE);
        if verify_checksum && decode_fixed32(&record[4..8]) != crc32fast::hash(&value) {
            return Err(Status::corruption("Blob checksum mismatch"));
        }
        Ok(Bytes::from(value))
    }
}
