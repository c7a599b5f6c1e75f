use std::{fs, path::Path};

use crate::{
    util::{Result, Status},
    wal::log_format::{BLOCK_SIZE, HEADER_SIZE, RecordHeader, RecordType},
};

/// Reads back the records of one log file.
///
/// The whole file is loaded up front; logs are bounded by the memtable size
/// because a flush rotates them.
pub struct Reader {
    data: Vec<u8>,
    offset: usize,
}

impl Reader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)
            .map_err(|e| Status::io_error(format!("Failed to read WAL file: {e}")))?;
        Ok(Reader { data, offset: 0 })
    }

    /// Next complete record, `Ok(None)` at a clean end of file.
    ///
    /// A torn tail or checksum mismatch yields `Corruption`; the caller
    /// decides whether that is fatal.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut record = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            let Some((record_type, fragment)) = self.read_physical_record()? else {
                if in_fragmented_record {
                    return Err(Status::corruption("Incomplete record at end of log"));
                }
                return Ok(None);
            };

            match (record_type, in_fragmented_record) {
                (RecordType::Full, false) => return Ok(Some(fragment.to_vec())),
                (RecordType::First, false) => {
                    record.extend_from_slice(fragment);
                    in_fragmented_record = true;
                },
                (RecordType::Middle, true) => record.extend_from_slice(fragment),
                (RecordType::Last, true) => {
                    record.extend_from_slice(fragment);
                    return Ok(Some(record));
                },
                (other, _) => {
                    return Err(Status::corruption(format!(
                        "Unexpected {other:?} fragment at offset {}",
                        self.offset
                    )));
                },
            }
        }
    }

    fn read_physical_record(&mut self) -> Result<Option<(RecordType, &[u8])>> {
        loop {
            let block_offset = self.offset % BLOCK_SIZE;
            if BLOCK_SIZE - block_offset < HEADER_SIZE {
                self.offset += BLOCK_SIZE - block_offset;
                continue;
            }

            if self.offset >= self.data.len() {
                return Ok(None);
            }
            if self.offset + HEADER_SIZE > self.data.len() {
                return Err(Status::corruption("Truncated record header"));
            }

            let mut raw = [0u8; HEADER_SIZE];
            raw.copy_from_slice(&self.data[self.offset..self.offset + HEADER_SIZE]);
            let header = RecordHeader::decode(&raw)
                .ok_or_else(|| Status::corruption("Invalid record header"))?;

            let start = self.offset + HEADER_SIZE;
            let end = start + header.length as usize;
            if end > self.data.len() {
                return Err(Status::corruption("Truncated record payload"));
            }
            if !header.matches(&self.data[start..end]) {
                return Err(Status::corruption(format!(
                    "Checksum mismatch at offset {}",
                    self.offset
                )));
            }

            self.offset = end;
            return Ok(Some((header.record_type, &self.data[start..end])));
        }
    }

    /// Byte offset just past the last record returned
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::wal::writer::Writer;

    #[test]
    fn test_round_trip_mixed_sizes() {
        let temp_file = NamedTempFile::new().unwrap();
        let records: Vec<Vec<u8>> = vec![
            b"small".to_vec(),
            vec![7u8; BLOCK_SIZE + 100],
            Vec::new(),
            vec![3u8; BLOCK_SIZE * 3],
            b"tail".to_vec(),
        ];
        {
            let mut writer = Writer::create(temp_file.path()).unwrap();
            for record in &records {
                writer.add_record(record, false).unwrap();
            }
        }

        let mut reader = Reader::open(temp_file.path()).unwrap();
        for expected in &records {
            assert_eq!(&reader.read_record().unwrap().unwrap(), expected);
        }
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_torn_tail_reports_corruption() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let mut writer = Writer::create(temp_file.path()).unwrap();
            writer.add_record(b"complete", false).unwrap();
            writer.add_record(b"will be torn", false).unwrap();
        }
        let len = std::fs::metadata(temp_file.path()).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(temp_file.path())
            .unwrap();
        file.set_len(len - 3).unwrap();

        let mut reader = Reader::open(temp_file.path()).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap(), b"complete");
        assert!(reader.read_record().unwrap_err().is_corruption());
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let mut temp_file = NamedTempFile::new().unwrap();
        {
            let mut writer = Writer::create(temp_file.path()).unwrap();
            writer.add_record(b"payload", false).unwrap();
        }
        let mut data = std::fs::read(temp_file.path()).unwrap();
        data[HEADER_SIZE] ^= 0xFF;
        temp_file.as_file_mut().set_len(0).unwrap();
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let mut reader = Reader::open(temp_file.path()).unwrap();
        assert!(reader.read_record().unwrap_err().is_corruption());
    }
}
