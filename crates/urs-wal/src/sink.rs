//! Reference `WalSink` drivers: an in-memory one for unit/property tests
//! (replay runs directly against the `DecodedUndoRecord`s it produces)
//! and a file-backed one for embedders that want a real append-only
//! log, in the spirit of `mini_aurora_wal::writer::WalWriter`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use urs_common::traits::RmgrId;
use urs_common::UndoLogNumber;

use crate::decoded::{DecodedBlock, DecodedUndoRecord};

struct BuildingRecord {
    blocks: Vec<DecodedBlock>,
}

/// Accumulates the record currently under construction and keeps every
/// finished record in memory, in order. This is the driver used by this
/// workspace's own replay-determinism tests: insert through the normal
/// `prepare_to_insert`/`insert` path, then hand `records()` straight to
/// `replay`.
pub struct InMemoryWalSink {
    next_lsn: Mutex<u64>,
    records: Mutex<Vec<DecodedUndoRecord>>,
    building: Mutex<Option<BuildingRecord>>,
}

impl Default for InMemoryWalSink {
    fn default() -> Self {
        InMemoryWalSink {
            next_lsn: Mutex::new(1),
            records: Mutex::new(Vec::new()),
            building: Mutex::new(None),
        }
    }
}

impl InMemoryWalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecodedUndoRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn latest_lsn(&self) -> u64 {
        *self.next_lsn.lock().unwrap() - 1
    }
}

impl urs_common::traits::WalSink for InMemoryWalSink {
    fn begin_insert(&self) {
        let mut building = self.building.lock().unwrap();
        *building = Some(BuildingRecord { blocks: Vec::new() });
    }

    fn register_buffer(&self, block_id: u8, log: UndoLogNumber, blkno: u64, will_init: bool) {
        let mut building = self.building.lock().unwrap();
        let building = building
            .as_mut()
            .expect("register_buffer called outside begin_insert/insert");
        building.blocks.push(DecodedBlock {
            block_id,
            log_number: log,
            blkno,
            will_init,
            restored_from_fpi: false,
            not_found: false,
            buf_data: Vec::new(),
        });
    }

    fn register_buffer_data(&self, block_id: u8, data: &[u8]) {
        let mut building = self.building.lock().unwrap();
        let building = building
            .as_mut()
            .expect("register_buffer_data called outside begin_insert/insert");
        let block = building
            .blocks
            .iter_mut()
            .find(|b| b.block_id == block_id)
            .expect("register_buffer_data for an unregistered block_id");
        block.buf_data = data.to_vec();
    }

    fn insert(&self, rmgr: RmgrId, record_data: Option<&[u8]>) -> u64 {
        let building = self
            .building
            .lock()
            .unwrap()
            .take()
            .expect("insert called outside begin_insert");
        let mut next_lsn = self.next_lsn.lock().unwrap();
        let lsn = *next_lsn;
        *next_lsn += 1;
        self.records.lock().unwrap().push(DecodedUndoRecord {
            lsn,
            rmgr,
            blocks: building.blocks,
            record_data: record_data.map(|d| d.to_vec()),
        });
        lsn
    }
}

/// A file-backed driver: each finished record is appended as a
/// length-framed, CRC-protected block, mirroring
/// `mini_aurora_wal::writer::WalWriter`'s fixed-header-plus-payload
/// shape. Useful for embedders that want records to survive a restart
/// without bringing in a full WAL subsystem.
pub struct FileWalSink {
    next_lsn: Mutex<u64>,
    writer: Mutex<BufWriter<File>>,
    building: Mutex<Option<BuildingRecord>>,
}

impl FileWalSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FileWalSink {
            next_lsn: Mutex::new(1),
            writer: Mutex::new(BufWriter::new(file)),
            building: Mutex::new(None),
        })
    }

    pub fn sync(&self) -> io::Result<()> {
        self.writer.lock().unwrap().flush()
    }

    /// Read every record previously appended to `path`, in order. Stops
    /// at the first truncated or CRC-mismatched frame rather than
    /// erroring, the same "last write may be torn" tolerance the
    /// teacher's `wal::recovery` module applies to its own log file.
    pub fn read_all(path: impl AsRef<Path>) -> io::Result<Vec<DecodedUndoRecord>> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            match decode_record(&bytes[pos..]) {
                Some((record, consumed)) => {
                    out.push(record);
                    pos += consumed;
                }
                None => break,
            }
        }
        Ok(out)
    }
}

impl urs_common::traits::WalSink for FileWalSink {
    fn begin_insert(&self) {
        let mut building = self.building.lock().unwrap();
        *building = Some(BuildingRecord { blocks: Vec::new() });
    }

    fn register_buffer(&self, block_id: u8, log: UndoLogNumber, blkno: u64, will_init: bool) {
        let mut building = self.building.lock().unwrap();
        let building = building
            .as_mut()
            .expect("register_buffer called outside begin_insert/insert");
        building.blocks.push(DecodedBlock {
            block_id,
            log_number: log,
            blkno,
            will_init,
            restored_from_fpi: false,
            not_found: false,
            buf_data: Vec::new(),
        });
    }

    fn register_buffer_data(&self, block_id: u8, data: &[u8]) {
        let mut building = self.building.lock().unwrap();
        let building = building
            .as_mut()
            .expect("register_buffer_data called outside begin_insert/insert");
        let block = building
            .blocks
            .iter_mut()
            .find(|b| b.block_id == block_id)
            .expect("register_buffer_data for an unregistered block_id");
        block.buf_data = data.to_vec();
    }

    fn insert(&self, rmgr: RmgrId, record_data: Option<&[u8]>) -> u64 {
        let building = self
            .building
            .lock()
            .unwrap()
            .take()
            .expect("insert called outside begin_insert");
        let mut next_lsn = self.next_lsn.lock().unwrap();
        let lsn = *next_lsn;
        *next_lsn += 1;
        let record = DecodedUndoRecord {
            lsn,
            rmgr,
            blocks: building.blocks,
            record_data: record_data.map(|d| d.to_vec()),
        };
        let frame = encode_record(&record);
        self.writer
            .lock()
            .unwrap()
            .write_all(&frame)
            .expect("WAL file write failed");
        lsn
    }
}

fn encode_rmgr(rmgr: &RmgrId) -> u8 {
    use urs_common::traits::XactOp;
    match rmgr {
        RmgrId::Undo => 0,
        RmgrId::Xact(XactOp::Commit) => 1,
        RmgrId::Xact(XactOp::CommitPrepared) => 2,
        RmgrId::Xact(XactOp::Abort) => 3,
        RmgrId::Xact(XactOp::AbortPrepared) => 4,
        RmgrId::Xact(XactOp::Prepare) => 5,
    }
}

fn decode_rmgr(tag: u8) -> Option<RmgrId> {
    use urs_common::traits::XactOp;
    Some(match tag {
        0 => RmgrId::Undo,
        1 => RmgrId::Xact(XactOp::Commit),
        2 => RmgrId::Xact(XactOp::CommitPrepared),
        3 => RmgrId::Xact(XactOp::Abort),
        4 => RmgrId::Xact(XactOp::AbortPrepared),
        5 => RmgrId::Xact(XactOp::Prepare),
        _ => return None,
    })
}

fn encode_record(record: &DecodedUndoRecord) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&record.lsn.to_le_bytes());
    body.push(encode_rmgr(&record.rmgr));
    match &record.record_data {
        None => body.extend_from_slice(&u32::MAX.to_le_bytes()),
        Some(data) => {
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
        }
    }
    body.extend_from_slice(&(record.blocks.len() as u16).to_le_bytes());
    for block in &record.blocks {
        body.push(block.block_id);
        body.extend_from_slice(&block.log_number.to_le_bytes());
        body.extend_from_slice(&block.blkno.to_le_bytes());
        let mut flags = 0u8;
        if block.will_init {
            flags |= 1;
        }
        if block.restored_from_fpi {
            flags |= 2;
        }
        if block.not_found {
            flags |= 4;
        }
        body.push(flags);
        body.extend_from_slice(&(block.buf_data.len() as u16).to_le_bytes());
        body.extend_from_slice(&block.buf_data);
    }

    let crc = crc32fast::hash(&body);
    let mut frame = Vec::with_capacity(4 + body.len() + 4);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Returns the decoded record and the number of bytes consumed from
/// `bytes`, or `None` if `bytes` does not hold a complete, valid frame.
fn decode_record(bytes: &[u8]) -> Option<(DecodedUndoRecord, usize)> {
    if bytes.len() < 4 {
        return None;
    }
    let body_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let total = 4 + body_len + 4;
    if bytes.len() < total {
        return None;
    }
    let body = &bytes[4..4 + body_len];
    let crc_bytes = &bytes[4 + body_len..total];
    let expected = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    if crc32fast::hash(body) != expected {
        return None;
    }

    let mut pos = 0;
    let lsn = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let rmgr = decode_rmgr(body[pos])?;
    pos += 1;
    let data_len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let record_data = if data_len == u32::MAX {
        None
    } else {
        let data_len = data_len as usize;
        let data = body[pos..pos + data_len].to_vec();
        pos += data_len;
        Some(data)
    };
    let num_blocks = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let mut blocks = Vec::with_capacity(num_blocks as usize);
    for _ in 0..num_blocks {
        let block_id = body[pos];
        pos += 1;
        let log_number = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let blkno = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let flags = body[pos];
        pos += 1;
        let buf_data_len = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        let buf_data = body[pos..pos + buf_data_len].to_vec();
        pos += buf_data_len;
        blocks.push(DecodedBlock {
            block_id,
            log_number,
            blkno,
            will_init: flags & 1 != 0,
            restored_from_fpi: flags & 2 != 0,
            not_found: flags & 4 != 0,
            buf_data,
        });
    }

    Some((
        DecodedUndoRecord {
            lsn,
            rmgr,
            blocks,
            record_data,
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use urs_common::traits::WalSink;

    #[test]
    fn in_memory_sink_roundtrips_a_record() {
        let sink = InMemoryWalSink::new();
        sink.begin_insert();
        sink.register_buffer(0, 1, 0, true);
        sink.register_buffer_data(0, &[1, 2, 3]);
        let lsn = sink.insert(RmgrId::Undo, Some(b"payload"));
        assert_eq!(lsn, 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].blocks[0].buf_data, vec![1, 2, 3]);
        assert_eq!(records[0].record_data.as_deref(), Some(b"payload".as_slice()));
    }

    #[test]
    fn file_sink_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("undo.wal");
        {
            let sink = FileWalSink::create(&path).unwrap();
            sink.begin_insert();
            sink.register_buffer(3, 7, 2, false);
            sink.register_buffer_data(3, &[9, 9, 9]);
            sink.insert(RmgrId::Undo, None);
            sink.sync().unwrap();
        }

        let records = FileWalSink::read_all(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].blocks[0].log_number, 7);
        assert_eq!(records[0].blocks[0].buf_data, vec![9, 9, 9]);
        assert!(records[0].record_data.is_none());
    }

    #[test]
    fn file_sink_stops_at_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("undo.wal");
        {
            let sink = FileWalSink::create(&path).unwrap();
            sink.begin_insert();
            sink.register_buffer(0, 1, 0, false);
            sink.insert(RmgrId::Undo, None);
            sink.sync().unwrap();
        }
        // Truncate mid-frame to simulate a torn write.
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() - 2]).unwrap();

        let records = FileWalSink::read_all(&path).unwrap();
        assert!(records.is_empty());
    }
}
