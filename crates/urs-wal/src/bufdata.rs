//! `UndoRecordSetXLogBufData`: the per-buffer WAL payload, modeled as a
//! tagged `Vec<BufDataOp>` (Design Note, spec.md §9) rather than a
//! bitflag struct. Encoding is a length-prefixed stream; decoding
//! rejects any tag byte it does not recognize, which is how a corrupted
//! or truncated record turns into `UndoError::Corruption` instead of
//! silently misinterpreting bytes.

use urs_common::{UndoError, UndoResult, UndoRecPtr, UndoRsType};

const TAG_INSERT: u8 = 1;
const TAG_ADD_PAGE: u8 = 2;
const TAG_CREATE: u8 = 3;
const TAG_ADD_CHUNK: u8 = 4;
const TAG_CLOSE_CHUNK: u8 = 5;
const TAG_CLOSE: u8 = 6;
const TAG_CLOSE_MULTI_CHUNK: u8 = 7;

/// One flag's worth of bufdata, carrying exactly the fields spec.md §6
/// lists for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufDataOp {
    Insert {
        insert_page_offset: u16,
    },
    AddPage {
        urs_type: UndoRsType,
        chunk_header_location: UndoRecPtr,
    },
    Create {
        urs_type: UndoRsType,
        type_header: Vec<u8>,
    },
    AddChunk {
        urs_type: UndoRsType,
        previous_chunk_header_location: UndoRecPtr,
    },
    CloseChunk {
        chunk_size_page_offset: u16,
        chunk_size: u64,
    },
    Close {
        urs_type: UndoRsType,
        type_header: Vec<u8>,
    },
    CloseMultiChunk {
        first_chunk_header_location: UndoRecPtr,
    },
}

impl BufDataOp {
    fn tag(&self) -> u8 {
        match self {
            BufDataOp::Insert { .. } => TAG_INSERT,
            BufDataOp::AddPage { .. } => TAG_ADD_PAGE,
            BufDataOp::Create { .. } => TAG_CREATE,
            BufDataOp::AddChunk { .. } => TAG_ADD_CHUNK,
            BufDataOp::CloseChunk { .. } => TAG_CLOSE_CHUNK,
            BufDataOp::Close { .. } => TAG_CLOSE,
            BufDataOp::CloseMultiChunk { .. } => TAG_CLOSE_MULTI_CHUNK,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            BufDataOp::Insert { insert_page_offset } => {
                out.extend_from_slice(&insert_page_offset.to_le_bytes());
            }
            BufDataOp::AddPage {
                urs_type,
                chunk_header_location,
            } => {
                out.push(urs_type.0);
                out.extend_from_slice(&chunk_header_location.as_u64().to_le_bytes());
            }
            BufDataOp::Create {
                urs_type,
                type_header,
            } => {
                out.push(urs_type.0);
                out.push(type_header.len() as u8);
                out.extend_from_slice(type_header);
            }
            BufDataOp::AddChunk {
                urs_type,
                previous_chunk_header_location,
            } => {
                out.push(urs_type.0);
                out.extend_from_slice(&previous_chunk_header_location.as_u64().to_le_bytes());
            }
            BufDataOp::CloseChunk {
                chunk_size_page_offset,
                chunk_size,
            } => {
                out.extend_from_slice(&chunk_size_page_offset.to_le_bytes());
                out.extend_from_slice(&chunk_size.to_le_bytes());
            }
            BufDataOp::Close {
                urs_type,
                type_header,
            } => {
                out.push(urs_type.0);
                out.push(type_header.len() as u8);
                out.extend_from_slice(type_header);
            }
            BufDataOp::CloseMultiChunk {
                first_chunk_header_location,
            } => {
                out.extend_from_slice(&first_chunk_header_location.as_u64().to_le_bytes());
            }
        }
    }

    fn decode_from(tag: u8, buf: &[u8], pos: &mut usize) -> UndoResult<Self> {
        let take = |pos: &mut usize, n: usize| -> UndoResult<&[u8]> {
            if *pos + n > buf.len() {
                return Err(UndoError::Other(
                    "bufdata stream truncated mid-operation".into(),
                ));
            }
            let slice = &buf[*pos..*pos + n];
            *pos += n;
            Ok(slice)
        };

        Ok(match tag {
            TAG_INSERT => {
                let bytes = take(pos, 2)?;
                BufDataOp::Insert {
                    insert_page_offset: u16::from_le_bytes([bytes[0], bytes[1]]),
                }
            }
            TAG_ADD_PAGE => {
                let urs_type = UndoRsType(take(pos, 1)?[0]);
                let bytes = take(pos, 8)?;
                BufDataOp::AddPage {
                    urs_type,
                    chunk_header_location: UndoRecPtr::from_u64(u64::from_le_bytes(
                        bytes.try_into().unwrap(),
                    )),
                }
            }
            TAG_CREATE => {
                let urs_type = UndoRsType(take(pos, 1)?[0]);
                let len = take(pos, 1)?[0] as usize;
                let type_header = take(pos, len)?.to_vec();
                BufDataOp::Create {
                    urs_type,
                    type_header,
                }
            }
            TAG_ADD_CHUNK => {
                let urs_type = UndoRsType(take(pos, 1)?[0]);
                let bytes = take(pos, 8)?;
                BufDataOp::AddChunk {
                    urs_type,
                    previous_chunk_header_location: UndoRecPtr::from_u64(u64::from_le_bytes(
                        bytes.try_into().unwrap(),
                    )),
                }
            }
            TAG_CLOSE_CHUNK => {
                let offset_bytes = take(pos, 2)?;
                let chunk_size_page_offset = u16::from_le_bytes([offset_bytes[0], offset_bytes[1]]);
                let size_bytes = take(pos, 8)?;
                BufDataOp::CloseChunk {
                    chunk_size_page_offset,
                    chunk_size: u64::from_le_bytes(size_bytes.try_into().unwrap()),
                }
            }
            TAG_CLOSE => {
                let urs_type = UndoRsType(take(pos, 1)?[0]);
                let len = take(pos, 1)?[0] as usize;
                let type_header = take(pos, len)?.to_vec();
                BufDataOp::Close {
                    urs_type,
                    type_header,
                }
            }
            TAG_CLOSE_MULTI_CHUNK => {
                let bytes = take(pos, 8)?;
                BufDataOp::CloseMultiChunk {
                    first_chunk_header_location: UndoRecPtr::from_u64(u64::from_le_bytes(
                        bytes.try_into().unwrap(),
                    )),
                }
            }
            other => {
                return Err(UndoError::Other(format!(
                    "unknown bufdata operation tag {other}"
                )))
            }
        })
    }
}

/// The complete set of bufdata operations staged against one buffer for
/// one WAL record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufData {
    pub ops: Vec<BufDataOp>,
}

impl BufData {
    pub fn new() -> Self {
        BufData::default()
    }

    pub fn push(&mut self, op: BufDataOp) {
        self.ops.push(op);
    }

    pub fn has_insert(&self) -> bool {
        self.ops.iter().any(|o| matches!(o, BufDataOp::Insert { .. }))
    }

    /// The chunk-header location a continuation page belongs to, if this
    /// block registered an `ADD_PAGE` op.
    pub fn add_page(&self) -> Option<UndoRecPtr> {
        self.ops.iter().find_map(|o| match o {
            BufDataOp::AddPage { chunk_header_location, .. } => Some(*chunk_header_location),
            _ => None,
        })
    }

    pub fn close_chunk(&self) -> Option<(u16, u64)> {
        self.ops.iter().find_map(|o| match o {
            BufDataOp::CloseChunk {
                chunk_size_page_offset,
                chunk_size,
            } => Some((*chunk_size_page_offset, *chunk_size)),
            _ => None,
        })
    }

    pub fn close(&self) -> Option<(UndoRsType, &[u8])> {
        self.ops.iter().find_map(|o| match o {
            BufDataOp::Close {
                urs_type,
                type_header,
            } => Some((*urs_type, type_header.as_slice())),
            _ => None,
        })
    }

    pub fn close_multi_chunk(&self) -> Option<UndoRecPtr> {
        self.ops.iter().find_map(|o| match o {
            BufDataOp::CloseMultiChunk {
                first_chunk_header_location,
            } => Some(*first_chunk_header_location),
            _ => None,
        })
    }

    /// Length-prefixed encoding: one byte op count, then each op's tag
    /// and payload back to back.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        debug_assert!(self.ops.len() <= u8::MAX as usize);
        out.push(self.ops.len() as u8);
        for op in &self.ops {
            op.encode_into(&mut out);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> UndoResult<Self> {
        if buf.is_empty() {
            return Err(UndoError::Other("empty bufdata stream".into()));
        }
        let count = buf[0] as usize;
        let mut pos = 1;
        let mut ops = Vec::with_capacity(count);
        for _ in 0..count {
            if pos >= buf.len() {
                return Err(UndoError::Other(
                    "bufdata stream truncated before op tag".into(),
                ));
            }
            let tag = buf[pos];
            pos += 1;
            ops.push(BufDataOp::decode_from(tag, buf, &mut pos)?);
        }
        Ok(BufData { ops })
    }

    /// Encode with a trailing CRC32 over the unchecked payload, for
    /// drivers that want tamper/corruption detection independent of
    /// whatever the outer WAL record framing already provides.
    pub fn encode_checked(&self) -> Vec<u8> {
        let mut out = self.encode();
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn decode_checked(buf: &[u8]) -> UndoResult<Self> {
        if buf.len() < 4 {
            return Err(UndoError::Other("bufdata stream too short for CRC".into()));
        }
        let (payload, crc_bytes) = buf.split_at(buf.len() - 4);
        let expected = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(UndoError::Other(format!(
                "bufdata CRC mismatch: expected {expected:#x}, got {actual:#x}"
            )));
        }
        BufData::decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_op_kind() {
        let mut data = BufData::new();
        data.push(BufDataOp::Insert {
            insert_page_offset: 12,
        });
        data.push(BufDataOp::AddPage {
            urs_type: UndoRsType::TRANSACTION,
            chunk_header_location: UndoRecPtr::new(1, 12),
        });
        data.push(BufDataOp::Create {
            urs_type: UndoRsType::TRANSACTION,
            type_header: vec![1, 2, 3, 4, 5, 6, 7, 8],
        });
        data.push(BufDataOp::AddChunk {
            urs_type: UndoRsType::TRANSACTION,
            previous_chunk_header_location: UndoRecPtr::new(0, 5000),
        });
        data.push(BufDataOp::CloseChunk {
            chunk_size_page_offset: 8187,
            chunk_size: 96,
        });
        data.push(BufDataOp::Close {
            urs_type: UndoRsType::TRANSACTION,
            type_header: vec![9, 9],
        });
        data.push(BufDataOp::CloseMultiChunk {
            first_chunk_header_location: UndoRecPtr::new(0, 12),
        });

        let encoded = data.encode();
        let decoded = BufData::decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let bytes = vec![1u8, 99u8];
        assert!(BufData::decode(&bytes).is_err());
    }

    #[test]
    fn decode_checked_rejects_corrupted_payload() {
        let mut data = BufData::new();
        data.push(BufDataOp::Insert {
            insert_page_offset: 12,
        });
        let mut encoded = data.encode_checked();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(BufData::decode_checked(&encoded).is_err());
    }

    #[test]
    fn empty_bufdata_round_trips() {
        let data = BufData::new();
        let encoded = data.encode();
        assert_eq!(BufData::decode(&encoded).unwrap(), data);
    }
}
