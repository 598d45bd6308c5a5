// name: u32 length + utf8 bytes
// version: u64
// local_version: u64
// flags: u32 bitset
// modified: i64 (unix seconds)
// -- truncated decode stops here --
// size: u64
// permissions: u32
// blocks: u32 count + that many {offset: u64, size: u32, hash: [u8; 32]}

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bitflags::bitflags;

use crate::error::{CorruptReason, IndexError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u32 {
        const DELETED = 0x1;
        const INVALID = 0x2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: u64,
    pub size: u32,
    pub hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCore {
    pub name: String,
    pub version: u64,
    pub local_version: u64,
    pub flags: RecordFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMetadata {
    pub modified: i64,
    pub size: u64,
    pub permissions: u32,
    pub blocks: Vec<BlockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Full { core: RecordCore, content: ContentMetadata },
    Truncated { core: RecordCore },
}

impl Record {
    pub fn core(&self) -> &RecordCore {
        match self {
            Record::Full { core, .. } => core,
            Record::Truncated { core } => core,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn version(&self) -> u64 {
        self.core().version
    }

    pub fn local_version(&self) -> u64 {
        self.core().local_version
    }

    pub fn flags(&self) -> RecordFlags {
        self.core().flags
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().contains(RecordFlags::DELETED)
    }

    pub fn is_invalid(&self) -> bool {
        self.flags().contains(RecordFlags::INVALID)
    }

    pub fn content(&self) -> Option<&ContentMetadata> {
        match self {
            Record::Full { content, .. } => Some(content),
            Record::Truncated { .. } => None,
        }
    }
}

// local_version is deliberately absent here; the merge engine's clock
// assigns it, never the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub version: u64,
    pub flags: RecordFlags,
    pub modified: i64,
    pub size: u64,
    pub permissions: u32,
    pub blocks: Vec<BlockInfo>,
}

impl FileEntry {
    pub(crate) fn split(self, local_version: u64) -> (RecordCore, ContentMetadata) {
        (
            RecordCore { name: self.name, version: self.version, local_version, flags: self.flags },
            ContentMetadata { modified: self.modified, size: self.size, permissions: self.permissions, blocks: self.blocks },
        )
    }
}

pub fn encode(core: &RecordCore, content: &ContentMetadata) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + core.name.len());
    let name_bytes = core.name.as_bytes();
    buf.write_u32::<BigEndian>(name_bytes.len() as u32).expect("write to Vec never fails");
    buf.extend_from_slice(name_bytes);
    buf.write_u64::<BigEndian>(core.version).unwrap();
    buf.write_u64::<BigEndian>(core.local_version).unwrap();
    buf.write_u32::<BigEndian>(core.flags.bits()).unwrap();
    buf.write_i64::<BigEndian>(content.modified).unwrap();
    buf.write_u64::<BigEndian>(content.size).unwrap();
    buf.write_u32::<BigEndian>(content.permissions).unwrap();
    buf.write_u32::<BigEndian>(content.blocks.len() as u32).unwrap();
    for block in &content.blocks {
        buf.write_u64::<BigEndian>(block.offset).unwrap();
        buf.write_u32::<BigEndian>(block.size).unwrap();
        buf.extend_from_slice(&block.hash);
    }
    buf
}

fn decode_core(cursor: &mut Cursor<&[u8]>, folder: &str, name_hint: &str) -> Result<(RecordCore, i64)> {
    let corrupt = |detail: &'static str| {
        IndexError::Corrupt(CorruptReason::RecordDecode {
            folder: folder.to_string(),
            name: name_hint.to_string(),
            detail,
        })
    };

    let name_len = cursor.read_u32::<BigEndian>().map_err(|_| corrupt("truncated name length"))? as usize;
    let mut name_buf = vec![0u8; name_len];
    cursor.read_exact(&mut name_buf).map_err(|_| corrupt("truncated name bytes"))?;
    let name = String::from_utf8(name_buf).map_err(|_| corrupt("name is not valid utf-8"))?;
    if name.is_empty() {
        return Err(corrupt("name must not be empty"));
    }

    let version = cursor.read_u64::<BigEndian>().map_err(|_| corrupt("truncated version"))?;
    let local_version = cursor.read_u64::<BigEndian>().map_err(|_| corrupt("truncated local_version"))?;
    let flags_bits = cursor.read_u32::<BigEndian>().map_err(|_| corrupt("truncated flags"))?;
    let flags = RecordFlags::from_bits_retain(flags_bits);
    let modified = cursor.read_i64::<BigEndian>().map_err(|_| corrupt("truncated modified"))?;

    Ok((RecordCore { name, version, local_version, flags }, modified))
}

pub fn decode_full(bytes: &[u8], folder: &str, name_hint: &str) -> Result<Record> {
    let mut cursor = Cursor::new(bytes);
    let (core, modified) = decode_core(&mut cursor, folder, name_hint)?;

    let corrupt = |detail: &'static str| {
        IndexError::Corrupt(CorruptReason::RecordDecode {
            folder: folder.to_string(),
            name: name_hint.to_string(),
            detail,
        })
    };

    let size = cursor.read_u64::<BigEndian>().map_err(|_| corrupt("truncated size"))?;
    let permissions = cursor.read_u32::<BigEndian>().map_err(|_| corrupt("truncated permissions"))?;
    let block_count = cursor.read_u32::<BigEndian>().map_err(|_| corrupt("truncated block count"))? as usize;
    let mut blocks = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        let offset = cursor.read_u64::<BigEndian>().map_err(|_| corrupt("truncated block offset"))?;
        let size = cursor.read_u32::<BigEndian>().map_err(|_| corrupt("truncated block size"))?;
        let mut hash = [0u8; 32];
        cursor.read_exact(&mut hash).map_err(|_| corrupt("truncated block hash"))?;
        blocks.push(BlockInfo { offset, size, hash });
    }

    Ok(Record::Full {
        core,
        content: ContentMetadata { modified, size, permissions, blocks },
    })
}

pub fn decode_truncated(bytes: &[u8], folder: &str, name_hint: &str) -> Result<Record> {
    let mut cursor = Cursor::new(bytes);
    let (core, _modified) = decode_core(&mut cursor, folder, name_hint)?;
    Ok(Record::Truncated { core })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (RecordCore, ContentMetadata) {
        let core = RecordCore {
            name: "docs/readme.md".to_string(),
            version: 42,
            local_version: 7,
            flags: RecordFlags::empty(),
        };
        let content = ContentMetadata {
            modified: 1_700_000_000,
            size: 1024,
            permissions: 0o644,
            blocks: vec![
                BlockInfo { offset: 0, size: 512, hash: [1u8; 32] },
                BlockInfo { offset: 512, size: 512, hash: [2u8; 32] },
            ],
        };
        (core, content)
    }

    #[test]
    fn full_round_trip() {
        let (core, content) = sample();
        let bytes = encode(&core, &content);
        let decoded = decode_full(&bytes, "f", "docs/readme.md").unwrap();
        match decoded {
            Record::Full { core: c, content: ct } => {
                assert_eq!(c, core);
                assert_eq!(ct, content);
            }
            Record::Truncated { .. } => panic!("expected full record"),
        }
    }

    #[test]
    fn truncated_decode_matches_truncation_of_full_decode() {
        let (core, content) = sample();
        let bytes = encode(&core, &content);
        let truncated = decode_truncated(&bytes, "f", "docs/readme.md").unwrap();
        let full = decode_full(&bytes, "f", "docs/readme.md").unwrap();
        assert_eq!(truncated.core(), full.core());
        assert!(truncated.content().is_none());
    }

    #[test]
    fn empty_name_is_corrupt() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u64::<BigEndian>(1).unwrap();
        buf.write_u64::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_i64::<BigEndian>(0).unwrap();
        let err = decode_truncated(&buf, "f", "?").unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(CorruptReason::RecordDecode { .. })));
    }

    #[test]
    fn invalid_flag_round_trips() {
        let (mut core, content) = sample();
        core.flags = RecordFlags::INVALID;
        let bytes = encode(&core, &content);
        let decoded = decode_full(&bytes, "f", &core.name).unwrap();
        assert!(decoded.is_invalid());
        assert!(!decoded.is_deleted());
    }
}
