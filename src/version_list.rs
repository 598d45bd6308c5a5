// Ordered per-file version list: {version, device} pairs, sorted by
// version descending, at most one entry per device. Pure data structure;
// crate::global loads and persists the encoded form under the global key.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::device::DeviceId;
use crate::error::{CorruptReason, IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionEntry {
    pub version: u64,
    pub device: DeviceId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionList {
    entries: Vec<VersionEntry>,
}

impl VersionList {
    pub fn new(entries: Vec<VersionEntry>) -> VersionList {
        VersionList { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn head(&self) -> Option<&VersionEntry> {
        self.entries.first()
    }

    pub fn find(&self, device: &DeviceId) -> Option<&VersionEntry> {
        self.entries.iter().find(|e| &e.device == device)
    }

    pub fn co_winners(&self) -> Vec<DeviceId> {
        match self.head() {
            None => Vec::new(),
            Some(head) => self
                .entries
                .iter()
                .filter(|e| e.version == head.version)
                .map(|e| e.device)
                .collect(),
        }
    }

    // Ties break at the head: the new entry is placed at the first
    // position whose stored version is <= version, so a fresh write at the
    // current top version lands before the existing holder of that
    // version. The most recent writer becomes the head.
    pub fn update(&mut self, device: DeviceId, version: u64) -> bool {
        if let Some(existing) = self.find(&device) {
            if existing.version == version {
                return false;
            }
        }
        self.entries.retain(|e| e.device != device);
        let pos = self.entries.iter().position(|e| e.version <= version).unwrap_or(self.entries.len());
        self.entries.insert(pos, VersionEntry { version, device });
        true
    }

    pub fn remove(&mut self, device: &DeviceId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.device != device);
        self.entries.len() != before
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.entries.len() * (8 + DeviceId::LEN));
        buf.write_u32::<BigEndian>(self.entries.len() as u32).unwrap();
        for entry in &self.entries {
            buf.write_u64::<BigEndian>(entry.version).unwrap();
            buf.extend_from_slice(entry.device.as_bytes());
        }
        buf
    }

    // An empty-but-parsed list is its own CorruptReason, distinct from
    // malformed bytes: the list must never be empty while the entry exists.
    pub fn decode(bytes: &[u8], folder: &str, name: &str) -> Result<VersionList> {
        let corrupt_decode = |detail: &'static str| {
            IndexError::Corrupt(CorruptReason::VersionListDecode {
                folder: folder.to_string(),
                name: name.to_string(),
                detail,
            })
        };

        let mut cursor = Cursor::new(bytes);
        let count = cursor.read_u32::<BigEndian>().map_err(|_| corrupt_decode("truncated entry count"))? as usize;
        if count == 0 {
            return Err(IndexError::Corrupt(CorruptReason::EmptyVersionList {
                folder: folder.to_string(),
                name: name.to_string(),
            }));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let version = cursor.read_u64::<BigEndian>().map_err(|_| corrupt_decode("truncated version"))?;
            let mut device_bytes = [0u8; DeviceId::LEN];
            cursor.read_exact(&mut device_bytes).map_err(|_| corrupt_decode("truncated device id"))?;
            entries.push(VersionEntry { version, device: DeviceId::from_bytes(device_bytes) });
        }
        Ok(VersionList::new(entries))
    }
}
