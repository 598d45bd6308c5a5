use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::Path;

use log::{debug, info};
use sled::Tree;

use crate::clock::LocalClock;
use crate::device::DeviceId;
use crate::error::{CorruptReason, IndexError, Result};
use crate::key;
use crate::merge::{self, DeletionHandler, HardReplace, TombstoneReplace};
use crate::options::IndexOptions;
use crate::record::{self, FileEntry, Record};
use crate::store::Snapshot;
use crate::version_list::VersionList;

pub struct FileIndex {
    db: sled::Db,
    clock: LocalClock,
}

impl FileIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<FileIndex> {
        Self::open_with_options(IndexOptions::new(path.as_ref()))
    }

    pub fn open_with_options(options: IndexOptions) -> Result<FileIndex> {
        let db = options.to_sled_config().open()?;
        info!("file index opened at {}", options.path.display());
        Ok(FileIndex { db, clock: LocalClock::new() })
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.db
    }

    pub(crate) fn clock(&self) -> &LocalClock {
        &self.clock
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::open(&self.db)
    }

    pub fn replace(&self, folder: &str, device: &DeviceId, files: Vec<FileEntry>) -> Result<u64> {
        debug!("replace: folder={folder} device={device} files={}", files.len());
        merge::replace(self, folder, device, files, &HardReplace)
    }

    pub fn replace_with_delete(&self, folder: &str, device: &DeviceId, files: Vec<FileEntry>) -> Result<u64> {
        debug!("replace_with_delete: folder={folder} device={device} files={}", files.len());
        merge::replace(self, folder, device, files, &TombstoneReplace)
    }

    pub fn replace_with<H: DeletionHandler>(
        &self,
        folder: &str,
        device: &DeviceId,
        files: Vec<FileEntry>,
        handler: &H,
    ) -> Result<u64> {
        merge::replace(self, folder, device, files, handler)
    }

    pub fn update(&self, folder: &str, device: &DeviceId, files: Vec<FileEntry>) -> Result<u64> {
        debug!("update: folder={folder} device={device} files={}", files.len());
        merge::update(self, folder, device, files)
    }

    pub fn get(&self, folder: &str, device: &DeviceId, name: &str) -> Result<Option<Record>> {
        let snapshot = self.snapshot();
        let record_key = key::record_key(folder, device, name);
        let result = match snapshot.get(&record_key)? {
            None => None,
            Some(bytes) => Some(record::decode_full(&bytes, folder, name).unwrap_or_else(|e| e.into_panic())),
        };
        snapshot.release();
        Ok(result)
    }

    pub fn get_global(&self, folder: &str, name: &str) -> Result<Option<Record>> {
        let snapshot = self.snapshot();
        let result = self.resolve_global_head(&snapshot, folder, name)?;
        snapshot.release();
        Ok(result)
    }

    fn resolve_global_head(&self, snapshot: &Snapshot, folder: &str, name: &str) -> Result<Option<Record>> {
        let global_key = key::global_key(folder, name);
        let list_bytes = match snapshot.get(&global_key)? {
            None => return Ok(None),
            Some(bytes) => bytes,
        };
        let list = VersionList::decode(&list_bytes, folder, name).unwrap_or_else(|e| e.into_panic());
        let head = list.head().expect("VersionList::decode rejects empty lists");
        let record_key = key::record_key(folder, &head.device, name);
        let bytes = snapshot.get(&record_key)?.unwrap_or_else(|| {
            IndexError::Corrupt(CorruptReason::MissingHeadRecord {
                folder: folder.to_string(),
                name: name.to_string(),
            })
            .into_panic()
        });
        Ok(Some(record::decode_full(&bytes, folder, name).unwrap_or_else(|e| e.into_panic())))
    }

    pub fn availability(&self, folder: &str, name: &str) -> Result<Vec<DeviceId>> {
        let snapshot = self.snapshot();
        let global_key = key::global_key(folder, name);
        let result = match snapshot.get(&global_key)? {
            None => Vec::new(),
            Some(bytes) => VersionList::decode(&bytes, folder, name).unwrap_or_else(|e| e.into_panic()).co_winners(),
        };
        snapshot.release();
        Ok(result)
    }

    pub fn with_have<F>(&self, folder: &str, device: &DeviceId, truncate: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&Record) -> ControlFlow<()>,
    {
        let snapshot = self.snapshot();
        let (start, end) = key::record_range(folder, device);
        for item in snapshot.range(start, end) {
            let (raw_key, raw_value) = item?;
            let (_, _, name) = key::parse_record_key(&raw_key);
            let record = decode(truncate, &raw_value, folder, &name);
            if visit(&record).is_break() {
                break;
            }
        }
        snapshot.release();
        Ok(())
    }

    pub fn with_global<F>(&self, folder: &str, truncate: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&Record) -> ControlFlow<()>,
    {
        let snapshot = self.snapshot();
        let (start, end) = key::global_range(folder);
        for item in snapshot.range(start, end) {
            let (raw_key, raw_value) = item?;
            let (_, name) = key::parse_global_key(&raw_key);
            let list = VersionList::decode(&raw_value, folder, &name).unwrap_or_else(|e| e.into_panic());
            let head = list.head().expect("VersionList::decode rejects empty lists");
            let record_bytes = self.fetch_head_record(&snapshot, folder, &head.device, &name)?;
            let record = decode(truncate, &record_bytes, folder, &name);
            if visit(&record).is_break() {
                break;
            }
        }
        snapshot.release();
        Ok(())
    }

    pub fn with_all_folder_truncated<F>(&self, folder: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&DeviceId, &Record) -> ControlFlow<()>,
    {
        let snapshot = self.snapshot();
        let (start, end) = key::record_range_all_devices(folder);
        for item in snapshot.range(start, end) {
            let (raw_key, raw_value) = item?;
            let (_, device, name) = key::parse_record_key(&raw_key);
            let record = record::decode_truncated(&raw_value, folder, &name).unwrap_or_else(|e| e.into_panic());
            if visit(&device, &record).is_break() {
                break;
            }
        }
        snapshot.release();
        Ok(())
    }

    pub fn list_folders(&self) -> Result<Vec<String>> {
        let snapshot = self.snapshot();
        let (start, end) = key::global_range_all();
        let mut folders = BTreeSet::new();
        for item in snapshot.range(start, end) {
            let (raw_key, _) = item?;
            let (folder, _) = key::parse_global_key(&raw_key);
            folders.insert(folder);
        }
        snapshot.release();
        Ok(folders.into_iter().collect())
    }

    // Not atomic across the whole folder: a storage error partway through
    // leaves the deletions made so far in place.
    pub fn drop_folder(&self, folder: &str) -> Result<()> {
        info!("drop_folder: folder={folder}");
        let (record_start, record_end) = key::record_range_all_devices(folder);
        self.delete_range(record_start, record_end)?;
        let (global_start, global_end) = key::global_range(folder);
        self.delete_range(global_start, global_end)?;
        Ok(())
    }

    fn delete_range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<()> {
        let keys: Vec<sled::IVec> = {
            let snapshot = self.snapshot();
            let keys = snapshot
                .range(start, end)
                .map(|item| item.map(|(k, _)| k))
                .collect::<sled::Result<Vec<_>>>()?;
            snapshot.release();
            keys
        };
        let mut deleted = 0usize;
        for key in keys {
            self.db.remove(key)?;
            deleted += 1;
        }
        debug!("delete_range removed {deleted} keys");
        Ok(())
    }

    fn fetch_head_record(&self, snapshot: &Snapshot, folder: &str, device: &DeviceId, name: &str) -> Result<sled::IVec> {
        let record_key = key::record_key(folder, device, name);
        match snapshot.get(&record_key)? {
            Some(bytes) => Ok(bytes),
            None => IndexError::Corrupt(CorruptReason::MissingHeadRecord {
                folder: folder.to_string(),
                name: name.to_string(),
            })
            .into_panic(),
        }
    }

    pub fn with_need<F>(&self, folder: &str, device: &DeviceId, truncate: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&Record) -> ControlFlow<()>,
    {
        let snapshot = self.snapshot();
        let (start, end) = key::global_range(folder);

        'files: for item in snapshot.range(start, end) {
            let (raw_key, raw_value) = item?;
            let (_, name) = key::parse_global_key(&raw_key);
            let list = VersionList::decode(&raw_value, folder, &name).unwrap_or_else(|e| e.into_panic());
            let need_version = list.head().expect("VersionList::decode rejects empty lists").version;

            let have_entry = list.find(device);
            let have = have_entry.is_some();
            let need = match have_entry {
                Some(entry) => entry.version < need_version,
                None => true,
            };
            if !need {
                continue;
            }

            for co_winner in list.entries().iter().filter(|e| e.version == need_version) {
                let record_bytes = self.fetch_head_record(&snapshot, folder, &co_winner.device, &name)?;
                let full = record::decode_full(&record_bytes, folder, &name).unwrap_or_else(|e| e.into_panic());
                if full.is_invalid() {
                    continue;
                }
                if full.is_deleted() && !have {
                    continue 'files;
                }
                let delivered = if truncate {
                    record::decode_truncated(&record_bytes, folder, &name).unwrap_or_else(|e| e.into_panic())
                } else {
                    full
                };
                if visit(&delivered).is_break() {
                    break 'files;
                }
                continue 'files;
            }
        }

        snapshot.release();
        Ok(())
    }
}

fn decode(truncate: bool, bytes: &[u8], folder: &str, name: &str) -> Record {
    let result = if truncate { record::decode_truncated(bytes, folder, name) } else { record::decode_full(bytes, folder, name) };
    result.unwrap_or_else(|e| e.into_panic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BlockInfo, RecordFlags};
    use tempfile::tempdir;

    fn dev(b: u8) -> DeviceId {
        DeviceId::from_bytes([b; 32])
    }

    fn entry(name: &str, version: u64, flags: RecordFlags) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            version,
            flags,
            modified: 0,
            size: 0,
            permissions: 0o644,
            blocks: Vec::new(),
        }
    }

    fn open_index() -> (tempfile::TempDir, FileIndex) {
        let dir = tempdir().unwrap();
        let index = FileIndex::open(dir.path()).unwrap();
        (dir, index)
    }

    #[test]
    fn insert_then_resolve_global_winner() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        index.replace("f", &d1, vec![entry("a", 10, RecordFlags::empty())]).unwrap();

        let record = index.get_global("f", "a").unwrap().unwrap();
        assert_eq!(record.version(), 10);
        assert_eq!(index.availability("f", "a").unwrap(), vec![d1]);
    }

    #[test]
    fn two_devices_same_version_are_co_winners_insertion_order() {
        let (_dir, index) = open_index();
        let (d1, d2) = (dev(1), dev(2));
        index.replace("f", &d1, vec![entry("a", 10, RecordFlags::empty())]).unwrap();
        index.update("f", &d2, vec![entry("a", 10, RecordFlags::empty())]).unwrap();

        // The most recent writer at a tied version becomes the head, so
        // d2 (written second) leads the co-winner list.
        assert_eq!(index.availability("f", "a").unwrap(), vec![d2, d1]);
    }

    #[test]
    fn newer_version_preempts_and_drives_need() {
        let (_dir, index) = open_index();
        let (d1, d2) = (dev(1), dev(2));
        index.replace("f", &d1, vec![entry("a", 10, RecordFlags::empty())]).unwrap();
        index.update("f", &d2, vec![entry("a", 10, RecordFlags::empty())]).unwrap();
        index.update("f", &d2, vec![entry("a", 12, RecordFlags::empty())]).unwrap();

        let global = index.get_global("f", "a").unwrap().unwrap();
        assert_eq!(global.version(), 12);
        assert_eq!(index.availability("f", "a").unwrap(), vec![d2]);

        let mut needed = Vec::new();
        index
            .with_need("f", &d1, false, |record| {
                needed.push(record.name().to_string());
                std::ops::ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(needed, vec!["a"]);
    }

    #[test]
    fn invalid_flag_excludes_from_global_and_need() {
        let (_dir, index) = open_index();
        let (d1, d2) = (dev(1), dev(2));
        index.replace("f", &d1, vec![entry("a", 10, RecordFlags::empty())]).unwrap();
        index.update("f", &d2, vec![entry("a", 12, RecordFlags::empty())]).unwrap();
        index.update("f", &d2, vec![entry("a", 12, RecordFlags::INVALID)]).unwrap();

        let list_head = index.get_global("f", "a").unwrap().unwrap();
        assert_eq!(list_head.version(), 10);

        let mut needed = Vec::new();
        index
            .with_need("f", &d1, false, |record| {
                needed.push(record.name().to_string());
                std::ops::ControlFlow::Continue(())
            })
            .unwrap();
        assert!(needed.is_empty());
    }

    #[test]
    fn tombstone_replace_bumps_version_and_sets_deleted() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        index.replace("f", &d1, vec![entry("a", 10, RecordFlags::empty())]).unwrap();

        index.replace_with_delete("f", &d1, vec![]).unwrap();

        let record = index.get("f", &d1, "a").unwrap().unwrap();
        assert!(record.is_deleted());
        assert_eq!(record.version(), 11);
    }

    #[test]
    fn hard_replace_with_empty_list_removes_all_records() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        index
            .replace("f", &d1, vec![entry("a", 1, RecordFlags::empty()), entry("b", 1, RecordFlags::empty())])
            .unwrap();
        index.replace("f", &d1, vec![]).unwrap();

        assert!(index.get("f", &d1, "a").unwrap().is_none());
        assert!(index.get("f", &d1, "b").unwrap().is_none());
        assert!(index.get_global("f", "a").unwrap().is_none());
    }

    #[test]
    fn drop_folder_removes_everything() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        index.replace("f", &d1, vec![entry("a", 1, RecordFlags::empty())]).unwrap();
        index.replace("g", &d1, vec![entry("a", 1, RecordFlags::empty())]).unwrap();

        index.drop_folder("f").unwrap();

        assert_eq!(index.list_folders().unwrap(), vec!["g".to_string()]);
        assert!(index.get("f", &d1, "a").unwrap().is_none());
        assert!(index.get_global("f", "a").unwrap().is_none());
        assert!(index.get_global("g", "a").unwrap().is_some());
    }

    #[test]
    fn with_have_respects_truncate_and_stop() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        index
            .replace(
                "f",
                &d1,
                vec![
                    entry("a", 1, RecordFlags::empty()),
                    entry("b", 1, RecordFlags::empty()),
                    entry("c", 1, RecordFlags::empty()),
                ],
            )
            .unwrap();

        let mut seen = Vec::new();
        index
            .with_have("f", &d1, true, |record| {
                seen.push(record.name().to_string());
                assert!(record.content().is_none());
                if seen.len() == 2 { std::ops::ControlFlow::Break(()) } else { std::ops::ControlFlow::Continue(()) }
            })
            .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn local_version_strictly_increases_across_calls() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        let first = index.replace("f", &d1, vec![entry("a", 1, RecordFlags::empty())]).unwrap();
        let second = index.replace("f", &d1, vec![entry("a", 2, RecordFlags::empty())]).unwrap();
        assert!(second > first);
    }

    #[test]
    #[should_panic(expected = "fileindex: corrupt index")]
    fn corrupt_stored_record_aborts_instead_of_returning_err() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        index.replace("f", &d1, vec![entry("a", 1, RecordFlags::empty())]).unwrap();
        index.tree().insert(key::record_key("f", &d1, "a"), b"\x00\x00\x00\x02garbage".as_slice()).unwrap();

        let _ = index.get("f", &d1, "a");
    }

    #[test]
    fn blocks_round_trip_through_full_get() {
        let (_dir, index) = open_index();
        let d1 = dev(1);
        let mut e = entry("a", 1, RecordFlags::empty());
        e.blocks = vec![BlockInfo { offset: 0, size: 4, hash: [9u8; 32] }];
        e.size = 4;
        index.replace("f", &d1, vec![e]).unwrap();

        let record = index.get("f", &d1, "a").unwrap().unwrap();
        let content = record.content().unwrap();
        assert_eq!(content.blocks.len(), 1);
        assert_eq!(content.size, 4);
    }
}
