use std::cmp::Ordering;

use crate::device::DeviceId;
use crate::error::Result;
use crate::global::{remove_from_global, update_global};
use crate::index::FileIndex;
use crate::key;
use crate::record::{self, ContentMetadata, FileEntry, RecordCore, RecordFlags};
use crate::store::{Snapshot, WriteBatch};

// Inserting Invalid never creates a global entry; flipping to Invalid
// removes any existing one.
fn write_record(
    index: &FileIndex,
    batch: &mut WriteBatch,
    snapshot: &Snapshot,
    folder: &str,
    device: &DeviceId,
    entry: FileEntry,
    prior_local_version: u64,
) -> Result<u64> {
    let name = entry.name.clone();
    let valid = !entry.flags.contains(RecordFlags::INVALID);
    let version = entry.version;
    let local_version = index.clock().tick(prior_local_version);
    let (core, content) = entry.split(local_version);
    batch.put(key::record_key(folder, device, &core.name), record::encode(&core, &content));

    if valid {
        update_global(batch, snapshot, folder, device, &name, version)?;
    } else {
        remove_from_global(batch, snapshot, folder, device, &name)?;
    }
    Ok(local_version)
}

pub trait DeletionHandler {
    fn handle(
        &self,
        index: &FileIndex,
        batch: &mut WriteBatch,
        snapshot: &Snapshot,
        folder: &str,
        device: &DeviceId,
        stored_key: &[u8],
        stored_value: &[u8],
    ) -> Result<u64>;
}

pub struct HardReplace;

impl DeletionHandler for HardReplace {
    fn handle(
        &self,
        _index: &FileIndex,
        batch: &mut WriteBatch,
        snapshot: &Snapshot,
        folder: &str,
        device: &DeviceId,
        stored_key: &[u8],
        _stored_value: &[u8],
    ) -> Result<u64> {
        let (_, _, name) = key::parse_record_key(stored_key);
        batch.delete(stored_key.to_vec());
        remove_from_global(batch, snapshot, folder, device, &name)?;
        Ok(0)
    }
}

pub struct TombstoneReplace;

impl DeletionHandler for TombstoneReplace {
    fn handle(
        &self,
        index: &FileIndex,
        batch: &mut WriteBatch,
        snapshot: &Snapshot,
        folder: &str,
        device: &DeviceId,
        stored_key: &[u8],
        stored_value: &[u8],
    ) -> Result<u64> {
        let (_, _, name) = key::parse_record_key(stored_key);
        let stored = record::decode_full(stored_value, folder, &name).unwrap_or_else(|e| e.into_panic());
        if stored.is_deleted() {
            return Ok(0);
        }
        let core = stored.core();
        let content = stored.content().expect("stored records are always encoded in full form").clone();
        let new_version = core.version + 1;
        let local_version = index.clock().tick(core.local_version);
        let new_core = RecordCore {
            name: core.name.clone(),
            version: new_version,
            local_version,
            flags: core.flags | RecordFlags::DELETED,
        };
        batch.put(stored_key.to_vec(), record::encode(&new_core, &content));
        update_global(batch, snapshot, folder, device, &name, new_version)?;
        Ok(local_version)
    }
}

fn stored_record_core(value: &sled::IVec, folder: &str, name: &str) -> (RecordCore, ContentMetadata) {
    match record::decode_full(value, folder, name).unwrap_or_else(|e| e.into_panic()) {
        record::Record::Full { core, content } => (core, content),
        record::Record::Truncated { .. } => unreachable!("decode_full never returns Truncated"),
    }
}

pub fn replace<H: DeletionHandler>(
    index: &FileIndex,
    folder: &str,
    device: &DeviceId,
    mut files: Vec<FileEntry>,
    deletion_handler: &H,
) -> Result<u64> {
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let snapshot = index.snapshot();
    let mut batch = WriteBatch::new();
    let mut max_local_version = 0u64;

    let (start, end) = key::record_range(folder, device);
    let mut stored_iter = snapshot.range(start, end);
    let mut stored_next = stored_iter.next().transpose()?;
    let mut input_iter = files.into_iter();
    let mut input_next = input_iter.next();

    loop {
        match (input_next.take(), stored_next.take()) {
            (None, None) => break,
            (Some(entry), None) => {
                let lv = write_record(index, &mut batch, &snapshot, folder, device, entry, 0)?;
                max_local_version = max_local_version.max(lv);
                input_next = input_iter.next();
            }
            (None, Some((k, v))) => {
                let lv = deletion_handler.handle(index, &mut batch, &snapshot, folder, device, &k, &v)?;
                max_local_version = max_local_version.max(lv);
                stored_next = stored_iter.next().transpose()?;
            }
            (Some(entry), Some((k, v))) => {
                let (_, _, stored_name) = key::parse_record_key(&k);
                match entry.name.cmp(&stored_name) {
                    Ordering::Less => {
                        let lv = write_record(index, &mut batch, &snapshot, folder, device, entry, 0)?;
                        max_local_version = max_local_version.max(lv);
                        input_next = input_iter.next();
                        stored_next = Some((k, v));
                    }
                    Ordering::Equal => {
                        let (stored_core, _) = stored_record_core(&v, folder, &stored_name);
                        if stored_core.version != entry.version || stored_core.flags != entry.flags {
                            let lv = write_record(
                                index,
                                &mut batch,
                                &snapshot,
                                folder,
                                device,
                                entry,
                                stored_core.local_version,
                            )?;
                            max_local_version = max_local_version.max(lv);
                        }
                        input_next = input_iter.next();
                        stored_next = stored_iter.next().transpose()?;
                    }
                    Ordering::Greater => {
                        let lv = deletion_handler.handle(index, &mut batch, &snapshot, folder, device, &k, &v)?;
                        max_local_version = max_local_version.max(lv);
                        input_next = Some(entry);
                        stored_next = stored_iter.next().transpose()?;
                    }
                }
            }
        }
    }

    snapshot.release();
    batch.commit(index.tree())?;
    Ok(max_local_version)
}

// files is a delta, not a full listing; no deletion is inferred for files
// the caller did not mention.
pub fn update(index: &FileIndex, folder: &str, device: &DeviceId, files: Vec<FileEntry>) -> Result<u64> {
    let snapshot = index.snapshot();
    let mut batch = WriteBatch::new();
    let mut max_local_version = 0u64;

    for entry in files {
        let record_key = key::record_key(folder, device, &entry.name);
        let stored_core = match snapshot.get(&record_key)? {
            None => {
                let lv = write_record(index, &mut batch, &snapshot, folder, device, entry, 0)?;
                max_local_version = max_local_version.max(lv);
                continue;
            }
            Some(bytes) => stored_record_core(&bytes, folder, &entry.name).0,
        };
        if stored_core.version != entry.version || stored_core.flags != entry.flags {
            let lv = write_record(
                index,
                &mut batch,
                &snapshot,
                folder,
                device,
                entry,
                stored_core.local_version,
            )?;
            max_local_version = max_local_version.max(lv);
        }
    }

    snapshot.release();
    batch.commit(index.tree())?;
    Ok(max_local_version)
}
