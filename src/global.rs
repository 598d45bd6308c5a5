// Keeps each file's VersionList consistent with a stream of per-device
// version claims. Both functions read their pre-state from the snapshot
// the calling merge already opened; within one replace/update call each
// (folder, name) pair is visited at most once, so there is never a second
// write in the same call that a snapshot read would miss.

use crate::device::DeviceId;
use crate::error::Result;
use crate::key;
use crate::store::{Snapshot, WriteBatch};
use crate::version_list::VersionList;

fn load(snapshot: &Snapshot, folder: &str, name: &str) -> Result<VersionList> {
    let key = key::global_key(folder, name);
    match snapshot.get(&key)? {
        None => Ok(VersionList::default()),
        Some(bytes) => Ok(VersionList::decode(&bytes, folder, name).unwrap_or_else(|e| e.into_panic())),
    }
}

pub fn update_global(
    batch: &mut WriteBatch,
    snapshot: &Snapshot,
    folder: &str,
    device: &DeviceId,
    name: &str,
    version: u64,
) -> Result<bool> {
    let mut list = load(snapshot, folder, name)?;
    if !list.update(*device, version) {
        return Ok(false);
    }
    batch.put(key::global_key(folder, name), list.encode());
    Ok(true)
}

// A missing global key is a silent no-op: legitimate when the very first
// update for a file was invalid and never reached the global table.
pub fn remove_from_global(
    batch: &mut WriteBatch,
    snapshot: &Snapshot,
    folder: &str,
    device: &DeviceId,
    name: &str,
) -> Result<()> {
    let global_key = key::global_key(folder, name);
    let bytes = match snapshot.get(&global_key)? {
        None => return Ok(()),
        Some(bytes) => bytes,
    };
    let mut list = VersionList::decode(&bytes, folder, name).unwrap_or_else(|e| e.into_panic());
    if !list.remove(device) {
        return Ok(());
    }
    if list.is_empty() {
        batch.delete(global_key);
    } else {
        batch.put(global_key, list.encode());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FileIndex;
    use tempfile::tempdir;

    fn dev(b: u8) -> DeviceId {
        DeviceId::from_bytes([b; 32])
    }

    #[test]
    fn update_then_remove_deletes_key_when_last_device_leaves() {
        let dir = tempdir().unwrap();
        let idx = FileIndex::open(dir.path()).unwrap();
        let snapshot = idx.snapshot();
        let mut batch = WriteBatch::new();
        assert!(update_global(&mut batch, &snapshot, "f", &dev(1), "a", 5).unwrap());
        batch.commit(idx.tree()).unwrap();

        let snapshot = idx.snapshot();
        let mut batch = WriteBatch::new();
        remove_from_global(&mut batch, &snapshot, "f", &dev(1), "a").unwrap();
        batch.commit(idx.tree()).unwrap();

        let snapshot = idx.snapshot();
        assert!(load(&snapshot, "f", "a").unwrap().is_empty());
    }
}
