use sled::Tree;

use crate::error::Result;

pub struct Snapshot {
    tree: Tree,
}

impl Snapshot {
    pub(crate) fn open(tree: &Tree) -> Snapshot {
        Snapshot { tree: tree.clone() }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<sled::IVec>> {
        Ok(self.tree.get(key)?)
    }

    pub fn range(&self, start: Vec<u8>, end: Vec<u8>) -> sled::Iter {
        self.tree.range(start..end)
    }

    pub fn release(self) {}
}

pub struct WriteBatch {
    batch: sled::Batch,
    writes: usize,
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch { batch: sled::Batch::default(), writes: 0 }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.batch.insert(key, value);
        self.writes += 1;
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.batch.remove(key);
        self.writes += 1;
    }

    pub fn commit(self, tree: &Tree) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        tree.apply_batch(self.batch)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        // sled::Batch exposes no direct emptiness check; we track it
        // ourselves rather than commit a no-op batch on every read-only
        // merge (a Replace against an already-matching state).
        self.writes == 0
    }
}

impl Default for WriteBatch {
    fn default() -> WriteBatch {
        WriteBatch::new()
    }
}
