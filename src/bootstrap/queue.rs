use super::Result;
use crate::snowman::Block;
use crate::storage::pending;
use crate::types::BlockHash;

use std::collections::{HashMap, HashSet};

/// The disk-backed queue of fetched-but-not-yet-executed blocks.
///
/// Blobs persist in sled keyed by block hash; the reverse-dependency index
/// (`parent -> children awaiting it`) lives in memory and is rebuilt from a
/// scan on restart. Execution is strictly parent-first: the index yields a
/// block only once its parent has been accepted.
pub struct BootstrapQueue {
    db: sled::Db,
    awaiting: HashMap<BlockHash, Vec<BlockHash>>,
    known: HashSet<BlockHash>,
}

impl BootstrapQueue {
    /// Opens the queue, rebuilding the dependency index from the store.
    pub fn new(db: sled::Db) -> Result<Self> {
        let mut queue = BootstrapQueue { db, awaiting: HashMap::default(), known: HashSet::new() };
        for (hash, block) in pending::scan_pending(&queue.db).map_err(super::Error::Storage)? {
            queue.index(hash, &block);
        }
        Ok(queue)
    }

    /// Stores a fetched block. Returns false when the block was already
    /// queued.
    pub fn push(&mut self, block: Block) -> Result<bool> {
        let hash = match block.hash() {
            Ok(hash) => hash,
            Err(_) => return Ok(false),
        };
        if self.known.contains(&hash) {
            return Ok(false);
        }
        pending::put_pending(&self.db, hash, &block).map_err(super::Error::Storage)?;
        self.index(hash, &block);
        Ok(true)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.known.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Removes and returns the blocks that become executable once `parent`
    /// is accepted.
    pub fn take_children(&mut self, parent: &BlockHash) -> Vec<Block> {
        let hashes = self.awaiting.remove(parent).unwrap_or_default();
        let mut blocks = vec![];
        for hash in hashes {
            let _ = self.known.remove(&hash);
            if let Ok(Some(block)) = pending::get_pending(&self.db, &hash) {
                let _ = pending::remove_pending(&self.db, &hash);
                blocks.push(block);
            }
        }
        blocks
    }

    fn index(&mut self, hash: BlockHash, block: &Block) {
        let _ = self.known.insert(hash);
        self.awaiting.entry(block.parent.clone()).or_insert_with(Vec::new).push(hash);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[actix_rt::test]
    async fn test_parent_first_order() {
        let mut queue = BootstrapQueue::new(test_db()).unwrap();

        let root = Block::genesis(vec![]);
        let root_hash = root.hash().unwrap();
        let b1 = Block::new(root_hash, 1, vec![1]);
        let b2 = Block::new(b1.hash().unwrap(), 2, vec![2]);

        // Pushed child-to-parent, as an `Ancestors` batch arrives.
        assert!(queue.push(b2.clone()).unwrap());
        assert!(queue.push(b1.clone()).unwrap());
        assert_eq!(queue.len(), 2);

        // Nothing is executable before its parent.
        let ready = queue.take_children(&root_hash);
        assert_eq!(ready, vec![b1.clone()]);
        let ready = queue.take_children(&b1.hash().unwrap());
        assert_eq!(ready, vec![b2]);
        assert!(queue.is_empty());
    }

    #[actix_rt::test]
    async fn test_duplicate_push_ignored() {
        let mut queue = BootstrapQueue::new(test_db()).unwrap();
        let block = Block::new([1u8; 32], 1, vec![1]);
        assert!(queue.push(block.clone()).unwrap());
        assert!(!queue.push(block).unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[actix_rt::test]
    async fn test_index_rebuilt_on_restart() {
        let db = test_db();
        let block = Block::new([1u8; 32], 1, vec![1]);
        {
            let mut queue = BootstrapQueue::new(db.clone()).unwrap();
            assert!(queue.push(block.clone()).unwrap());
        }

        let mut reopened = BootstrapQueue::new(db).unwrap();
        assert!(reopened.contains(&block.hash().unwrap()));
        let ready = reopened.take_children(&[1u8; 32]);
        assert_eq!(ready, vec![block]);
    }
}
