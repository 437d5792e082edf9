use super::Result;
use crate::snowman::Block;
use crate::types::BlockHash;

/// Stores a fetched block awaiting execution, keyed by its hash.
pub fn put_pending(db: &sled::Db, hash: BlockHash, block: &Block) -> Result<()> {
    let encoded = bincode::serialize(block)?;
    let _ = db.insert(&hash, encoded)?;
    Ok(())
}

pub fn is_pending(db: &sled::Db, hash: &BlockHash) -> Result<bool> {
    Ok(db.contains_key(hash)?)
}

pub fn get_pending(db: &sled::Db, hash: &BlockHash) -> Result<Option<Block>> {
    match db.get(hash)? {
        Some(v) => Ok(Some(bincode::deserialize(v.as_ref())?)),
        None => Ok(None),
    }
}

/// Removes an executed (or abandoned) block from the pending store.
pub fn remove_pending(db: &sled::Db, hash: &BlockHash) -> Result<()> {
    let _ = db.remove(hash)?;
    Ok(())
}

/// Scans the whole pending store; used to rebuild the dependency index on
/// restart.
pub fn scan_pending(db: &sled::Db) -> Result<Vec<(BlockHash, Block)>> {
    let mut blocks = vec![];
    for kv in db.iter() {
        let (k, v) = kv?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(k.as_ref());
        blocks.push((hash, bincode::deserialize(v.as_ref())?));
    }
    Ok(blocks)
}
