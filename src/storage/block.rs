use super::{Error, Result};
use crate::snowman::Block;
use crate::types::{BlockHash, BlockHeight};

use byteorder::BigEndian;
use zerocopy::{byteorder::U64, AsBytes, FromBytes, Unaligned};

/// The accepted-chain key: big-endian height then hash, so iteration order is
/// height order and `db.last()` is the last accepted block.
#[derive(Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Key {
    pub height: U64<BigEndian>,
    pub hash: [u8; 32],
}

impl Key {
    pub fn new(height: BlockHeight, hash: BlockHash) -> Key {
        Key { height: U64::new(height), hash }
    }
}

#[derive(Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct KeyPrefix {
    pub height: U64<BigEndian>,
}

impl KeyPrefix {
    pub fn new(height: BlockHeight) -> KeyPrefix {
        KeyPrefix { height: U64::new(height) }
    }
}

/// Checks whether the chain store holds any accepted block.
pub fn exists_genesis(db: &sled::Db) -> bool {
    if let Ok(Some(_)) = db.first() {
        true
    } else {
        false
    }
}

/// Inserts an accepted block.
pub fn put_accepted(db: &sled::Db, block: &Block) -> Result<BlockHash> {
    let encoded = bincode::serialize(block)?;
    let hash = hash_of(block)?;
    let key = Key::new(block.height, hash.clone());
    let _ = db.insert(key.as_bytes(), encoded)?;
    Ok(hash)
}

/// Whether the block at the given height was accepted.
pub fn is_accepted(db: &sled::Db, height: BlockHeight, hash: BlockHash) -> Result<bool> {
    let key = Key::new(height, hash);
    match db.contains_key(key.as_bytes()) {
        Ok(r) => Ok(r),
        Err(err) => Err(Error::Sled(err)),
    }
}

/// The accepted block hash at a height, if that height was decided.
pub fn get_accepted_at_height(db: &sled::Db, height: BlockHeight) -> Result<Option<BlockHash>> {
    let prefix = KeyPrefix::new(height);
    match db.scan_prefix(prefix.as_bytes()).next() {
        Some(Ok((k, _))) => {
            let key: Key = Key::read_from(k.as_bytes()).ok_or(Error::InvalidLast)?;
            Ok(Some(key.hash))
        }
        Some(Err(err)) => Err(Error::Sled(err)),
        None => Ok(None),
    }
}

/// Looks an accepted block up by height and hash.
pub fn get_accepted(db: &sled::Db, height: BlockHeight, hash: BlockHash) -> Result<Block> {
    let key = Key::new(height, hash);
    match db.get(key.as_bytes()) {
        Ok(Some(v)) => Ok(bincode::deserialize(v.as_bytes())?),
        Ok(None) => Err(Error::NotFound(hash)),
        Err(err) => Err(Error::Sled(err)),
    }
}

/// Gets the last accepted block and its hash.
pub fn get_last_accepted(db: &sled::Db) -> Result<(BlockHash, Block)> {
    match db.last() {
        Ok(Some((k, v))) => {
            let key: Key = Key::read_from(k.as_bytes()).ok_or(Error::InvalidLast)?;
            Ok((key.hash.clone(), bincode::deserialize(v.as_bytes())?))
        }
        Ok(None) => Err(Error::UndefinedGenesis),
        Err(err) => Err(Error::Sled(err)),
    }
}

/// Walks the accepted chain backward from `(height, hash)`, child to parent,
/// yielding at most `limit` blocks.
pub fn get_ancestors(
    db: &sled::Db,
    height: BlockHeight,
    hash: BlockHash,
    limit: usize,
) -> Result<Vec<Block>> {
    let mut blocks = vec![];
    let mut height = height;
    let mut hash = hash;
    while blocks.len() < limit {
        let block = match get_accepted(db, height, hash) {
            Ok(block) => block,
            Err(Error::NotFound(_)) => break,
            Err(err) => return Err(err),
        };
        let parent = block.parent.clone();
        let parent_height = if block.height == 0 { None } else { Some(block.height - 1) };
        blocks.push(block);
        match parent_height {
            Some(h) => {
                height = h;
                hash = parent;
            }
            None => break,
        }
    }
    Ok(blocks)
}

fn hash_of(block: &Block) -> Result<BlockHash> {
    block.hash().map_err(|e| Error::Bincode(format!("{:?}", e)))
}
