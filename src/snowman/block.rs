use super::Result;
use crate::types::{BlockHash, BlockHeight};

/// Data structure for storing block-related information
///
/// The payload is opaque to consensus; its meaning belongs to the VM. The
/// stable identifier of a block is the hash of its encoded bytes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The parent block this one extends
    pub parent: BlockHash,
    /// Height of the block
    pub height: BlockHeight,
    /// Opaque VM payload
    pub payload: Vec<u8>,
}

/// The decision status of a block.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Status {
    Processing,
    Accepted,
    Rejected,
    Unknown,
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut s = format!("parent = {}\n", hex::encode(self.parent));
        s = format!("{}height = {:?}\n", s, self.height);
        s = format!("{}payload = {} bytes", s, self.payload.len());
        write!(f, "{}\n", s)
    }
}

impl Block {
    pub fn new(parent: BlockHash, height: BlockHeight, payload: Vec<u8>) -> Block {
        Block { parent, height, payload }
    }

    /// The genesis block of a fresh chain.
    pub fn genesis(payload: Vec<u8>) -> Block {
        Block { parent: [0u8; 32], height: 0u64, payload }
    }

    /// The encoded form carried on the wire and hashed for the identifier.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Block> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn hash(&self) -> Result<BlockHash> {
        let encoded = self.bytes()?;
        Ok(blake3::hash(&encoded).as_bytes().clone())
    }
}
