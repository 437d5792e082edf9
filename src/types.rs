// Blocks
pub type BlockHash = [u8; 32];
pub type BlockHeight = u64;

// Polls
pub type RequestId = u32;
