//! Snowman is the linear-chain consensus instance.
//!
//! It tracks a tree of processing blocks rooted at the last accepted block.
//! Every node with children carries an n-ary Snowball instance deciding among
//! those children; votes for a block bubble rootward so a vote for a block is
//! also a vote for each of its processing ancestors. Once the root's instance
//! finalizes, the chosen child is accepted, its siblings are rejected together
//! with their descendants, and the chosen child becomes the new root.

pub mod block;
pub mod topological;

pub use block::{Block, Status};
pub use topological::{AddOutcome, Decisions, Snowman};

use crate::types::BlockHash;

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    Bincode(String),
    /// The block's parent is neither processing nor the last accepted block.
    UnknownParent(BlockHash),
    /// The referenced block is not part of the tree.
    UnknownBlock(BlockHash),
}

impl std::error::Error for Error {}

impl std::convert::From<Box<bincode::ErrorKind>> for Error {
    fn from(error: Box<bincode::ErrorKind>) -> Self {
        Error::Bincode(format!("{:?}", error))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
