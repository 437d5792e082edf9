//! Persistence for the consensus core.
//!
//! Two sled keyspaces: the accepted chain indexed by `(height, hash)` whose
//! last entry is the last-accepted pointer, and the pending blob store holding
//! fetched-but-not-yet-executed blocks during bootstrap. All other consensus
//! state is in-memory and rebuilt on restart.

pub mod block;
pub mod pending;

use crate::types::BlockHash;

#[derive(Debug)]
pub enum Error {
    Sled(sled::Error),
    Bincode(String),
    /// The chain store is empty.
    UndefinedGenesis,
    /// The last entry of the chain store is unreadable.
    InvalidLast,
    NotFound(BlockHash),
}

impl std::error::Error for Error {}

impl std::convert::From<sled::Error> for Error {
    fn from(error: sled::Error) -> Self {
        Error::Sled(error)
    }
}

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
