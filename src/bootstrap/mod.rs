//! The bootstrap fetcher.
//!
//! Before steady-state consensus begins, a fresh or restarted node samples
//! beacons for their accepted frontier, walks the chain backward with
//! `GetAncestors` rounds into a disk-backed queue, then executes the fetched
//! blocks parent-first through the VM and hands the advanced last-accepted
//! pointer to the engine.

pub mod fetcher;
pub mod queue;

pub use fetcher::*;
pub use queue::BootstrapQueue;

use crate::storage;

/// Upper bound on blocks served or honored in one `Ancestors` batch.
pub const ANCESTORS_MAX_CONTAINERS: usize = 2000;

#[derive(Debug)]
pub enum Error {
    Storage(storage::Error),
    /// The chain store holds no accepted block to bootstrap from.
    MissingGenesis,
}

impl std::error::Error for Error {}

impl std::convert::From<storage::Error> for Error {
    fn from(error: storage::Error) -> Self {
        Error::Storage(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
