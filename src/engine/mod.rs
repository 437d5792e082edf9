//! The chain engine.
//!
//! One [Engine] actor owns all consensus state for a chain: the Snowman
//! instance, the poll table, the voter dependency maps and the pending block
//! buffer. The actor mailbox serializes every mutation; VM calls and outbound
//! sends suspend without blocking the mailbox, and every handler re-checks the
//! engine state after a suspension.

pub mod state;
pub mod transitive;
pub mod voter;

pub use state::State;
pub use transitive::*;
pub use voter::{BlockedVoters, Voter};

use crate::snowman;
use crate::storage;

#[derive(Debug)]
pub enum Error {
    /// The chain halted on a fatal error; no further work is accepted.
    EngineHalted,
    /// The engine has not reached normal operation yet.
    NotReady,
    Consensus(snowman::Error),
    Storage(storage::Error),
    ActixMailboxError,
}

impl std::error::Error for Error {}

impl std::convert::From<snowman::Error> for Error {
    fn from(error: snowman::Error) -> Self {
        Error::Consensus(error)
    }
}

impl std::convert::From<storage::Error> for Error {
    fn from(error: storage::Error) -> Self {
        Error::Storage(error)
    }
}

impl std::convert::From<actix::MailboxError> for Error {
    fn from(_error: actix::MailboxError) -> Self {
        Error::ActixMailboxError
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
