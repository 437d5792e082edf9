//! # Firn
//!
//! Firn is an ensemble of components implementing the `Snow*` family of metastable
//! consensus protocols for a linear chain of blocks.
//!
//! ## Snowball
//!
//! The per-instance decision primitives (unary, binary and n-ary variants of
//! Snowflake and Snowball) which accumulate sampled evidence into an irreversible
//! decision.
//!
//! ## Snowman
//!
//! The linear-chain consensus instance. It tracks a tree of processing blocks
//! rooted at the last accepted block, records poll results and emits accept and
//! reject decisions in height order.
//!
//! ## Engine
//!
//! An actor binding the consensus instance to an external `ChainVm` and `Sender`.
//! It issues polls against sampled validators, turns peer chits into votes via
//! the voter, and halts the chain on any fatal VM error.
//!
//! ## Bootstrap
//!
//! The fetcher which discovers the accepted frontier from beacon peers, walks
//! ancestors backward into a disk-backed queue and replays them through the VM
//! before steady-state consensus begins.

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate actix_derive;
extern crate colored;

pub mod bag;
pub mod ids;
pub mod params;
pub mod types;
pub mod util;

pub mod snowball;
pub mod snowman;

pub mod poll;
pub mod timeout;

pub mod protocol;
pub mod sender;
pub mod vm;

pub mod engine;

pub mod bootstrap;
pub mod storage;
pub mod tracker;
pub mod validators;

pub mod settings;

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    Sled(sled::Error),
    Bincode(String),
    Actix(actix::MailboxError),

    /// Error caused by converting from a `String` to an `Id`
    TryFromStringError,
    /// Error when parsing a peer description
    PeerParseError,

    /// A remote peer did not answer within the allotted time
    Timeout,
    /// A remote peer answered with something other than what was asked for
    InvalidResponse,
}

impl std::error::Error for Error {}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

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

impl std::convert::From<actix::MailboxError> for Error {
    fn from(error: actix::MailboxError) -> Self {
        Error::Actix(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
