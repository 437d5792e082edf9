//! The interface between consensus and the chain VM.
//!
//! The engine addresses the VM through a [Recipient] of [VmRequest]; any actor
//! answering with [VmResponse] can stand in (the tests use a recording mock).
//! `Verify` distinguishes an invalid block, which is dropped in steady state,
//! from a fatal error; `Accept` and `Reject` failures are always fatal and
//! halt the chain.

use crate::snowman::Block;
use crate::types::{BlockHash, BlockHeight};

/// A request from the consensus engine to the VM.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "VmResponse")]
pub enum VmRequest {
    /// Decode a block from its wire bytes.
    ParseBlock(Vec<u8>),
    /// Look a block up by id.
    GetBlock(BlockHash),
    /// Verify a processing block against the current state.
    Verify(Block),
    /// Execute a block whose parent is accepted.
    Accept(Block),
    /// Discard a processing block.
    Reject(Block),
    /// The id and height of the deepest accepted block.
    LastAccepted,
    /// Advisory: the tip the VM should build on.
    SetPreference(BlockHash),
}

/// The outcome of a verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VerifyOutcome {
    Valid,
    /// The block fails validation; protocol-benign in steady state, fatal
    /// during bootstrap.
    Invalid(String),
    /// State corruption; the chain must halt.
    Fatal(String),
}

/// The outcome of an accept or reject execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecOutcome {
    Ok,
    /// State corruption; the chain must halt.
    Fatal(String),
}

/// A response from the VM.
#[derive(Debug, Clone, Serialize, Deserialize, MessageResponse)]
pub enum VmResponse {
    ParsedBlock(Option<Block>),
    FoundBlock(Option<Block>),
    Verified(VerifyOutcome),
    Accepted(ExecOutcome),
    Rejected(ExecOutcome),
    LastAccepted(BlockHash, BlockHeight),
    PreferenceSet,
}
