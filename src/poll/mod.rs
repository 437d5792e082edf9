//! The poll manager.
//!
//! Each outbound query round is tracked as a numbered [Poll] against a sampled
//! validator set. Inbound chits and drop signals close validator slots; a poll
//! terminates once every sampled validator has either voted or dropped, and its
//! tally is handed back for the consensus instance to record. Polls complete in
//! whatever order their responses close out, not in issue order.

mod poll;
mod set;

pub use poll::Poll;
pub use set::PollSet;
