//! The Snowflake and Snowball decision primitives.
//!
//! Each instance accumulates poll outcomes into a single irreversible decision.
//! The unary variant decides whether its only known choice survives, the binary
//! variant decides between two bit choices and the n-ary variant decides among
//! an open set of block hashes.
//!
//! Snowflake tracks only the instantaneous majority: any poll where the current
//! preference fails to reach `alpha_confidence` resets the confidence counter.
//! Snowball additionally keeps a running preference strength per choice, so a
//! historically heavier choice keeps the preference even through a failed poll.
//!
//! The variants are concrete types rather than trait objects; the consensus
//! tree stores [NnarySnowball] directly on its hot path.

mod binary;
mod nnary;
mod unary;

pub use binary::{BinarySnowball, BinarySnowflake};
pub use nnary::{NnarySnowball, NnarySnowflake};
pub use unary::{UnarySnowball, UnarySnowflake};
