//! The wire surface of a chain, as routed by the transport layer.
//!
//! `Chits` carries three ids so a peer can report both its preferred tip and
//! the preferred tip at the requester's height, allowing correct vote bubbling
//! under height skew. `Ancestors` returns blocks in child-to-parent order,
//! capped at [crate::bootstrap::ANCESTORS_MAX_CONTAINERS]; the receiver
//! ignores any block which does not chain from the previous one.

use crate::bootstrap;
use crate::engine;

/// Inbound requests a peer may address to this node.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub enum Request {
    PullQuery(engine::PullQuery),
    PushQuery(engine::PushQuery),
    Get(engine::Get),
    GetAncestors(engine::GetAncestors),
    GetAcceptedFrontier(engine::GetAcceptedFrontier),
}

/// Inbound responses to requests this node issued earlier.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub enum Response {
    Chits(engine::Chits),
    Put(engine::Put),
    GetFailed(engine::GetFailed),
    Ancestors(bootstrap::Ancestors),
    AcceptedFrontier(bootstrap::AcceptedFrontier),
}
