//! The outbound message surface.
//!
//! All sends are fire-and-forget on the engine side; reliability is the
//! transport's concern. The engine and the bootstrapper address the network
//! through a [Recipient] of [SenderRequest]; responses come back as inbound
//! actor messages carrying the original request id.

use crate::ids::Id;
use crate::types::{BlockHash, BlockHeight, RequestId};

/// An outbound message to one peer or a sampled set of peers.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub enum SenderRequest {
    /// Ask the sampled validators for their preference over a block id.
    PullQuery { peers: Vec<Id>, request_id: RequestId, block_hash: BlockHash, height: BlockHeight },
    /// As `PullQuery`, gossiping the block bytes along.
    PushQuery { peers: Vec<Id>, request_id: RequestId, block: Vec<u8>, height: BlockHeight },
    /// Answer a query: our preferred tip, our preferred block at the
    /// requester's height, and our last accepted block.
    Chits {
        peer: Id,
        request_id: RequestId,
        preferred: BlockHash,
        preferred_at_height: BlockHash,
        accepted: BlockHash,
    },
    /// Request a single block by id.
    Get { peer: Id, request_id: RequestId, block_hash: BlockHash },
    /// Request a batch of ancestors, child-to-parent.
    GetAncestors { peer: Id, request_id: RequestId, block_hash: BlockHash },
    /// Deliver a single block.
    Put { peer: Id, request_id: RequestId, block: Vec<u8> },
    /// Deliver a batch of ancestors, child-to-parent.
    Ancestors { peer: Id, request_id: RequestId, blocks: Vec<Vec<u8>> },
    /// Ask a beacon for the tips of its accepted chain.
    GetAcceptedFrontier { peer: Id, request_id: RequestId },
    /// Answer a frontier query.
    AcceptedFrontier { peer: Id, request_id: RequestId, frontier: Vec<BlockHash> },
}
