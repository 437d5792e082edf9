use super::queue::BootstrapQueue;
use super::ANCESTORS_MAX_CONTAINERS;

use crate::colored::Colorize;
use crate::engine::Start;
use crate::ids::Id;
use crate::sender::SenderRequest;
use crate::snowman::Block;
use crate::storage;
use crate::tracker::PeerTracker;
use crate::types::{BlockHash, BlockHeight, RequestId};
use crate::vm::{ExecOutcome, VerifyOutcome, VmRequest, VmResponse};

use tracing::{debug, error, info, warn};

use actix::{Actor, AsyncContext, Context, Handler, Recipient};
use actix::{ActorFutureExt, ResponseActFuture, WrapFuture};

use rand::seq::SliceRandom;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Beacons queried for the accepted frontier.
const BEACON_SAMPLE: usize = 5;
/// How long to wait for frontier responses, in millisec.
const FRONTIER_TIMEOUT_MS: u64 = 5_000;
/// How long to wait for one `Ancestors` batch, in millisec.
const ANCESTOR_FETCH_TIMEOUT_MS: u64 = 5_000;
/// Frontier rounds attempted before giving up.
const FRONTIER_RETRIES: u32 = 3;

/// Where the bootstrap currently stands.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Frontier,
    Fetching,
    Executing,
    Done,
    Failed,
}

/// The bootstrap fetcher.
///
/// Discovers the accepted frontier from beacons, back-fills ancestors into
/// the [BootstrapQueue], replays them through the VM and starts the engine at
/// the advanced last-accepted pointer.
pub struct Bootstrapper {
    node_id: Id,
    beacons: Vec<Id>,
    sender: Recipient<SenderRequest>,
    vm: Recipient<VmRequest>,
    engine: Recipient<Start>,
    tracker: PeerTracker,
    queue: BootstrapQueue,
    chain_db: sled::Db,
    phase: Phase,
    request_id: RequestId,
    last_accepted: (BlockHash, BlockHeight),
    frontier_requests: HashMap<RequestId, Id>,
    frontier_responses: HashMap<Id, Vec<BlockHash>>,
    frontier_round: u32,
    fetch_request: Option<(RequestId, Id, BlockHash)>,
    to_fetch: VecDeque<BlockHash>,
}

impl Bootstrapper {
    pub fn new(
        node_id: Id,
        beacons: Vec<Id>,
        sender: Recipient<SenderRequest>,
        vm: Recipient<VmRequest>,
        engine: Recipient<Start>,
        pending_db: sled::Db,
        chain_db: sled::Db,
    ) -> super::Result<Self> {
        let tracker = PeerTracker::new(beacons.clone());
        let queue = BootstrapQueue::new(pending_db)?;
        Ok(Bootstrapper {
            node_id,
            beacons,
            sender,
            vm,
            engine,
            tracker,
            queue,
            chain_db,
            phase: Phase::Idle,
            request_id: 0,
            last_accepted: ([0u8; 32], 0),
            frontier_requests: HashMap::default(),
            frontier_responses: HashMap::default(),
            frontier_round: 0,
            fetch_request: None,
            to_fetch: VecDeque::new(),
        })
    }

    fn begin_frontier(&mut self, ctx: &mut Context<Self>) {
        self.phase = Phase::Frontier;
        self.frontier_round += 1;
        self.frontier_requests.clear();
        self.frontier_responses.clear();

        if self.beacons.is_empty() {
            // A single-node chain has nothing to catch up with.
            self.finish();
            return;
        }

        let mut rng = rand::thread_rng();
        let mut sample = self.beacons.clone();
        sample.shuffle(&mut rng);
        sample.truncate(BEACON_SAMPLE);
        info!(
            "[{}] requesting the accepted frontier from {} beacons",
            "bootstrap".blue(),
            sample.len()
        );
        for peer in sample {
            self.request_id += 1;
            let request_id = self.request_id;
            let _ = self.frontier_requests.insert(request_id, peer.clone());
            let _ = self
                .sender
                .do_send(SenderRequest::GetAcceptedFrontier { peer, request_id });
        }
        ctx.notify_later(FrontierTimeout, Duration::from_millis(FRONTIER_TIMEOUT_MS));
    }

    /// Takes the plurality of the reported frontiers as the starting tip set.
    fn conclude_frontier(&mut self, ctx: &mut Context<Self>) {
        if self.frontier_responses.is_empty() {
            if self.frontier_round < FRONTIER_RETRIES {
                warn!("[{}] no frontier responses, retrying", "bootstrap".blue());
                self.begin_frontier(ctx);
            } else {
                self.abort("no beacon answered a frontier request".to_string());
            }
            return;
        }

        let mut counts: HashMap<BlockHash, usize> = HashMap::default();
        for tips in self.frontier_responses.values() {
            for tip in tips.iter() {
                *counts.entry(tip.clone()).or_insert(0) += 1;
            }
        }
        let majority = self.frontier_responses.len() / 2 + 1;
        let mut chosen: Vec<BlockHash> =
            counts.iter().filter(|(_, n)| **n >= majority).map(|(tip, _)| tip.clone()).collect();
        if chosen.is_empty() {
            // No tip is common: fall back to the most-reported one.
            let mut best: Option<(BlockHash, usize)> = None;
            for (tip, n) in counts.iter() {
                let better = match best {
                    None => true,
                    Some((ref t, bn)) => *n > bn || (*n == bn && tip < t),
                };
                if better {
                    best = Some((tip.clone(), *n));
                }
            }
            chosen = best.map(|(tip, _)| vec![tip]).unwrap_or_default();
        }
        chosen.sort();

        // A peer reporting none of the chosen tips is on a different history;
        // de-weight it but keep it usable.
        let responses: Vec<(Id, Vec<BlockHash>)> =
            self.frontier_responses.iter().map(|(id, tips)| (id.clone(), tips.clone())).collect();
        for (peer, tips) in responses {
            if !tips.iter().any(|tip| chosen.contains(tip)) {
                self.tracker.record_inconsistency(&peer);
            }
        }

        info!(
            "[{}] frontier of {} tip(s) agreed by {} responder(s)",
            "bootstrap".blue(),
            chosen.len(),
            self.frontier_responses.len()
        );
        for tip in chosen {
            if tip != self.last_accepted.0 && !self.queue.contains(&tip) {
                self.to_fetch.push_back(tip);
            }
        }
        self.phase = Phase::Fetching;
        self.next_fetch(ctx, None);
    }

    /// Issues the next `GetAncestors` round, or moves on to execution when
    /// nothing is left to fetch.
    fn next_fetch(&mut self, ctx: &mut Context<Self>, exclude: Option<&Id>) {
        if self.phase != Phase::Fetching {
            return;
        }
        while let Some(block_hash) = self.to_fetch.pop_front() {
            if block_hash == self.last_accepted.0 || self.queue.contains(&block_hash) {
                continue;
            }
            let peer = match self.tracker.select(exclude) {
                Some(peer) => peer,
                None => {
                    self.abort("no bootstrap peers left to fetch from".to_string());
                    return;
                }
            };
            self.request_id += 1;
            let request_id = self.request_id;
            debug!(
                "[{}] requesting ancestors of {} from {}",
                "bootstrap".blue(),
                hex::encode(block_hash),
                peer
            );
            self.fetch_request = Some((request_id, peer.clone(), block_hash.clone()));
            let _ = self
                .sender
                .do_send(SenderRequest::GetAncestors { peer, request_id, block_hash });
            ctx.notify_later(
                FetchTimeout { request_id },
                Duration::from_millis(ANCESTOR_FETCH_TIMEOUT_MS),
            );
            return;
        }
        self.phase = Phase::Executing;
        info!(
            "[{}] fetched {} block(s), executing",
            "bootstrap".blue(),
            self.queue.len()
        );
        ctx.notify(ExecuteStep);
    }

    /// Validates one `Ancestors` batch: blocks must chain child-to-parent
    /// starting at the requested hash; anything after a break is ignored.
    fn on_ancestors(
        &mut self,
        ctx: &mut Context<Self>,
        peer: Id,
        requested: BlockHash,
        parsed: Vec<Option<Block>>,
    ) {
        let mut expected = requested.clone();
        let mut deepest: Option<Block> = None;
        let mut stored = 0usize;
        for block in parsed.into_iter() {
            let block = match block {
                Some(block) => block,
                None => break,
            };
            let hash = match block.hash() {
                Ok(hash) => hash,
                Err(_) => break,
            };
            if hash != expected {
                break;
            }
            if block.height <= self.last_accepted.1 {
                break;
            }
            expected = block.parent.clone();
            match self.queue.push(block.clone()) {
                Ok(_) => stored += 1,
                Err(err) => {
                    self.abort(format!("pending store failed: {:?}", err));
                    return;
                }
            }
            deepest = Some(block);
        }

        if stored == 0 {
            debug!("[{}] unusable ancestors batch from {}", "bootstrap".blue(), peer);
            self.tracker.record_failure(&peer);
            self.to_fetch.push_front(requested);
            self.next_fetch(ctx, Some(&peer));
            return;
        }
        self.tracker.record_success(&peer);

        if let Some(deepest) = deepest {
            if deepest.height == self.last_accepted.1 + 1 {
                if deepest.parent != self.last_accepted.0 {
                    // The fetched chain bottoms out on a different history.
                    self.abort(format!(
                        "fetched chain disagrees with the accepted block at height {}",
                        self.last_accepted.1
                    ));
                    return;
                }
            } else if !self.queue.contains(&deepest.parent) {
                self.to_fetch.push_front(deepest.parent.clone());
            }
        }
        self.next_fetch(ctx, None);
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        info!(
            "[{}] bootstrapped at height {} ({})",
            "bootstrap".blue(),
            self.last_accepted.1,
            hex::encode(self.last_accepted.0)
        );
        let _ = self.engine.do_send(Start {
            last_accepted: self.last_accepted.0,
            height: self.last_accepted.1,
        });
    }

    fn abort(&mut self, reason: String) {
        error!("[{}] bootstrap failed: {}", "bootstrap".blue(), reason);
        self.phase = Phase::Failed;
    }
}

impl Actor for Bootstrapper {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("[{}] started for node {}", "bootstrap".blue(), self.node_id);
    }
}

/// Kicks the bootstrap off from the persisted last-accepted pointer.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct StartBootstrap;

impl Handler<StartBootstrap> for Bootstrapper {
    type Result = ();

    fn handle(&mut self, _msg: StartBootstrap, ctx: &mut Context<Self>) -> Self::Result {
        if self.phase != Phase::Idle {
            debug!("[{}] already running", "bootstrap".blue());
            return;
        }
        match storage::block::get_last_accepted(&self.chain_db) {
            Ok((hash, block)) => {
                self.last_accepted = (hash, block.height);
                self.begin_frontier(ctx);
            }
            Err(err) => self.abort(format!("no accepted root to bootstrap from: {:?}", err)),
        }
    }
}

/// A beacon's accepted frontier.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct AcceptedFrontier {
    pub from: Id,
    pub request_id: RequestId,
    pub frontier: Vec<BlockHash>,
}

impl Handler<AcceptedFrontier> for Bootstrapper {
    type Result = ();

    fn handle(&mut self, msg: AcceptedFrontier, ctx: &mut Context<Self>) -> Self::Result {
        if self.phase != Phase::Frontier {
            return;
        }
        match self.frontier_requests.get(&msg.request_id) {
            Some(peer) if *peer == msg.from => (),
            _ => {
                debug!(
                    "[{}] dropping unsolicited frontier from {}",
                    "bootstrap".blue(),
                    msg.from
                );
                return;
            }
        }
        let _ = self.frontier_requests.remove(&msg.request_id);
        self.tracker.record_success(&msg.from);
        let _ = self.frontier_responses.insert(msg.from, msg.frontier);
        if self.frontier_requests.is_empty() {
            self.conclude_frontier(ctx);
        }
    }
}

/// Internal: the frontier round ran out of time; unanswered beacons are
/// penalized and the round concludes with whatever arrived.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct FrontierTimeout;

impl Handler<FrontierTimeout> for Bootstrapper {
    type Result = ();

    fn handle(&mut self, _msg: FrontierTimeout, ctx: &mut Context<Self>) -> Self::Result {
        if self.phase != Phase::Frontier || self.frontier_requests.is_empty() {
            return;
        }
        let unanswered: Vec<Id> = self.frontier_requests.values().cloned().collect();
        for peer in unanswered {
            debug!("[{}] beacon {} missed the frontier deadline", "bootstrap".blue(), peer);
            self.tracker.record_failure(&peer);
        }
        self.frontier_requests.clear();
        self.conclude_frontier(ctx);
    }
}

/// A batch of ancestors, child-to-parent.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct Ancestors {
    pub from: Id,
    pub request_id: RequestId,
    pub blocks: Vec<Vec<u8>>,
}

impl Handler<Ancestors> for Bootstrapper {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: Ancestors, _ctx: &mut Context<Self>) -> Self::Result {
        if self.phase != Phase::Fetching {
            return Box::pin(actix::fut::ready(()));
        }
        let (request_id, peer, requested) = match self.fetch_request {
            Some(ref fetch) => fetch.clone(),
            None => return Box::pin(actix::fut::ready(())),
        };
        if msg.request_id != request_id || msg.from != peer {
            debug!(
                "[{}] dropping unsolicited ancestors from {}",
                "bootstrap".blue(),
                msg.from
            );
            return Box::pin(actix::fut::ready(()));
        }
        self.fetch_request = None;

        let vm = self.vm.clone();
        let mut blobs = msg.blocks;
        blobs.truncate(ANCESTORS_MAX_CONTAINERS);
        async move {
            let mut parsed = vec![];
            for blob in blobs {
                match vm.send(VmRequest::ParseBlock(blob)).await {
                    Ok(VmResponse::ParsedBlock(block)) => parsed.push(block),
                    _ => parsed.push(None),
                }
            }
            parsed
        }
        .into_actor(self)
        .map(move |parsed, act, ctx| act.on_ancestors(ctx, peer, requested, parsed))
        .boxed_local()
    }
}

/// Internal: an ancestors round ran out of time; the peer is penalized and
/// the round retries elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct FetchTimeout {
    request_id: RequestId,
}

impl Handler<FetchTimeout> for Bootstrapper {
    type Result = ();

    fn handle(&mut self, msg: FetchTimeout, ctx: &mut Context<Self>) -> Self::Result {
        let (request_id, peer, block_hash) = match self.fetch_request {
            Some(ref fetch) => fetch.clone(),
            None => return,
        };
        if msg.request_id != request_id {
            return;
        }
        warn!(
            "[{}] ancestors request {} to {} timed out",
            "bootstrap".blue(),
            request_id,
            peer
        );
        self.fetch_request = None;
        self.tracker.record_failure(&peer);
        self.to_fetch.push_front(block_hash);
        self.next_fetch(ctx, Some(&peer));
    }
}

/// Internal: verify and accept the next executable block.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct ExecuteStep;

impl Handler<ExecuteStep> for Bootstrapper {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _msg: ExecuteStep, _ctx: &mut Context<Self>) -> Self::Result {
        if self.phase != Phase::Executing {
            return Box::pin(actix::fut::ready(()));
        }
        let parent = self.last_accepted.0;
        let mut children = self.queue.take_children(&parent);
        if children.is_empty() {
            self.finish();
            return Box::pin(actix::fut::ready(()));
        }
        if children.len() > 1 {
            warn!(
                "[{}] {} conflicting children at height {}, keeping the first fetched",
                "bootstrap".blue(),
                children.len(),
                self.last_accepted.1 + 1
            );
        }
        let block = children.remove(0);

        let vm = self.vm.clone();
        let executing = block.clone();
        async move {
            match vm.send(VmRequest::Verify(executing.clone())).await {
                Ok(VmResponse::Verified(VerifyOutcome::Valid)) => (),
                Ok(VmResponse::Verified(VerifyOutcome::Invalid(reason))) => return Err(reason),
                Ok(VmResponse::Verified(VerifyOutcome::Fatal(reason))) => return Err(reason),
                Ok(other) => return Err(format!("unexpected vm response: {:?}", other)),
                Err(err) => return Err(format!("vm unreachable: {:?}", err)),
            }
            match vm.send(VmRequest::Accept(executing)).await {
                Ok(VmResponse::Accepted(ExecOutcome::Ok)) => Ok(()),
                Ok(VmResponse::Accepted(ExecOutcome::Fatal(reason))) => Err(reason),
                Ok(other) => Err(format!("unexpected vm response: {:?}", other)),
                Err(err) => Err(format!("vm unreachable: {:?}", err)),
            }
        }
        .into_actor(self)
        .map(move |res, act, ctx| match res {
            Ok(()) => {
                let hash = match block.hash() {
                    Ok(hash) => hash,
                    Err(err) => {
                        act.abort(format!("unencodable fetched block: {:?}", err));
                        return;
                    }
                };
                if let Err(err) = storage::block::put_accepted(&act.chain_db, &block) {
                    act.abort(format!("persisting accepted block failed: {:?}", err));
                    return;
                }
                act.last_accepted = (hash, block.height);
                ctx.notify(ExecuteStep);
            }
            // Verification failures during bootstrap mean disagreement on
            // history; there is no peer to route around.
            Err(reason) => act.abort(reason),
        })
        .boxed_local()
    }
}

/// Introspection for tests and status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "BootstrapStatus")]
pub struct GetBootstrapStatus;

#[derive(Debug, Clone, Serialize, Deserialize, MessageResponse)]
pub struct BootstrapStatus {
    pub phase: Phase,
    pub queued: usize,
    pub last_accepted: BlockHash,
    pub height: BlockHeight,
    pub peer_health: Vec<(Id, f64)>,
}

impl Handler<GetBootstrapStatus> for Bootstrapper {
    type Result = BootstrapStatus;

    fn handle(&mut self, _msg: GetBootstrapStatus, _ctx: &mut Context<Self>) -> Self::Result {
        BootstrapStatus {
            phase: self.phase,
            queued: self.queue.len(),
            last_accepted: self.last_accepted.0,
            height: self.last_accepted.1,
            peer_health: self
                .beacons
                .iter()
                .map(|peer| (peer.clone(), self.tracker.health(peer)))
                .collect(),
        }
    }
}

#[cfg(test)]
#[path = "fetcher_tests.rs"]
mod fetcher_tests;
