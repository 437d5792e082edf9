use super::state::State;
use super::voter::{BlockedVoters, Voter};
use super::{Error, Result};

use crate::bag::Bag;
use crate::bootstrap::ANCESTORS_MAX_CONTAINERS;
use crate::colored::Colorize;
use crate::ids::Id;
use crate::params::Parameters;
use crate::poll::PollSet;
use crate::sender::SenderRequest;
use crate::snowman::{AddOutcome, Block, Decisions, Snowman};
use crate::storage;
use crate::timeout::AdaptiveTimeoutManager;
use crate::tracker::ResourceTracker;
use crate::types::{BlockHash, BlockHeight, RequestId};
use crate::validators::Validators;
use crate::vm::{ExecOutcome, VerifyOutcome, VmRequest, VmResponse};

use tracing::{debug, error, info};

use actix::{Actor, AsyncContext, Context, Handler, Recipient};
use actix::{ActorFutureExt, ResponseActFuture, WrapFuture};

use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Where a buffered vote ends up after bubbling.
enum Bubble {
    /// The nearest processing ancestor to vote for.
    Vote(BlockHash),
    /// A block that must arrive before the vote can be placed.
    Blocked(BlockHash),
    /// No candidate has a processing ancestor; the response is a drop.
    Drop,
}

/// The chain engine.
///
/// Binds the Snowman instance to the external `ChainVm` and `Sender`. All
/// consensus state is owned by this actor; the mailbox is the chain-exclusive
/// lock demanded by the protocol.
pub struct Engine {
    node_id: Id,
    params: Parameters,
    consensus: Option<Snowman>,
    polls: PollSet,
    timeouts: AdaptiveTimeoutManager,
    validators: Validators,
    resource: ResourceTracker,
    sender: Recipient<SenderRequest>,
    vm: Recipient<VmRequest>,
    chain_db: sled::Db,
    state: State,
    request_id: RequestId,
    /// Blocks parsed but not yet connected to the tree.
    pending_blocks: HashMap<BlockHash, Block>,
    /// Outstanding block fetches by request id.
    fetches: HashMap<RequestId, (Id, BlockHash)>,
    /// Block hashes with a fetch in flight.
    fetching: HashSet<BlockHash>,
    blocked: BlockedVoters,
    /// When each processing block entered the tree, for health reporting.
    block_ages: HashMap<BlockHash, Instant>,
}

impl Engine {
    pub fn new(
        node_id: Id,
        params: Parameters,
        validators: Validators,
        sender: Recipient<SenderRequest>,
        vm: Recipient<VmRequest>,
        chain_db: sled::Db,
    ) -> Self {
        Engine {
            node_id,
            params,
            consensus: None,
            polls: PollSet::new(),
            timeouts: AdaptiveTimeoutManager::new(),
            validators,
            resource: ResourceTracker::new(),
            sender,
            vm,
            chain_db,
            state: State::Initializing,
            request_id: 0,
            pending_blocks: HashMap::default(),
            fetches: HashMap::default(),
            fetching: HashSet::new(),
            blocked: BlockedVoters::new(),
            block_ages: HashMap::default(),
        }
    }

    fn running(&self) -> bool {
        self.state == State::NormalOp
    }

    /// Charges an inbound message to a peer's quota.
    fn admit(&mut self, peer: &Id) -> bool {
        if self.resource.admit(peer) {
            true
        } else {
            debug!("[{}] dropping message from over-quota peer {}", "engine".cyan(), peer);
            false
        }
    }

    fn halt(&mut self, reason: String) {
        error!("[{}] fatal: {} - halting chain", "engine".cyan(), reason);
        self.terminate();
    }

    fn terminate(&mut self) {
        self.state = State::Halted;
        self.polls.clear();
        self.blocked.clear();
        self.pending_blocks.clear();
        self.fetches.clear();
        self.fetching.clear();
        self.block_ages.clear();
    }

    /// A block either decided or reachable by walking the pending buffer.
    fn block_known(&self, block_hash: &BlockHash) -> bool {
        match self.consensus {
            Some(ref consensus) => {
                consensus.is_processing(block_hash)
                    || *block_hash == consensus.last_accepted().0
                    || self.pending_blocks.contains_key(block_hash)
            }
            None => false,
        }
    }

    /// Entry point for every block arriving from the network.
    fn on_receive_block(&mut self, ctx: &mut Context<Self>, source: Option<Id>, block: Block) {
        let block_hash = match block.hash() {
            Ok(hash) => hash,
            Err(err) => {
                debug!("[{}] undecodable block: {:?}", "engine".cyan(), err);
                return;
            }
        };
        let (last_accepted, last_height) = match self.consensus {
            Some(ref consensus) => consensus.last_accepted(),
            None => return,
        };

        if block.height <= last_height {
            // An already-decided height; nothing here can be affirmed.
            self.fulfill_unknown(ctx, block_hash);
            return;
        }
        if self.consensus.as_ref().map(|c| c.is_processing(&block_hash)).unwrap_or(false)
            || self.pending_blocks.contains_key(&block_hash)
        {
            self.fulfill_known(ctx, block_hash);
            return;
        }

        let parent = block.parent.clone();
        let parent_connected = self
            .consensus
            .as_ref()
            .map(|c| c.is_processing(&parent))
            .unwrap_or(false)
            || parent == last_accepted;
        if parent_connected {
            ctx.notify(VerifyBlock { source, block, gossip: false });
            return;
        }

        if self.pending_blocks.len() >= self.params.max_outstanding_items {
            debug!(
                "[{}] pending buffer full, dropping block {}",
                "engine".cyan(),
                hex::encode(block_hash)
            );
            self.fulfill_unknown(ctx, block_hash);
            return;
        }
        let _ = self.pending_blocks.insert(block_hash.clone(), block);
        if let Some(peer) = source.or_else(|| {
            self.validators.sample(1).and_then(|mut sample| sample.pop())
        }) {
            self.fetch(ctx, peer, parent);
        }
        self.fulfill_known(ctx, block_hash);
    }

    /// Inserts a verified block into the tree and runs the follow-up work.
    fn add_verified(
        &mut self,
        ctx: &mut Context<Self>,
        source: Option<Id>,
        block: Block,
        gossip: bool,
    ) {
        let block_hash = match block.hash() {
            Ok(hash) => hash,
            Err(err) => {
                self.halt(format!("undecodable verified block: {:?}", err));
                return;
            }
        };
        let bytes = match block.bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.halt(format!("unencodable verified block: {:?}", err));
                return;
            }
        };
        let height = block.height;
        let parent = block.parent.clone();
        let rejected_block = block.clone();

        let outcome = {
            let consensus = match self.consensus.as_mut() {
                Some(consensus) => consensus,
                None => return,
            };
            consensus.add(block)
        };
        match outcome {
            Ok(AddOutcome::Added) => {
                info!(
                    "[{}] block {} processing at height {}",
                    "engine".cyan(),
                    hex::encode(block_hash),
                    height
                );
                let _ = self.block_ages.insert(block_hash.clone(), Instant::now());
                self.fulfill_known(ctx, block_hash);
                self.connect_children(ctx, block_hash);
                if gossip && self.polls.len() < self.params.concurrent_polls {
                    let _ = self.send_query(ctx, block_hash, height, Some(bytes));
                }
                self.check_quiescence(ctx);
            }
            Ok(AddOutcome::Duplicate) => {
                self.fulfill_known(ctx, block_hash);
            }
            Ok(AddOutcome::Ignored) => {
                self.fulfill_unknown(ctx, block_hash);
            }
            Ok(AddOutcome::Rejected) => {
                debug!(
                    "[{}] block {} extends a decided branch",
                    "engine".cyan(),
                    hex::encode(block_hash)
                );
                self.fulfill_unknown(ctx, block_hash);
                self.prune_unconnectable(ctx, block_hash);
                ctx.notify(ExecuteDecisions {
                    accepted: vec![],
                    rejected: vec![rejected_block],
                });
            }
            Err(crate::snowman::Error::UnknownParent(_)) => {
                // The parent was decided away between receipt and
                // verification, or still needs fetching.
                if self.pending_blocks.len() < self.params.max_outstanding_items {
                    let _ = self.pending_blocks.insert(block_hash.clone(), rejected_block);
                    if let Some(peer) = source.or_else(|| {
                        self.validators.sample(1).and_then(|mut sample| sample.pop())
                    }) {
                        self.fetch(ctx, peer, parent);
                    }
                    self.fulfill_known(ctx, block_hash);
                } else {
                    self.fulfill_unknown(ctx, block_hash);
                }
            }
            Err(err) => self.halt(format!("consensus add failed: {:?}", err)),
        }
    }

    /// Re-issues verification for pending children of a newly connected block.
    fn connect_children(&mut self, ctx: &mut Context<Self>, parent: BlockHash) {
        let children: Vec<BlockHash> = self
            .pending_blocks
            .iter()
            .filter(|(_, block)| block.parent == parent)
            .map(|(hash, _)| hash.clone())
            .collect();
        for child in children {
            if let Some(block) = self.pending_blocks.remove(&child) {
                ctx.notify(VerifyBlock { source: None, block, gossip: false });
            }
        }
    }

    /// Drops pending blocks that can no longer connect below `root`.
    fn prune_unconnectable(&mut self, ctx: &mut Context<Self>, root: BlockHash) {
        let mut doomed = vec![root];
        let mut i = 0;
        while i < doomed.len() {
            let target = doomed[i];
            i += 1;
            let children: Vec<BlockHash> = self
                .pending_blocks
                .iter()
                .filter(|(_, block)| block.parent == target)
                .map(|(hash, _)| hash.clone())
                .collect();
            for child in children {
                let _ = self.pending_blocks.remove(&child);
                doomed.push(child);
            }
        }
        for hash in doomed.into_iter().skip(1) {
            self.fulfill_unknown(ctx, hash);
        }
    }

    /// Issues a block fetch unless one is already in flight.
    fn fetch(&mut self, ctx: &mut Context<Self>, peer: Id, block_hash: BlockHash) {
        if self.fetching.contains(&block_hash) || self.block_known(&block_hash) {
            return;
        }
        self.request_id += 1;
        let request_id = self.request_id;
        let _ = self.fetching.insert(block_hash.clone());
        let _ = self.fetches.insert(request_id, (peer.clone(), block_hash.clone()));
        debug!(
            "[{}] fetching block {} from {}",
            "engine".cyan(),
            hex::encode(block_hash),
            peer
        );
        let _ = self.sender.do_send(SenderRequest::Get { peer, request_id, block_hash });
        ctx.notify_later(FetchExpired { request_id }, self.timeouts.current());
    }

    fn on_fetch_failed(&mut self, ctx: &mut Context<Self>, request_id: RequestId) {
        if let Some((peer, block_hash)) = self.fetches.remove(&request_id) {
            debug!(
                "[{}] fetch of {} from {} failed",
                "engine".cyan(),
                hex::encode(block_hash),
                peer
            );
            let _ = self.fetching.remove(&block_hash);
            self.prune_unconnectable(ctx, block_hash);
            self.fulfill_unknown(ctx, block_hash);
        }
    }

    /// Releases voters parked on a block that is now walkable.
    fn fulfill_known(&mut self, ctx: &mut Context<Self>, block_hash: BlockHash) {
        for voter in self.blocked.take(&block_hash) {
            self.process_voter(ctx, voter);
        }
    }

    /// Releases voters parked on a block that will never be walkable; the
    /// candidate is abandoned, which can only lead to a drop, never a vote.
    fn fulfill_unknown(&mut self, ctx: &mut Context<Self>, block_hash: BlockHash) {
        for mut voter in self.blocked.take(&block_hash) {
            let _ = voter.abandoned.insert(block_hash.clone());
            self.process_voter(ctx, voter);
        }
    }

    /// Bubbles the candidate votes to the nearest processing ancestor.
    fn bubble(&self, voter: &Voter) -> Bubble {
        let consensus = match self.consensus {
            Some(ref consensus) => consensus,
            None => return Bubble::Drop,
        };
        let (last_accepted, _) = consensus.last_accepted();
        let num_options = voter.options.len();
        for (i, option) in voter.options.iter().enumerate() {
            // The last candidate is the peer's accepted tip; an unknown
            // accepted tip is just an old block, never worth a fetch.
            let last_option = i + 1 == num_options;
            let mut cursor = option.clone();
            loop {
                if consensus.is_processing(&cursor) {
                    return Bubble::Vote(cursor);
                }
                if cursor == last_accepted || voter.abandoned.contains(&cursor) {
                    break;
                }
                match self.pending_blocks.get(&cursor) {
                    Some(block) => cursor = block.parent.clone(),
                    None => {
                        if last_option {
                            break;
                        }
                        return Bubble::Blocked(cursor);
                    }
                }
            }
        }
        Bubble::Drop
    }

    fn process_voter(&mut self, ctx: &mut Context<Self>, voter: Voter) {
        let tally = match self.bubble(&voter) {
            Bubble::Vote(target) => self.polls.vote(voter.request_id, &voter.validator, target),
            Bubble::Blocked(missing) => {
                if self.blocked.len() >= self.params.max_outstanding_items {
                    debug!(
                        "[{}] voter buffer full, dropping chit from {}",
                        "engine".cyan(),
                        voter.validator
                    );
                    self.polls.drop_vote(voter.request_id, &voter.validator)
                } else {
                    let peer = voter.validator.clone();
                    let request_id = voter.request_id;
                    self.blocked.park(voter, missing.clone());
                    self.fetch(ctx, peer, missing);
                    debug!(
                        "[{}] chit for request {} blocked on a missing block",
                        "engine".cyan(),
                        request_id
                    );
                    None
                }
            }
            Bubble::Drop => self.polls.drop_vote(voter.request_id, &voter.validator),
        };
        if let Some(tally) = tally {
            self.apply_tally(ctx, tally);
        }
    }

    /// Records a completed poll and schedules the resulting VM work.
    fn apply_tally(&mut self, ctx: &mut Context<Self>, tally: Bag<BlockHash>) {
        let decisions = {
            let consensus = match self.consensus.as_mut() {
                Some(consensus) => consensus,
                None => return,
            };
            match consensus.record_poll(tally) {
                Ok(decisions) => decisions,
                Err(err) => {
                    self.halt(format!("record poll failed: {:?}", err));
                    return;
                }
            }
        };
        self.on_decisions(ctx, decisions);
    }

    fn on_decisions(&mut self, ctx: &mut Context<Self>, decisions: Decisions) {
        for block in decisions.accepted.iter() {
            if let Err(err) = storage::block::put_accepted(&self.chain_db, block) {
                self.halt(format!("persisting accepted block failed: {:?}", err));
                return;
            }
            if let Ok(hash) = block.hash() {
                let _ = self.block_ages.remove(&hash);
                self.connect_children(ctx, hash);
            }
        }
        for block in decisions.rejected.iter() {
            if let Ok(hash) = block.hash() {
                let _ = self.block_ages.remove(&hash);
                self.prune_unconnectable(ctx, hash);
            }
        }
        ctx.notify(ExecuteDecisions {
            accepted: decisions.accepted,
            rejected: decisions.rejected,
        });
    }

    /// No polls are started while nothing is processing; one new block wakes
    /// the poll loop up again.
    fn check_quiescence(&mut self, ctx: &mut Context<Self>) {
        let finalized = match self.consensus {
            Some(ref consensus) => consensus.finalized(),
            None => return,
        };
        if finalized && self.polls.is_empty() {
            debug!("[{}] can quiesce", "engine".cyan());
            return;
        }
        self.repoll(ctx);
    }

    /// Re-polls the current preference up to the concurrency bound.
    fn repoll(&mut self, ctx: &mut Context<Self>) {
        while self.running() && self.polls.len() < self.params.concurrent_polls {
            let (preference, height) = match self.consensus {
                Some(ref consensus) => {
                    if consensus.finalized() {
                        return;
                    }
                    let preference = consensus.preference();
                    let height = consensus
                        .get_block(&preference)
                        .map(|block| block.height)
                        .unwrap_or(consensus.last_accepted().1);
                    (preference, height)
                }
                None => return,
            };
            if !self.send_query(ctx, preference, height, None) {
                return;
            }
        }
    }

    /// Samples `k` validators and opens a poll. Returns false when the
    /// connected validator set cannot cover the sample.
    fn send_query(
        &mut self,
        ctx: &mut Context<Self>,
        block_hash: BlockHash,
        height: BlockHeight,
        push: Option<Vec<u8>>,
    ) -> bool {
        let peers = match self.validators.sample(self.params.k) {
            Some(peers) => peers,
            None => {
                debug!(
                    "[{}] insufficient connected validators for a poll of {}",
                    "engine".cyan(),
                    self.params.k
                );
                return false;
            }
        };
        self.request_id += 1;
        let request_id = self.request_id;
        let mut sampled = Bag::new();
        for peer in peers.iter() {
            sampled.add(peer.clone());
        }
        self.polls.make(request_id, sampled);
        let timeout = self.timeouts.register(request_id);
        match push {
            Some(block) => {
                let _ = self.sender.do_send(SenderRequest::PushQuery {
                    peers,
                    request_id,
                    block,
                    height,
                });
            }
            None => {
                let _ = self.sender.do_send(SenderRequest::PullQuery {
                    peers,
                    request_id,
                    block_hash,
                    height,
                });
            }
        }
        ctx.notify_later(QueryExpired { request_id }, timeout);
        true
    }

    /// Answers a query with our preferred tip, the preferred block at the
    /// requester's height and our last accepted block.
    fn send_chits(&mut self, peer: Id, request_id: RequestId, requested_height: BlockHeight) {
        let consensus = match self.consensus {
            Some(ref consensus) => consensus,
            None => return,
        };
        let (last_accepted, last_height) = consensus.last_accepted();
        let preferred = consensus.preference();
        let preferred_at_height = if requested_height >= last_height {
            consensus.preferred_at_height(requested_height).unwrap_or(preferred)
        } else {
            match storage::block::get_accepted_at_height(&self.chain_db, requested_height) {
                Ok(Some(hash)) => hash,
                _ => last_accepted,
            }
        };
        let _ = self.sender.do_send(SenderRequest::Chits {
            peer,
            request_id,
            preferred,
            preferred_at_height,
            accepted: last_accepted,
        });
    }

    /// Walks a chain child-to-parent across the tree and the accepted store.
    fn collect_ancestors(&self, first: Block) -> Vec<Vec<u8>> {
        let consensus = match self.consensus {
            Some(ref consensus) => consensus,
            None => return vec![],
        };
        let mut out = vec![];
        let mut cursor = Some(first);
        while let Some(block) = cursor {
            if out.len() >= ANCESTORS_MAX_CONTAINERS {
                break;
            }
            let parent = block.parent.clone();
            let height = block.height;
            match block.bytes() {
                Ok(bytes) => out.push(bytes),
                Err(_) => break,
            }
            if height == 0 {
                break;
            }
            cursor = consensus.get_block(&parent).cloned().or_else(|| {
                storage::block::get_accepted(&self.chain_db, height - 1, parent).ok()
            });
        }
        out
    }
}

impl Actor for Engine {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("[{}] started for node {}", "engine".cyan(), self.node_id);
    }
}

/// Moves the lifecycle forward without entering normal operation, notifying
/// collaborators of the transition.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct SetState {
    pub state: State,
}

impl Handler<SetState> for Engine {
    type Result = ();

    fn handle(&mut self, msg: SetState, _ctx: &mut Context<Self>) -> Self::Result {
        if self.state.can_advance_to(msg.state) {
            info!("[{}] state {} -> {}", "engine".cyan(), self.state, msg.state);
            self.state = msg.state;
        } else {
            debug!(
                "[{}] refusing state transition {} -> {}",
                "engine".cyan(),
                self.state,
                msg.state
            );
        }
    }
}

/// Enters normal operation rooted at the last accepted block. Sent by the
/// bootstrapper once the fetched chain has been executed.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct Start {
    pub last_accepted: BlockHash,
    pub height: BlockHeight,
}

impl Handler<Start> for Engine {
    type Result = ();

    fn handle(&mut self, msg: Start, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.state.can_advance_to(State::NormalOp) {
            debug!("[{}] ignoring start in state {}", "engine".cyan(), self.state);
            return;
        }
        info!(
            "[{}] entering normal operation at height {} ({})",
            "engine".cyan(),
            msg.height,
            hex::encode(msg.last_accepted)
        );
        self.consensus =
            Some(Snowman::new(self.params.clone(), msg.last_accepted, msg.height));
        self.state = State::NormalOp;
    }
}

/// A locally built block entering consensus.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "Result<()>")]
pub struct IssueBlock {
    pub block: Block,
}

impl Handler<IssueBlock> for Engine {
    type Result = Result<()>;

    fn handle(&mut self, msg: IssueBlock, ctx: &mut Context<Self>) -> Self::Result {
        if self.state == State::Halted {
            return Err(Error::EngineHalted);
        }
        if !self.running() {
            return Err(Error::NotReady);
        }
        if let Some(ref consensus) = self.consensus {
            if consensus.num_processing() >= self.params.optimal_processing {
                debug!(
                    "[{}] processing {} blocks, above the optimal {}",
                    "engine".cyan(),
                    consensus.num_processing(),
                    self.params.optimal_processing
                );
            }
        }
        ctx.notify(VerifyBlock { source: None, block: msg.block, gossip: true });
        Ok(())
    }
}

/// Internal: verify a connected block through the VM, then add it.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct VerifyBlock {
    source: Option<Id>,
    block: Block,
    gossip: bool,
}

impl Handler<VerifyBlock> for Engine {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: VerifyBlock, _ctx: &mut Context<Self>) -> Self::Result {
        let VerifyBlock { source, block, gossip } = msg;
        let vm = self.vm.clone();
        let request = VmRequest::Verify(block.clone());
        async move { vm.send(request).await }
            .into_actor(self)
            .map(move |res, act, ctx| {
                if !act.running() {
                    return;
                }
                match res {
                    Ok(VmResponse::Verified(VerifyOutcome::Valid)) => {
                        act.add_verified(ctx, source, block, gossip)
                    }
                    Ok(VmResponse::Verified(VerifyOutcome::Invalid(reason))) => {
                        if let Ok(hash) = block.hash() {
                            info!(
                                "[{}] block {} failed verification: {}",
                                "engine".cyan(),
                                hex::encode(hash),
                                reason
                            );
                            act.fulfill_unknown(ctx, hash);
                        }
                    }
                    Ok(VmResponse::Verified(VerifyOutcome::Fatal(reason))) => act.halt(reason),
                    Ok(other) => {
                        act.halt(format!("unexpected vm response to verify: {:?}", other))
                    }
                    Err(err) => act.halt(format!("vm unreachable: {:?}", err)),
                }
            })
            .boxed_local()
    }
}

/// Internal: run accept/reject decisions through the VM in order, then update
/// the VM's building preference.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct ExecuteDecisions {
    accepted: Vec<Block>,
    rejected: Vec<Block>,
}

impl Handler<ExecuteDecisions> for Engine {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: ExecuteDecisions, _ctx: &mut Context<Self>) -> Self::Result {
        let vm = self.vm.clone();
        let preference = self.consensus.as_ref().map(|c| c.preference());
        async move {
            for block in msg.rejected {
                match vm.send(VmRequest::Reject(block)).await {
                    Ok(VmResponse::Rejected(ExecOutcome::Ok)) => (),
                    Ok(VmResponse::Rejected(ExecOutcome::Fatal(reason))) => return Err(reason),
                    Ok(other) => {
                        return Err(format!("unexpected vm response to reject: {:?}", other))
                    }
                    Err(err) => return Err(format!("vm unreachable: {:?}", err)),
                }
            }
            for block in msg.accepted {
                match vm.send(VmRequest::Accept(block)).await {
                    Ok(VmResponse::Accepted(ExecOutcome::Ok)) => (),
                    Ok(VmResponse::Accepted(ExecOutcome::Fatal(reason))) => return Err(reason),
                    Ok(other) => {
                        return Err(format!("unexpected vm response to accept: {:?}", other))
                    }
                    Err(err) => return Err(format!("vm unreachable: {:?}", err)),
                }
            }
            if let Some(preference) = preference {
                match vm.send(VmRequest::SetPreference(preference)).await {
                    Ok(_) => (),
                    Err(err) => return Err(format!("vm unreachable: {:?}", err)),
                }
            }
            Ok(())
        }
        .into_actor(self)
        .map(|res, act, ctx| match res {
            Ok(()) => {
                if act.running() {
                    act.check_quiescence(ctx);
                }
            }
            Err(reason) => act.halt(reason),
        })
        .boxed_local()
    }
}

/// An inbound query carrying the block bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct PushQuery {
    pub from: Id,
    pub request_id: RequestId,
    pub block: Vec<u8>,
    pub requested_height: BlockHeight,
}

impl Handler<PushQuery> for Engine {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: PushQuery, _ctx: &mut Context<Self>) -> Self::Result {
        let PushQuery { from, request_id, block, requested_height } = msg;
        if !self.running() || !self.admit(&from) {
            return Box::pin(actix::fut::ready(()));
        }
        let vm = self.vm.clone();
        async move { vm.send(VmRequest::ParseBlock(block)).await }
            .into_actor(self)
            .map(move |res, act, ctx| {
                if !act.running() {
                    return;
                }
                match res {
                    Ok(VmResponse::ParsedBlock(Some(block))) => {
                        act.on_receive_block(ctx, Some(from.clone()), block);
                        act.send_chits(from, request_id, requested_height);
                    }
                    Ok(VmResponse::ParsedBlock(None)) => {
                        debug!(
                            "[{}] malformed block in push query from {}",
                            "engine".cyan(),
                            from
                        );
                        act.send_chits(from, request_id, requested_height);
                    }
                    Ok(other) => {
                        act.halt(format!("unexpected vm response to parse: {:?}", other))
                    }
                    Err(err) => act.halt(format!("vm unreachable: {:?}", err)),
                }
            })
            .boxed_local()
    }
}

/// An inbound query naming a block by id.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct PullQuery {
    pub from: Id,
    pub request_id: RequestId,
    pub block_hash: BlockHash,
    pub requested_height: BlockHeight,
}

impl Handler<PullQuery> for Engine {
    type Result = ();

    fn handle(&mut self, msg: PullQuery, ctx: &mut Context<Self>) -> Self::Result {
        if !self.running() || !self.admit(&msg.from) {
            return;
        }
        if !self.block_known(&msg.block_hash) && !self.fetching.contains(&msg.block_hash) {
            self.fetch(ctx, msg.from.clone(), msg.block_hash);
        }
        self.send_chits(msg.from, msg.request_id, msg.requested_height);
    }
}

/// A peer's response to one of our queries.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct Chits {
    pub from: Id,
    pub request_id: RequestId,
    pub preferred: BlockHash,
    pub preferred_at_height: BlockHash,
    pub accepted: BlockHash,
}

impl Handler<Chits> for Engine {
    type Result = ();

    fn handle(&mut self, msg: Chits, ctx: &mut Context<Self>) -> Self::Result {
        if !self.running() || !self.admit(&msg.from) {
            return;
        }
        if !self.polls.contains(msg.request_id) {
            debug!(
                "[{}] dropping chits for unknown request {} from {}",
                "engine".cyan(),
                msg.request_id,
                msg.from
            );
            return;
        }
        self.timeouts.observe_response(msg.request_id);
        let voter = Voter::new(
            msg.from,
            msg.request_id,
            vec![msg.preferred, msg.preferred_at_height, msg.accepted],
        );
        self.process_voter(ctx, voter);
    }
}

/// A block delivered in response to one of our `Get` requests.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct Put {
    pub from: Id,
    pub request_id: RequestId,
    pub block: Vec<u8>,
}

impl Handler<Put> for Engine {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: Put, _ctx: &mut Context<Self>) -> Self::Result {
        let Put { from, request_id, block } = msg;
        if !self.running() || !self.admit(&from) {
            return Box::pin(actix::fut::ready(()));
        }
        let expected = match self.fetches.get(&request_id) {
            Some((peer, expected)) if *peer == from => expected.clone(),
            _ => {
                debug!(
                    "[{}] dropping unsolicited put (request {}) from {}",
                    "engine".cyan(),
                    request_id,
                    from
                );
                return Box::pin(actix::fut::ready(()));
            }
        };
        let _ = self.fetches.remove(&request_id);
        let _ = self.fetching.remove(&expected);

        let vm = self.vm.clone();
        async move { vm.send(VmRequest::ParseBlock(block)).await }
            .into_actor(self)
            .map(move |res, act, ctx| {
                if !act.running() {
                    return;
                }
                match res {
                    Ok(VmResponse::ParsedBlock(Some(block))) => {
                        let matches = block.hash().map(|h| h == expected).unwrap_or(false);
                        if matches {
                            act.on_receive_block(ctx, Some(from), block);
                        } else {
                            debug!(
                                "[{}] peer {} answered a fetch with the wrong block",
                                "engine".cyan(),
                                from
                            );
                            act.prune_unconnectable(ctx, expected);
                            act.fulfill_unknown(ctx, expected);
                        }
                    }
                    Ok(VmResponse::ParsedBlock(None)) => {
                        debug!("[{}] malformed block in put from {}", "engine".cyan(), from);
                        act.prune_unconnectable(ctx, expected);
                        act.fulfill_unknown(ctx, expected);
                    }
                    Ok(other) => {
                        act.halt(format!("unexpected vm response to parse: {:?}", other))
                    }
                    Err(err) => act.halt(format!("vm unreachable: {:?}", err)),
                }
            })
            .boxed_local()
    }
}

/// The router's signal that a `Get` we issued will never be answered.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct GetFailed {
    pub from: Id,
    pub request_id: RequestId,
}

impl Handler<GetFailed> for Engine {
    type Result = ();

    fn handle(&mut self, msg: GetFailed, ctx: &mut Context<Self>) -> Self::Result {
        if !self.running() {
            return;
        }
        self.on_fetch_failed(ctx, msg.request_id);
    }
}

/// Internal: a fetch outlived its adaptive timeout.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct FetchExpired {
    request_id: RequestId,
}

impl Handler<FetchExpired> for Engine {
    type Result = ();

    fn handle(&mut self, msg: FetchExpired, ctx: &mut Context<Self>) -> Self::Result {
        if !self.running() {
            return;
        }
        self.on_fetch_failed(ctx, msg.request_id);
    }
}

/// Internal: a poll outlived its adaptive timeout; unresolved slots close as
/// drops and the poll terminates.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
struct QueryExpired {
    request_id: RequestId,
}

impl Handler<QueryExpired> for Engine {
    type Result = ();

    fn handle(&mut self, msg: QueryExpired, ctx: &mut Context<Self>) -> Self::Result {
        if !self.running() {
            return;
        }
        if let Some(tally) = self.polls.expire(msg.request_id) {
            self.timeouts.observe_timeout(msg.request_id);
            debug!("[{}] poll {} expired", "engine".cyan(), msg.request_id);
            self.apply_tally(ctx, tally);
        }
    }
}

/// A peer requesting a block by id.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct Get {
    pub from: Id,
    pub request_id: RequestId,
    pub block_hash: BlockHash,
}

impl Handler<Get> for Engine {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: Get, _ctx: &mut Context<Self>) -> Self::Result {
        let Get { from, request_id, block_hash } = msg;
        if !self.running() || !self.admit(&from) {
            return Box::pin(actix::fut::ready(()));
        }
        // The tree and the accepted pointer answer synchronously.
        if let Some(ref consensus) = self.consensus {
            let served = consensus
                .get_block(&block_hash)
                .cloned()
                .or_else(|| self.pending_blocks.get(&block_hash).cloned());
            if let Some(block) = served {
                if let Ok(bytes) = block.bytes() {
                    let _ = self.sender.do_send(SenderRequest::Put {
                        peer: from,
                        request_id,
                        block: bytes,
                    });
                }
                return Box::pin(actix::fut::ready(()));
            }
        }
        let vm = self.vm.clone();
        async move { vm.send(VmRequest::GetBlock(block_hash)).await }
            .into_actor(self)
            .map(move |res, act, _ctx| match res {
                Ok(VmResponse::FoundBlock(Some(block))) => {
                    if let Ok(bytes) = block.bytes() {
                        let _ = act.sender.do_send(SenderRequest::Put {
                            peer: from,
                            request_id,
                            block: bytes,
                        });
                    }
                }
                // An unknown block is benign; the peer's fetch times out.
                Ok(VmResponse::FoundBlock(None)) => (),
                Ok(other) => act.halt(format!("unexpected vm response to get: {:?}", other)),
                Err(err) => act.halt(format!("vm unreachable: {:?}", err)),
            })
            .boxed_local()
    }
}

/// A peer requesting a batch of ancestors for a bootstrap walk.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct GetAncestors {
    pub from: Id,
    pub request_id: RequestId,
    pub block_hash: BlockHash,
}

impl Handler<GetAncestors> for Engine {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: GetAncestors, _ctx: &mut Context<Self>) -> Self::Result {
        let GetAncestors { from, request_id, block_hash } = msg;
        if !self.running() || !self.admit(&from) {
            return Box::pin(actix::fut::ready(()));
        }
        if let Some(ref consensus) = self.consensus {
            if let Some(block) = consensus.get_block(&block_hash).cloned() {
                let blocks = self.collect_ancestors(block);
                let _ = self.sender.do_send(SenderRequest::Ancestors {
                    peer: from,
                    request_id,
                    blocks,
                });
                return Box::pin(actix::fut::ready(()));
            }
        }
        let vm = self.vm.clone();
        async move { vm.send(VmRequest::GetBlock(block_hash)).await }
            .into_actor(self)
            .map(move |res, act, _ctx| match res {
                Ok(VmResponse::FoundBlock(Some(block))) => {
                    let blocks = act.collect_ancestors(block);
                    let _ = act.sender.do_send(SenderRequest::Ancestors {
                        peer: from,
                        request_id,
                        blocks,
                    });
                }
                Ok(VmResponse::FoundBlock(None)) => (),
                Ok(other) => act.halt(format!("unexpected vm response to get: {:?}", other)),
                Err(err) => act.halt(format!("vm unreachable: {:?}", err)),
            })
            .boxed_local()
    }
}

/// A beacon request for the tips of our accepted chain.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct GetAcceptedFrontier {
    pub from: Id,
    pub request_id: RequestId,
}

impl Handler<GetAcceptedFrontier> for Engine {
    type Result = ();

    fn handle(&mut self, msg: GetAcceptedFrontier, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.running() || !self.admit(&msg.from) {
            return;
        }
        if let Some(ref consensus) = self.consensus {
            let (last_accepted, _) = consensus.last_accepted();
            let _ = self.sender.do_send(SenderRequest::AcceptedFrontier {
                peer: msg.from,
                request_id: msg.request_id,
                frontier: vec![last_accepted],
            });
        }
    }
}

/// A validator connected; it becomes sampleable.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct PeerConnected {
    pub peer: Id,
}

impl Handler<PeerConnected> for Engine {
    type Result = ();

    fn handle(&mut self, msg: PeerConnected, _ctx: &mut Context<Self>) -> Self::Result {
        self.validators.connect(msg.peer);
    }
}

/// A validator disconnected.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct PeerDisconnected {
    pub peer: Id,
}

impl Handler<PeerDisconnected> for Engine {
    type Result = ();

    fn handle(&mut self, msg: PeerDisconnected, _ctx: &mut Context<Self>) -> Self::Result {
        self.validators.disconnect(&msg.peer);
    }
}

/// Orderly shutdown: outstanding polls are cancelled, nothing new starts.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for Engine {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self>) -> Self::Result {
        info!("[{}] shutting down", "engine".cyan());
        self.terminate();
    }
}

/// Health snapshot exposed to operators instead of in-band errors to peers.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "Health")]
pub struct HealthCheck;

#[derive(Debug, Clone, Serialize, Deserialize, MessageResponse)]
pub struct Health {
    pub percent_connected: f64,
    pub outstanding_polls: usize,
    pub longest_running_poll_ms: u64,
    pub num_processing: usize,
    pub longest_processing_block_ms: u64,
    pub healthy: bool,
}

impl Handler<HealthCheck> for Engine {
    type Result = Health;

    fn handle(&mut self, _msg: HealthCheck, _ctx: &mut Context<Self>) -> Self::Result {
        let longest_poll = self
            .polls
            .longest_outstanding()
            .map(|age| age.as_millis() as u64)
            .unwrap_or(0);
        let longest_block = self
            .block_ages
            .values()
            .map(|since| since.elapsed().as_millis() as u64)
            .max()
            .unwrap_or(0);
        let num_processing =
            self.consensus.as_ref().map(|c| c.num_processing()).unwrap_or(0);
        let healthy = self.state == State::NormalOp
            && self.polls.len() <= self.params.max_outstanding_items
            && longest_block <= self.params.max_item_processing_time_ms;
        Health {
            percent_connected: self.validators.percent_connected(),
            outstanding_polls: self.polls.len(),
            longest_running_poll_ms: longest_poll,
            num_processing,
            longest_processing_block_ms: longest_block,
            healthy,
        }
    }
}

/// Introspection for tests and status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "EngineStatus")]
pub struct GetStatus;

#[derive(Debug, Clone, Serialize, Deserialize, MessageResponse)]
pub struct EngineStatus {
    pub state: State,
    pub num_processing: usize,
    pub preference: BlockHash,
    pub last_accepted: BlockHash,
    pub last_accepted_height: BlockHeight,
    pub outstanding_polls: usize,
    pub pending_blocks: usize,
    pub blocked_voters: usize,
}

impl Handler<GetStatus> for Engine {
    type Result = EngineStatus;

    fn handle(&mut self, _msg: GetStatus, _ctx: &mut Context<Self>) -> Self::Result {
        let (preference, last_accepted, last_accepted_height, num_processing) =
            match self.consensus {
                Some(ref consensus) => {
                    let (last_accepted, height) = consensus.last_accepted();
                    (
                        consensus.preference(),
                        last_accepted,
                        height,
                        consensus.num_processing(),
                    )
                }
                None => ([0u8; 32], [0u8; 32], 0, 0),
            };
        EngineStatus {
            state: self.state,
            num_processing,
            preference,
            last_accepted,
            last_accepted_height,
            outstanding_polls: self.polls.len(),
            pending_blocks: self.pending_blocks.len(),
            blocked_voters: self.blocked.len(),
        }
    }
}

#[cfg(test)]
#[path = "transitive_tests.rs"]
mod transitive_tests;
