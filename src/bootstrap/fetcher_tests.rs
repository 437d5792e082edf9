//! Tests for the bootstrap fetcher.

use super::*;

use crate::engine::Start;
use crate::ids::Id;
use crate::sender::SenderRequest;
use crate::snowman::Block;
use crate::storage;
use crate::vm::{ExecOutcome, VerifyOutcome, VmRequest, VmResponse};

use actix::{Actor, Addr, Context, Handler};

async fn sleep_ms(m: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(m)).await;
}

// Sender substitute recording every outbound message
struct MockSender {
    sent: Vec<SenderRequest>,
}

impl MockSender {
    fn new() -> Self {
        Self { sent: vec![] }
    }
}

impl Actor for MockSender {
    type Context = Context<Self>;
}

impl Handler<SenderRequest> for MockSender {
    type Result = ();

    fn handle(&mut self, msg: SenderRequest, _ctx: &mut Context<Self>) -> Self::Result {
        self.sent.push(msg);
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "Vec<SenderRequest>")]
struct GetSent;

impl Handler<GetSent> for MockSender {
    type Result = Vec<SenderRequest>;

    fn handle(&mut self, _msg: GetSent, _ctx: &mut Context<Self>) -> Self::Result {
        self.sent.clone()
    }
}

// VM substitute recording the acceptance order
struct MockVm {
    accepted: Vec<[u8; 32]>,
    invalid_verify: Option<[u8; 32]>,
}

impl MockVm {
    fn new() -> Self {
        Self { accepted: vec![], invalid_verify: None }
    }
}

impl Actor for MockVm {
    type Context = Context<Self>;
}

impl Handler<VmRequest> for MockVm {
    type Result = VmResponse;

    fn handle(&mut self, msg: VmRequest, _ctx: &mut Context<Self>) -> Self::Result {
        match msg {
            VmRequest::ParseBlock(bytes) => {
                VmResponse::ParsedBlock(Block::from_bytes(&bytes).ok())
            }
            VmRequest::Verify(block) => {
                let hash = block.hash().unwrap();
                if self.invalid_verify == Some(hash) {
                    VmResponse::Verified(VerifyOutcome::Invalid("history mismatch".to_string()))
                } else {
                    VmResponse::Verified(VerifyOutcome::Valid)
                }
            }
            VmRequest::Accept(block) => {
                self.accepted.push(block.hash().unwrap());
                VmResponse::Accepted(ExecOutcome::Ok)
            }
            VmRequest::Reject(_) => VmResponse::Rejected(ExecOutcome::Ok),
            VmRequest::GetBlock(_) => VmResponse::FoundBlock(None),
            VmRequest::LastAccepted => VmResponse::LastAccepted([0u8; 32], 0),
            VmRequest::SetPreference(_) => VmResponse::PreferenceSet,
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "Vec<[u8; 32]>")]
struct GetAccepted;

impl Handler<GetAccepted> for MockVm {
    type Result = Vec<[u8; 32]>;

    fn handle(&mut self, _msg: GetAccepted, _ctx: &mut Context<Self>) -> Self::Result {
        self.accepted.clone()
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct SetInvalidVerify {
    hash: [u8; 32],
}

impl Handler<SetInvalidVerify> for MockVm {
    type Result = ();

    fn handle(&mut self, msg: SetInvalidVerify, _ctx: &mut Context<Self>) -> Self::Result {
        self.invalid_verify = Some(msg.hash);
    }
}

// Records the engine handoff
struct StartCollector {
    received: Vec<([u8; 32], u64)>,
}

impl StartCollector {
    fn new() -> Self {
        Self { received: vec![] }
    }
}

impl Actor for StartCollector {
    type Context = Context<Self>;
}

impl Handler<Start> for StartCollector {
    type Result = ();

    fn handle(&mut self, msg: Start, _ctx: &mut Context<Self>) -> Self::Result {
        self.received.push((msg.last_accepted, msg.height));
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "Vec<([u8; 32], u64)>")]
struct GetStarts;

impl Handler<GetStarts> for StartCollector {
    type Result = Vec<([u8; 32], u64)>;

    fn handle(&mut self, _msg: GetStarts, _ctx: &mut Context<Self>) -> Self::Result {
        self.received.clone()
    }
}

struct TestEnv {
    boot: Addr<Bootstrapper>,
    sender: Addr<MockSender>,
    vm: Addr<MockVm>,
    engine: Addr<StartCollector>,
    chain: Vec<Block>,
    hashes: Vec<[u8; 32]>,
    chain_db: sled::Db,
}

fn make_chain(n: u64) -> (Vec<Block>, Vec<[u8; 32]>) {
    let mut blocks = vec![Block::genesis(vec![])];
    for h in 1..=n {
        let parent = blocks.last().unwrap().hash().unwrap();
        blocks.push(Block::new(parent, h, vec![h as u8, (h >> 8) as u8]));
    }
    let hashes = blocks.iter().map(|block| block.hash().unwrap()).collect();
    (blocks, hashes)
}

async fn start_test_env(chain_len: u64, beacons: Vec<Id>) -> TestEnv {
    let sender = MockSender::new().start();
    let vm = MockVm::new().start();
    let engine = StartCollector::new().start();

    let (chain, hashes) = make_chain(chain_len);
    let chain_db = sled::Config::new().temporary(true).open().unwrap();
    let pending_db = sled::Config::new().temporary(true).open().unwrap();
    let _ = storage::block::put_accepted(&chain_db, &chain[0]).unwrap();

    let boot = Bootstrapper::new(
        Id::zero(),
        beacons,
        sender.clone().recipient(),
        vm.clone().recipient(),
        engine.clone().recipient(),
        pending_db,
        chain_db.clone(),
    )
    .unwrap()
    .start();

    TestEnv { boot, sender, vm, engine, chain, hashes, chain_db }
}

fn frontier_requests(sent: &[SenderRequest]) -> Vec<(Id, u32)> {
    sent.iter()
        .filter_map(|msg| match msg {
            SenderRequest::GetAcceptedFrontier { peer, request_id } => {
                Some((peer.clone(), *request_id))
            }
            _ => None,
        })
        .collect()
}

fn ancestor_request_after(sent: &[SenderRequest], after: u32) -> Option<(Id, u32, [u8; 32])> {
    sent.iter().find_map(|msg| match msg {
        SenderRequest::GetAncestors { peer, request_id, block_hash } if *request_id > after => {
            Some((peer.clone(), *request_id, *block_hash))
        }
        _ => None,
    })
}

// An `Ancestors` batch of up to `batch` blocks, child-to-parent from the
// requested hash.
fn serve_batch(env: &TestEnv, from: [u8; 32], batch: usize) -> Vec<Vec<u8>> {
    let start = env.hashes.iter().position(|hash| *hash == from).unwrap();
    let mut blocks = vec![];
    let mut i = start as i64;
    while i >= 0 && blocks.len() < batch {
        blocks.push(env.chain[i as usize].bytes().unwrap());
        i -= 1;
    }
    blocks
}

async fn answer_frontier(env: &TestEnv, tip: [u8; 32]) {
    let sent = env.sender.send(GetSent).await.unwrap();
    for (peer, request_id) in frontier_requests(&sent) {
        env.boot
            .send(AcceptedFrontier { from: peer, request_id, frontier: vec![tip] })
            .await
            .unwrap();
    }
}

async fn wait_for_phase(env: &TestEnv, phase: Phase) -> BootstrapStatus {
    for _ in 0..200 {
        let status = env.boot.send(GetBootstrapStatus).await.unwrap();
        if status.phase == phase {
            return status;
        }
        sleep_ms(10).await;
    }
    panic!("phase {:?} never reached", phase);
}

// Last accepted at height 0, peers at height 100: the fetch rounds fill the
// queue and blocks 1..=100 are accepted in order, exactly once each.
#[actix_rt::test]
async fn test_linear_catch_up() {
    let b1 = Id::one();
    let b2 = Id::two();
    let env = start_test_env(100, vec![b1, b2]).await;

    env.boot.send(StartBootstrap).await.unwrap();
    sleep_ms(20).await;
    answer_frontier(&env, env.hashes[100]).await;
    sleep_ms(20).await;

    let mut last_rid = 0u32;
    for _ in 0..20 {
        let sent = env.sender.send(GetSent).await.unwrap();
        match ancestor_request_after(&sent, last_rid) {
            Some((peer, request_id, block_hash)) => {
                last_rid = request_id;
                let blocks = serve_batch(&env, block_hash, 30);
                env.boot
                    .send(Ancestors { from: peer, request_id, blocks })
                    .await
                    .unwrap();
                sleep_ms(20).await;
            }
            None => break,
        }
    }

    let status = wait_for_phase(&env, Phase::Done).await;
    assert_eq!(status.last_accepted, env.hashes[100]);
    assert_eq!(status.height, 100);
    assert_eq!(status.queued, 0);

    let accepted = env.vm.send(GetAccepted).await.unwrap();
    assert_eq!(accepted.len(), 100);
    for h in 1..=100usize {
        assert_eq!(accepted[h - 1], env.hashes[h]);
    }

    let starts = env.engine.send(GetStarts).await.unwrap();
    assert_eq!(starts, vec![(env.hashes[100], 100)]);

    let (last_hash, last_block) = storage::block::get_last_accepted(&env.chain_db).unwrap();
    assert_eq!(last_hash, env.hashes[100]);
    assert_eq!(last_block, env.chain[100]);
}

// A beacon reporting a foreign frontier is de-weighted but the plurality tip
// still bootstraps.
#[actix_rt::test]
async fn test_inconsistent_beacon_deweighted() {
    let b1 = Id::one();
    let b2 = Id::two();
    let b3 = Id::from_hash(&[3]);
    let env = start_test_env(2, vec![b1, b2, b3]).await;

    env.boot.send(StartBootstrap).await.unwrap();
    sleep_ms(20).await;

    let sent = env.sender.send(GetSent).await.unwrap();
    for (peer, request_id) in frontier_requests(&sent) {
        let tip = if peer == b3 { [9u8; 32] } else { env.hashes[2] };
        env.boot
            .send(AcceptedFrontier { from: peer, request_id, frontier: vec![tip] })
            .await
            .unwrap();
    }
    sleep_ms(20).await;

    let sent = env.sender.send(GetSent).await.unwrap();
    let (peer, request_id, block_hash) = ancestor_request_after(&sent, 0).unwrap();
    assert_eq!(block_hash, env.hashes[2]);
    let blocks = serve_batch(&env, block_hash, 30);
    env.boot.send(Ancestors { from: peer, request_id, blocks }).await.unwrap();

    let status = wait_for_phase(&env, Phase::Done).await;
    assert_eq!(status.height, 2);

    let health: std::collections::HashMap<Id, f64> =
        status.peer_health.into_iter().collect();
    assert!(health[&b3] < health[&b1]);
    assert!(health[&b3] > 0.0);
}

// A malformed batch rotates the fetch to another peer.
#[actix_rt::test]
async fn test_malformed_batch_rotates_peer() {
    let b1 = Id::one();
    let b2 = Id::two();
    let env = start_test_env(3, vec![b1, b2]).await;

    env.boot.send(StartBootstrap).await.unwrap();
    sleep_ms(20).await;
    answer_frontier(&env, env.hashes[3]).await;
    sleep_ms(20).await;

    let sent = env.sender.send(GetSent).await.unwrap();
    let (first_peer, request_id, _) = ancestor_request_after(&sent, 0).unwrap();
    env.boot
        .send(Ancestors {
            from: first_peer.clone(),
            request_id,
            blocks: vec![vec![0xde, 0xad, 0xbe, 0xef]],
        })
        .await
        .unwrap();
    sleep_ms(20).await;

    // The retry goes to the other peer.
    let sent = env.sender.send(GetSent).await.unwrap();
    let (second_peer, request_id, block_hash) =
        ancestor_request_after(&sent, request_id).unwrap();
    assert_ne!(second_peer, first_peer);
    assert_eq!(block_hash, env.hashes[3]);

    let blocks = serve_batch(&env, block_hash, 30);
    env.boot.send(Ancestors { from: second_peer, request_id, blocks }).await.unwrap();

    let status = wait_for_phase(&env, Phase::Done).await;
    assert_eq!(status.height, 3);

    let accepted = env.vm.send(GetAccepted).await.unwrap();
    assert_eq!(accepted, vec![env.hashes[1], env.hashes[2], env.hashes[3]]);
}

// Block verification failing during bootstrap is fatal.
#[actix_rt::test]
async fn test_verification_failure_is_fatal() {
    let b1 = Id::one();
    let env = start_test_env(2, vec![b1]).await;
    env.vm.send(SetInvalidVerify { hash: env.hashes[1] }).await.unwrap();

    env.boot.send(StartBootstrap).await.unwrap();
    sleep_ms(20).await;
    answer_frontier(&env, env.hashes[2]).await;
    sleep_ms(20).await;

    let sent = env.sender.send(GetSent).await.unwrap();
    let (peer, request_id, block_hash) = ancestor_request_after(&sent, 0).unwrap();
    let blocks = serve_batch(&env, block_hash, 30);
    env.boot.send(Ancestors { from: peer, request_id, blocks }).await.unwrap();

    let status = wait_for_phase(&env, Phase::Failed).await;
    assert_eq!(status.height, 0);

    let starts = env.engine.send(GetStarts).await.unwrap();
    assert!(starts.is_empty());
}
