use super::block::Block;
use super::{Error, Result};

use crate::bag::Bag;
use crate::params::Parameters;
use crate::snowball::NnarySnowball;
use crate::types::{BlockHash, BlockHeight};

use tracing::{debug, info};

use crate::colored::Colorize;

use std::collections::{HashMap, HashSet};

/// The outcome of inserting a block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AddOutcome {
    /// The block entered the tree as a processing block.
    Added,
    /// The block is already known; the insert was a no-op.
    Duplicate,
    /// The block is at or below the last accepted height.
    Ignored,
    /// The block descends from an already-decided ancestor and never entered
    /// the tree. The caller should issue the VM reject.
    Rejected,
}

/// Blocks decided by a poll, in decision order: accepted blocks come in
/// strictly increasing height order, each preceded by the rejection of its
/// conflicting siblings.
#[derive(Debug, Clone, Default)]
pub struct Decisions {
    pub accepted: Vec<Block>,
    pub rejected: Vec<Block>,
}

impl Decisions {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

/// A node of the consensus tree.
///
/// The root (the last accepted block) keeps no block data; every other node is
/// a processing block. A node grows a snowball instance with its first child,
/// deciding which child extends the chain.
struct SnowmanBlock {
    block: Option<Block>,
    sb: Option<NnarySnowball>,
    children: Vec<BlockHash>,
    should_falter: bool,
}

impl SnowmanBlock {
    fn root() -> Self {
        SnowmanBlock { block: None, sb: None, children: vec![], should_falter: false }
    }

    fn new(block: Block) -> Self {
        SnowmanBlock { block: Some(block), sb: None, children: vec![], should_falter: false }
    }

    fn add_child(&mut self, params: &Parameters, child: BlockHash) {
        if self.sb.is_none() {
            self.sb = Some(NnarySnowball::new(
                params.alpha_preference,
                params.alpha_confidence,
                params.beta,
                child,
            ));
        }
        self.children.push(child);
    }
}

/// The Snowman consensus instance.
///
/// An arena of nodes indexed by block hash; children are stored as hash lists
/// in insertion order, which keeps rejection cascades free of ownership
/// cycles.
pub struct Snowman {
    params: Parameters,
    blocks: HashMap<BlockHash, SnowmanBlock>,
    preferred_ids: HashSet<BlockHash>,
    preference: BlockHash,
    last_accepted: BlockHash,
    last_accepted_height: BlockHeight,
}

impl Snowman {
    /// Seeds the tree with a single accepted root.
    pub fn new(params: Parameters, last_accepted: BlockHash, height: BlockHeight) -> Self {
        let mut blocks = HashMap::default();
        let _ = blocks.insert(last_accepted.clone(), SnowmanBlock::root());
        Snowman {
            params,
            blocks,
            preferred_ids: HashSet::new(),
            preference: last_accepted,
            last_accepted,
            last_accepted_height: height,
        }
    }

    /// Inserts a processing block whose parent must be known.
    ///
    /// Throws [Error::UnknownParent] when the parent is above the accepted
    /// height and not in the tree, indicating the caller must fetch the
    /// ancestry first.
    pub fn add(&mut self, block: Block) -> Result<AddOutcome> {
        let block_hash = block.hash()?;
        if block.height <= self.last_accepted_height {
            debug!(
                "[{}] block {} at height {} is below the accepted frontier",
                "snowman".magenta(),
                hex::encode(block_hash),
                block.height
            );
            return Ok(AddOutcome::Ignored);
        }
        if self.blocks.contains_key(&block_hash) {
            return Ok(AddOutcome::Duplicate);
        }

        let parent = block.parent.clone();
        if let Some(parent_node) = self.blocks.get_mut(&parent) {
            parent_node.add_child(&self.params, block_hash.clone());
            let _ = self.blocks.insert(block_hash.clone(), SnowmanBlock::new(block));
            // Extending the current preference makes the new block preferred.
            if self.preference == parent {
                self.preference = block_hash.clone();
                let _ = self.preferred_ids.insert(block_hash);
            }
            return Ok(AddOutcome::Added);
        }

        if block.height == self.last_accepted_height + 1 {
            // The parent sits at the accepted height yet is not the accepted
            // block: the branch has already been decided against.
            return Ok(AddOutcome::Rejected);
        }
        Err(Error::UnknownParent(parent))
    }

    /// Advances Snowball on every processing block on the path from the root
    /// to any voted block and drains the resulting decisions.
    pub fn record_poll(&mut self, votes: Bag<BlockHash>) -> Result<Decisions> {
        let child_bags = self.bubble_votes(votes);

        // Every node holding an instance either records this poll or falters.
        // A faltered node resets its confidence right before its next poll so
        // that only consecutive successes finalize.
        let node_ids: Vec<BlockHash> = self.blocks.keys().cloned().collect();
        for node_id in node_ids {
            let node = match self.blocks.get_mut(&node_id) {
                Some(node) => node,
                None => continue,
            };
            let sb = match node.sb.as_mut() {
                Some(sb) => sb,
                None => continue,
            };
            match child_bags.get(&node_id) {
                Some(bag) => {
                    if node.should_falter {
                        sb.record_unsuccessful_poll();
                        node.should_falter = false;
                    }
                    sb.record_poll(bag);
                }
                None => {
                    node.should_falter = true;
                }
            }
        }

        let mut decisions = Decisions::default();
        loop {
            let root = self.blocks.get(&self.last_accepted).ok_or(Error::UnknownBlock(
                self.last_accepted.clone(),
            ))?;
            let finalized_child = match root.sb {
                Some(ref sb) if sb.finalized() => sb.preference(),
                _ => break,
            };
            self.accept_child(finalized_child, &mut decisions)?;
        }

        self.recompute_preference();
        Ok(decisions)
    }

    /// The current leaf preference: the deepest descendant reached by
    /// following preferred children from the root.
    pub fn preference(&self) -> BlockHash {
        self.preference
    }

    /// Whether the block lies on the currently preferred path.
    pub fn is_preferred(&self, block_hash: &BlockHash) -> bool {
        *block_hash == self.last_accepted || self.preferred_ids.contains(block_hash)
    }

    /// Whether the block is in the tree awaiting a decision.
    pub fn is_processing(&self, block_hash: &BlockHash) -> bool {
        *block_hash != self.last_accepted && self.blocks.contains_key(block_hash)
    }

    pub fn num_processing(&self) -> usize {
        self.blocks.len() - 1
    }

    /// True iff no processing blocks remain.
    pub fn finalized(&self) -> bool {
        self.blocks.len() == 1
    }

    pub fn last_accepted(&self) -> (BlockHash, BlockHeight) {
        (self.last_accepted, self.last_accepted_height)
    }

    /// Fetches a processing block.
    pub fn get_block(&self, block_hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(block_hash).and_then(|node| node.block.as_ref())
    }

    /// The block on the preferred path at the given height, if the height is
    /// still processing.
    pub fn preferred_at_height(&self, height: BlockHeight) -> Option<BlockHash> {
        if height == self.last_accepted_height {
            return Some(self.last_accepted);
        }
        let mut cursor = self.last_accepted;
        loop {
            let node = self.blocks.get(&cursor)?;
            match node.sb {
                Some(ref sb) => {
                    let pref = sb.preference();
                    let pref_height = self.blocks.get(&pref)?.block.as_ref()?.height;
                    if pref_height == height {
                        return Some(pref);
                    }
                    if pref_height > height {
                        return None;
                    }
                    cursor = pref;
                }
                None => return None,
            }
        }
    }

    /// Accumulates each vote onto the nearest processing ancestors: a vote
    /// for a block is also a vote for every processing ancestor, so vote
    /// weights are summed child-to-parent in decreasing height order.
    fn bubble_votes(&self, votes: Bag<BlockHash>) -> HashMap<BlockHash, Bag<BlockHash>> {
        let mut totals: HashMap<BlockHash, usize> = HashMap::default();
        for (block_hash, count) in votes.iter() {
            if self.is_processing(block_hash) {
                *totals.entry(block_hash.clone()).or_insert(0) += *count;
            }
        }

        let mut order: Vec<(BlockHeight, BlockHash)> = self
            .blocks
            .iter()
            .filter_map(|(block_hash, node)| {
                node.block.as_ref().map(|block| (block.height, block_hash.clone()))
            })
            .collect();
        order.sort();
        order.reverse();

        let mut child_bags: HashMap<BlockHash, Bag<BlockHash>> = HashMap::default();
        for (_, block_hash) in order {
            let total = totals.get(&block_hash).cloned().unwrap_or(0);
            if total == 0 {
                continue;
            }
            let parent = match self.blocks.get(&block_hash).and_then(|node| node.block.as_ref()) {
                Some(block) => block.parent.clone(),
                None => continue,
            };
            child_bags
                .entry(parent.clone())
                .or_insert_with(Bag::new)
                .add_count(block_hash.clone(), total);
            if self.is_processing(&parent) {
                *totals.entry(parent).or_insert(0) += total;
            }
        }
        child_bags
    }

    /// Accepts the finalized child of the root, rejects its siblings together
    /// with their descendants and makes the child the new root.
    fn accept_child(&mut self, child: BlockHash, decisions: &mut Decisions) -> Result<()> {
        let root = self
            .blocks
            .remove(&self.last_accepted)
            .ok_or(Error::UnknownBlock(self.last_accepted.clone()))?;
        for sibling in root.children.iter() {
            if *sibling != child {
                self.reject_subtree(sibling.clone(), decisions);
            }
        }

        let node = self.blocks.get_mut(&child).ok_or(Error::UnknownBlock(child.clone()))?;
        let block = node.block.take().ok_or(Error::UnknownBlock(child.clone()))?;
        info!(
            "[{}] accepted block {} at height {}",
            "snowman".magenta(),
            hex::encode(child),
            block.height
        );
        self.last_accepted = child;
        self.last_accepted_height = block.height;
        let _ = self.preferred_ids.remove(&child);
        decisions.accepted.push(block);
        Ok(())
    }

    /// Rejecting a block rejects all its descendants. The subtree is emitted
    /// parent-first so every rejected block still sees a consistent subtree.
    fn reject_subtree(&mut self, block_hash: BlockHash, decisions: &mut Decisions) {
        let mut stack = vec![block_hash];
        while let Some(block_hash) = stack.pop() {
            let node = match self.blocks.remove(&block_hash) {
                Some(node) => node,
                None => continue,
            };
            let _ = self.preferred_ids.remove(&block_hash);
            if let Some(block) = node.block {
                info!(
                    "[{}] rejected block {} at height {}",
                    "snowman".magenta(),
                    hex::encode(block_hash),
                    block.height
                );
                decisions.rejected.push(block);
            }
            stack.extend(node.children.iter().cloned());
        }
    }

    /// Recomputes the preferred path by following each node's preferred child
    /// from the root down to a leaf.
    fn recompute_preference(&mut self) {
        self.preferred_ids.clear();
        let mut cursor = self.last_accepted;
        loop {
            let node = match self.blocks.get(&cursor) {
                Some(node) => node,
                None => break,
            };
            match node.sb {
                Some(ref sb) => {
                    let pref = sb.preference();
                    let _ = self.preferred_ids.insert(pref.clone());
                    cursor = pref;
                }
                None => break,
            }
        }
        self.preference = cursor;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> Parameters {
        Parameters {
            k: 10,
            alpha_preference: 6,
            alpha_confidence: 8,
            beta: 3,
            concurrent_polls: 1,
            optimal_processing: 10,
            max_outstanding_items: 64,
            max_item_processing_time_ms: 30_000,
        }
    }

    fn genesis() -> (Block, BlockHash) {
        let block = Block::genesis(vec![]);
        let hash = block.hash().unwrap();
        (block, hash)
    }

    fn child_of(parent: &Block, tag: u8) -> (Block, BlockHash) {
        let block = Block::new(parent.hash().unwrap(), parent.height + 1, vec![tag]);
        let hash = block.hash().unwrap();
        (block, hash)
    }

    fn votes(entries: &[(BlockHash, usize)]) -> Bag<BlockHash> {
        let mut bag = Bag::new();
        for (block_hash, count) in entries.iter() {
            bag.add_count(block_hash.clone(), *count);
        }
        bag
    }

    #[actix_rt::test]
    async fn test_binary_agreement() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, b_hash) = child_of(&root, 2);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        assert_eq!(snowman.add(a.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(snowman.add(b.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(snowman.num_processing(), 2);
        // The first inserted child is preferred before any polls.
        assert_eq!(snowman.preference(), a_hash);

        for _ in 0..2 {
            let decisions =
                snowman.record_poll(votes(&[(a_hash, 9), (b_hash, 1)])).unwrap();
            assert!(decisions.is_empty());
        }
        let decisions = snowman.record_poll(votes(&[(a_hash, 9), (b_hash, 1)])).unwrap();
        assert_eq!(decisions.accepted, vec![a.clone()]);
        assert_eq!(decisions.rejected, vec![b.clone()]);

        assert_eq!(snowman.num_processing(), 0);
        assert!(snowman.finalized());
        assert_eq!(snowman.last_accepted(), (a_hash, 1));
    }

    #[actix_rt::test]
    async fn test_preference_flip() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, b_hash) = child_of(&root, 2);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        snowman.add(a.clone()).unwrap();
        snowman.add(b.clone()).unwrap();

        assert!(snowman.record_poll(votes(&[(a_hash, 9), (b_hash, 1)])).unwrap().is_empty());
        assert!(snowman.record_poll(votes(&[(a_hash, 5), (b_hash, 5)])).unwrap().is_empty());
        assert!(snowman.record_poll(votes(&[(a_hash, 1), (b_hash, 9)])).unwrap().is_empty());
        assert!(snowman.record_poll(votes(&[(a_hash, 1), (b_hash, 9)])).unwrap().is_empty());
        assert_eq!(snowman.preference(), b_hash);

        let decisions = snowman.record_poll(votes(&[(a_hash, 1), (b_hash, 9)])).unwrap();
        assert_eq!(decisions.accepted, vec![b]);
        assert_eq!(decisions.rejected, vec![a]);
        assert_eq!(snowman.last_accepted(), (b_hash, 1));
    }

    #[actix_rt::test]
    async fn test_votes_bubble_to_ancestors() {
        let (root, root_hash) = genesis();
        let (p, p_hash) = child_of(&root, 1);
        let (c, c_hash) = child_of(&p, 2);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        snowman.add(p.clone()).unwrap();
        snowman.add(c.clone()).unwrap();
        assert_eq!(snowman.preference(), c_hash);

        // Votes for the leaf count for the whole chain; the cascade accepts
        // parent before child.
        for _ in 0..2 {
            assert!(snowman.record_poll(votes(&[(c_hash, 8)])).unwrap().is_empty());
        }
        let decisions = snowman.record_poll(votes(&[(c_hash, 8)])).unwrap();
        assert_eq!(decisions.accepted, vec![p, c]);
        assert!(decisions.rejected.is_empty());
        assert_eq!(snowman.last_accepted(), (c_hash, 2));
        assert!(snowman.finalized());
    }

    #[actix_rt::test]
    async fn test_reject_cascades_to_descendants() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, b_hash) = child_of(&root, 2);
        let (b_child, _) = child_of(&b, 3);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        snowman.add(a.clone()).unwrap();
        snowman.add(b.clone()).unwrap();
        snowman.add(b_child.clone()).unwrap();
        assert_eq!(snowman.num_processing(), 3);

        for _ in 0..2 {
            assert!(snowman
                .record_poll(votes(&[(a_hash, 9), (b_hash, 1)]))
                .unwrap()
                .is_empty());
        }
        let decisions = snowman.record_poll(votes(&[(a_hash, 9), (b_hash, 1)])).unwrap();
        assert_eq!(decisions.accepted, vec![a]);
        assert_eq!(decisions.rejected, vec![b, b_child]);
        assert!(snowman.finalized());
    }

    #[actix_rt::test]
    async fn test_faltered_confidence_does_not_carry() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, _b_hash) = child_of(&root, 2);

        let mut params = params();
        params.beta = 2;
        let mut snowman = Snowman::new(params, root_hash, 0);
        snowman.add(a).unwrap();
        snowman.add(b).unwrap();

        assert!(snowman.record_poll(votes(&[(a_hash, 8)])).unwrap().is_empty());
        // An empty poll falters the tree: the earlier success must not count
        // towards beta any more.
        assert!(snowman.record_poll(votes(&[])).unwrap().is_empty());
        assert!(snowman.record_poll(votes(&[(a_hash, 8)])).unwrap().is_empty());

        let decisions = snowman.record_poll(votes(&[(a_hash, 8)])).unwrap();
        assert_eq!(decisions.accepted.len(), 1);
    }

    #[actix_rt::test]
    async fn test_add_edge_cases() {
        let (root, root_hash) = genesis();
        let (a, _a_hash) = child_of(&root, 1);
        let (b, _b_hash) = child_of(&root, 2);
        let (b_child, _) = child_of(&b, 3);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        assert_eq!(snowman.add(a.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(snowman.add(a.clone()).unwrap(), AddOutcome::Duplicate);

        // Below or at the accepted height.
        assert_eq!(snowman.add(root.clone()).unwrap(), AddOutcome::Ignored);

        // An orphan whose parent is above the accepted height needs a fetch.
        match snowman.add(b_child.clone()) {
            Err(Error::UnknownParent(parent)) => assert_eq!(parent, b.hash().unwrap()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn test_add_to_decided_branch_rejects() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, _) = child_of(&root, 2);
        let (late, _) = child_of(&b, 4);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        snowman.add(a).unwrap();
        snowman.add(b).unwrap();
        for _ in 0..3 {
            let _ = snowman.record_poll(votes(&[(a_hash, 9)])).unwrap();
        }
        assert_eq!(snowman.last_accepted(), (a_hash, 1));

        // `late` extends the rejected block B, whose height equals the
        // accepted height: it is decided against without entering the tree.
        assert_eq!(snowman.add(late).unwrap(), AddOutcome::Rejected);
    }

    #[actix_rt::test]
    async fn test_is_preferred_and_heights() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, b_hash) = child_of(&root, 2);
        let (c, c_hash) = child_of(&a, 3);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        snowman.add(a).unwrap();
        snowman.add(b).unwrap();
        snowman.add(c).unwrap();

        assert!(snowman.is_preferred(&root_hash));
        assert!(snowman.is_preferred(&a_hash));
        assert!(snowman.is_preferred(&c_hash));
        assert!(!snowman.is_preferred(&b_hash));

        assert_eq!(snowman.preferred_at_height(0), Some(root_hash));
        assert_eq!(snowman.preferred_at_height(1), Some(a_hash));
        assert_eq!(snowman.preferred_at_height(2), Some(c_hash));
        assert_eq!(snowman.preferred_at_height(3), None);
    }

    #[actix_rt::test]
    async fn test_equal_strength_keeps_first_child() {
        let (root, root_hash) = genesis();
        let (a, a_hash) = child_of(&root, 1);
        let (b, b_hash) = child_of(&root, 2);

        let mut snowman = Snowman::new(params(), root_hash, 0);
        snowman.add(a).unwrap();
        snowman.add(b).unwrap();
        assert_eq!(snowman.preference(), a_hash);

        // B gains strength and takes the preference; an equalizing poll for A
        // does not take it back.
        assert!(snowman.record_poll(votes(&[(b_hash, 7)])).unwrap().is_empty());
        assert_eq!(snowman.preference(), b_hash);
        assert!(snowman.record_poll(votes(&[(a_hash, 7)])).unwrap().is_empty());
        assert_eq!(snowman.preference(), b_hash);
    }
}
